//! Process-level configuration: CLI flags with environment-variable fallback,
//! the single place in the crate that reads `clap`. This is distinct from
//! the *sensor* configuration cache
//! (`engine::config_cache`), which is hot-reloaded from the store every 10
//! minutes and never touches the CLI.

use chrono::Weekday;
use clap::Parser;

use crate::clock::MS_PER_MIN;

#[derive(Parser, Debug, Clone)]
#[command(name = "coldchain-telemetry-proc", version, about)]
pub struct Settings {
    /// Message bus connection URL (subscribe-only).
    #[arg(long, env = "CC_BUS_URL")]
    pub bus_url: String,

    /// Single topic the ingestion dispatcher subscribes to.
    #[arg(long, env = "CC_BUS_TOPIC", default_value = "coldchain/+/telemetry")]
    pub bus_topic: String,

    /// Backing table-store connection URL.
    #[arg(long, env = "CC_STORE_URL")]
    pub store_url: String,

    /// Backing store access key/token.
    #[arg(long, env = "CC_STORE_KEY", default_value = "")]
    pub store_key: String,

    /// Outbound alert webhook URL.
    #[arg(long, env = "CC_WEBHOOK_URL")]
    pub webhook_url: String,

    /// Loopback port for the read-only health endpoint.
    #[arg(long, env = "CC_HEALTH_PORT", default_value_t = 9125)]
    pub health_port: u16,

    /// `log` level filter, e.g. "info", "debug".
    #[arg(long, env = "CC_LOG_LEVEL", default_value = "info")]
    pub log_level: String,

    /// IANA timezone the high-traffic weekday fallback is evaluated in.
    #[arg(long, env = "CC_TIMEZONE", default_value = "America/Sao_Paulo")]
    pub timezone: String,

    #[command(flatten)]
    pub thresholds: Thresholds,
}

/// Threshold and timing constants that drive alerting, collected under one
/// CLI group so every one of them is overridable without a rebuild.
#[derive(Parser, Debug, Clone)]
pub struct Thresholds {
    /// Global fallback for LIMIT_TEMP_MIN when a sensor's `temp_min` is null.
    #[arg(long, env = "CC_DEFAULT_TEMP_MIN", default_value_t = -30.0)]
    pub default_temp_min: f64,

    /// Global fallback for LIMIT_TEMP_MAX on non-high-traffic weekdays when
    /// a sensor's `temp_max` is null.
    #[arg(long, env = "CC_DEFAULT_TEMP_MAX", default_value_t = -5.0)]
    pub default_temp_max: f64,

    /// Fallback for LIMIT_TEMP_MAX on high-traffic weekdays.
    #[arg(long, env = "CC_HIGH_TRAFFIC_TEMP_MAX", default_value_t = -2.0)]
    pub high_traffic_temp_max: f64,

    /// Weekdays (1=Mon..7=Sun, ISO) treated as high-traffic. Default Wed/Thu.
    #[arg(long, env = "CC_HIGH_TRAFFIC_WEEKDAYS", value_delimiter = ',', default_value = "3,4")]
    pub high_traffic_weekdays: Vec<u8>,

    #[arg(long, env = "CC_DOOR_MAX_OPEN_MIN", default_value_t = 5)]
    pub door_max_open_minutes: i64,

    #[arg(long, env = "CC_WEBHOOK_MAX_RETRIES", default_value_t = 10)]
    pub webhook_max_retries: u32,
}

impl Thresholds {
    pub fn is_high_traffic_weekday(&self, weekday: Weekday) -> bool {
        let iso = weekday.number_from_monday() as u8;
        self.high_traffic_weekdays.contains(&iso)
    }
}

/// Numeric tuning bundle that differs between the NORMAL and ULTRA profiles.
/// ULTRA (configured `temp_min < -15`) has higher thresholds across the
/// board to reflect denser cold air physics.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProfileTunings {
    pub door_accel: f64,
    pub door_slope: f64,
    pub door_variance_threshold: f64,
    pub door_jerk: f64,
    pub defrost_min_slope: f64,
    pub defrost_variance_threshold: f64,
    pub defrost_min_r2: f64,
    pub ema_alpha: f64,
    pub defrost_end_delta: f64,
}

pub const NORMAL_TUNINGS: ProfileTunings = ProfileTunings {
    door_accel: 0.4,
    door_slope: 0.6,
    door_variance_threshold: 1.2,
    door_jerk: 0.5,
    defrost_min_slope: 0.15,
    defrost_variance_threshold: 0.5,
    defrost_min_r2: 0.8,
    ema_alpha: 0.3,
    defrost_end_delta: 2.0,
};

pub const ULTRA_TUNINGS: ProfileTunings = ProfileTunings {
    door_accel: 0.7,
    door_slope: 0.9,
    door_variance_threshold: 2.0,
    door_jerk: 0.8,
    defrost_min_slope: 0.2,
    defrost_variance_threshold: 0.7,
    defrost_min_r2: 0.8,
    ema_alpha: 0.25,
    defrost_end_delta: 3.0,
};

pub const DOOR_OPEN_CONFIRM_WINDOW_MS: i64 = 30 * 1_000;
pub const DOOR_CLOSE_CONFIRM_WINDOW_MS: i64 = 60 * 1_000;

pub const DEFROST_MIN_RUN_BEFORE_END_MS: i64 = 2 * MS_PER_MIN;
pub const DEFROST_SAFETY_TIMEOUT_MS: i64 = 60 * MS_PER_MIN;
pub const DEFROST_MIN_RUN_FOR_DELTA_END_MS: i64 = 5 * MS_PER_MIN;

pub const SOAK_ALTA_MS: i64 = 10 * MS_PER_MIN;
pub const SOAK_PREDITIVA_MS: i64 = 5 * MS_PER_MIN;
pub const ESCALATION_TO_CRITICA_MS: i64 = 30 * MS_PER_MIN;
pub const COOLDOWN_CRITICA_ALTA_MS: i64 = 15 * MS_PER_MIN;
pub const COOLDOWN_PREDITIVA_MS: i64 = 45 * MS_PER_MIN;

pub const GATEWAY_OFFLINE_AFTER_MS: i64 = 15 * MS_PER_MIN;
pub const GATEWAY_SISTEMA_ALERT_COOLDOWN_MS: i64 = 60 * MS_PER_MIN;

pub const SENSOR_STATE_TTL_MS: i64 = 24 * 60 * MS_PER_MIN;
pub const GATEWAY_HEARTBEAT_TTL_MS: i64 = 48 * 60 * MS_PER_MIN;
pub const WATCHLIST_PRUNE_FACTOR: i64 = 2;
