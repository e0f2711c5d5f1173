//! The data model: sensor configuration, sensor state, gateway
//! heartbeats, the alert watchlist, and the records that flow into the
//! persistence/dispatch buffers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::config::{ProfileTunings, NORMAL_TUNINGS, ULTRA_TUNINGS};
use crate::mac::Mac;
use crate::window::TimeSeriesWindow;

/// A sensor is ULTRA if its configured `temp_min < -15`, otherwise NORMAL.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum Profile {
    Normal,
    Ultra,
}

impl Profile {
    pub fn tunings(self) -> ProfileTunings {
        match self {
            Profile::Normal => NORMAL_TUNINGS,
            Profile::Ultra => ULTRA_TUNINGS,
        }
    }
}

/// Per-MAC thresholds, refreshed every 10 min from `sensor_configs`.
#[derive(Debug, Clone, PartialEq)]
pub struct SensorConfig {
    pub display_name: String,
    pub temp_max: Option<f64>,
    pub temp_min: Option<f64>,
    pub hum_max: Option<f64>,
    pub hum_min: Option<f64>,
    pub em_manutencao: bool,
    pub sensor_porta_vinculado: Option<Mac>,
}

impl SensorConfig {
    pub fn profile(&self) -> Profile {
        match self.temp_min {
            Some(min) if min < -15.0 => Profile::Ultra,
            _ => Profile::Normal,
        }
    }
}

/// Defrost-specific mutable fields on a sensor's in-memory state.
#[derive(Debug, Clone, Default)]
pub struct DefrostFlags {
    pub is_defrosting: bool,
    pub defrost_start_ts: Option<i64>,
    pub defrost_start_temp: Option<f64>,
    pub defrost_peak_temp: Option<f64>,
    /// True for exactly the one sample after START commits, blocking an
    /// immediate END on the same sample.
    pub defrost_just_started: bool,
}

/// A pending (unconfirmed) door-state transition candidate, tracked until
/// either a second detection confirms it within the confirmation window
/// or the window lapses and the candidate expires.
#[derive(Debug, Clone)]
pub struct PendingDoorTransition {
    pub target_open: bool,
    pub first_detected_ms: i64,
    pub detections: u32,
}

/// Full in-memory state for one sensor MAC. Created on first accepted
/// reading, mutated only by the ingestion path for that MAC, garbage
/// collected after 24 h of silence.
#[derive(Debug, Clone)]
pub struct SensorState {
    pub mac: Mac,

    pub last_temp: f64,
    pub last_hum: f64,
    pub last_rssi: Option<i32>,
    pub last_battery_pct: u8,
    pub last_reading_ms: i64,

    pub last_db_temp: Option<f64>,
    pub last_db_hum: Option<f64>,
    pub last_db_ts_ms: Option<i64>,

    pub history: TimeSeriesWindow,

    pub defrost: DefrostFlags,

    /// true = door currently inferred open.
    pub last_virtual_state: bool,
    pub door_pending: Option<PendingDoorTransition>,
    /// Timestamp the door was last observed to transition; used as
    /// "door-opened-since" for the door-left-open alert.
    pub last_analysis_ts_ms: Option<i64>,

    pub last_alert_sent_ts_ms: Option<i64>,
    pub last_variance: Option<f64>,
}

impl SensorState {
    pub fn new(mac: Mac, now_ms: i64, temp: f64, hum: f64, rssi: Option<i32>, battery_pct: u8) -> Self {
        Self {
            mac,
            last_temp: temp,
            last_hum: hum,
            last_rssi: rssi,
            last_battery_pct: battery_pct,
            last_reading_ms: now_ms,
            last_db_temp: None,
            last_db_hum: None,
            last_db_ts_ms: None,
            history: TimeSeriesWindow::new(),
            defrost: DefrostFlags::default(),
            last_virtual_state: false,
            door_pending: None,
            last_analysis_ts_ms: None,
            last_alert_sent_ts_ms: None,
            last_variance: None,
        }
    }

    /// Invariant: `is_defrosting` and `last_virtual_state` are mutually
    /// exclusive. Call after any defrost-state mutation.
    pub fn enforce_door_defrost_exclusion(&mut self) {
        if self.defrost.is_defrosting {
            self.last_virtual_state = false;
            self.door_pending = None;
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HeartbeatSource {
    Live,
    Db,
}

#[derive(Debug, Clone)]
pub struct GatewayHeartbeat {
    pub last_seen_ms: i64,
    pub source: HeartbeatSource,
    pub last_sistema_alert_ms: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
pub enum ProblemKind {
    TempHigh,
    TempLow,
    HumHigh,
    HumLow,
    DoorOpen,
    PredictiveHigh,
    GatewayOffline,
}

#[derive(Debug, Clone, Hash, PartialEq, Eq)]
pub struct WatchlistKey {
    pub mac: Mac,
    pub kind: ProblemKind,
}

#[derive(Debug, Clone)]
pub struct WatchlistEntry {
    pub first_seen_ms: i64,
    pub message: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, strum::Display)]
#[serde(rename_all = "UPPERCASE")]
pub enum Priority {
    Preditiva,
    Alta,
    Critica,
    Sistema,
}

#[derive(Debug, Clone, Serialize)]
pub struct AlertContext {
    pub current_temp: f64,
    pub projected_temp: Option<f64>,
    pub limit_temp_max: f64,
    pub limit_temp_min: f64,
    pub is_defrosting: bool,
    pub door_open: bool,
    pub slope: Option<f64>,
    pub r2: Option<f64>,
    pub variance: Option<f64>,
}

#[derive(Debug, Clone, Serialize)]
pub struct Alert {
    /// Unique per emission, so the webhook consumer can dedup retried
    /// deliveries (the same `Alert` may be POSTed more than once if the
    /// batch was re-prepended after a failed attempt).
    pub id: Uuid,
    pub sensor_name: String,
    pub sensor_mac: Mac,
    pub priority: Priority,
    pub messages: Vec<String>,
    pub timestamp: DateTime<Utc>,
    pub context: Option<AlertContext>,
}

#[derive(Debug, Clone, Serialize)]
pub struct TelemetryLogRecord {
    pub gw: Mac,
    pub mac: Mac,
    pub ts: DateTime<Utc>,
    pub temp: f64,
    pub hum: f64,
    pub batt: u8,
    pub rssi: Option<i32>,
}

#[derive(Debug, Clone, Serialize)]
pub struct DoorLogRecord {
    pub gateway_mac: Mac,
    pub sensor_mac: Mac,
    pub timestamp_read: DateTime<Utc>,
    pub is_open: bool,
    pub alarm_code: Option<i64>,
    pub battery_percent: u8,
    pub rssi: Option<i32>,
}
