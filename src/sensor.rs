//! Sensor state machine: the per-sample orchestration that ties the
//! time-series window, thermal analyzer, defrost detector, door
//! detector, and alert engine together in a fixed order:
//! defrost before door, both before alerting, persistence last.

use chrono::TimeZone;
use chrono_tz::Tz;

use crate::alert::{self, AlertInputs};
use crate::analyzer;
use crate::config::Thresholds;
use crate::defrost;
use crate::door::{self, DoorInputs};
use crate::mac::Mac;
use crate::model::{Alert, DoorLogRecord, SensorConfig, SensorState, TelemetryLogRecord, WatchlistEntry, WatchlistKey};

use std::collections::HashMap;

/// Deadband: persist only if the reading moved enough, or
/// enough wall-clock time passed since the last persisted row.
const DEADBAND_TEMP: f64 = 0.2;
const DEADBAND_HUM: f64 = 2.0;
const DEADBAND_MAX_AGE_MS: i64 = 10 * crate::clock::MS_PER_MIN;

pub struct SampleInput {
    pub gateway_mac: Mac,
    pub temp: f64,
    pub hum: f64,
    pub battery_pct: u8,
    pub rssi: Option<i32>,
    /// The gateway's self-reported reading time (falls back to ingestion
    /// wall-clock time when the payload omitted it). Used only to label
    /// persisted telemetry/door rows — never for window pruning, soak,
    /// cooldown, or defrost timing, which run off `now_ms` (§5: "all
    /// timers ... use monotonic wall time").
    pub event_ts_ms: i64,
}

#[derive(Default)]
pub struct SampleOutcome {
    pub alerts: Vec<Alert>,
    pub door_record: Option<DoorLogRecord>,
    pub telemetry_record: Option<TelemetryLogRecord>,
}

/// Runs one sample through the full per-sensor pipeline. `state` is created
/// by the caller on first sight of a MAC (engine.rs); this function only
/// mutates it, never creates or evicts it.
pub fn process_sample(
    state: &mut SensorState,
    config: &SensorConfig,
    watchlist: &mut HashMap<WatchlistKey, WatchlistEntry>,
    thresholds: &Thresholds,
    tz: Tz,
    input: &SampleInput,
    now_ms: i64,
) -> SampleOutcome {
    state.last_temp = input.temp;
    state.last_hum = input.hum;
    state.last_rssi = input.rssi;
    state.last_battery_pct = input.battery_pct;
    state.last_reading_ms = now_ms;

    // Step 1: maintenance mode drops everything but the reading itself.
    if config.em_manutencao {
        clear_all_watchlist_entries(watchlist, &state.mac);
        state.last_alert_sent_ts_ms = None;
        return SampleOutcome::default();
    }

    // Step 2: append to the window (subject to the 10 s minimum-gap rule).
    state.history.append(now_ms, input.temp);

    // Step 3: thermal analyzer, a pure function of the window.
    let profile = config.profile();
    let tunings = profile.tunings();
    let samples: Vec<(i64, f64)> = state.history.samples().iter().copied().collect();
    let metrics = analyzer::analyze(&samples, tunings);

    // Step 4: defrost detector, evaluated before the door detector.
    if let Some(metrics) = &metrics {
        defrost::evaluate(state, metrics, tunings, profile, input.temp, now_ms);
    }

    // Step 5: door detector; on transition, log it and stamp the
    // "door-opened-since" timestamp used by the door-left-open alert.
    let mut door_record = None;
    if let Some(metrics) = &metrics {
        let door_inputs = DoorInputs {
            metrics,
            tunings,
            temp: input.temp,
            temp_min: config.temp_min,
            temp_max: config.temp_max,
            now_ms,
        };
        if let Some(transition) = door::evaluate(state, &door_inputs) {
            state.last_analysis_ts_ms = Some(now_ms);
            door_record = Some(DoorLogRecord {
                gateway_mac: input.gateway_mac.clone(),
                sensor_mac: state.mac.clone(),
                timestamp_read: chrono::Utc
                    .timestamp_millis_opt(input.event_ts_ms)
                    .single()
                    .unwrap_or_else(chrono::Utc::now),
                is_open: transition.now_open,
                alarm_code: None,
                battery_percent: input.battery_pct,
                rssi: input.rssi,
            });
        }
    }

    // Step 6: alert engine.
    let alert_inputs = AlertInputs {
        config,
        thresholds,
        tz,
        metrics: metrics.as_ref(),
        door_max_open_ms: thresholds.door_max_open_minutes * crate::clock::MS_PER_MIN,
        now_ms,
    };
    let mut alerts = alert::evaluate(state, watchlist, &alert_inputs);
    for a in &mut alerts {
        a.sensor_name = config.display_name.clone();
    }

    // Step 7: deadband-filtered persistence.
    let telemetry_record = maybe_persist(state, input, now_ms);

    SampleOutcome { alerts, door_record, telemetry_record }
}

fn maybe_persist(
    state: &mut SensorState,
    input: &SampleInput,
    now_ms: i64,
) -> Option<TelemetryLogRecord> {
    let should_persist = match (state.last_db_temp, state.last_db_hum, state.last_db_ts_ms) {
        (Some(last_temp), Some(last_hum), Some(last_ts)) => {
            (input.temp - last_temp).abs() >= DEADBAND_TEMP
                || (input.hum - last_hum).abs() >= DEADBAND_HUM
                || now_ms - last_ts >= DEADBAND_MAX_AGE_MS
        }
        _ => true,
    };
    if !should_persist {
        return None;
    }
    state.last_db_temp = Some(input.temp);
    state.last_db_hum = Some(input.hum);
    state.last_db_ts_ms = Some(now_ms);
    Some(TelemetryLogRecord {
        gw: input.gateway_mac.clone(),
        mac: state.mac.clone(),
        ts: chrono::Utc.timestamp_millis_opt(input.event_ts_ms).single().unwrap_or_else(chrono::Utc::now),
        temp: input.temp,
        hum: input.hum,
        batt: input.battery_pct,
        rssi: input.rssi,
    })
}

fn clear_all_watchlist_entries(watchlist: &mut HashMap<WatchlistKey, WatchlistEntry>, mac: &Mac) {
    use crate::model::ProblemKind::*;
    for kind in [TempHigh, TempLow, HumHigh, HumLow, DoorOpen, PredictiveHigh, GatewayOffline] {
        watchlist.remove(&WatchlistKey { mac: mac.clone(), kind });
    }
}
