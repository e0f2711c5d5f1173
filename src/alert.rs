//! Alert engine: threshold resolution, defrost suppression, soak-time
//! confirmation via the watchlist, cooldown, and priority escalation.
//!
//! Each `ProblemKind` is tracked independently in the
//! watchlist so a sensor can be simultaneously on the temperature watchlist
//! and the door-left-open watchlist without either clobbering the other.

use std::collections::HashMap;

use chrono::{Datelike, TimeZone, Utc};
use chrono_tz::Tz;

use crate::analyzer::ThermalMetrics;
use crate::config::{
    Thresholds, COOLDOWN_CRITICA_ALTA_MS, COOLDOWN_PREDITIVA_MS, ESCALATION_TO_CRITICA_MS,
    SOAK_ALTA_MS, SOAK_PREDITIVA_MS,
};
use crate::mac::Mac;
use crate::model::{
    Alert, AlertContext, Priority, ProblemKind, Profile, SensorConfig, SensorState,
    WatchlistEntry, WatchlistKey,
};

/// Parses the configured IANA zone name, falling back to `America/Sao_Paulo`
/// if the operator supplied something `chrono-tz` doesn't recognise — a
/// config-refresh-style failure, never a panic.
pub fn resolve_timezone(name: &str) -> Tz {
    name.parse().unwrap_or(chrono_tz::America::Sao_Paulo)
}

fn limit_temp_max(config: &SensorConfig, thresholds: &Thresholds, tz: Tz, now_ms: i64) -> f64 {
    if let Some(max) = config.temp_max {
        return max;
    }
    let local = tz.timestamp_millis_opt(now_ms).single().unwrap_or_else(|| tz.from_utc_datetime(&Utc::now().naive_utc()));
    if thresholds.is_high_traffic_weekday(local.weekday()) {
        thresholds.high_traffic_temp_max
    } else {
        thresholds.default_temp_max
    }
}

fn limit_temp_min(config: &SensorConfig, thresholds: &Thresholds) -> f64 {
    config.temp_min.unwrap_or(thresholds.default_temp_min)
}

/// One detected problem before soak/cooldown resolution.
struct Candidate {
    kind: ProblemKind,
    priority: Priority,
    message: String,
    extreme: bool,
}

pub struct AlertInputs<'a> {
    pub config: &'a SensorConfig,
    pub thresholds: &'a Thresholds,
    pub tz: Tz,
    pub metrics: Option<&'a ThermalMetrics>,
    pub door_max_open_ms: i64,
    pub now_ms: i64,
}

/// Runs the full alert pipeline for one sample and returns every alert that
/// should actually be dispatched this tick (zero, one, or two: one
/// temperature/humidity alert plus one independent door-left-open alert).
pub fn evaluate(
    state: &mut SensorState,
    watchlist: &mut HashMap<WatchlistKey, WatchlistEntry>,
    inputs: &AlertInputs,
) -> Vec<Alert> {
    let limit_max = limit_temp_max(inputs.config, inputs.thresholds, inputs.tz, inputs.now_ms);
    let limit_min = limit_temp_min(inputs.config, inputs.thresholds);
    let temp = state.last_temp;
    let profile = inputs.config.profile();

    let mut candidate = None;
    let mut projected_temp = None;

    if state.defrost.is_defrosting {
        let tolerance = defrost_tolerance(profile);
        let anomalous = temp > limit_max + tolerance + 5.0 || temp < limit_min - 5.0;
        if anomalous {
            candidate = hard_limit_candidate(temp, limit_min, limit_max);
        } else {
            clear_temp_humidity_watchlist(watchlist, &state.mac);
        }
    } else {
        candidate = hard_limit_candidate(temp, limit_min, limit_max);
        if candidate.is_none() {
            if let Some(metrics) = inputs.metrics {
                let (predictive, proj) = predictive_candidate(metrics, temp, limit_max);
                candidate = predictive;
                projected_temp = proj;
            }
        }
        if candidate.is_none() {
            candidate = humidity_candidate(state.last_hum, inputs.config);
        }
    }

    // Normalisation: clear the kinds that are not the currently-active one.
    clear_watchlist_except(watchlist, &state.mac, candidate.as_ref().map(|c| c.kind));

    let mut alerts = Vec::new();

    if let Some(candidate) = candidate {
        let context = AlertContext {
            current_temp: temp,
            projected_temp,
            limit_temp_max: limit_max,
            limit_temp_min: limit_min,
            is_defrosting: state.defrost.is_defrosting,
            door_open: state.last_virtual_state,
            slope: inputs.metrics.map(|m| m.slope),
            r2: inputs.metrics.map(|m| m.r2),
            variance: inputs.metrics.map(|m| m.variance),
        };
        let mac = state.mac.clone();
        if let Some(alert) = resolve(
            watchlist,
            &mac,
            &mut state.last_alert_sent_ts_ms,
            candidate.kind,
            candidate.priority,
            candidate.message,
            candidate.extreme,
            Some(context),
            inputs.now_ms,
        ) {
            alerts.push(alert);
        }
    }

    if let Some(door_alert) = door_left_open_candidate(state, inputs, watchlist) {
        alerts.push(door_alert);
    }

    alerts
}

#[allow(clippy::too_many_arguments)]
fn resolve(
    watchlist: &mut HashMap<WatchlistKey, WatchlistEntry>,
    mac: &Mac,
    last_alert_sent_ts_ms: &mut Option<i64>,
    kind: ProblemKind,
    priority: Priority,
    message: String,
    extreme: bool,
    context: Option<AlertContext>,
    now_ms: i64,
) -> Option<Alert> {
    let key = WatchlistKey { mac: mac.clone(), kind };
    let required_soak = match priority {
        Priority::Preditiva => SOAK_PREDITIVA_MS,
        _ => SOAK_ALTA_MS,
    };

    let first_seen_ms = match watchlist.get(&key) {
        None => {
            watchlist.insert(key, WatchlistEntry { first_seen_ms: now_ms, message });
            return None;
        }
        Some(entry) => entry.first_seen_ms,
    };

    let age_ms = now_ms - first_seen_ms;
    if age_ms < required_soak {
        return None;
    }

    let final_priority =
        if age_ms >= ESCALATION_TO_CRITICA_MS && extreme { Priority::Critica } else { priority };

    let cooldown = match final_priority {
        Priority::Preditiva => COOLDOWN_PREDITIVA_MS,
        _ => COOLDOWN_CRITICA_ALTA_MS,
    };
    if let Some(last_sent) = *last_alert_sent_ts_ms {
        if now_ms - last_sent < cooldown {
            return None;
        }
    }

    *last_alert_sent_ts_ms = Some(now_ms);
    watchlist.insert(key, WatchlistEntry { first_seen_ms, message: message.clone() });

    Some(Alert {
        id: uuid::Uuid::new_v4(),
        sensor_name: String::new(),
        sensor_mac: mac.clone(),
        priority: final_priority,
        messages: vec![message],
        timestamp: Utc::now(),
        context,
    })
}

fn defrost_tolerance(profile: Profile) -> f64 {
    match profile {
        Profile::Ultra => 25.0,
        Profile::Normal => 15.0,
    }
}

fn hard_limit_candidate(temp: f64, limit_min: f64, limit_max: f64) -> Option<Candidate> {
    if temp < limit_min {
        Some(Candidate {
            kind: ProblemKind::TempLow,
            priority: Priority::Alta,
            message: format!("BAIXA: {temp:.1} C abaixo do limite {limit_min:.1} C"),
            extreme: temp < limit_min - 10.0,
        })
    } else if temp > limit_max {
        Some(Candidate {
            kind: ProblemKind::TempHigh,
            priority: Priority::Alta,
            message: format!("ALTA: {temp:.1} C acima do limite {limit_max:.1} C"),
            extreme: temp > limit_max + 10.0,
        })
    } else {
        None
    }
}

/// Only considered when `ciclo_degelo` is absent — a cycle-shaped window is
/// left to the defrost detector rather than double-counted as predictive.
fn predictive_candidate(
    metrics: &ThermalMetrics,
    temp: f64,
    limit_max: f64,
) -> (Option<Candidate>, Option<f64>) {
    if metrics.slope <= 0.1 || metrics.r2 <= 0.6 || metrics.ciclo_degelo.is_some() {
        return (None, None);
    }
    let temp_future = temp + metrics.slope * 15.0;
    let diff = temp_future - limit_max;
    let time_to_limit_min = (limit_max - temp) / metrics.slope;
    let in_horizon = time_to_limit_min > 0.0 && time_to_limit_min < 20.0;

    if !in_horizon {
        return (None, Some(temp_future));
    }
    let candidate = if diff >= 10.0 {
        Some(Candidate {
            kind: ProblemKind::PredictiveHigh,
            priority: Priority::Critica,
            message: format!("Projecao critica: {temp_future:.1} C em ~15 min"),
            extreme: false,
        })
    } else if diff >= 5.0 {
        Some(Candidate {
            kind: ProblemKind::PredictiveHigh,
            priority: Priority::Preditiva,
            message: format!("Projecao preditiva: {temp_future:.1} C em ~15 min"),
            extreme: false,
        })
    } else {
        None
    };
    (candidate, Some(temp_future))
}

fn humidity_candidate(hum: f64, config: &SensorConfig) -> Option<Candidate> {
    if let Some(max) = config.hum_max {
        if hum > max {
            return Some(Candidate {
                kind: ProblemKind::HumHigh,
                priority: Priority::Alta,
                message: format!("Umidade alta: {hum:.1}% acima do limite {max:.1}%"),
                extreme: false,
            });
        }
    }
    if let Some(min) = config.hum_min {
        if hum < min {
            return Some(Candidate {
                kind: ProblemKind::HumLow,
                priority: Priority::Alta,
                message: format!("Umidade baixa: {hum:.1}% abaixo do limite {min:.1}%"),
                extreme: false,
            });
        }
    }
    None
}

fn door_left_open_candidate(
    state: &mut SensorState,
    inputs: &AlertInputs,
    watchlist: &mut HashMap<WatchlistKey, WatchlistEntry>,
) -> Option<Alert> {
    if state.defrost.is_defrosting || !state.last_virtual_state {
        watchlist.remove(&WatchlistKey { mac: state.mac.clone(), kind: ProblemKind::DoorOpen });
        return None;
    }
    let opened_since = state.last_analysis_ts_ms?;
    let open_for_ms = inputs.now_ms - opened_since;
    if open_for_ms <= inputs.door_max_open_ms {
        watchlist.remove(&WatchlistKey { mac: state.mac.clone(), kind: ProblemKind::DoorOpen });
        return None;
    }
    let minutes = open_for_ms / crate::clock::MS_PER_MIN;
    let mac = state.mac.clone();
    resolve(
        watchlist,
        &mac,
        &mut state.last_alert_sent_ts_ms,
        ProblemKind::DoorOpen,
        Priority::Alta,
        format!("PORTA ABERTA ha {minutes} min"),
        false,
        None,
        inputs.now_ms,
    )
}

/// Normalisation: drop the temp/humidity-family watchlist entries (leaves
/// door and gateway entries, which are tracked independently).
fn clear_temp_humidity_watchlist(watchlist: &mut HashMap<WatchlistKey, WatchlistEntry>, mac: &Mac) {
    for kind in [
        ProblemKind::TempHigh,
        ProblemKind::TempLow,
        ProblemKind::HumHigh,
        ProblemKind::HumLow,
        ProblemKind::PredictiveHigh,
    ] {
        watchlist.remove(&WatchlistKey { mac: mac.clone(), kind });
    }
}

fn clear_watchlist_except(
    watchlist: &mut HashMap<WatchlistKey, WatchlistEntry>,
    mac: &Mac,
    keep: Option<ProblemKind>,
) {
    for kind in [
        ProblemKind::TempHigh,
        ProblemKind::TempLow,
        ProblemKind::HumHigh,
        ProblemKind::HumLow,
        ProblemKind::PredictiveHigh,
    ] {
        if Some(kind) != keep {
            watchlist.remove(&WatchlistKey { mac: mac.clone(), kind });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mac::canonicalize_mac;

    fn sensor_config(temp_min: Option<f64>, temp_max: Option<f64>) -> SensorConfig {
        SensorConfig {
            display_name: "Freezer 1".into(),
            temp_max,
            temp_min,
            hum_max: None,
            hum_min: None,
            em_manutencao: false,
            sensor_porta_vinculado: None,
        }
    }

    fn state_at(temp: f64, now_ms: i64) -> SensorState {
        let mut s = SensorState::new(canonicalize_mac("AABBCCDDEEFF"), now_ms, temp, 50.0, None, 90);
        s.last_temp = temp;
        s
    }

    #[test]
    fn soak_delays_first_alert() {
        let config = sensor_config(Some(-25.0), Some(-5.0));
        let mut watchlist = HashMap::new();
        let mut state = state_at(0.0, 0);
        let mut now = 0i64;

        let inputs = AlertInputs {
            config: &config,
            thresholds: &Thresholds {
                default_temp_min: -30.0,
                default_temp_max: -5.0,
                high_traffic_temp_max: -2.0,
                high_traffic_weekdays: vec![3, 4],
                door_max_open_minutes: 5,
                webhook_max_retries: 10,
            },
            tz: resolve_timezone("America/Sao_Paulo"),
            metrics: None,
            door_max_open_ms: 5 * crate::clock::MS_PER_MIN,
            now_ms: now,
        };
        let alerts = evaluate(&mut state, &mut watchlist, &inputs);
        assert!(alerts.is_empty());

        now += SOAK_ALTA_MS;
        let inputs2 = AlertInputs { now_ms: now, ..inputs };
        let alerts = evaluate(&mut state, &mut watchlist, &inputs2);
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, Priority::Alta);
    }

    #[test]
    fn cooldown_suppresses_repeat_alert() {
        let config = sensor_config(Some(-25.0), Some(-5.0));
        let mut watchlist = HashMap::new();
        let mut state = state_at(0.0, 0);
        let thresholds = Thresholds {
            default_temp_min: -30.0,
            default_temp_max: -5.0,
            high_traffic_temp_max: -2.0,
            high_traffic_weekdays: vec![3, 4],
            door_max_open_minutes: 5,
            webhook_max_retries: 10,
        };
        let tz = resolve_timezone("America/Sao_Paulo");

        let mut now = 0i64;
        evaluate(
            &mut state,
            &mut watchlist,
            &AlertInputs { config: &config, thresholds: &thresholds, tz, metrics: None, door_max_open_ms: 300_000, now_ms: now },
        );
        now += SOAK_ALTA_MS;
        let first = evaluate(
            &mut state,
            &mut watchlist,
            &AlertInputs { config: &config, thresholds: &thresholds, tz, metrics: None, door_max_open_ms: 300_000, now_ms: now },
        );
        assert_eq!(first.len(), 1);

        now += 60_000;
        let second = evaluate(
            &mut state,
            &mut watchlist,
            &AlertInputs { config: &config, thresholds: &thresholds, tz, metrics: None, door_max_open_ms: 300_000, now_ms: now },
        );
        assert!(second.is_empty());
    }

    #[test]
    fn extreme_deviation_promotes_to_critica_after_30_min() {
        let config = sensor_config(Some(-25.0), Some(-5.0));
        let mut watchlist = HashMap::new();
        let mut state = state_at(10.0, 0);
        let thresholds = Thresholds {
            default_temp_min: -30.0,
            default_temp_max: -5.0,
            high_traffic_temp_max: -2.0,
            high_traffic_weekdays: vec![3, 4],
            door_max_open_minutes: 5,
            webhook_max_retries: 10,
        };
        let tz = resolve_timezone("America/Sao_Paulo");

        let mut now = 0i64;
        evaluate(
            &mut state,
            &mut watchlist,
            &AlertInputs { config: &config, thresholds: &thresholds, tz, metrics: None, door_max_open_ms: 300_000, now_ms: now },
        );
        now = ESCALATION_TO_CRITICA_MS;
        let alerts = evaluate(
            &mut state,
            &mut watchlist,
            &AlertInputs { config: &config, thresholds: &thresholds, tz, metrics: None, door_max_open_ms: 300_000, now_ms: now },
        );
        assert_eq!(alerts.len(), 1);
        assert_eq!(alerts[0].priority, Priority::Critica);
    }

    #[test]
    fn defrost_suppresses_non_extreme_alerts() {
        let config = sensor_config(Some(-25.0), Some(-5.0));
        let mut watchlist = HashMap::new();
        let mut state = state_at(0.0, 0);
        state.defrost.is_defrosting = true;
        let thresholds = Thresholds {
            default_temp_min: -30.0,
            default_temp_max: -5.0,
            high_traffic_temp_max: -2.0,
            high_traffic_weekdays: vec![3, 4],
            door_max_open_minutes: 5,
            webhook_max_retries: 10,
        };
        let tz = resolve_timezone("America/Sao_Paulo");
        let mut now = 0i64;
        for _ in 0..5 {
            let alerts = evaluate(
                &mut state,
                &mut watchlist,
                &AlertInputs { config: &config, thresholds: &thresholds, tz, metrics: None, door_max_open_ms: 300_000, now_ms: now },
            );
            assert!(alerts.is_empty());
            now += SOAK_ALTA_MS;
        }
    }
}
