//! Door detector: decides door open/closed from the thermal analyzer's
//! metrics and the sensor's prior state. Runs after the defrost detector
//! so defrost always wins the overlap between an open-door spike
//! and an early defrost rise.

use crate::analyzer::ThermalMetrics;
use crate::config::{ProfileTunings, DOOR_CLOSE_CONFIRM_WINDOW_MS, DOOR_OPEN_CONFIRM_WINDOW_MS};
use crate::model::{PendingDoorTransition, SensorState};

pub struct DoorInputs<'a> {
    pub metrics: &'a ThermalMetrics,
    pub tunings: ProfileTunings,
    pub temp: f64,
    pub temp_min: Option<f64>,
    pub temp_max: Option<f64>,
    pub now_ms: i64,
}

/// A transition committed this tick, if any.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DoorTransition {
    pub now_open: bool,
}

/// Runs the door detector against `state` and applies any committed
/// transition in place (including `last_virtual_state` and the pending
/// confirmation tracker). Returns `Some` iff a transition actually
/// committed this tick.
pub fn evaluate(state: &mut SensorState, inputs: &DoorInputs) -> Option<DoorTransition> {
    if state.defrost.is_defrosting {
        // Precondition: forced closed, no transition logged (already closed
        // per the mutual-exclusion invariant enforced on defrost start).
        state.door_pending = None;
        return None;
    }

    let metrics = inputs.metrics;
    let tunings = inputs.tunings;

    if is_forced_close(inputs) {
        state.last_variance = Some(metrics.variance);
        if state.last_virtual_state {
            state.last_virtual_state = false;
            state.door_pending = None;
            return Some(DoorTransition { now_open: false });
        }
        state.door_pending = None;
        return None;
    }

    let prior_open = state.last_virtual_state;
    let transition = if !prior_open {
        evaluate_open_criteria(metrics, tunings)
    } else {
        evaluate_close_criteria(metrics, tunings, state.last_variance)
    };

    state.last_variance = Some(metrics.variance);

    let Some((target_open, satisfied)) = transition else {
        state.door_pending = None;
        return None;
    };

    let high_confidence = if !prior_open { satisfied >= 3 } else { satisfied >= 2 };

    if high_confidence {
        state.door_pending = None;
        state.last_virtual_state = target_open;
        return Some(DoorTransition { now_open: target_open });
    }

    let window_ms =
        if target_open { DOOR_OPEN_CONFIRM_WINDOW_MS } else { DOOR_CLOSE_CONFIRM_WINDOW_MS };

    let commit = match &mut state.door_pending {
        Some(pending) if pending.target_open == target_open => {
            if inputs.now_ms - pending.first_detected_ms > window_ms {
                pending.first_detected_ms = inputs.now_ms;
                pending.detections = 1;
                false
            } else {
                pending.detections += 1;
                pending.detections >= 2
            }
        }
        _ => {
            state.door_pending = Some(PendingDoorTransition {
                target_open,
                first_detected_ms: inputs.now_ms,
                detections: 1,
            });
            false
        }
    };

    if commit {
        state.door_pending = None;
        state.last_virtual_state = target_open;
        Some(DoorTransition { now_open: target_open })
    } else {
        None
    }
}

fn is_forced_close(inputs: &DoorInputs) -> bool {
    let metrics = inputs.metrics;
    let within_bounds = inputs.temp_min.is_none_or(|min| inputs.temp >= min)
        && inputs.temp_max.is_none_or(|max| inputs.temp <= max);
    within_bounds
        && metrics.slope.abs() < 0.1
        && metrics.variance < 0.5 * inputs.tunings.door_variance_threshold
        && metrics.r2 > 0.7
}

/// Returns `Some((true, satisfied_count))` if any open criterion matched.
fn evaluate_open_criteria(metrics: &ThermalMetrics, tunings: ProfileTunings) -> Option<(bool, u32)> {
    let mut satisfied = 0u32;
    if metrics.acceleration > tunings.door_accel {
        satisfied += 1;
    }
    if metrics.slope > tunings.door_slope {
        satisfied += 1;
    }
    if metrics.variance > tunings.door_variance_threshold && metrics.slope > 0.5 && metrics.r2 < 0.6 {
        satisfied += 1;
    }
    if let Some(segment) = metrics.segment {
        if metrics.change_point.is_some()
            && segment.slope_change.abs() > 1.0
            && metrics.variance > tunings.door_variance_threshold
        {
            satisfied += 1;
        }
    }
    if metrics.jerk.abs() > tunings.door_jerk && metrics.slope > 0.3 {
        satisfied += 1;
    }
    if satisfied > 0 {
        Some((true, satisfied))
    } else {
        None
    }
}

/// Returns `Some((false, satisfied_count))` if any close criterion matched.
fn evaluate_close_criteria(
    metrics: &ThermalMetrics,
    tunings: ProfileTunings,
    prior_variance: Option<f64>,
) -> Option<(bool, u32)> {
    let mut satisfied = 0u32;
    if metrics.slope < -0.1 && metrics.r2 > 0.5 {
        satisfied += 1;
    }
    if metrics.slope < 0.1 && metrics.acceleration < -0.1 {
        satisfied += 1;
    }
    if let Some(prior_var) = prior_variance {
        if metrics.variance < 0.7 * prior_var && metrics.variance < 0.8 * tunings.door_variance_threshold {
            satisfied += 1;
        }
    }
    if satisfied > 0 {
        Some((false, satisfied))
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NORMAL_TUNINGS;
    use crate::mac::canonicalize_mac;

    fn neutral_metrics() -> ThermalMetrics {
        ThermalMetrics {
            slope: 0.0,
            intercept: -18.0,
            r2: 0.0,
            std_error: 0.0,
            variance: 0.0,
            std_dev: 0.0,
            acceleration: 0.0,
            jerk: 0.0,
            ema: -18.0,
            ciclo_degelo: None,
            change_point: None,
            segment: None,
        }
    }

    fn closed_state() -> SensorState {
        SensorState::new(canonicalize_mac("AABBCCDDEEFF"), 0, -18.0, 50.0, None, 90)
    }

    #[test]
    fn forced_close_overrides_prior_open_state() {
        let mut state = closed_state();
        state.last_virtual_state = true;
        let metrics = neutral_metrics();
        let metrics = ThermalMetrics { r2: 0.9, ..metrics };
        let inputs = DoorInputs {
            metrics: &metrics,
            tunings: NORMAL_TUNINGS,
            temp: -18.0,
            temp_min: Some(-25.0),
            temp_max: Some(-10.0),
            now_ms: 0,
        };
        let transition = evaluate(&mut state, &inputs);
        assert_eq!(transition, Some(DoorTransition { now_open: false }));
        assert!(!state.last_virtual_state);
    }

    #[test]
    fn high_confidence_open_commits_immediately() {
        let mut state = closed_state();
        let metrics = ThermalMetrics {
            acceleration: 10.0,
            slope: 10.0,
            variance: 10.0,
            r2: 0.1,
            jerk: 10.0,
            ..neutral_metrics()
        };
        let inputs = DoorInputs {
            metrics: &metrics,
            tunings: NORMAL_TUNINGS,
            temp: -11.0,
            temp_min: Some(-25.0),
            temp_max: Some(-10.0),
            now_ms: 0,
        };
        let transition = evaluate(&mut state, &inputs);
        assert_eq!(transition, Some(DoorTransition { now_open: true }));
        assert!(state.last_virtual_state);
    }

    #[test]
    fn low_confidence_open_needs_two_detections_before_commit() {
        let mut state = closed_state();
        // Only the slope criterion fires: satisfied == 1, below the 3-vote
        // high-confidence bar, so confirmation requires a second detection.
        let metrics = ThermalMetrics { slope: NORMAL_TUNINGS.door_slope + 0.1, r2: 0.9, ..neutral_metrics() };
        let inputs = DoorInputs {
            metrics: &metrics,
            tunings: NORMAL_TUNINGS,
            temp: -11.0,
            temp_min: Some(-25.0),
            temp_max: Some(-10.0),
            now_ms: 0,
        };
        assert_eq!(evaluate(&mut state, &inputs), None);
        assert!(state.door_pending.is_some());

        let inputs2 = DoorInputs { now_ms: 5_000, ..inputs };
        let transition = evaluate(&mut state, &inputs2);
        assert_eq!(transition, Some(DoorTransition { now_open: true }));
    }

    #[test]
    fn defrosting_forces_closed_with_no_transition() {
        let mut state = closed_state();
        state.defrost.is_defrosting = true;
        let metrics = ThermalMetrics { slope: 10.0, acceleration: 10.0, ..neutral_metrics() };
        let inputs = DoorInputs {
            metrics: &metrics,
            tunings: NORMAL_TUNINGS,
            temp: -11.0,
            temp_min: Some(-25.0),
            temp_max: Some(-10.0),
            now_ms: 0,
        };
        assert_eq!(evaluate(&mut state, &inputs), None);
        assert!(!state.last_virtual_state);
    }
}
