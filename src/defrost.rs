//! Defrost detector: decides defrost-start / defrost-end from the
//! thermal analyzer's metrics and the sensor's prior state. Evaluated
//! before the door detector on every sample, which is how the
//! overlap between defrost criterion 3 (ULTRA) and door criterion 2 is
//! resolved — whichever this function decides wins.

use crate::analyzer::{CyclePhase, ThermalMetrics};
use crate::config::{
    ProfileTunings, DEFROST_MIN_RUN_BEFORE_END_MS, DEFROST_MIN_RUN_FOR_DELTA_END_MS,
    DEFROST_SAFETY_TIMEOUT_MS,
};
use crate::model::{DefrostFlags, Profile, SensorState};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DefrostTransition {
    Started,
    Ended,
}

/// Runs the defrost detector against `state` and applies any committed
/// transition in place. Returns `Some` iff a transition committed this tick.
pub fn evaluate(
    state: &mut SensorState,
    metrics: &ThermalMetrics,
    tunings: ProfileTunings,
    profile: Profile,
    temp: f64,
    now_ms: i64,
) -> Option<DefrostTransition> {
    if !state.defrost.is_defrosting {
        if should_start(metrics, tunings, profile) {
            state.defrost = DefrostFlags {
                is_defrosting: true,
                defrost_start_ts: Some(now_ms),
                defrost_start_temp: Some(temp),
                defrost_peak_temp: Some(temp),
                defrost_just_started: true,
            };
            state.enforce_door_defrost_exclusion();
            return Some(DefrostTransition::Started);
        }
        return None;
    }

    // Currently defrosting.
    if temp > state.defrost.defrost_peak_temp.unwrap_or(temp) {
        state.defrost.defrost_peak_temp = Some(temp);
    }

    if state.defrost.defrost_just_started {
        // Exactly one sample of immunity from an immediate END.
        state.defrost.defrost_just_started = false;
        return None;
    }

    let run_ms = now_ms - state.defrost.defrost_start_ts.unwrap_or(now_ms);
    if run_ms < DEFROST_MIN_RUN_BEFORE_END_MS {
        return None;
    }

    if should_end(metrics, tunings, state, temp, run_ms) {
        state.defrost = DefrostFlags::default();
        return Some(DefrostTransition::Ended);
    }

    None
}

fn should_start(metrics: &ThermalMetrics, tunings: ProfileTunings, profile: Profile) -> bool {
    // 1. Stable linear rise.
    if metrics.slope > tunings.defrost_min_slope
        && metrics.std_error < tunings.defrost_variance_threshold
        && metrics.r2 > tunings.defrost_min_r2
        && metrics.variance < tunings.defrost_variance_threshold
    {
        return true;
    }

    // 2. Whole-cycle shape.
    if let Some(cycle) = metrics.ciclo_degelo {
        if cycle.phase == CyclePhase::Rising && cycle.rising_slope > tunings.defrost_min_slope {
            return true;
        }
    }

    // 3. ULTRA-only shortcut.
    if profile == Profile::Ultra && metrics.slope > 0.3 && metrics.r2 > 0.88 && metrics.std_error < 0.6 {
        return true;
    }

    // 4. Segment-analysis shape change.
    if let Some(segment) = metrics.segment {
        if segment.slope_change > 0.5 && metrics.slope > tunings.defrost_min_slope && metrics.r2 > 0.75 {
            return true;
        }
    }

    false
}

fn should_end(
    metrics: &ThermalMetrics,
    tunings: ProfileTunings,
    state: &SensorState,
    temp: f64,
    run_ms: i64,
) -> bool {
    // 1. Clear linear fall.
    if metrics.slope < -0.3 && metrics.r2 > 0.7 {
        return true;
    }

    // 2. Whole-cycle shape, falling. The "phase is not RISING" guard looks
    // redundant next to the `phase == Falling` check above it, but it
    // covers a case where the cycle classifier tags a point ambiguously;
    // kept deliberately rather than simplified away.
    if let Some(cycle) = metrics.ciclo_degelo {
        if cycle.phase == CyclePhase::Falling
            && cycle.falling_slope < -0.15
            && cycle.phase != CyclePhase::Rising
        {
            return true;
        }
    }

    // 3. Safety timeout.
    if run_ms > DEFROST_SAFETY_TIMEOUT_MS {
        return true;
    }

    // 4. Back within a delta of the start temperature (ULTRA: 3.0, else 2.0).
    if let Some(start_temp) = state.defrost.defrost_start_temp {
        let not_rising = metrics.ciclo_degelo.is_none_or(|c| c.phase != CyclePhase::Rising);
        if temp <= start_temp + tunings.defrost_end_delta
            && run_ms >= DEFROST_MIN_RUN_FOR_DELTA_END_MS
            && metrics.slope < -0.1
            && not_rising
        {
            return true;
        }
    }

    // 5. Segment-analysis shape change, falling.
    if let Some(segment) = metrics.segment {
        if segment.slope_change < -0.3 && metrics.slope < -0.15 && metrics.r2 > 0.6 {
            return true;
        }
    }

    false
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

    fn fresh_state() -> SensorState {
        SensorState::new(canonicalize_mac("AABBCCDDEEFF"), 0, -18.0, 50.0, None, 90)
    }

    #[test]
    fn stable_linear_rise_starts_defrost() {
        let mut state = fresh_state();
        let metrics = ThermalMetrics { slope: 0.3, std_error: 0.1, r2: 0.95, variance: 0.1, ..neutral_metrics() };
        let transition = evaluate(&mut state, &metrics, NORMAL_TUNINGS, Profile::Normal, -17.0, 0);
        assert_eq!(transition, Some(DefrostTransition::Started));
        assert!(state.defrost.is_defrosting);
        assert!(state.defrost.defrost_just_started);
        assert_eq!(state.defrost.defrost_start_temp, Some(-17.0));
    }

    #[test]
    fn just_started_blocks_immediate_end() {
        let mut state = fresh_state();
        let start_metrics = ThermalMetrics { slope: 0.3, std_error: 0.1, r2: 0.95, variance: 0.1, ..neutral_metrics() };
        evaluate(&mut state, &start_metrics, NORMAL_TUNINGS, Profile::Normal, -17.0, 0);
        assert!(state.defrost.defrost_just_started);

        // A sample that would clearly satisfy END criterion 1 must still be
        // ignored on the very next tick (the one-sample immunity window).
        let end_shaped = ThermalMetrics { slope: -5.0, r2: 0.99, ..neutral_metrics() };
        let transition = evaluate(&mut state, &end_shaped, NORMAL_TUNINGS, Profile::Normal, -18.0, 1_000);
        assert_eq!(transition, None);
        assert!(state.defrost.is_defrosting);
        assert!(!state.defrost.defrost_just_started);
    }

    #[test]
    fn safety_timeout_ends_defrost_after_60_min() {
        let mut state = fresh_state();
        state.defrost.is_defrosting = true;
        state.defrost.defrost_start_ts = Some(0);
        state.defrost.defrost_start_temp = Some(-18.0);
        state.defrost.defrost_peak_temp = Some(-12.0);
        state.defrost.defrost_just_started = false;
        let metrics = neutral_metrics();
        let run_ms = crate::config::DEFROST_SAFETY_TIMEOUT_MS + 1_000;
        let transition = evaluate(&mut state, &metrics, NORMAL_TUNINGS, Profile::Normal, -13.0, run_ms);
        assert_eq!(transition, Some(DefrostTransition::Ended));
        assert!(!state.defrost.is_defrosting);
    }

    #[test]
    fn peak_temp_tracks_the_maximum_while_defrosting() {
        let mut state = fresh_state();
        state.defrost.is_defrosting = true;
        state.defrost.defrost_start_ts = Some(0);
        state.defrost.defrost_start_temp = Some(-18.0);
        state.defrost.defrost_peak_temp = Some(-16.0);
        state.defrost.defrost_just_started = false;
        let metrics = neutral_metrics();
        evaluate(&mut state, &metrics, NORMAL_TUNINGS, Profile::Normal, -12.0, 30_000);
        assert_eq!(state.defrost.defrost_peak_temp, Some(-12.0));
    }
}
