//! Thermal analyzer: a pure function of the time-series window.
//!
//! `ready=false` (we return `None`) when the window holds fewer than 10
//! samples. The same metrics feed both the door and defrost detectors; they
//! disagree in which they weight. Defrost is linear and low-variance;
//! door-open is non-linear and high-variance with sharp jerk.

use yata::methods::EMA;
use yata::prelude::Method;

use crate::config::ProfileTunings;

pub const MIN_SAMPLES_FOR_READY: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CyclePhase {
    Rising,
    Falling,
    Peak,
    Unknown,
}

#[derive(Debug, Clone, Copy)]
pub struct CicloDegelo {
    pub arg_max_idx: usize,
    pub arg_min_idx: usize,
    pub rising_slope: f64,
    pub falling_slope: f64,
    pub phase: CyclePhase,
}

#[derive(Debug, Clone, Copy)]
pub struct SegmentAnalysis {
    pub slope_before: f64,
    pub slope_after: f64,
    /// `slope_after - slope_before`, what the detectors call `slopeChange`.
    pub slope_change: f64,
}

#[derive(Debug, Clone, Copy)]
pub struct ThermalMetrics {
    pub slope: f64,
    pub intercept: f64,
    pub r2: f64,
    pub std_error: f64,
    pub variance: f64,
    pub std_dev: f64,
    pub acceleration: f64,
    pub jerk: f64,
    pub ema: f64,
    pub ciclo_degelo: Option<CicloDegelo>,
    pub change_point: Option<usize>,
    pub segment: Option<SegmentAnalysis>,
}

/// Returns `None` ("not ready") if `samples` holds fewer than
/// [`MIN_SAMPLES_FOR_READY`] points.
pub fn analyze(samples: &[(i64, f64)], tunings: ProfileTunings) -> Option<ThermalMetrics> {
    if samples.len() < MIN_SAMPLES_FOR_READY {
        return None;
    }

    let xy = to_minutes(samples);
    let (slope, intercept, r2, std_error) = ols(&xy);
    let (variance, std_dev) = temp_variance_std_dev(samples);
    let acceleration = compute_acceleration(samples);
    let jerk = compute_jerk(samples);
    let ema = compute_ema(samples, tunings.ema_alpha);
    let ciclo_degelo = detect_ciclo_degelo(samples, tunings.defrost_min_slope);
    let change_point = find_change_point(samples);
    let segment = change_point.map(|cp| segment_analysis(samples, cp));

    Some(ThermalMetrics {
        slope,
        intercept,
        r2,
        std_error,
        variance,
        std_dev,
        acceleration,
        jerk,
        ema,
        ciclo_degelo,
        change_point,
        segment,
    })
}

fn to_minutes(samples: &[(i64, f64)]) -> Vec<(f64, f64)> {
    let t0 = samples[0].0;
    samples.iter().map(|&(ts, temp)| (((ts - t0) as f64) / 60_000.0, temp)).collect()
}

/// Ordinary least squares over `(x, y)` pairs: slope, intercept, R-squared,
/// and the RMS residual against the fitted line.
fn ols(xy: &[(f64, f64)]) -> (f64, f64, f64, f64) {
    let n = xy.len() as f64;
    if xy.len() < 2 {
        return (0.0, xy.first().map_or(0.0, |p| p.1), 0.0, 0.0);
    }
    let mean_x = xy.iter().map(|p| p.0).sum::<f64>() / n;
    let mean_y = xy.iter().map(|p| p.1).sum::<f64>() / n;
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for &(x, y) in xy {
        sxy += (x - mean_x) * (y - mean_y);
        sxx += (x - mean_x).powi(2);
        syy += (y - mean_y).powi(2);
    }
    let slope = if sxx.abs() > f64::EPSILON { sxy / sxx } else { 0.0 };
    let intercept = mean_y - slope * mean_x;
    let r2 = if sxx > 0.0 && syy > 0.0 { (sxy * sxy) / (sxx * syy) } else { 0.0 };
    let residual_sq_sum: f64 = xy
        .iter()
        .map(|&(x, y)| {
            let predicted = slope * x + intercept;
            (y - predicted).powi(2)
        })
        .sum();
    let std_error = (residual_sq_sum / n).sqrt();
    (slope, intercept, r2, std_error)
}

fn slope_of(samples: &[(i64, f64)]) -> f64 {
    if samples.len() < 2 {
        0.0
    } else {
        ols(&to_minutes(samples)).0
    }
}

fn temp_variance_std_dev(samples: &[(i64, f64)]) -> (f64, f64) {
    let n = samples.len() as f64;
    let mean = samples.iter().map(|&(_, t)| t).sum::<f64>() / n;
    let variance = samples.iter().map(|&(_, t)| (t - mean).powi(2)).sum::<f64>() / n;
    (variance, variance.sqrt())
}

/// slope(last 30%) - slope(first 70%). Zero if either subset has < 2 points.
fn compute_acceleration(samples: &[(i64, f64)]) -> f64 {
    let n = samples.len();
    let split = ((n as f64) * 0.7).round() as usize;
    let split = split.clamp(0, n);
    let first = &samples[..split];
    let last = &samples[split..];
    if first.len() < 2 || last.len() < 2 {
        return 0.0;
    }
    slope_of(last) - slope_of(first)
}

/// (slope(third3) - slope(third2)) - (slope(third2) - slope(third1)). Zero
/// if the window has fewer than 9 points.
fn compute_jerk(samples: &[(i64, f64)]) -> f64 {
    let n = samples.len();
    if n < 9 {
        return 0.0;
    }
    let third = n / 3;
    let third1 = &samples[0..third];
    let third2 = &samples[third..2 * third];
    let third3 = &samples[2 * third..n];
    let s1 = slope_of(third1);
    let s2 = slope_of(third2);
    let s3 = slope_of(third3);
    (s3 - s2) - (s2 - s1)
}

/// Exponential moving average with `alpha` from the profile's tuning,
/// computed with `yata`'s EMA method the way the daemon computes its own
/// temperature EMA with `TMA`.
fn compute_ema(samples: &[(i64, f64)], alpha: f64) -> f64 {
    let period = ((2.0 / alpha) - 1.0).round().max(1.0) as u8;
    let temps: Vec<f64> = samples.iter().map(|&(_, t)| t).collect();
    EMA::new_over(period, &temps)
        .ok()
        .and_then(|seq| seq.last().copied())
        .unwrap_or_else(|| samples.last().map_or(0.0, |&(_, t)| t))
}

/// Locates argmax/argmin; tags the window as a defrost-shaped cycle when the
/// peak lies past 30% of the window and the rise into it exceeds the
/// profile's minimum slope. The peak's position relative to the end of the
/// window decides the phase: still at the newest sample is `Rising` (no
/// tail yet to assess a fall), within the last three is `Peak` (turned over,
/// too few points to confirm), and further back is `Falling` — which is the
/// only phase that additionally demands a clearly negative fall back out.
fn detect_ciclo_degelo(samples: &[(i64, f64)], defrost_min_slope: f64) -> Option<CicloDegelo> {
    let n = samples.len();
    if n < 6 {
        return None;
    }
    let (arg_max_idx, _) = samples
        .iter()
        .enumerate()
        .max_by(|a, b| a.1 .1.partial_cmp(&b.1 .1).unwrap())
        .map(|(i, &(_, t))| (i, t))?;
    let (arg_min_idx, _) = samples
        .iter()
        .enumerate()
        .min_by(|a, b| a.1 .1.partial_cmp(&b.1 .1).unwrap())
        .map(|(i, &(_, t))| (i, t))?;

    let pos_ratio = arg_max_idx as f64 / (n - 1) as f64;
    if pos_ratio <= 0.3 {
        return None;
    }

    let rising_slope = slope_of(&samples[..=arg_max_idx]);
    if rising_slope <= defrost_min_slope {
        return None;
    }

    let dist_from_end = n - 1 - arg_max_idx;
    let (phase, falling_slope) = if dist_from_end == 0 {
        (CyclePhase::Rising, 0.0)
    } else if dist_from_end <= 2 {
        (CyclePhase::Peak, slope_of(&samples[arg_max_idx..n]))
    } else {
        let falling_slope = slope_of(&samples[arg_max_idx..n]);
        if falling_slope >= -0.1 {
            return None;
        }
        (CyclePhase::Falling, falling_slope)
    };

    Some(CicloDegelo { arg_max_idx, arg_min_idx, rising_slope, falling_slope, phase })
}

/// Index `i` in `[3, len-3]` minimising `variance(left) + variance(right)`.
fn find_change_point(samples: &[(i64, f64)]) -> Option<usize> {
    let n = samples.len();
    if n < 6 {
        return None;
    }
    let mut best_idx = None;
    let mut best_cost = f64::INFINITY;
    for i in 3..=(n - 3) {
        let (left_var, _) = temp_variance_std_dev(&samples[..i]);
        let (right_var, _) = temp_variance_std_dev(&samples[i..]);
        let cost = left_var + right_var;
        if cost < best_cost {
            best_cost = cost;
            best_idx = Some(i);
        }
    }
    best_idx
}

fn segment_analysis(samples: &[(i64, f64)], change_point: usize) -> SegmentAnalysis {
    let slope_before = slope_of(&samples[..change_point]);
    let slope_after = slope_of(&samples[change_point..]);
    SegmentAnalysis { slope_before, slope_after, slope_change: slope_after - slope_before }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::NORMAL_TUNINGS;

    fn series(start: f64, step: f64, n: usize) -> Vec<(i64, f64)> {
        (0..n).map(|i| (i as i64 * 10_000, start + step * i as f64)).collect()
    }

    #[test]
    fn not_ready_below_ten_samples() {
        let samples = series(-18.0, 0.0, 9);
        assert!(analyze(&samples, NORMAL_TUNINGS).is_none());
    }

    #[test]
    fn steady_series_has_near_zero_slope_and_low_variance() {
        let samples = series(-18.0, 0.0, 30);
        let metrics = analyze(&samples, NORMAL_TUNINGS).unwrap();
        assert!(metrics.slope.abs() < 0.01);
        assert!(metrics.variance < 0.01);
    }

    #[test]
    fn rising_series_has_positive_slope_and_high_r2() {
        let samples = series(-18.0, 0.3, 20);
        let metrics = analyze(&samples, NORMAL_TUNINGS).unwrap();
        assert!(metrics.slope > 0.0);
        assert!(metrics.r2 > 0.9);
    }

    #[test]
    fn jerk_is_zero_below_nine_points() {
        let samples = series(-18.0, 0.1, 8);
        assert_eq!(compute_jerk(&samples), 0.0);
    }

    #[test]
    fn detects_defrost_shaped_cycle() {
        let mut samples = Vec::new();
        let mut t = 0i64;
        let mut temp = -18.0;
        for _ in 0..20 {
            samples.push((t, temp));
            t += 10_000;
            temp += 0.3;
        }
        for _ in 0..15 {
            samples.push((t, temp));
            t += 10_000;
            temp -= 0.4;
        }
        let metrics = analyze(&samples, NORMAL_TUNINGS).unwrap();
        assert!(metrics.ciclo_degelo.is_some());
    }

    #[test]
    fn ongoing_rise_with_no_peak_yet_tags_phase_rising() {
        // Monotonically increasing: the newest sample is always the argmax,
        // so there is no tail to assess a fall from yet.
        let samples = series(-18.0, 0.3, 20);
        let metrics = analyze(&samples, NORMAL_TUNINGS).unwrap();
        let cycle = metrics.ciclo_degelo.expect("rising slope should tag a defrost-shaped cycle");
        assert_eq!(cycle.phase, CyclePhase::Rising);
        assert!(cycle.rising_slope > 0.0);
    }
}
