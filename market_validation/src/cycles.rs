//! Cycle characterization
//!
//! Three views of the same loss-ratio window:
//! - Peak counting: a run has cycles when it shows at least two separated peaks,
//!   and the cycle period is the mean distance between them
//! - AR(2) Yule-Walker fit: x_t = a0 + a1·x_{t-1} + a2·x_{t-2}, whose coefficients
//!   describe damped oscillation when a1 > 0, -1 < a2 < 0 and a1² + 4a2 < 0
//! - Periodogram: the dominant frequency of the demeaned window

use crate::error::{AnalysisError, Result};
use crate::spectral::dominant_frequency;
use crate::stats::{ensure_finite, mean, std_dev};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;
use tracing::debug;

/// Minimum observations for an AR(2) fit
pub const AR2_MIN_OBSERVATIONS: usize = 10;

/// Indices of local maxima at least `distance` apart
///
/// Plateaus resolve to their middle index and the first and last samples never
/// count. Peaks are then kept in decreasing height order (earlier index first on
/// ties), discarding any peak closer than `distance` to one already kept.
///
/// # Examples
///
/// ```
/// use market_validation::cycles::find_peaks;
///
/// let series = [0.0, 1.0, 0.0, 0.0, 2.0, 0.0];
/// assert_eq!(find_peaks(&series, 1), vec![1, 4]);
/// assert_eq!(find_peaks(&series, 4), vec![4]);
/// ```
pub fn find_peaks(series: &[f64], distance: usize) -> Vec<usize> {
    let peaks = local_maxima(series);
    if distance <= 1 || peaks.len() < 2 {
        return peaks;
    }

    let mut order: Vec<usize> = (0..peaks.len()).collect();
    order.sort_by(|&a, &b| {
        series[peaks[b]]
            .total_cmp(&series[peaks[a]])
            .then(peaks[a].cmp(&peaks[b]))
    });

    let mut keep = vec![true; peaks.len()];
    for &j in &order {
        if !keep[j] {
            continue;
        }
        let mut k = j;
        while k > 0 && peaks[j] - peaks[k - 1] < distance {
            keep[k - 1] = false;
            k -= 1;
        }
        let mut k = j + 1;
        while k < peaks.len() && peaks[k] - peaks[j] < distance {
            keep[k] = false;
            k += 1;
        }
    }

    peaks
        .into_iter()
        .zip(keep)
        .filter_map(|(p, kept)| kept.then_some(p))
        .collect()
}

/// Troughs are the peaks of the negated series
pub fn find_troughs(series: &[f64], distance: usize) -> Vec<usize> {
    let negated: Vec<f64> = series.iter().map(|x| -x).collect();
    find_peaks(&negated, distance)
}

fn local_maxima(x: &[f64]) -> Vec<usize> {
    let mut maxima = Vec::new();
    if x.len() < 3 {
        return maxima;
    }

    let last = x.len() - 1;
    let mut i = 1;
    while i < last {
        if x[i - 1] < x[i] {
            let mut ahead = i + 1;
            while ahead < last && x[ahead] == x[i] {
                ahead += 1;
            }
            if x[ahead] < x[i] {
                maxima.push((i + ahead - 1) / 2);
                i = ahead;
            }
        }
        i += 1;
    }
    maxima
}

/// Peak-based cycle detection result
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleDetection {
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
    pub has_cycles: bool,
    /// Mean distance between successive peaks; `None` with fewer than two peaks
    pub cycle_period: Option<f64>,
}

pub fn detect_cycles(series: &[f64], distance: usize) -> CycleDetection {
    let peaks = find_peaks(series, distance);
    let troughs = find_troughs(series, distance);

    let cycle_period = if peaks.len() >= 2 {
        let gaps: Vec<f64> = peaks.windows(2).map(|w| (w[1] - w[0]) as f64).collect();
        Some(mean(&gaps))
    } else {
        None
    };

    CycleDetection {
        has_cycles: cycle_period.is_some(),
        cycle_period,
        peaks,
        troughs,
    }
}

/// Biased sample autocorrelation at `lag`
pub fn autocorrelation(series: &[f64], lag: usize) -> Result<f64> {
    if series.len() <= lag {
        return Err(AnalysisError::insufficient("autocorrelation", lag + 1, series.len()));
    }
    ensure_finite("autocorrelation", series)?;

    let m = mean(series);
    let denom: f64 = series.iter().map(|x| (x - m).powi(2)).sum();
    if denom == 0.0 {
        return Err(AnalysisError::degenerate("autocorrelation", "zero variance"));
    }

    let num: f64 = series
        .iter()
        .zip(&series[lag..])
        .map(|(a, b)| (a - m) * (b - m))
        .sum();
    Ok(num / denom)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Ar2Fit {
    pub a0: f64,
    pub a1: f64,
    pub a2: f64,
    pub rho1: f64,
    pub rho2: f64,
}

impl Ar2Fit {
    pub fn coefficients(&self) -> (f64, f64, f64) {
        (self.a0, self.a1, self.a2)
    }

    pub fn conditions(&self) -> CycleConditions {
        check_cycle_conditions(self.a1, self.a2)
    }

    /// Period of the damped oscillation, 2π / arccos(a1 / (2√-a2))
    ///
    /// Only defined when the characteristic roots are complex.
    pub fn implied_period(&self) -> Option<f64> {
        if !self.conditions().complex_roots || self.a2 >= 0.0 {
            return None;
        }
        let cos_theta = self.a1 / (2.0 * (-self.a2).sqrt());
        let theta = cos_theta.clamp(-1.0, 1.0).acos();
        (theta > 0.0).then(|| 2.0 * PI / theta)
    }
}

/// Fit x_t = a0 + a1·x_{t-1} + a2·x_{t-2} via Yule-Walker
pub fn fit_ar2(series: &[f64]) -> Result<Ar2Fit> {
    if series.len() < AR2_MIN_OBSERVATIONS {
        return Err(AnalysisError::insufficient("ar2", AR2_MIN_OBSERVATIONS, series.len()));
    }

    let rho1 = autocorrelation(series, 1)?;
    let rho2 = autocorrelation(series, 2)?;

    let denom = 1.0 - rho1 * rho1;
    if denom.abs() < 1e-10 {
        return Err(AnalysisError::degenerate(
            "ar2",
            format!("1 - rho1² = {:e} is too close to zero", denom),
        ));
    }

    let a1 = rho1 * (1.0 - rho2) / denom;
    let a2 = (rho2 - rho1 * rho1) / denom;
    let a0 = mean(series) * (1.0 - a1 - a2);
    ensure_finite("ar2", &[a0, a1, a2])?;

    Ok(Ar2Fit { a0, a1, a2, rho1, rho2 })
}

/// Individual AR(2) conditions for damped cycles
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CycleConditions {
    /// a1 > 0
    pub positive_feedback: bool,
    /// -1 < a2 < 0
    pub damped: bool,
    /// a1² + 4a2 < 0
    pub complex_roots: bool,
}

impl CycleConditions {
    pub fn met(&self) -> bool {
        self.positive_feedback && self.damped && self.complex_roots
    }
}

pub fn check_cycle_conditions(a1: f64, a2: f64) -> CycleConditions {
    CycleConditions {
        positive_feedback: a1 > 0.0,
        damped: -1.0 < a2 && a2 < 0.0,
        complex_roots: a1 * a1 + 4.0 * a2 < 0.0,
    }
}

/// Cycle metrics for one run's steady-state window
///
/// Anything that can be undetermined for a short or degenerate window is an
/// `Option`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CycleMetrics {
    pub has_cycles: bool,
    pub cycle_period: Option<f64>,
    pub peaks: Vec<usize>,
    pub troughs: Vec<usize>,
    pub dominant_frequency: Option<f64>,
    pub dominant_period: Option<f64>,
    pub mean_loss_ratio: Option<f64>,
    pub std_loss_ratio: Option<f64>,
    pub cycle_amplitude: Option<f64>,
    pub ar2_coefficients: Option<(f64, f64, f64)>,
    pub ar2_conditions: Option<CycleConditions>,
    pub cycle_conditions_met: bool,
    pub ar2_implied_period: Option<f64>,
}

impl CycleMetrics {
    /// Metrics for a run with no analysable window
    pub fn undetermined() -> Self {
        CycleMetrics {
            has_cycles: false,
            cycle_period: None,
            peaks: Vec::new(),
            troughs: Vec::new(),
            dominant_frequency: None,
            dominant_period: None,
            mean_loss_ratio: None,
            std_loss_ratio: None,
            cycle_amplitude: None,
            ar2_coefficients: None,
            ar2_conditions: None,
            cycle_conditions_met: false,
            ar2_implied_period: None,
        }
    }

    pub fn a1(&self) -> Option<f64> {
        self.ar2_coefficients.map(|(_, a1, _)| a1)
    }

    pub fn a2(&self) -> Option<f64> {
        self.ar2_coefficients.map(|(_, _, a2)| a2)
    }
}

/// Run every cycle diagnostic over `series`
///
/// Individual diagnostics that cannot be computed are left undetermined; this
/// never fails as a whole.
pub fn analyze_cycles(series: &[f64], peak_distance: usize) -> CycleMetrics {
    if series.is_empty() {
        return CycleMetrics::undetermined();
    }
    if let Err(e) = ensure_finite("cycles", series) {
        debug!(error = %e, "cycle metrics undetermined");
        return CycleMetrics::undetermined();
    }

    let detection = detect_cycles(series, peak_distance);

    let spectral = dominant_frequency(series)
        .map_err(|e| debug!(error = %e, "dominant frequency undetermined"))
        .ok();

    let ar2 = fit_ar2(series)
        .map_err(|e| debug!(error = %e, "AR(2) fit undetermined"))
        .ok();
    let conditions = ar2.as_ref().map(Ar2Fit::conditions);

    let max = series.iter().copied().fold(f64::NEG_INFINITY, f64::max);
    let min = series.iter().copied().fold(f64::INFINITY, f64::min);

    CycleMetrics {
        has_cycles: detection.has_cycles,
        cycle_period: detection.cycle_period,
        peaks: detection.peaks,
        troughs: detection.troughs,
        dominant_frequency: spectral.map(|p| p.frequency),
        dominant_period: spectral.map(|p| p.period),
        mean_loss_ratio: Some(mean(series)),
        std_loss_ratio: Some(std_dev(series, 0)),
        cycle_amplitude: Some((max - min) / 2.0),
        ar2_coefficients: ar2.map(|f| f.coefficients()),
        ar2_conditions: conditions,
        cycle_conditions_met: conditions.is_some_and(|c| c.met()),
        ar2_implied_period: ar2.and_then(|f| f.implied_period()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use rand::rngs::StdRng;
    use rand::SeedableRng;
    use rand_distr::{Distribution, Normal};

    fn simulate_ar2(a1: f64, a2: f64, c: f64, n: usize, seed: u64) -> Vec<f64> {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.05).unwrap();
        let burn_in = 200;
        let mut x = vec![1.0, 1.0];
        for t in 2..n + burn_in {
            let next = c + a1 * x[t - 1] + a2 * x[t - 2] + noise.sample(&mut rng);
            x.push(next);
        }
        x.split_off(burn_in)
    }

    #[test]
    fn test_two_humps() {
        let series = [0.0, 1.0, 2.0, 1.0, 0.0, 1.0, 2.0, 1.0, 0.0];

        let detection = detect_cycles(&series, 2);

        assert_eq!(detection.peaks, vec![2, 6]);
        assert_eq!(detection.troughs, vec![4]);
        assert!(detection.has_cycles);
        assert_eq!(detection.cycle_period, Some(4.0));
    }

    #[test]
    fn test_close_maxima_merge() {
        // Maxima at 2 and 4 are within distance 3; the taller one survives
        let series = [0.0, 1.0, 2.0, 1.9, 2.01, 0.5, 0.0];

        assert_eq!(find_peaks(&series, 1), vec![2, 4]);
        assert_eq!(find_peaks(&series, 3), vec![4]);
    }

    #[test]
    fn test_equal_height_tie_keeps_earlier() {
        let series = [0.0, 2.0, 1.0, 2.0, 0.0];

        assert_eq!(find_peaks(&series, 3), vec![1]);
    }

    #[test]
    fn test_plateau_and_edges() {
        // Plateau over 2..=4 resolves to 3; rising edge at the end never counts
        let series = [0.0, 1.0, 3.0, 3.0, 3.0, 1.0, 2.0, 5.0];

        assert_eq!(find_peaks(&series, 1), vec![3]);
        assert!(find_peaks(&[1.0, 0.0], 1).is_empty());
        assert!(find_peaks(&[2.0, 2.0, 2.0, 2.0], 1).is_empty());
    }

    #[test]
    fn test_single_peak_has_no_period() {
        let detection = detect_cycles(&[0.0, 1.0, 0.0], 2);

        assert!(!detection.has_cycles);
        assert_eq!(detection.cycle_period, None);
    }

    #[test]
    fn test_autocorrelation_reference() {
        let series = [1.0, 2.0, 3.0, 4.0, 5.0];

        // Deviations -2..2, Σd² = 10, lag-1 products sum to 4
        assert_relative_eq!(autocorrelation(&series, 1).unwrap(), 0.4);
        assert_relative_eq!(autocorrelation(&series, 0).unwrap(), 1.0);
        assert!(autocorrelation(&[1.0; 5], 1).is_err());
    }

    #[test]
    fn test_ar2_recovers_known_coefficients() {
        let series = simulate_ar2(0.8, -0.6, 0.8, 5000, 42);

        let fit = fit_ar2(&series).unwrap();

        assert_abs_diff_eq!(fit.a1, 0.8, epsilon = 0.05);
        assert_abs_diff_eq!(fit.a2, -0.6, epsilon = 0.05);
        assert_abs_diff_eq!(fit.a0 / (1.0 - fit.a1 - fit.a2), 1.0, epsilon = 0.01);
        assert!(fit.conditions().met());
    }

    #[test]
    fn test_ar2_short_series() {
        let err = fit_ar2(&[1.0; 9]).unwrap_err();
        assert!(matches!(
            err,
            AnalysisError::InsufficientData { needed: 10, got: 9, .. }
        ));
    }

    #[test]
    fn test_ar2_constant_series_is_degenerate() {
        let err = fit_ar2(&[1.0; 20]).unwrap_err();

        assert!(matches!(err, AnalysisError::DegenerateComputation { .. }));
        assert!(err.is_undetermined());
    }

    #[test]
    fn test_ar2_non_finite_is_degenerate() {
        let mut series: Vec<f64> = (0..30).map(|t| 1.0 + 0.1 * (t as f64).sin()).collect();
        series[7] = f64::NAN;

        let err = fit_ar2(&series).unwrap_err();

        assert!(matches!(err, AnalysisError::DegenerateComputation { .. }));
        assert_eq!(analyze_cycles(&series, 2), CycleMetrics::undetermined());
    }

    #[test]
    fn test_cycle_conditions() {
        let cycling = check_cycle_conditions(0.5, -0.4);
        assert!(cycling.met());

        let real_roots = check_cycle_conditions(1.0, -0.2);
        assert!(real_roots.positive_feedback);
        assert!(real_roots.damped);
        assert!(!real_roots.complex_roots);
        assert!(!real_roots.met());

        let explosive = check_cycle_conditions(0.5, -1.2);
        assert!(!explosive.damped);
        assert!(!check_cycle_conditions(-0.5, -0.4).met());
    }

    #[test]
    fn test_implied_period() {
        let fit = Ar2Fit {
            a0: 0.0,
            a1: 1.0,
            a2: -1.0,
            rho1: 0.0,
            rho2: 0.0,
        };
        // cos θ = 1/2, θ = π/3, period 6
        assert_relative_eq!(fit.implied_period().unwrap(), 6.0, epsilon = 1e-12);

        let monotone = Ar2Fit { a1: 1.0, a2: -0.1, ..fit };
        assert_eq!(monotone.implied_period(), None);
    }

    #[test]
    fn test_analyze_cycles_sinusoid() {
        let series: Vec<f64> = (0..60)
            .map(|t| 1.0 + 0.1 * (2.0 * PI * t as f64 / 6.0).cos())
            .collect();

        let metrics = analyze_cycles(&series, 2);

        assert!(metrics.has_cycles);
        assert_abs_diff_eq!(metrics.cycle_period.unwrap(), 6.0, epsilon = 1e-9);
        assert_abs_diff_eq!(metrics.dominant_period.unwrap(), 6.0, epsilon = 0.3);
        assert_abs_diff_eq!(metrics.mean_loss_ratio.unwrap(), 1.0, epsilon = 1e-9);
        assert_abs_diff_eq!(metrics.cycle_amplitude.unwrap(), 0.1, epsilon = 1e-3);
        assert!(metrics.ar2_coefficients.is_some());
    }

    #[test]
    fn test_analyze_cycles_short_window() {
        let metrics = analyze_cycles(&[1.0, 1.2, 0.9, 1.1], 2);

        assert_eq!(metrics.ar2_coefficients, None);
        assert!(!metrics.cycle_conditions_met);
        assert!(metrics.dominant_frequency.is_some());
        assert!(analyze_cycles(&[], 2).mean_loss_ratio.is_none());
    }
}
