//! Descriptive statistics and hypothesis tests
//!
//! Distribution tails come from the regularized incomplete beta function and the
//! complementary error function in `statrs`. Every test returns `InsufficientData`
//! or `DegenerateComputation` instead of a NaN statistic.

use crate::error::{AnalysisError, Result};
use serde::{Deserialize, Serialize};
use statrs::function::beta::beta_reg;
use statrs::function::erf::erfc;
use std::f64::consts::SQRT_2;

/// Arithmetic mean, 0.0 for an empty slice
///
/// # Examples
///
/// ```
/// use market_validation::stats::mean;
///
/// assert_eq!(mean(&[1.0, 2.0, 3.0]), 2.0);
/// assert_eq!(mean(&[]), 0.0);
/// ```
pub fn mean(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    values.iter().sum::<f64>() / values.len() as f64
}

/// Variance with `ddof` delta degrees of freedom, 0.0 when `n <= ddof`
pub fn variance(values: &[f64], ddof: usize) -> f64 {
    let n = values.len();
    if n <= ddof {
        return 0.0;
    }
    let m = mean(values);
    values.iter().map(|x| (x - m).powi(2)).sum::<f64>() / (n - ddof) as f64
}

pub fn std_dev(values: &[f64], ddof: usize) -> f64 {
    variance(values, ddof).sqrt()
}

/// Median, 0.0 for an empty slice
pub fn median(values: &[f64]) -> f64 {
    if values.is_empty() {
        return 0.0;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}

/// Finite subset of the input, order preserved
pub fn finite(values: &[f64]) -> Vec<f64> {
    values.iter().copied().filter(|v| v.is_finite()).collect()
}

/// `DegenerateComputation` for `routine` when any value is NaN or infinite
pub fn ensure_finite(routine: &'static str, values: &[f64]) -> Result<()> {
    match values.iter().position(|v| !v.is_finite()) {
        Some(i) => Err(AnalysisError::degenerate(
            routine,
            format!("non-finite value {} at index {}", values[i], i),
        )),
        None => Ok(()),
    }
}

/// Standard normal CDF
pub fn normal_cdf(x: f64) -> f64 {
    0.5 * erfc(-x / SQRT_2)
}

/// Two-sided p-value of Student's t with `df` degrees of freedom
///
/// # Examples
///
/// ```
/// use market_validation::stats::student_t_two_sided;
///
/// assert!((student_t_two_sided(0.0, 10.0) - 1.0).abs() < 1e-12);
/// assert!((student_t_two_sided(2.228, 10.0) - 0.05).abs() < 1e-3);
/// ```
pub fn student_t_two_sided(t: f64, df: f64) -> f64 {
    if t.is_infinite() {
        return 0.0;
    }
    let x = df / (df + t * t);
    beta_reg(df / 2.0, 0.5, x.clamp(0.0, 1.0))
}

/// Upper tail P(F > f) of the F distribution
pub fn f_survival(f: f64, d1: f64, d2: f64) -> f64 {
    if f <= 0.0 {
        return 1.0;
    }
    if f.is_infinite() {
        return 0.0;
    }
    let x = d2 / (d2 + d1 * f);
    beta_reg(d2 / 2.0, d1 / 2.0, x.clamp(0.0, 1.0))
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TTest {
    pub statistic: f64,
    pub p_value: f64,
    pub df: f64,
}

/// Two-sample Student t-test with pooled variance
pub fn ttest_ind(a: &[f64], b: &[f64]) -> Result<TTest> {
    let got = a.len().min(b.len());
    if got < 2 {
        return Err(AnalysisError::insufficient("ttest_ind", 2, got));
    }

    let (n1, n2) = (a.len() as f64, b.len() as f64);
    let df = n1 + n2 - 2.0;
    let pooled = ((n1 - 1.0) * variance(a, 1) + (n2 - 1.0) * variance(b, 1)) / df;
    let se = (pooled * (1.0 / n1 + 1.0 / n2)).sqrt();
    if se == 0.0 {
        return Err(AnalysisError::degenerate("ttest_ind", "both samples are constant"));
    }

    let statistic = (mean(a) - mean(b)) / se;
    Ok(TTest {
        statistic,
        p_value: student_t_two_sided(statistic, df),
        df,
    })
}

/// One-sample t-test of the mean against `mu`
pub fn ttest_1samp(values: &[f64], mu: f64) -> Result<TTest> {
    if values.len() < 2 {
        return Err(AnalysisError::insufficient("ttest_1samp", 2, values.len()));
    }

    let n = values.len() as f64;
    let se = std_dev(values, 1) / n.sqrt();
    if se == 0.0 {
        return Err(AnalysisError::degenerate("ttest_1samp", "sample is constant"));
    }

    let statistic = (mean(values) - mu) / se;
    let df = n - 1.0;
    Ok(TTest {
        statistic,
        p_value: student_t_two_sided(statistic, df),
        df,
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LeveneTest {
    pub statistic: f64,
    pub p_value: f64,
}

/// Levene's test for equal variances, centred on group medians (Brown-Forsythe)
pub fn levene(groups: &[&[f64]]) -> Result<LeveneTest> {
    let k = groups.len();
    if k < 2 {
        return Err(AnalysisError::insufficient("levene", 2, k));
    }
    if let Some(smallest) = groups.iter().map(|g| g.len()).min() {
        if smallest == 0 {
            return Err(AnalysisError::insufficient("levene", 1, 0));
        }
    }
    let total: usize = groups.iter().map(|g| g.len()).sum();
    if total <= k {
        return Err(AnalysisError::insufficient("levene", k + 1, total));
    }

    let deviations: Vec<Vec<f64>> = groups
        .iter()
        .map(|g| {
            let m = median(g);
            g.iter().map(|x| (x - m).abs()).collect()
        })
        .collect();
    let group_means: Vec<f64> = deviations.iter().map(|z| mean(z)).collect();
    let grand_mean = deviations.iter().flatten().sum::<f64>() / total as f64;

    let between: f64 = deviations
        .iter()
        .zip(&group_means)
        .map(|(z, zm)| z.len() as f64 * (zm - grand_mean).powi(2))
        .sum();
    let within: f64 = deviations
        .iter()
        .zip(&group_means)
        .map(|(z, zm)| z.iter().map(|v| (v - zm).powi(2)).sum::<f64>())
        .sum();

    if within == 0.0 {
        return Err(AnalysisError::degenerate("levene", "no spread within any group"));
    }

    let (d1, d2) = ((k - 1) as f64, (total - k) as f64);
    let statistic = d2 / d1 * between / within;
    Ok(LeveneTest {
        statistic,
        p_value: f_survival(statistic, d1, d2),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Correlation {
    pub r: f64,
    pub p_value: f64,
    pub n: usize,
}

/// Pearson correlation with its two-sided p-value
pub fn pearson(x: &[f64], y: &[f64]) -> Result<Correlation> {
    if x.len() != y.len() {
        return Err(AnalysisError::degenerate(
            "pearson",
            format!("length mismatch ({} vs {})", x.len(), y.len()),
        ));
    }
    let n = x.len();
    if n < 3 {
        return Err(AnalysisError::insufficient("pearson", 3, n));
    }

    let (mx, my) = (mean(x), mean(y));
    let mut sxy = 0.0;
    let mut sxx = 0.0;
    let mut syy = 0.0;
    for (a, b) in x.iter().zip(y) {
        sxy += (a - mx) * (b - my);
        sxx += (a - mx).powi(2);
        syy += (b - my).powi(2);
    }
    if sxx == 0.0 || syy == 0.0 {
        return Err(AnalysisError::degenerate("pearson", "constant input"));
    }

    let r = (sxy / (sxx.sqrt() * syy.sqrt())).clamp(-1.0, 1.0);
    let p_value = if r.abs() == 1.0 {
        0.0
    } else {
        let df = (n - 2) as f64;
        let t = r * (df / (1.0 - r * r)).sqrt();
        student_t_two_sided(t, df)
    };

    Ok(Correlation { r, p_value, n })
}

/// Normal-approximation 95% interval for the mean (population std)
pub fn confidence_interval_95(values: &[f64]) -> Option<(f64, f64)> {
    if values.len() < 2 {
        return None;
    }
    let m = mean(values);
    let half = 1.96 * std_dev(values, 0) / (values.len() as f64).sqrt();
    Some((m - half, m + half))
}
