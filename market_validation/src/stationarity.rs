//! Augmented Dickey-Fuller stationarity test
//!
//! Regression with a constant:
//!
//! Δy_t = α + γ·y_{t-1} + Σ_{i=1..p} β_i·Δy_{t-i} + ε_t
//!
//! The lag order p is chosen by minimum AIC over 0..=maxlag on a common sample,
//! then the chosen model is refit on every usable observation. The statistic is
//! the t-value of γ; a strongly negative value rejects the unit root.

use crate::error::{AnalysisError, Result};
use crate::stats::{ensure_finite, normal_cdf};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Minimum observations for the test
pub const ADF_MIN_OBSERVATIONS: usize = 10;

/// Critical values of the test statistic at the 1%, 5% and 10% levels
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CriticalValues {
    #[serde(rename = "1%")]
    pub one_pct: f64,
    #[serde(rename = "5%")]
    pub five_pct: f64,
    #[serde(rename = "10%")]
    pub ten_pct: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct StationarityResult {
    pub test_statistic: f64,
    pub p_value: f64,
    pub used_lags: usize,
    pub n_obs: usize,
    pub critical_values: CriticalValues,
    pub is_stationary: bool,
}

/// Run the ADF test and compare its p-value against `alpha`
pub fn adf_test(series: &[f64], alpha: f64) -> Result<StationarityResult> {
    let n = series.len();
    if n < ADF_MIN_OBSERVATIONS {
        return Err(AnalysisError::insufficient("adf", ADF_MIN_OBSERVATIONS, n));
    }
    ensure_finite("adf", series)?;

    let max_lag = max_lag(n)?;
    let diffs: Vec<f64> = series.windows(2).map(|w| w[1] - w[0]).collect();

    // Lag selection on the sample that the largest model can use
    let common = design(series, &diffs, max_lag, max_lag);
    let mut best: Option<(f64, usize)> = None;
    for lags in 0..=max_lag {
        let fit = ols(&common.y, &common.columns(lags))?;
        let aic = fit.aic();
        if best.is_none_or(|(best_aic, _)| aic < best_aic) {
            best = Some((aic, lags));
        }
    }
    let used_lags = best.map_or(0, |(_, lags)| lags);

    let full = design(series, &diffs, used_lags, used_lags);
    let fit = ols(&full.y, &full.columns(used_lags))?;
    let test_statistic = fit.t_value(1)?;
    let n_obs = full.y.len();

    let p_value = mackinnon_p(test_statistic);
    Ok(StationarityResult {
        test_statistic,
        p_value,
        used_lags,
        n_obs,
        critical_values: mackinnon_critical_values(n_obs),
        is_stationary: p_value < alpha,
    })
}

/// ceil(12·(n/100)^¼), capped so the largest regression keeps residual freedom
fn max_lag(n: usize) -> Result<usize> {
    let schwert = (12.0 * (n as f64 / 100.0).powf(0.25)).ceil() as usize;
    let cap = (n / 2)
        .checked_sub(2)
        .ok_or_else(|| AnalysisError::insufficient("adf", ADF_MIN_OBSERVATIONS, n))?;
    Ok(schwert.min(cap))
}

/// Regression data: dependent Δy_t plus level and lagged differences
struct Design {
    y: Vec<f64>,
    level: Vec<f64>,
    lagged: Vec<Vec<f64>>,
}

impl Design {
    /// Constant, level and the first `lags` lagged differences
    fn columns(&self, lags: usize) -> Vec<Vec<f64>> {
        let mut columns = Vec::with_capacity(lags + 2);
        columns.push(vec![1.0; self.y.len()]);
        columns.push(self.level.clone());
        columns.extend(self.lagged.iter().take(lags).cloned());
        columns
    }
}

/// Rows t = skip..diffs.len(), with `lags` lagged difference columns
fn design(series: &[f64], diffs: &[f64], skip: usize, lags: usize) -> Design {
    let rows = skip..diffs.len();
    Design {
        y: diffs[rows.clone()].to_vec(),
        level: series[rows.clone()].to_vec(),
        lagged: (1..=lags)
            .map(|i| rows.clone().map(|t| diffs[t - i]).collect())
            .collect(),
    }
}

struct OlsFit {
    ssr: f64,
    nobs: usize,
    /// Diagonal of (X'X)⁻¹
    inverse_diagonal: Vec<f64>,
    coefficients: Vec<f64>,
}

impl OlsFit {
    fn k(&self) -> usize {
        self.coefficients.len()
    }

    fn aic(&self) -> f64 {
        let n = self.nobs as f64;
        n * ((2.0 * PI).ln() + (self.ssr / n).ln() + 1.0) + 2.0 * self.k() as f64
    }

    fn t_value(&self, index: usize) -> Result<f64> {
        let df = self.nobs.saturating_sub(self.k());
        if df == 0 {
            return Err(AnalysisError::insufficient("adf", self.k() + 1, self.nobs));
        }
        let sigma2 = self.ssr / df as f64;
        let se = (sigma2 * self.inverse_diagonal[index]).sqrt();
        if se == 0.0 || !se.is_finite() {
            return Err(AnalysisError::degenerate("adf", "zero standard error"));
        }
        Ok(self.coefficients[index] / se)
    }
}

/// Least squares via Cholesky factorisation of the normal equations
fn ols(y: &[f64], columns: &[Vec<f64>]) -> Result<OlsFit> {
    let k = columns.len();
    let n = y.len();

    let mut xtx = vec![vec![0.0; k]; k];
    let mut xty = vec![0.0; k];
    for i in 0..k {
        for j in 0..=i {
            let dot: f64 = columns[i].iter().zip(&columns[j]).map(|(a, b)| a * b).sum();
            xtx[i][j] = dot;
            xtx[j][i] = dot;
        }
        xty[i] = columns[i].iter().zip(y).map(|(a, b)| a * b).sum();
    }

    let l = cholesky(&xtx)
        .ok_or_else(|| AnalysisError::degenerate("adf", "singular regression design"))?;
    let coefficients = cholesky_solve(&l, &xty);

    let ssr = (0..n)
        .map(|t| {
            let fitted: f64 = columns.iter().zip(&coefficients).map(|(c, b)| c[t] * b).sum();
            (y[t] - fitted).powi(2)
        })
        .sum::<f64>();
    if ssr <= 0.0 {
        return Err(AnalysisError::degenerate("adf", "perfect fit"));
    }

    let inverse_diagonal = (0..k)
        .map(|j| {
            let mut unit = vec![0.0; k];
            unit[j] = 1.0;
            cholesky_solve(&l, &unit)[j]
        })
        .collect();

    Ok(OlsFit {
        ssr,
        nobs: n,
        inverse_diagonal,
        coefficients,
    })
}

/// Lower-triangular L with A = L·Lᵀ, `None` when A is not positive definite
fn cholesky(a: &[Vec<f64>]) -> Option<Vec<Vec<f64>>> {
    let n = a.len();
    let mut l = vec![vec![0.0; n]; n];
    for i in 0..n {
        for j in 0..=i {
            let sum: f64 = (0..j).map(|k| l[i][k] * l[j][k]).sum();
            if i == j {
                let pivot = a[i][i] - sum;
                if pivot <= 1e-12 * a[i][i].abs().max(1.0) {
                    return None;
                }
                l[i][j] = pivot.sqrt();
            } else {
                l[i][j] = (a[i][j] - sum) / l[j][j];
            }
        }
    }
    Some(l)
}

fn cholesky_solve(l: &[Vec<f64>], b: &[f64]) -> Vec<f64> {
    let n = b.len();
    let mut z = vec![0.0; n];
    for i in 0..n {
        let sum: f64 = (0..i).map(|k| l[i][k] * z[k]).sum();
        z[i] = (b[i] - sum) / l[i][i];
    }
    let mut x = vec![0.0; n];
    for i in (0..n).rev() {
        let sum: f64 = (i + 1..n).map(|k| l[k][i] * x[k]).sum();
        x[i] = (z[i] - sum) / l[i][i];
    }
    x
}

// MacKinnon (1994) response surface, constant term, one variable
const TAU_MAX: f64 = 2.74;
const TAU_MIN: f64 = -18.83;
const TAU_STAR: f64 = -1.61;
const TAU_SMALL_P: [f64; 3] = [2.1659, 1.4412, 0.038269];
const TAU_LARGE_P: [f64; 4] = [1.7339, 0.93202, -0.12745, -0.010368];

/// Approximate p-value of the ADF statistic
pub fn mackinnon_p(statistic: f64) -> f64 {
    if statistic > TAU_MAX {
        return 1.0;
    }
    if statistic < TAU_MIN {
        return 0.0;
    }
    let coefs: &[f64] = if statistic <= TAU_STAR {
        &TAU_SMALL_P
    } else {
        &TAU_LARGE_P
    };
    normal_cdf(polynomial(coefs, statistic))
}

// MacKinnon (2010) finite-sample critical values, constant term
const CRIT_1: [f64; 4] = [-3.43035, -6.5393, -16.786, -79.433];
const CRIT_5: [f64; 4] = [-2.86154, -2.8903, -4.234, -40.040];
const CRIT_10: [f64; 4] = [-2.56677, -1.5384, -2.809, 0.0];

pub fn mackinnon_critical_values(n_obs: usize) -> CriticalValues {
    let inv = 1.0 / n_obs as f64;
    CriticalValues {
        one_pct: polynomial(&CRIT_1, inv),
        five_pct: polynomial(&CRIT_5, inv),
        ten_pct: polynomial(&CRIT_10, inv),
    }
}

/// c0 + c1·x + c2·x² + ...
fn polynomial(coefs: &[f64], x: f64) -> f64 {
    coefs.iter().rev().fold(0.0, |acc, c| acc * x + c)
}
