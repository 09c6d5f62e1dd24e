//! Direct-summation periodogram
//!
//! One routine serves every consumer (per-run diagnostics, sweep tables, batch
//! aggregates) so dominant frequencies stay comparable across contexts.

use crate::error::{AnalysisError, Result};
use crate::stats::{ensure_finite, mean};
use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Inclusive frequency grid in cycles per sampling interval
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FrequencyGrid {
    pub start: f64,
    pub stop: f64,
    pub step: f64,
}

/// 0.05 to 0.50 in steps of 0.01 (periods from 20 down to 2 years)
pub const DEFAULT_GRID: FrequencyGrid = FrequencyGrid {
    start: 0.05,
    stop: 0.50,
    step: 0.01,
};

impl FrequencyGrid {
    /// Grid points, generated from integer step counts so the last point is exact
    pub fn frequencies(&self) -> Vec<f64> {
        if self.step <= 0.0 || self.stop < self.start {
            return Vec::new();
        }
        let steps = ((self.stop - self.start) / self.step + 1e-9).floor() as usize;
        (0..=steps)
            .map(|i| self.start + i as f64 * self.step)
            .collect()
    }
}

impl Default for FrequencyGrid {
    fn default() -> Self {
        DEFAULT_GRID
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Periodogram {
    pub frequencies: Vec<f64>,
    pub power: Vec<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SpectralPeak {
    pub frequency: f64,
    pub period: f64,
    pub power: f64,
}

impl Periodogram {
    /// Grid point of maximal power; the first one wins exact ties
    pub fn dominant(&self) -> Option<SpectralPeak> {
        let mut best: Option<(usize, f64)> = None;
        for (i, &p) in self.power.iter().enumerate() {
            if best.is_none_or(|(_, bp)| p > bp) {
                best = Some((i, p));
            }
        }
        best.map(|(i, power)| SpectralPeak {
            frequency: self.frequencies[i],
            period: 1.0 / self.frequencies[i],
            power,
        })
    }
}

/// power(f) = (C(f)² + S(f)²) / n over the demeaned series
pub fn periodogram(series: &[f64], grid: &FrequencyGrid) -> Result<Periodogram> {
    let n = series.len();
    if n < 2 {
        return Err(AnalysisError::insufficient("periodogram", 2, n));
    }
    ensure_finite("periodogram", series)?;

    let m = mean(series);
    let centred: Vec<f64> = series.iter().map(|x| x - m).collect();
    if centred.iter().all(|&x| x == 0.0) {
        return Err(AnalysisError::degenerate("periodogram", "constant series"));
    }

    let frequencies = grid.frequencies();
    let power = frequencies
        .iter()
        .map(|&f| {
            let (c, s) = centred
                .iter()
                .enumerate()
                .fold((0.0, 0.0), |(c, s), (t, &x)| {
                    let angle = 2.0 * PI * f * t as f64;
                    (c + x * angle.cos(), s + x * angle.sin())
                });
            (c * c + s * s) / n as f64
        })
        .collect();

    Ok(Periodogram { frequencies, power })
}

/// Dominant spectral peak on the default grid
pub fn dominant_frequency(series: &[f64]) -> Result<SpectralPeak> {
    periodogram(series, &DEFAULT_GRID)?
        .dominant()
        .ok_or_else(|| AnalysisError::degenerate("periodogram", "empty frequency grid"))
}
