//! Steady-state window selection
//!
//! Early years of a run carry the transient from the initial conditions and late
//! years of a collapsed market carry no information. A window keeps the rows that
//! pass an activity predicate, optionally drops the warm-up (`year < min_year`) and
//! optionally keeps only the last `tail_size` rows.

use crate::error::{AnalysisError, Result};
use crate::MarketTimeSeriesRecord;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WindowPolicy {
    /// Fewer remaining rows than this is `InsufficientData`
    pub min_len: usize,
    pub tail_size: Option<usize>,
    pub min_year: Option<usize>,
}

impl Default for WindowPolicy {
    fn default() -> Self {
        WindowPolicy {
            min_len: 10,
            tail_size: None,
            min_year: None,
        }
    }
}

impl WindowPolicy {
    /// Window over the active years (at least one solvent entity)
    pub fn apply<'a>(&self, series: &'a [MarketTimeSeriesRecord]) -> Result<SteadyStateWindow<'a>> {
        self.apply_with(series, MarketTimeSeriesRecord::is_active)
    }

    /// Window over the rows accepted by `predicate`
    pub fn apply_with<'a, F>(
        &self,
        series: &'a [MarketTimeSeriesRecord],
        predicate: F,
    ) -> Result<SteadyStateWindow<'a>>
    where
        F: Fn(&MarketTimeSeriesRecord) -> bool,
    {
        let mut rows: Vec<&MarketTimeSeriesRecord> = series
            .iter()
            .filter(|r| predicate(r))
            .filter(|r| self.min_year.is_none_or(|min| r.year >= min))
            .collect();

        if let Some(tail) = self.tail_size {
            let keep = tail.min(rows.len());
            rows.drain(..rows.len() - keep);
        }

        if rows.len() < self.min_len {
            debug!(
                eligible = rows.len(),
                required = self.min_len,
                "steady-state window too short"
            );
            return Err(AnalysisError::insufficient("steady_state_window", self.min_len, rows.len()));
        }

        Ok(SteadyStateWindow { rows })
    }
}

/// Rows selected for analysis, in year order
#[derive(Debug, Clone)]
pub struct SteadyStateWindow<'a> {
    rows: Vec<&'a MarketTimeSeriesRecord>,
}

impl<'a> SteadyStateWindow<'a> {
    pub fn rows(&self) -> &[&'a MarketTimeSeriesRecord] {
        &self.rows
    }

    pub fn loss_ratios(&self) -> Vec<f64> {
        self.column(|r| r.loss_ratio)
    }

    /// Extract any numeric column
    pub fn column<F>(&self, field: F) -> Vec<f64>
    where
        F: Fn(&MarketTimeSeriesRecord) -> f64,
    {
        self.rows.iter().map(|r| field(r)).collect()
    }

    pub fn years(&self) -> Vec<usize> {
        self.rows.iter().map(|r| r.year).collect()
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}
