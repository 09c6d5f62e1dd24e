//! Statistical validation and cycle characterization for market simulation output
//!
//! This crate turns the recorded output of an insurance market simulation (one
//! market time series and one set of entity snapshots per run) into verdicts and
//! derived metrics:
//! - Cycle detection from loss-ratio peaks, AR(2) Yule-Walker fits and a periodogram
//! - Augmented Dickey-Fuller stationarity testing
//! - Consistency checks over entity snapshots and market aggregates
//! - Market concentration (HHI, Gini) per year
//! - Cross-run aggregation and scenario comparison (t-tests, Levene, Pearson)
//!
//! Expected outcomes for a healthy baseline run:
//! - Loss ratio oscillating around 1.0 with a cycle of roughly 6 years
//! - AR(2) coefficients satisfying a1 > 0, -1 < a2 < 0, a1² + 4a2 < 0
//! - No negative-capital solvent entities and no capacity violations

use serde::{Deserialize, Deserializer, Serialize};
use std::collections::BTreeMap;

pub mod aggregate;
pub mod concentration;
pub mod config;
pub mod consistency;
pub mod cycles;
pub mod error;
pub mod loader;
pub mod pipeline;
pub mod report;
pub mod spectral;
pub mod stationarity;
pub mod stats;
pub mod window;

pub use config::AnalysisConfig;
pub use error::{AnalysisError, Result};

/// One simulated year of market aggregates
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MarketTimeSeriesRecord {
    pub year: usize,
    #[serde(alias = "avg_loss_ratio")]
    pub loss_ratio: f64,
    #[serde(default)]
    pub avg_premium: f64,
    #[serde(alias = "num_solvent_syndicates", alias = "num_solvent_insurers")]
    pub num_solvent_entities: usize,
    #[serde(default, alias = "num_insolvent_syndicates")]
    pub num_insolvent_entities: usize,
    #[serde(default)]
    pub total_capital: f64,
    #[serde(default)]
    pub total_premiums: f64,
    #[serde(default)]
    pub total_claims: f64,
    #[serde(default)]
    pub avg_uniform_deviation: f64,
    #[serde(default)]
    pub markup_avg: f64,
    #[serde(default)]
    pub markup_std_dev: f64,
    #[serde(default, deserialize_with = "deserialize_flag")]
    pub cat_event_occurred: bool,
    #[serde(default)]
    pub cat_event_loss: f64,
}

impl MarketTimeSeriesRecord {
    /// A year counts as active while at least one entity is solvent
    pub fn is_active(&self) -> bool {
        self.num_solvent_entities > 0
    }

    pub fn total_entities(&self) -> usize {
        self.num_solvent_entities + self.num_insolvent_entities
    }
}

/// State of a single entity (insurer/syndicate) at the end of a year
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntitySnapshot {
    pub year: usize,
    #[serde(alias = "insurer_id", alias = "syndicate_id")]
    pub entity_id: usize,
    pub capital: f64,
    #[serde(deserialize_with = "deserialize_flag")]
    pub is_solvent: bool,
    pub loss_ratio: f64,
    pub num_customers: usize,
    pub price: f64,
    pub market_share: f64,
}

impl EntitySnapshot {
    /// Maximum permitted exposure: capital × leverage
    pub fn capacity(&self, leverage_ratio: f64) -> f64 {
        self.capital * leverage_ratio
    }

    /// Premium volume currently written: customers × price
    pub fn exposure(&self) -> f64 {
        self.num_customers as f64 * self.price
    }
}

/// Structured per-run summary document written by the simulation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunSummary {
    pub metadata: RunMetadata,
    #[serde(default)]
    pub cycle_metrics: Option<ReportedCycleMetrics>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunMetadata {
    #[serde(default)]
    pub config: RunConfig,
    #[serde(default)]
    pub seed: Option<u64>,
    #[serde(default)]
    pub num_years: Option<usize>,
}

/// Simulation configuration as recorded in the summary
///
/// Only the leverage ratio is interpreted; every other key is kept verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default)]
    pub leverage_ratio: Option<f64>,
    #[serde(flatten)]
    pub other: BTreeMap<String, serde_json::Value>,
}

/// Cycle metrics as reported by the simulation itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ReportedCycleMetrics {
    #[serde(default)]
    pub has_cycles: bool,
    #[serde(default)]
    pub cycle_period: Option<f64>,
    #[serde(default)]
    pub ar2_coefficients: Option<(f64, f64, f64)>,
    #[serde(default, alias = "meets_cycle_conditions")]
    pub cycle_conditions_met: Option<bool>,
}

/// Everything loaded for one run
#[derive(Debug, Clone, Default)]
pub struct RunData {
    pub series: Vec<MarketTimeSeriesRecord>,
    pub snapshots: Option<Vec<EntitySnapshot>>,
    pub summary: Option<RunSummary>,
}

impl RunData {
    pub fn new(series: Vec<MarketTimeSeriesRecord>) -> Self {
        RunData {
            series,
            snapshots: None,
            summary: None,
        }
    }

    pub fn with_snapshots(mut self, snapshots: Vec<EntitySnapshot>) -> Self {
        self.snapshots = Some(snapshots);
        self
    }

    pub fn with_summary(mut self, summary: RunSummary) -> Self {
        self.summary = Some(summary);
        self
    }

    /// Leverage ratio recorded for the run, if any
    pub fn leverage_ratio(&self) -> Option<f64> {
        self.summary
            .as_ref()
            .and_then(|s| s.metadata.config.leverage_ratio)
    }

    pub fn final_record(&self) -> Option<&MarketTimeSeriesRecord> {
        self.series.last()
    }
}

/// Accepts `0`/`1` as well as `true`/`false` (any case)
fn deserialize_flag<'de, D>(deserializer: D) -> std::result::Result<bool, D::Error>
where
    D: Deserializer<'de>,
{
    let raw = String::deserialize(deserializer)?;
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" => Ok(true),
        "0" | "false" | "" => Ok(false),
        other => Err(serde::de::Error::custom(format!(
            "expected 0, 1, true or false, got '{}'",
            other
        ))),
    }
}
