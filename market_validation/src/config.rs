//! Analysis configuration
//!
//! Every threshold used by the checks and tests lives here, with the defaults the
//! simulation's invariants were validated against. Configuration files are TOML;
//! missing keys take their defaults and unknown keys are rejected.
//!
//! ```toml
//! [thresholds]
//! capacity_tolerance = 0.01
//! insolvency_rate_threshold = 0.20
//!
//! [window]
//! min_len = 20
//! tail_size = 30
//!
//! [batch]
//! num_threads = 8
//! ```

use crate::concentration::ShareSource;
use crate::error::{AnalysisError, Result};
use crate::window::WindowPolicy;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Top-level analysis configuration
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AnalysisConfig {
    pub thresholds: Thresholds,
    pub window: WindowSettings,
    pub cycles: CycleSettings,
    pub statistics: StatisticsSettings,
    pub concentration: ConcentrationSettings,
    pub batch: BatchSettings,
}

/// Consistency-check thresholds
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct Thresholds {
    /// Allowed |Σ market_share − 1| before the share sum is reported as off
    pub market_share_tolerance: f64,
    /// Entity loss ratio above which an entity is flagged
    pub extreme_loss_ratio: f64,
    /// Relative slack on capacity before exposure counts as a violation
    pub capacity_tolerance: f64,
    /// Insolvent entity-years / all entity-years above which a run is flagged
    pub insolvency_rate_threshold: f64,
    /// Market loss ratio above which a year is flagged
    pub loss_ratio_explosion: f64,
    /// Used when a run summary does not record its leverage ratio
    pub default_leverage_ratio: f64,
}

impl Default for Thresholds {
    fn default() -> Self {
        Thresholds {
            market_share_tolerance: 0.03,
            extreme_loss_ratio: 2.0,
            capacity_tolerance: 0.01,
            insolvency_rate_threshold: 0.20,
            loss_ratio_explosion: 2.0,
            default_leverage_ratio: 2.0,
        }
    }
}

/// Steady-state window selection
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct WindowSettings {
    pub min_len: usize,
    pub tail_size: Option<usize>,
    pub min_year: Option<usize>,
}

impl Default for WindowSettings {
    fn default() -> Self {
        WindowSettings {
            min_len: 10,
            tail_size: None,
            min_year: None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct CycleSettings {
    /// Minimum index distance between two detected peaks
    pub peak_min_distance: usize,
}

impl Default for CycleSettings {
    fn default() -> Self {
        CycleSettings {
            peak_min_distance: 2,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct StatisticsSettings {
    pub stationarity_alpha: f64,
    pub significance_alpha: f64,
}

impl Default for StatisticsSettings {
    fn default() -> Self {
        StatisticsSettings {
            stationarity_alpha: 0.05,
            significance_alpha: 0.05,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ConcentrationSettings {
    pub share_source: ShareSource,
    pub top_n: usize,
}

impl Default for ConcentrationSettings {
    fn default() -> Self {
        ConcentrationSettings {
            share_source: ShareSource::Customers,
            top_n: 5,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct BatchSettings {
    /// Worker threads; `None` uses one per core
    pub num_threads: Option<usize>,
}

impl AnalysisConfig {
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: AnalysisConfig =
            toml::from_str(text).map_err(|e| AnalysisError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if !path.exists() {
            return Err(AnalysisError::MissingInput {
                path: path.to_path_buf(),
            });
        }
        let text = fs::read_to_string(path)?;
        Self::from_toml_str(&text)
    }

    /// Reject settings that would make the checks meaningless
    pub fn validate(&self) -> Result<()> {
        let t = &self.thresholds;
        let non_negative = [
            ("thresholds.market_share_tolerance", t.market_share_tolerance),
            ("thresholds.extreme_loss_ratio", t.extreme_loss_ratio),
            ("thresholds.capacity_tolerance", t.capacity_tolerance),
            ("thresholds.insolvency_rate_threshold", t.insolvency_rate_threshold),
            ("thresholds.loss_ratio_explosion", t.loss_ratio_explosion),
        ];
        for (name, value) in non_negative {
            if !value.is_finite() || value < 0.0 {
                return Err(AnalysisError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }

        if !(t.default_leverage_ratio.is_finite() && t.default_leverage_ratio > 0.0) {
            return Err(AnalysisError::Config(format!(
                "thresholds.default_leverage_ratio must be positive, got {}",
                t.default_leverage_ratio
            )));
        }

        for (name, alpha) in [
            ("statistics.stationarity_alpha", self.statistics.stationarity_alpha),
            ("statistics.significance_alpha", self.statistics.significance_alpha),
        ] {
            if !(alpha > 0.0 && alpha < 1.0) {
                return Err(AnalysisError::Config(format!(
                    "{} must lie in (0, 1), got {}",
                    name, alpha
                )));
            }
        }

        if self.window.min_len == 0 {
            return Err(AnalysisError::Config("window.min_len must be at least 1".into()));
        }
        if self.window.tail_size == Some(0) {
            return Err(AnalysisError::Config("window.tail_size must be at least 1".into()));
        }
        if self.cycles.peak_min_distance == 0 {
            return Err(AnalysisError::Config(
                "cycles.peak_min_distance must be at least 1".into(),
            ));
        }
        if self.batch.num_threads == Some(0) {
            return Err(AnalysisError::Config("batch.num_threads must be at least 1".into()));
        }

        Ok(())
    }

    pub fn window_policy(&self) -> WindowPolicy {
        WindowPolicy {
            min_len: self.window.min_len,
            tail_size: self.window.tail_size,
            min_year: self.window.min_year,
        }
    }
}
