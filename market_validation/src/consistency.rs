//! Consistency and anomaly checks for a single run
//!
//! Every check always runs to completion and reports what it found; a flagged
//! condition never aborts the run. The overall verdict passes only when no check
//! flagged anything. The market-share sum and the stationarity result are reported
//! alongside but do not affect the verdict.

use crate::config::Thresholds;
use crate::stationarity::StationarityResult;
use crate::{EntitySnapshot, MarketTimeSeriesRecord, RunData};
use serde::{Deserialize, Serialize};
use tracing::warn;

/// Problems found in the final-year entity state
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ShadowStateIssue {
    /// Solvent entities holding negative capital
    NegativeCapital { count: usize, entity_ids: Vec<usize> },
    ExtremeLossRatios {
        count: usize,
        max_loss_ratio: f64,
        entity_ids: Vec<usize>,
    },
    /// The final year cannot be checked at all
    MissingFinalYear { detail: String },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowStateChecks {
    pub negative_capital_count: usize,
    pub extreme_loss_ratio_count: usize,
    pub total_market_share: f64,
    pub market_share_error: f64,
    pub market_share_within_tolerance: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowStateResult {
    pub is_consistent: bool,
    pub issues: Vec<ShadowStateIssue>,
    /// Absent when the final year could not be checked
    pub checks: Option<ShadowStateChecks>,
}

/// Check the entities of the series' final year
pub fn check_shadow_state(
    series: &[MarketTimeSeriesRecord],
    snapshots: &[EntitySnapshot],
    thresholds: &Thresholds,
) -> ShadowStateResult {
    let missing = |detail: &str| ShadowStateResult {
        is_consistent: false,
        issues: vec![ShadowStateIssue::MissingFinalYear {
            detail: detail.to_string(),
        }],
        checks: None,
    };

    let Some(final_year) = series.iter().map(|r| r.year).max() else {
        return missing("empty market time series");
    };
    let finals: Vec<&EntitySnapshot> = snapshots.iter().filter(|s| s.year == final_year).collect();
    if finals.is_empty() {
        return missing(&format!("no entity snapshots for final year {}", final_year));
    }

    let mut issues = Vec::new();

    let negative: Vec<usize> = finals
        .iter()
        .filter(|s| s.is_solvent && s.capital < 0.0)
        .map(|s| s.entity_id)
        .collect();
    if !negative.is_empty() {
        issues.push(ShadowStateIssue::NegativeCapital {
            count: negative.len(),
            entity_ids: negative.clone(),
        });
    }

    let extreme: Vec<&&EntitySnapshot> = finals
        .iter()
        .filter(|s| s.loss_ratio > thresholds.extreme_loss_ratio)
        .collect();
    if !extreme.is_empty() {
        issues.push(ShadowStateIssue::ExtremeLossRatios {
            count: extreme.len(),
            max_loss_ratio: extreme
                .iter()
                .map(|s| s.loss_ratio)
                .fold(f64::NEG_INFINITY, f64::max),
            entity_ids: extreme.iter().map(|s| s.entity_id).collect(),
        });
    }

    let total_market_share: f64 = finals
        .iter()
        .filter(|s| s.is_solvent)
        .map(|s| s.market_share)
        .sum();
    let market_share_error = (total_market_share - 1.0).abs();

    ShadowStateResult {
        is_consistent: issues.is_empty(),
        checks: Some(ShadowStateChecks {
            negative_capital_count: negative.len(),
            extreme_loss_ratio_count: extreme.len(),
            total_market_share,
            market_share_error,
            market_share_within_tolerance: market_share_error <= thresholds.market_share_tolerance,
        }),
        issues,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityViolation {
    pub year: usize,
    pub entity_id: usize,
    pub capacity: f64,
    pub exposure: f64,
    /// Overage relative to capacity in percent; undefined for zero capacity
    pub violation_pct: Option<f64>,
}

/// Solvent entity-years whose exposure exceeds capacity beyond the tolerance
pub fn check_capacity(
    snapshots: &[EntitySnapshot],
    leverage_ratio: f64,
    tolerance: f64,
) -> Vec<CapacityViolation> {
    snapshots
        .iter()
        .filter(|s| s.is_solvent)
        .filter_map(|s| {
            let capacity = s.capacity(leverage_ratio);
            let exposure = s.exposure();
            (exposure > capacity * (1.0 + tolerance)).then(|| CapacityViolation {
                year: s.year,
                entity_id: s.entity_id,
                capacity,
                exposure,
                violation_pct: (capacity > 0.0).then(|| (exposure / capacity - 1.0) * 100.0),
            })
        })
        .collect()
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsolvencyStats {
    pub total_entity_years: usize,
    pub insolvent_count: usize,
    pub insolvency_rate: f64,
    /// Entities that were ever insolvent, in order of first appearance
    pub failed_entities: Vec<usize>,
    pub num_failed_entities: usize,
    pub exceeds_threshold: bool,
}

pub fn check_insolvency(snapshots: &[EntitySnapshot], threshold: f64) -> InsolvencyStats {
    let total_entity_years = snapshots.len();
    let insolvent: Vec<&EntitySnapshot> = snapshots.iter().filter(|s| !s.is_solvent).collect();

    let mut failed_entities: Vec<usize> = Vec::new();
    for s in &insolvent {
        if !failed_entities.contains(&s.entity_id) {
            failed_entities.push(s.entity_id);
        }
    }

    let insolvency_rate = if total_entity_years > 0 {
        insolvent.len() as f64 / total_entity_years as f64
    } else {
        0.0
    };

    InsolvencyStats {
        total_entity_years,
        insolvent_count: insolvent.len(),
        insolvency_rate,
        num_failed_entities: failed_entities.len(),
        failed_entities,
        exceeds_threshold: insolvency_rate > threshold,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LossExplosion {
    pub year: usize,
    pub loss_ratio: f64,
}

pub fn check_loss_explosions(
    series: &[MarketTimeSeriesRecord],
    threshold: f64,
) -> Vec<LossExplosion> {
    series
        .iter()
        .filter(|r| r.loss_ratio > threshold)
        .map(|r| LossExplosion {
            year: r.year,
            loss_ratio: r.loss_ratio,
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum IssueCategory {
    NegativeCapital,
    ExtremeLossRatio,
    MissingFinalYear,
    CapacityViolation,
    InsolvencyRate,
    LossRatioExplosion,
}

/// One flagged condition: category, count and offending identifiers
///
/// Identifiers are entity ids, except for loss-ratio explosions where they are
/// years.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    pub category: IssueCategory,
    pub count: usize,
    pub ids: Vec<usize>,
}

/// Every check result for one run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunAnomalies {
    /// `None` when the run has no entity snapshots
    pub shadow_state: Option<ShadowStateResult>,
    pub capacity_violations: Vec<CapacityViolation>,
    pub insolvency: Option<InsolvencyStats>,
    pub loss_explosions: Vec<LossExplosion>,
    pub stationarity: Option<StationarityResult>,
    pub overall_pass: bool,
}

impl RunAnomalies {
    pub fn with_stationarity(mut self, stationarity: Option<StationarityResult>) -> Self {
        self.stationarity = stationarity;
        self
    }

    /// Flagged conditions in check order
    pub fn issues(&self) -> Vec<Issue> {
        let mut issues = Vec::new();

        if let Some(shadow) = &self.shadow_state {
            for issue in &shadow.issues {
                issues.push(match issue {
                    ShadowStateIssue::NegativeCapital { count, entity_ids } => Issue {
                        category: IssueCategory::NegativeCapital,
                        count: *count,
                        ids: entity_ids.clone(),
                    },
                    ShadowStateIssue::ExtremeLossRatios {
                        count, entity_ids, ..
                    } => Issue {
                        category: IssueCategory::ExtremeLossRatio,
                        count: *count,
                        ids: entity_ids.clone(),
                    },
                    ShadowStateIssue::MissingFinalYear { .. } => Issue {
                        category: IssueCategory::MissingFinalYear,
                        count: 1,
                        ids: Vec::new(),
                    },
                });
            }
        }

        if !self.capacity_violations.is_empty() {
            let mut ids: Vec<usize> = Vec::new();
            for v in &self.capacity_violations {
                if !ids.contains(&v.entity_id) {
                    ids.push(v.entity_id);
                }
            }
            issues.push(Issue {
                category: IssueCategory::CapacityViolation,
                count: self.capacity_violations.len(),
                ids,
            });
        }

        if let Some(stats) = self.insolvency.as_ref().filter(|s| s.exceeds_threshold) {
            issues.push(Issue {
                category: IssueCategory::InsolvencyRate,
                count: stats.insolvent_count,
                ids: stats.failed_entities.clone(),
            });
        }

        if !self.loss_explosions.is_empty() {
            issues.push(Issue {
                category: IssueCategory::LossRatioExplosion,
                count: self.loss_explosions.len(),
                ids: self.loss_explosions.iter().map(|e| e.year).collect(),
            });
        }

        issues
    }

    /// Number of flagged conditions that make the verdict fail
    pub fn critical_issue_count(&self) -> usize {
        self.issues().len()
    }
}

pub struct ConsistencyChecker {
    thresholds: Thresholds,
}

impl ConsistencyChecker {
    pub fn new(thresholds: Thresholds) -> Self {
        ConsistencyChecker { thresholds }
    }

    pub fn thresholds(&self) -> &Thresholds {
        &self.thresholds
    }

    /// Run every check over one run
    pub fn check(&self, run_id: &str, data: &RunData) -> RunAnomalies {
        let t = &self.thresholds;
        let leverage = data.leverage_ratio().unwrap_or(t.default_leverage_ratio);

        let (shadow_state, capacity_violations, insolvency) = match &data.snapshots {
            Some(snapshots) => (
                Some(check_shadow_state(&data.series, snapshots, t)),
                check_capacity(snapshots, leverage, t.capacity_tolerance),
                Some(check_insolvency(snapshots, t.insolvency_rate_threshold)),
            ),
            None => (None, Vec::new(), None),
        };
        let loss_explosions = check_loss_explosions(&data.series, t.loss_ratio_explosion);

        let mut anomalies = RunAnomalies {
            shadow_state,
            capacity_violations,
            insolvency,
            loss_explosions,
            stationarity: None,
            overall_pass: false,
        };

        let issues = anomalies.issues();
        for issue in &issues {
            warn!(run = run_id, category = ?issue.category, count = issue.count, "consistency check flagged");
        }
        anomalies.overall_pass = issues.is_empty();
        anomalies
    }
}
