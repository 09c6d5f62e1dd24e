//! Experiment-level reports and their serialization
//!
//! Writes the outputs of an analysed experiment for downstream tooling:
//! - `anomaly_report.json`: consistency findings per run plus a summary
//! - concentration time series CSV (`year,hhi,gini,num_active`)
//! - sensitivity CSV, one row per swept parameter value
//! - aggregate summary JSON

use crate::aggregate::SensitivityTable;
use crate::concentration::ConcentrationRecord;
use crate::consistency::{
    CapacityViolation, InsolvencyStats, LossExplosion, RunAnomalies, ShadowStateResult,
};
use crate::error::Result;
use replication::Reducer;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Stationary share of runs below which the report raises a warning
pub const STATIONARY_WARNING_FRACTION: f64 = 0.8;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ShadowStateEntry {
    pub run: String,
    pub result: ShadowStateResult,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CapacityEntry {
    pub run: String,
    pub violations: Vec<CapacityViolation>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InsolvencyEntry {
    pub run: String,
    pub stats: InsolvencyStats,
    pub exceeds_threshold: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExplosionEntry {
    pub run: String,
    pub explosions: Vec<LossExplosion>,
}

/// `p_value` is absent when the test was undetermined for the run
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StationarityEntry {
    pub run: String,
    pub is_stationary: bool,
    pub p_value: Option<f64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalySummary {
    pub runs_checked: usize,
    /// Runs with inconsistent shadow state, capacity violations, excess
    /// insolvency or loss-ratio explosions, counted once per check
    pub critical_issue_count: usize,
    pub average_insolvency_rate: Option<f64>,
    pub stationary_fraction: Option<f64>,
}

impl AnomalySummary {
    pub fn passed(&self) -> bool {
        self.critical_issue_count == 0
    }

    pub fn stationarity_warning(&self) -> bool {
        self.stationary_fraction
            .is_some_and(|f| f < STATIONARY_WARNING_FRACTION)
    }
}

/// Anomaly findings for a whole experiment, in run order
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AnomalyReport {
    pub generated_at: String,
    pub shadow_state_issues: Vec<ShadowStateEntry>,
    pub capacity_violations: Vec<CapacityEntry>,
    pub insolvency_stats: Vec<InsolvencyEntry>,
    pub loss_explosions: Vec<ExplosionEntry>,
    pub stationarity_results: Vec<StationarityEntry>,
    pub summary: AnomalySummary,
}

/// Builds an [`AnomalyReport`] from per-run anomalies
#[derive(Debug, Clone, Default)]
pub struct AnomalyReducer {
    runs_checked: usize,
    shadow_state_issues: Vec<ShadowStateEntry>,
    capacity_violations: Vec<CapacityEntry>,
    insolvency_stats: Vec<InsolvencyEntry>,
    loss_explosions: Vec<ExplosionEntry>,
    stationarity_results: Vec<StationarityEntry>,
}

impl AnomalyReducer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl<'a> Reducer<(&'a str, &'a RunAnomalies)> for AnomalyReducer {
    type Output = AnomalyReport;

    fn accumulate(&mut self, (run, anomalies): (&'a str, &'a RunAnomalies)) {
        self.runs_checked += 1;

        if let Some(shadow) = anomalies.shadow_state.as_ref().filter(|s| !s.is_consistent) {
            self.shadow_state_issues.push(ShadowStateEntry {
                run: run.to_string(),
                result: shadow.clone(),
            });
        }

        if !anomalies.capacity_violations.is_empty() {
            self.capacity_violations.push(CapacityEntry {
                run: run.to_string(),
                violations: anomalies.capacity_violations.clone(),
            });
        }

        if let Some(stats) = &anomalies.insolvency {
            self.insolvency_stats.push(InsolvencyEntry {
                run: run.to_string(),
                stats: stats.clone(),
                exceeds_threshold: stats.exceeds_threshold,
            });
        }

        if !anomalies.loss_explosions.is_empty() {
            self.loss_explosions.push(ExplosionEntry {
                run: run.to_string(),
                explosions: anomalies.loss_explosions.clone(),
            });
        }

        self.stationarity_results.push(StationarityEntry {
            run: run.to_string(),
            is_stationary: anomalies.stationarity.is_some_and(|s| s.is_stationary),
            p_value: anomalies.stationarity.map(|s| s.p_value),
        });
    }

    fn merge(&mut self, other: Self) {
        self.runs_checked += other.runs_checked;
        self.shadow_state_issues.extend(other.shadow_state_issues);
        self.capacity_violations.extend(other.capacity_violations);
        self.insolvency_stats.extend(other.insolvency_stats);
        self.loss_explosions.extend(other.loss_explosions);
        self.stationarity_results.extend(other.stationarity_results);
    }

    fn finalize(self) -> AnomalyReport {
        let excessive_insolvency = self
            .insolvency_stats
            .iter()
            .filter(|e| e.exceeds_threshold)
            .count();
        let critical_issue_count = self.shadow_state_issues.len()
            + self.capacity_violations.len()
            + self.loss_explosions.len()
            + excessive_insolvency;

        let average_insolvency_rate = if self.insolvency_stats.is_empty() {
            None
        } else {
            let total: f64 = self.insolvency_stats.iter().map(|e| e.stats.insolvency_rate).sum();
            Some(total / self.insolvency_stats.len() as f64)
        };

        let stationary_fraction = if self.stationarity_results.is_empty() {
            None
        } else {
            let stationary = self.stationarity_results.iter().filter(|e| e.is_stationary).count();
            Some(stationary as f64 / self.stationarity_results.len() as f64)
        };

        AnomalyReport {
            generated_at: chrono::Utc::now().to_rfc3339(),
            summary: AnomalySummary {
                runs_checked: self.runs_checked,
                critical_issue_count,
                average_insolvency_rate,
                stationary_fraction,
            },
            shadow_state_issues: self.shadow_state_issues,
            capacity_violations: self.capacity_violations,
            insolvency_stats: self.insolvency_stats,
            loss_explosions: self.loss_explosions,
            stationarity_results: self.stationarity_results,
        }
    }
}

fn write_json<T: Serialize, P: AsRef<Path>>(path: P, value: &T) -> Result<()> {
    let json = serde_json::to_string_pretty(value)?;
    fs::write(path, json)?;
    Ok(())
}

pub fn write_anomaly_report_json<P: AsRef<Path>>(path: P, report: &AnomalyReport) -> Result<()> {
    write_json(path, report)
}

/// Write any serializable aggregate (e.g. `AggregateMetrics`) as pretty JSON
pub fn write_aggregate_json<T: Serialize, P: AsRef<Path>>(path: P, aggregate: &T) -> Result<()> {
    write_json(path, aggregate)
}

pub fn write_concentration_csv<P: AsRef<Path>>(
    path: P,
    records: &[ConcentrationRecord],
) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record(["year", "hhi", "gini", "num_active"])?;

    for record in records {
        wtr.write_record(&[
            record.year.to_string(),
            record.hhi.to_string(),
            record.gini.to_string(),
            record.num_active.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}

/// Undetermined cells are left empty
pub fn write_sensitivity_csv<P: AsRef<Path>>(path: P, table: &SensitivityTable) -> Result<()> {
    let mut wtr = csv::Writer::from_path(path)?;

    wtr.write_record([
        "param_value",
        "cycle_detection_rate",
        "cycle_period_mean",
        "cycle_period_std",
        "mean_loss_ratio_mean",
        "mean_loss_ratio_std",
        "std_loss_ratio_mean",
        "std_loss_ratio_std",
        "ar2_a1_mean",
        "ar2_a2_mean",
        "cycle_conditions_met_rate",
        "num_runs",
    ])?;

    let cell = |v: Option<f64>| v.map(|x| x.to_string()).unwrap_or_default();

    for row in &table.rows {
        wtr.write_record(&[
            row.param_value.to_string(),
            row.cycle_detection_rate.to_string(),
            cell(row.cycle_period_mean),
            cell(row.cycle_period_std),
            cell(row.mean_loss_ratio_mean),
            cell(row.mean_loss_ratio_std),
            cell(row.std_loss_ratio_mean),
            cell(row.std_loss_ratio_std),
            cell(row.ar2_a1_mean),
            cell(row.ar2_a2_mean),
            row.cycle_conditions_met_rate.to_string(),
            row.num_runs.to_string(),
        ])?;
    }

    wtr.flush()?;
    Ok(())
}
