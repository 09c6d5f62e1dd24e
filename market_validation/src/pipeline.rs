//! Per-run analysis and the batch driver
//!
//! A run is analysed in a fixed order: steady-state window, cycle diagnostics,
//! stationarity, consistency checks, concentration. Batches load and analyse each
//! run on the worker pool, skip runs that fail to load, and fold the rest into an
//! [`ExperimentResult`] in run order.

use crate::aggregate::{
    AggregateMetrics, GroupReducer, Groups, RunMetricsReducer, SensitivityTable, SweepReducer,
    TwoSampleComparison,
};
use crate::concentration::{ConcentrationAnalyzer, ConcentrationRecord, ConcentrationSummary};
use crate::config::AnalysisConfig;
use crate::consistency::{ConsistencyChecker, RunAnomalies};
use crate::cycles::{analyze_cycles, CycleMetrics};
use crate::error::Result;
use crate::loader::{discover_runs, discover_sweep, DirectoryLoader, RunLoader, SweepPoint};
use crate::report::{AnomalyReducer, AnomalyReport};
use crate::stationarity::{adf_test, StationarityResult};
use crate::stats::mean;
use crate::RunData;
use replication::parallel::{simple_progress_reporter, ParallelRunner};
use replication::{BatchSummary, Reducer};
use serde::{Deserialize, Serialize};
use std::path::Path;
use tracing::{debug, info, warn};

/// Everything derived from one run
#[derive(Debug, Clone, PartialEq)]
pub struct RunAnalysis {
    pub run_id: String,
    pub window_len: usize,
    pub cycles: CycleMetrics,
    pub stationarity: Option<StationarityResult>,
    pub anomalies: RunAnomalies,
    pub concentration: Vec<ConcentrationRecord>,
    pub concentration_summary: Option<ConcentrationSummary>,
    /// Mean loss ratio over the steady-state window
    pub steady_state_mean: Option<f64>,
}

pub fn analyze_run(run_id: &str, data: &RunData, config: &AnalysisConfig) -> RunAnalysis {
    let window = config
        .window_policy()
        .apply(&data.series)
        .map_err(|e| debug!(run = run_id, error = %e, "no steady-state window"))
        .ok();
    let loss_ratios = window.as_ref().map(|w| w.loss_ratios()).unwrap_or_default();

    let cycles = if window.is_some() {
        analyze_cycles(&loss_ratios, config.cycles.peak_min_distance)
    } else {
        CycleMetrics::undetermined()
    };

    let stationarity = if window.is_some() {
        adf_test(&loss_ratios, config.statistics.stationarity_alpha)
            .map_err(|e| debug!(run = run_id, error = %e, "stationarity undetermined"))
            .ok()
    } else {
        None
    };

    let anomalies = ConsistencyChecker::new(config.thresholds.clone())
        .check(run_id, data)
        .with_stationarity(stationarity);

    let analyzer = ConcentrationAnalyzer {
        source: config.concentration.share_source,
        top_n: config.concentration.top_n,
    };
    let snapshots = data.snapshots.as_deref().unwrap_or_default();
    let concentration = analyzer.records(snapshots);
    let concentration_summary = analyzer.summarize(snapshots);

    RunAnalysis {
        run_id: run_id.to_string(),
        window_len: loss_ratios.len(),
        steady_state_mean: window
            .as_ref()
            .map(|_| mean(&loss_ratios))
            .filter(|m| m.is_finite()),
        cycles,
        stationarity,
        anomalies,
        concentration,
        concentration_summary,
    }
}

/// Scalar per-run metrics that scenarios can be compared on
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMetric {
    MeanLossRatio,
    StdLossRatio,
    CyclePeriod,
    DominantFrequency,
    CycleAmplitude,
    Ar2A1,
    Ar2A2,
    InsolvencyRate,
    MeanHhi,
}

impl RunMetric {
    pub const ALL: [RunMetric; 9] = [
        RunMetric::MeanLossRatio,
        RunMetric::StdLossRatio,
        RunMetric::CyclePeriod,
        RunMetric::DominantFrequency,
        RunMetric::CycleAmplitude,
        RunMetric::Ar2A1,
        RunMetric::Ar2A2,
        RunMetric::InsolvencyRate,
        RunMetric::MeanHhi,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            RunMetric::MeanLossRatio => "mean_loss_ratio",
            RunMetric::StdLossRatio => "std_loss_ratio",
            RunMetric::CyclePeriod => "cycle_period",
            RunMetric::DominantFrequency => "dominant_frequency",
            RunMetric::CycleAmplitude => "cycle_amplitude",
            RunMetric::Ar2A1 => "ar2_a1",
            RunMetric::Ar2A2 => "ar2_a2",
            RunMetric::InsolvencyRate => "insolvency_rate",
            RunMetric::MeanHhi => "mean_hhi",
        }
    }

    /// `None` when the metric is undetermined for the run
    pub fn value(&self, run: &RunAnalysis) -> Option<f64> {
        match self {
            RunMetric::MeanLossRatio => run.cycles.mean_loss_ratio,
            RunMetric::StdLossRatio => run.cycles.std_loss_ratio,
            RunMetric::CyclePeriod => run.cycles.cycle_period,
            RunMetric::DominantFrequency => run.cycles.dominant_frequency,
            RunMetric::CycleAmplitude => run.cycles.cycle_amplitude,
            RunMetric::Ar2A1 => run.cycles.a1(),
            RunMetric::Ar2A2 => run.cycles.a2(),
            RunMetric::InsolvencyRate => {
                run.anomalies.insolvency.as_ref().map(|s| s.insolvency_rate)
            }
            RunMetric::MeanHhi => run.concentration_summary.as_ref().map(|s| s.mean_hhi),
        }
    }
}

/// Reduced output of one experiment
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentResult {
    pub aggregate: AggregateMetrics,
    pub anomalies: AnomalyReport,
    /// Concentration of the first run that has any
    pub concentration: Vec<ConcentrationRecord>,
    pub concentration_summary: Option<ConcentrationSummary>,
    pub run_ids: Vec<String>,
    /// Per-run values of every [`RunMetric`], grouped by its label
    pub samples: Groups,
}

impl ExperimentResult {
    pub fn samples(&self, metric: RunMetric) -> &[f64] {
        self.samples.values(metric.label()).unwrap_or_default()
    }
}

#[derive(Debug, Clone, Default)]
pub struct ExperimentReducer {
    metrics: RunMetricsReducer,
    anomalies: AnomalyReducer,
    concentration: Option<(Vec<ConcentrationRecord>, Option<ConcentrationSummary>)>,
    run_ids: Vec<String>,
    samples: GroupReducer,
}

impl ExperimentReducer {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Reducer<RunAnalysis> for ExperimentReducer {
    type Output = ExperimentResult;

    fn accumulate(&mut self, run: RunAnalysis) {
        self.metrics.accumulate(&run.cycles);
        self.anomalies.accumulate((run.run_id.as_str(), &run.anomalies));
        for metric in RunMetric::ALL {
            if let Some(value) = metric.value(&run) {
                self.samples.push(metric.label(), value);
            }
        }
        if self.concentration.is_none() && !run.concentration.is_empty() {
            self.concentration = Some((run.concentration, run.concentration_summary));
        }
        self.run_ids.push(run.run_id);
    }

    fn merge(&mut self, other: Self) {
        self.metrics.merge(other.metrics);
        self.anomalies.merge(other.anomalies);
        self.samples.merge(other.samples);
        if self.concentration.is_none() {
            self.concentration = other.concentration;
        }
        self.run_ids.extend(other.run_ids);
    }

    fn finalize(self) -> ExperimentResult {
        let (concentration, concentration_summary) = self.concentration.unwrap_or_default();
        ExperimentResult {
            aggregate: self.metrics.finalize(),
            anomalies: self.anomalies.finalize(),
            concentration,
            concentration_summary,
            run_ids: self.run_ids,
            samples: self.samples.finalize(),
        }
    }
}

/// Load and analyse every run on the worker pool
///
/// Runs that fail to load are skipped with their cause; they never abort the batch.
/// `aggregate.num_runs` counts every run, `successful_runs` only the analysed ones.
pub fn analyze_batch<L: RunLoader>(
    loader: &L,
    run_ids: &[String],
    config: &AnalysisConfig,
) -> BatchSummary<ExperimentResult> {
    info!(runs = run_ids.len(), "analysing batch");

    let job = |index: usize| -> std::result::Result<RunAnalysis, String> {
        let run_id = &run_ids[index];
        let data = loader
            .load(run_id)
            .map_err(|e| format!("{}: {}", run_id, e))?;
        Ok(analyze_run(run_id, &data, config))
    };

    let mut runner = ParallelRunner::new(run_ids.len(), job)
        .progress(simple_progress_reporter((run_ids.len() / 10).max(1)));
    if let Some(n) = config.batch.num_threads {
        runner = runner.num_threads(n);
    }

    let batch = runner.run_reduced(ExperimentReducer::new());
    if batch.valid_runs == 0 && batch.total_runs > 0 {
        warn!(runs = batch.total_runs, "every run was skipped");
    }

    let total_runs = batch.total_runs;
    let valid_runs = batch.valid_runs;
    batch.map(|mut result| {
        result.aggregate.num_runs = total_runs;
        result.aggregate.successful_runs = valid_runs;
        result
    })
}

/// Discover and analyse every `run_*` directory under `root`
pub fn analyze_experiment<P: AsRef<Path>>(
    root: P,
    config: &AnalysisConfig,
) -> Result<BatchSummary<ExperimentResult>> {
    let root = root.as_ref();
    let run_ids = discover_runs(root)?;
    let loader = DirectoryLoader::new(root);
    Ok(analyze_batch(&loader, &run_ids, config))
}

/// One analysed parameter value of a sweep
#[derive(Debug, Clone)]
pub struct SweepOutcome {
    pub point: SweepPoint,
    pub batch: BatchSummary<ExperimentResult>,
}

#[derive(Debug, Clone)]
pub struct SweepAnalysis {
    pub table: SensitivityTable,
    pub outcomes: Vec<SweepOutcome>,
}

/// Analyse every `<param>_<value>` directory under `root`
///
/// `None` when `root` holds no parameter directories. Directories for a second
/// parameter name are ignored.
pub fn analyze_sweep<P: AsRef<Path>>(
    root: P,
    config: &AnalysisConfig,
) -> Result<Option<SweepAnalysis>> {
    let points = discover_sweep(root)?;
    let Some(param_name) = points.first().map(|p| p.param_name.clone()) else {
        return Ok(None);
    };

    let mut outcomes = Vec::new();
    for point in points {
        if point.param_name != param_name {
            warn!(
                expected = %param_name,
                found = %point.param_name,
                "ignoring directory for another parameter"
            );
            continue;
        }
        info!(param = %param_name, value = point.param_value, "analysing sweep point");
        let batch = analyze_experiment(&point.path, config)?;
        outcomes.push(SweepOutcome { point, batch });
    }

    let mut sweep = SweepReducer::new(Some(param_name));
    for outcome in &outcomes {
        sweep.accumulate((outcome.point.param_value, &outcome.batch.output.aggregate));
    }

    Ok(Some(SweepAnalysis {
        table: sweep.finalize(),
        outcomes,
    }))
}

/// Two-sample t-test of one per-run metric between two experiments
pub fn compare_scenarios(
    baseline: &ExperimentResult,
    treatment: &ExperimentResult,
    metric: RunMetric,
    alpha: f64,
) -> Result<TwoSampleComparison> {
    let mut groups = GroupReducer::new();
    for &value in baseline.samples(metric) {
        groups.push("baseline", value);
    }
    for &value in treatment.samples(metric) {
        groups.push("treatment", value);
    }
    groups.finalize().two_sample("baseline", "treatment", alpha)
}
