//! Cross-run aggregation
//!
//! Reducers that fold per-run results, in replication order, into experiment-level
//! statistics:
//! - [`RunMetricsReducer`]: cycle metrics of one configuration → [`AggregateMetrics`]
//! - [`GroupReducer`]: named scalar samples → t-tests, Levene, confidence intervals
//! - [`SweepReducer`]: aggregates per swept parameter value → [`SensitivityTable`]

use crate::cycles::CycleMetrics;
use crate::error::{AnalysisError, Result};
use crate::stats::{self, mean, std_dev};
use replication::Reducer;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Summary of a sample; population std, all zero for an empty sample
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct MeanStd {
    pub mean: f64,
    pub std: f64,
    pub min: f64,
    pub max: f64,
    #[serde(default)]
    pub n: usize,
}

impl MeanStd {
    pub fn from_values(values: &[f64]) -> Self {
        if values.is_empty() {
            return MeanStd::default();
        }

        MeanStd {
            mean: mean(values),
            std: std_dev(values, 0),
            min: values.iter().copied().fold(f64::INFINITY, f64::min),
            max: values.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            n: values.len(),
        }
    }

    /// Mean, or `None` for an empty sample
    pub fn mean_if_any(&self) -> Option<f64> {
        (self.n > 0).then_some(self.mean)
    }

    pub fn std_if_any(&self) -> Option<f64> {
        (self.n > 0).then_some(self.std)
    }
}

/// Cycle statistics across the runs of one configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregateMetrics {
    pub num_runs: usize,
    pub successful_runs: usize,
    pub cycle_detection_rate: f64,
    pub mean_loss_ratio: MeanStd,
    pub cycle_period: MeanStd,
    pub dominant_frequency: MeanStd,
    pub std_loss_ratio: MeanStd,
    pub ar2_a1: MeanStd,
    pub ar2_a2: MeanStd,
    pub cycle_conditions_met_rate: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RunMetricsReducer {
    runs: usize,
    cycles_detected: usize,
    conditions_met: usize,
    mean_loss_ratios: Vec<f64>,
    cycle_periods: Vec<f64>,
    dominant_frequencies: Vec<f64>,
    std_loss_ratios: Vec<f64>,
    ar2_a1s: Vec<f64>,
    ar2_a2s: Vec<f64>,
}

impl RunMetricsReducer {
    pub fn new() -> Self {
        Self::default()
    }
}

fn push_finite(values: &mut Vec<f64>, value: Option<f64>) {
    match value {
        Some(v) if v.is_finite() => values.push(v),
        Some(v) => debug!(value = v, "non-finite run metric left out of aggregate"),
        None => {}
    }
}

impl<'a> Reducer<&'a CycleMetrics> for RunMetricsReducer {
    type Output = AggregateMetrics;

    fn accumulate(&mut self, metrics: &'a CycleMetrics) {
        self.runs += 1;
        if metrics.has_cycles {
            self.cycles_detected += 1;
        }
        if metrics.cycle_conditions_met {
            self.conditions_met += 1;
        }
        push_finite(&mut self.mean_loss_ratios, metrics.mean_loss_ratio);
        push_finite(&mut self.cycle_periods, metrics.cycle_period);
        push_finite(&mut self.dominant_frequencies, metrics.dominant_frequency);
        push_finite(&mut self.std_loss_ratios, metrics.std_loss_ratio);
        push_finite(&mut self.ar2_a1s, metrics.a1());
        push_finite(&mut self.ar2_a2s, metrics.a2());
    }

    fn merge(&mut self, other: Self) {
        self.runs += other.runs;
        self.cycles_detected += other.cycles_detected;
        self.conditions_met += other.conditions_met;
        self.mean_loss_ratios.extend(other.mean_loss_ratios);
        self.cycle_periods.extend(other.cycle_periods);
        self.dominant_frequencies.extend(other.dominant_frequencies);
        self.std_loss_ratios.extend(other.std_loss_ratios);
        self.ar2_a1s.extend(other.ar2_a1s);
        self.ar2_a2s.extend(other.ar2_a2s);
    }

    fn finalize(self) -> AggregateMetrics {
        let rate = |count: usize| {
            if self.runs > 0 {
                count as f64 / self.runs as f64
            } else {
                0.0
            }
        };

        AggregateMetrics {
            num_runs: self.runs,
            successful_runs: self.runs,
            cycle_detection_rate: rate(self.cycles_detected),
            mean_loss_ratio: MeanStd::from_values(&self.mean_loss_ratios),
            cycle_period: MeanStd::from_values(&self.cycle_periods),
            dominant_frequency: MeanStd::from_values(&self.dominant_frequencies),
            std_loss_ratio: MeanStd::from_values(&self.std_loss_ratios),
            ar2_a1: MeanStd::from_values(&self.ar2_a1s),
            ar2_a2: MeanStd::from_values(&self.ar2_a2s),
            cycle_conditions_met_rate: rate(self.conditions_met),
        }
    }
}

/// Named samples of one scalar metric, in insertion order
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroupReducer {
    groups: Vec<(String, Vec<f64>)>,
}

impl GroupReducer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, group: &str, value: f64) {
        match self.groups.iter_mut().find(|(name, _)| name == group) {
            Some((_, values)) => values.push(value),
            None => self.groups.push((group.to_string(), vec![value])),
        }
    }
}

impl Reducer<(String, f64)> for GroupReducer {
    type Output = Groups;

    fn accumulate(&mut self, (group, value): (String, f64)) {
        self.push(&group, value);
    }

    fn merge(&mut self, other: Self) {
        for (name, values) in other.groups {
            match self.groups.iter_mut().find(|(n, _)| *n == name) {
                Some((_, existing)) => existing.extend(values),
                None => self.groups.push((name, values)),
            }
        }
    }

    fn finalize(self) -> Groups {
        Groups {
            groups: self
                .groups
                .into_iter()
                .map(|(name, values)| (name, stats::finite(&values)))
                .collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct GroupSummary {
    pub name: String,
    pub n: usize,
    pub mean: f64,
    pub std: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TwoSampleComparison {
    pub baseline: GroupSummary,
    pub treatment: GroupSummary,
    /// `None` when the t-test is undetermined (constant or tiny samples)
    pub t_statistic: Option<f64>,
    pub p_value: Option<f64>,
    /// (baseline − treatment) / baseline × 100; `None` for a zero baseline mean
    pub improvement_pct: Option<f64>,
    pub significant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OneSampleComparison {
    pub group: GroupSummary,
    pub mu: f64,
    pub t_statistic: f64,
    pub p_value: f64,
    pub significant: bool,
    pub confidence_interval: Option<(f64, f64)>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct VarianceComparison {
    pub groups: Vec<GroupSummary>,
    pub statistic: f64,
    pub p_value: f64,
    pub equal_variances: bool,
}

/// Finite samples per group, ready for testing
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Groups {
    groups: Vec<(String, Vec<f64>)>,
}

impl Groups {
    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.groups.iter().map(|(name, _)| name.as_str())
    }

    pub fn values(&self, group: &str) -> Option<&[f64]> {
        self.groups
            .iter()
            .find(|(name, _)| name == group)
            .map(|(_, values)| values.as_slice())
    }

    pub fn summary(&self, group: &str) -> Option<GroupSummary> {
        self.values(group).map(|values| summarize(group, values))
    }

    fn require(&self, group: &str) -> Result<&[f64]> {
        self.values(group)
            .ok_or_else(|| AnalysisError::insufficient("group_comparison", 1, 0))
    }

    /// Pooled-variance t-test of treatment against baseline
    pub fn two_sample(
        &self,
        baseline: &str,
        treatment: &str,
        alpha: f64,
    ) -> Result<TwoSampleComparison> {
        let base = self.require(baseline)?;
        let treat = self.require(treatment)?;

        let test = match stats::ttest_ind(base, treat) {
            Ok(test) => Some(test),
            Err(e) if e.is_undetermined() => {
                debug!(baseline, treatment, error = %e, "two-sample test undetermined");
                None
            }
            Err(e) => return Err(e),
        };

        let base_mean = mean(base);
        let improvement_pct =
            (base_mean != 0.0).then(|| (base_mean - mean(treat)) / base_mean * 100.0);

        Ok(TwoSampleComparison {
            baseline: summarize(baseline, base),
            treatment: summarize(treatment, treat),
            t_statistic: test.map(|t| t.statistic),
            p_value: test.map(|t| t.p_value),
            improvement_pct,
            significant: test.is_some_and(|t| t.p_value < alpha),
        })
    }

    /// One-sample t-test of a group mean against `mu`
    pub fn one_sample(&self, group: &str, mu: f64, alpha: f64) -> Result<OneSampleComparison> {
        let values = self.require(group)?;
        let test = stats::ttest_1samp(values, mu)?;

        Ok(OneSampleComparison {
            group: summarize(group, values),
            mu,
            t_statistic: test.statistic,
            p_value: test.p_value,
            significant: test.p_value < alpha,
            confidence_interval: stats::confidence_interval_95(values),
        })
    }

    /// Median-centred Levene test across every group
    pub fn levene(&self, alpha: f64) -> Result<VarianceComparison> {
        let samples: Vec<&[f64]> = self.groups.iter().map(|(_, v)| v.as_slice()).collect();
        let test = stats::levene(&samples)?;

        Ok(VarianceComparison {
            groups: self.names().filter_map(|name| self.summary(name)).collect(),
            statistic: test.statistic,
            p_value: test.p_value,
            equal_variances: test.p_value > alpha,
        })
    }

    pub fn confidence_interval(&self, group: &str) -> Option<(f64, f64)> {
        self.values(group).and_then(stats::confidence_interval_95)
    }
}

fn summarize(name: &str, values: &[f64]) -> GroupSummary {
    GroupSummary {
        name: name.to_string(),
        n: values.len(),
        mean: mean(values),
        std: std_dev(values, 0),
    }
}

/// Aggregates for one swept parameter value
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SensitivityRow {
    pub param_value: f64,
    pub cycle_detection_rate: f64,
    pub cycle_period_mean: Option<f64>,
    pub cycle_period_std: Option<f64>,
    pub mean_loss_ratio_mean: Option<f64>,
    pub mean_loss_ratio_std: Option<f64>,
    pub std_loss_ratio_mean: Option<f64>,
    pub std_loss_ratio_std: Option<f64>,
    pub ar2_a1_mean: Option<f64>,
    pub ar2_a2_mean: Option<f64>,
    pub cycle_conditions_met_rate: f64,
    pub num_runs: usize,
}

impl SensitivityRow {
    pub fn from_aggregate(param_value: f64, agg: &AggregateMetrics) -> Self {
        SensitivityRow {
            param_value,
            cycle_detection_rate: agg.cycle_detection_rate,
            cycle_period_mean: agg.cycle_period.mean_if_any(),
            cycle_period_std: agg.cycle_period.std_if_any(),
            mean_loss_ratio_mean: agg.mean_loss_ratio.mean_if_any(),
            mean_loss_ratio_std: agg.mean_loss_ratio.std_if_any(),
            std_loss_ratio_mean: agg.std_loss_ratio.mean_if_any(),
            std_loss_ratio_std: agg.std_loss_ratio.std_if_any(),
            ar2_a1_mean: agg.ar2_a1.mean_if_any(),
            ar2_a2_mean: agg.ar2_a2.mean_if_any(),
            cycle_conditions_met_rate: agg.cycle_conditions_met_rate,
            num_runs: agg.num_runs,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitivityMetric {
    CycleDetectionRate,
    CyclePeriod,
    LossRatioVolatility,
    Ar2ConditionsMet,
}

impl SensitivityMetric {
    pub const ALL: [SensitivityMetric; 4] = [
        SensitivityMetric::CycleDetectionRate,
        SensitivityMetric::CyclePeriod,
        SensitivityMetric::LossRatioVolatility,
        SensitivityMetric::Ar2ConditionsMet,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            SensitivityMetric::CycleDetectionRate => "Cycle Detection Rate",
            SensitivityMetric::CyclePeriod => "Cycle Period",
            SensitivityMetric::LossRatioVolatility => "Loss Ratio Volatility",
            SensitivityMetric::Ar2ConditionsMet => "AR(2) Conditions Met",
        }
    }

    fn value(&self, row: &SensitivityRow) -> Option<f64> {
        match self {
            SensitivityMetric::CycleDetectionRate => Some(row.cycle_detection_rate),
            SensitivityMetric::CyclePeriod => row.cycle_period_mean,
            SensitivityMetric::LossRatioVolatility => row.std_loss_ratio_mean,
            SensitivityMetric::Ar2ConditionsMet => Some(row.cycle_conditions_met_rate),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CorrelationResult {
    pub metric: SensitivityMetric,
    pub correlation: f64,
    pub p_value: f64,
    pub significant: bool,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum CorrelationOutcome {
    Computed(CorrelationResult),
    /// Fewer than three finite points
    Insufficient {
        metric: SensitivityMetric,
        valid_points: usize,
    },
    /// Enough points but no spread in one of the variables
    Undetermined {
        metric: SensitivityMetric,
        reason: String,
    },
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SensitivityTable {
    pub param_name: Option<String>,
    /// Sorted by `param_value`
    pub rows: Vec<SensitivityRow>,
}

impl SensitivityTable {
    pub fn total_runs(&self) -> usize {
        self.rows.iter().map(|r| r.num_runs).sum()
    }

    /// Pearson correlation of each metric with the parameter value
    pub fn correlations(&self, alpha: f64) -> Vec<CorrelationOutcome> {
        SensitivityMetric::ALL
            .iter()
            .map(|&metric| self.correlation(metric, alpha))
            .collect()
    }

    pub fn correlation(&self, metric: SensitivityMetric, alpha: f64) -> CorrelationOutcome {
        let (xs, ys): (Vec<f64>, Vec<f64>) = self
            .rows
            .iter()
            .filter_map(|row| {
                metric
                    .value(row)
                    .filter(|v| v.is_finite() && row.param_value.is_finite())
                    .map(|v| (row.param_value, v))
            })
            .unzip();

        if xs.len() < 3 {
            return CorrelationOutcome::Insufficient {
                metric,
                valid_points: xs.len(),
            };
        }

        match stats::pearson(&xs, &ys) {
            Ok(c) => CorrelationOutcome::Computed(CorrelationResult {
                metric,
                correlation: c.r,
                p_value: c.p_value,
                significant: c.p_value < alpha,
            }),
            Err(e) => CorrelationOutcome::Undetermined {
                metric,
                reason: e.to_string(),
            },
        }
    }
}

/// Per-parameter aggregates in, sensitivity table out
#[derive(Debug, Clone, Default)]
pub struct SweepReducer {
    param_name: Option<String>,
    rows: Vec<SensitivityRow>,
}

impl SweepReducer {
    pub fn new(param_name: Option<String>) -> Self {
        SweepReducer {
            param_name,
            rows: Vec::new(),
        }
    }
}

impl<'a> Reducer<(f64, &'a AggregateMetrics)> for SweepReducer {
    type Output = SensitivityTable;

    fn accumulate(&mut self, (param_value, agg): (f64, &'a AggregateMetrics)) {
        self.rows.push(SensitivityRow::from_aggregate(param_value, agg));
    }

    fn merge(&mut self, other: Self) {
        if self.param_name.is_none() {
            self.param_name = other.param_name;
        }
        self.rows.extend(other.rows);
    }

    fn finalize(mut self) -> SensitivityTable {
        self.rows.sort_by(|a, b| a.param_value.total_cmp(&b.param_value));
        SensitivityTable {
            param_name: self.param_name,
            rows: self.rows,
        }
    }
}

/// Split a sweep directory name such as `underwriter_smoothing_0.300`
///
/// # Examples
///
/// ```
/// use market_validation::aggregate::parse_param_key;
///
/// assert_eq!(
///     parse_param_key("underwriter_smoothing_0.300"),
///     Some(("underwriter_smoothing".to_string(), 0.3))
/// );
/// assert_eq!(parse_param_key("run_seed"), None);
/// ```
pub fn parse_param_key(key: &str) -> Option<(String, f64)> {
    let (name, value) = key.rsplit_once('_')?;
    if name.is_empty() {
        return None;
    }
    let value: f64 = value.parse().ok()?;
    value.is_finite().then(|| (name.to_string(), value))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cycles::{check_cycle_conditions, CycleMetrics};
    use approx::{assert_abs_diff_eq, assert_relative_eq};
    use replication::reduce_in_order;

    fn metrics(
        has_cycles: bool,
        period: Option<f64>,
        mean_lr: f64,
        a1: f64,
        a2: f64,
    ) -> CycleMetrics {
        let conditions = check_cycle_conditions(a1, a2);
        CycleMetrics {
            has_cycles,
            cycle_period: period,
            mean_loss_ratio: Some(mean_lr),
            std_loss_ratio: Some(0.1),
            dominant_frequency: Some(0.17),
            ar2_coefficients: Some((0.0, a1, a2)),
            ar2_conditions: Some(conditions),
            cycle_conditions_met: conditions.met(),
            ..CycleMetrics::undetermined()
        }
    }

    #[test]
    fn test_mean_std() {
        let summary = MeanStd::from_values(&[1.0, 3.0]);

        assert_eq!(summary.mean, 2.0);
        assert_eq!(summary.std, 1.0);
        assert_eq!((summary.min, summary.max, summary.n), (1.0, 3.0, 2));
        assert_eq!(MeanStd::from_values(&[]), MeanStd::default());
        assert_eq!(MeanStd::default().mean_if_any(), None);
    }

    #[test]
    fn test_run_metrics_reducer() {
        let runs = [
            metrics(true, Some(6.0), 1.0, 0.5, -0.4),
            metrics(true, Some(8.0), 1.1, 1.0, -0.1),
            metrics(false, None, 0.9, 0.5, -0.4),
            CycleMetrics::undetermined(),
        ];

        let mut reducer = RunMetricsReducer::new();
        for m in &runs {
            reducer.accumulate(m);
        }
        let agg = reducer.finalize();

        assert_eq!(agg.num_runs, 4);
        assert_eq!(agg.cycle_detection_rate, 0.5);
        assert_eq!(agg.cycle_period.mean, 7.0);
        assert_eq!(agg.cycle_period.n, 2);
        assert_relative_eq!(agg.mean_loss_ratio.mean, 1.0, epsilon = 1e-12);
        assert_eq!(agg.mean_loss_ratio.n, 3);
        assert_eq!(agg.cycle_conditions_met_rate, 0.5);
        assert_relative_eq!(agg.ar2_a1.mean, 2.0 / 3.0, epsilon = 1e-12);
    }

    #[test]
    fn test_run_metrics_reducer_drops_non_finite() {
        let broken = CycleMetrics {
            mean_loss_ratio: Some(f64::NAN),
            std_loss_ratio: Some(f64::INFINITY),
            ar2_coefficients: Some((f64::NAN, f64::NAN, f64::NAN)),
            ..CycleMetrics::undetermined()
        };
        let runs = [metrics(true, Some(6.0), 1.0, 0.5, -0.4), broken];

        let mut reducer = RunMetricsReducer::new();
        for m in &runs {
            reducer.accumulate(m);
        }
        let agg = reducer.finalize();

        assert_eq!(agg.num_runs, 2);
        assert_eq!(agg.mean_loss_ratio.n, 1);
        assert_eq!(agg.mean_loss_ratio.mean, 1.0);
        assert_eq!(agg.std_loss_ratio.n, 1);
        assert_eq!(agg.ar2_a1.mean, 0.5);
        assert!(agg.ar2_a2.mean.is_finite());
    }

    #[test]
    fn test_run_metrics_merge_matches_single_pass() {
        let runs: Vec<CycleMetrics> = (0..6)
            .map(|i| {
                let i_f = i as f64;
                metrics(i % 2 == 0, Some(5.0 + i_f), 1.0 + 0.01 * i_f, 0.5, -0.4)
            })
            .collect();

        let mut whole = RunMetricsReducer::new();
        let mut left = RunMetricsReducer::new();
        let mut right = RunMetricsReducer::new();
        for (i, m) in runs.iter().enumerate() {
            whole.accumulate(m);
            if i < 3 {
                left.accumulate(m);
            } else {
                right.accumulate(m);
            }
        }
        left.merge(right);

        assert_eq!(left.finalize(), whole.finalize());
    }

    #[test]
    fn test_empty_reducer_reports_zero_rates() {
        let agg = RunMetricsReducer::new().finalize();

        assert_eq!(agg.num_runs, 0);
        assert_eq!(agg.cycle_detection_rate, 0.0);
        assert_eq!(agg.cycle_conditions_met_rate, 0.0);
    }

    #[test]
    fn test_two_sample_identical_groups() {
        let values = [3.0, 5.0, 4.0, 6.0, 2.0];
        let mut reducer = GroupReducer::new();
        for v in values {
            reducer.push("baseline", v);
            reducer.push("treatment", v);
        }

        let comparison = reducer.finalize().two_sample("baseline", "treatment", 0.05).unwrap();

        assert_abs_diff_eq!(comparison.p_value.unwrap(), 1.0, epsilon = 1e-12);
        assert_abs_diff_eq!(comparison.improvement_pct.unwrap(), 0.0, epsilon = 1e-12);
        assert!(!comparison.significant);
    }

    #[test]
    fn test_two_sample_improvement() {
        let results = vec![
            ("baseline".to_string(), 10.0),
            ("baseline".to_string(), 11.0),
            ("baseline".to_string(), 9.0),
            ("mechanism".to_string(), 5.0),
            ("mechanism".to_string(), 6.0),
            ("mechanism".to_string(), 4.0),
        ];
        let summary = reduce_in_order(
            results.into_iter().map(Ok).collect(),
            GroupReducer::new(),
        );

        let comparison = summary.output.two_sample("baseline", "mechanism", 0.05).unwrap();

        assert_relative_eq!(comparison.improvement_pct.unwrap(), 50.0);
        assert!(comparison.significant);
        assert!(comparison.t_statistic.unwrap() > 0.0);
    }

    #[test]
    fn test_two_sample_constant_groups_undetermined() {
        let mut reducer = GroupReducer::new();
        for _ in 0..3 {
            reducer.push("a", 0.0);
            reducer.push("b", 0.0);
        }

        let comparison = reducer.finalize().two_sample("a", "b", 0.05).unwrap();

        assert_eq!(comparison.p_value, None);
        assert_eq!(comparison.improvement_pct, None);
        assert!(!comparison.significant);
    }

    #[test]
    fn test_two_sample_unknown_group() {
        let groups = GroupReducer::new().finalize();
        assert!(groups.two_sample("a", "b", 0.05).is_err());
    }

    #[test]
    fn test_groups_drop_non_finite() {
        let mut reducer = GroupReducer::new();
        reducer.push("a", 1.0);
        reducer.push("a", f64::NAN);
        reducer.push("a", 3.0);

        let groups = reducer.finalize();

        assert_eq!(groups.values("a"), Some(&[1.0, 3.0][..]));
    }

    #[test]
    fn test_one_sample_against_equilibrium() {
        let mut reducer = GroupReducer::new();
        for v in [0.98, 1.02, 0.99, 1.01, 1.0, 1.0] {
            reducer.push("steady_state", v);
        }

        let result = reducer.finalize().one_sample("steady_state", 1.0, 0.05).unwrap();

        assert!(!result.significant);
        let (lo, hi) = result.confidence_interval.unwrap();
        assert!(lo < 1.0 && hi > 1.0);
    }

    #[test]
    fn test_levene_across_groups() {
        let mut reducer = GroupReducer::new();
        for i in 0..20 {
            reducer.push("calm", 1.0 + 0.01 * (i % 4) as f64);
            reducer.push("volatile", 1.0 + 0.4 * (i % 4) as f64);
        }

        let result = reducer.finalize().levene(0.05).unwrap();

        assert!(!result.equal_variances);
        assert_eq!(result.groups.len(), 2);
    }

    fn aggregate(
        detection: f64,
        period: Option<f64>,
        volatility: f64,
        met: f64,
    ) -> AggregateMetrics {
        let period_values: Vec<f64> = period.into_iter().collect();
        AggregateMetrics {
            num_runs: 10,
            successful_runs: 10,
            cycle_detection_rate: detection,
            mean_loss_ratio: MeanStd::from_values(&[1.0]),
            cycle_period: MeanStd::from_values(&period_values),
            dominant_frequency: MeanStd::default(),
            std_loss_ratio: MeanStd::from_values(&[volatility]),
            ar2_a1: MeanStd::from_values(&[0.5]),
            ar2_a2: MeanStd::from_values(&[-0.4]),
            cycle_conditions_met_rate: met,
        }
    }

    #[test]
    fn test_sweep_rows_sorted_and_correlated() {
        let aggs = [
            (0.5, aggregate(0.9, Some(7.0), 0.15, 0.8)),
            (0.1, aggregate(0.5, Some(5.0), 0.05, 0.4)),
            (0.3, aggregate(0.7, None, 0.10, 0.6)),
        ];

        let mut reducer = SweepReducer::new(Some("underwriter_smoothing".into()));
        for (value, agg) in &aggs {
            reducer.accumulate((*value, agg));
        }
        let table = reducer.finalize();

        let values: Vec<f64> = table.rows.iter().map(|r| r.param_value).collect();
        assert_eq!(values, vec![0.1, 0.3, 0.5]);
        assert_eq!(table.rows[1].cycle_period_mean, None);
        assert_eq!(table.total_runs(), 30);

        let outcomes = table.correlations(0.05);
        assert_eq!(outcomes.len(), 4);
        match &outcomes[0] {
            CorrelationOutcome::Computed(c) => {
                assert_eq!(c.metric, SensitivityMetric::CycleDetectionRate);
                assert_relative_eq!(c.correlation, 1.0, epsilon = 1e-9);
            }
            other => panic!("unexpected outcome {:?}", other),
        }
        assert_eq!(
            outcomes[1],
            CorrelationOutcome::Insufficient {
                metric: SensitivityMetric::CyclePeriod,
                valid_points: 2,
            }
        );
    }

    #[test]
    fn test_sweep_constant_metric_undetermined() {
        let aggs = [
            (0.1, aggregate(1.0, Some(6.0), 0.1, 1.0)),
            (0.2, aggregate(1.0, Some(6.0), 0.1, 1.0)),
            (0.3, aggregate(1.0, Some(6.0), 0.1, 1.0)),
        ];
        let mut reducer = SweepReducer::new(None);
        for (value, agg) in &aggs {
            reducer.accumulate((*value, agg));
        }

        let outcome = reducer
            .finalize()
            .correlation(SensitivityMetric::CycleDetectionRate, 0.05);

        assert!(matches!(outcome, CorrelationOutcome::Undetermined { .. }));
    }

    #[test]
    fn test_parse_param_key() {
        assert_eq!(
            parse_param_key("leverage_ratio_2.5"),
            Some(("leverage_ratio".to_string(), 2.5))
        );
        assert_eq!(parse_param_key("_1.0"), None);
        assert_eq!(parse_param_key("baseline"), None);
        assert_eq!(parse_param_key("run_0"), Some(("run".to_string(), 0.0)));
    }
}
