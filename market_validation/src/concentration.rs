//! Market concentration
//!
//! Per-year Herfindahl-Hirschman index and Gini coefficient over the entities'
//! market shares:
//! - HHI = Σ s_i², from 1/N (equal shares) to 1 (monopoly)
//! - Gini from 0 (equal shares) towards 1 (one entity holds everything)
//!
//! Shares are either recomputed from each entity's customer count or the ones the
//! simulation reported. Reported shares are often left at zero, so a year whose
//! reported shares sum to zero falls back to customer-derived shares.

use crate::stats::{mean, std_dev};
use crate::EntitySnapshot;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::debug;

/// Mean yearly maximum share above which one firm is considered dominant
pub const DOMINANT_SHARE: f64 = 0.4;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShareSource {
    /// `market_share` column as written by the simulation
    Reported,
    /// num_customers / total customers in the year
    #[default]
    Customers,
}

/// Herfindahl-Hirschman index
///
/// # Examples
///
/// ```
/// use market_validation::concentration::hhi;
///
/// assert_eq!(hhi(&[1.0]), 1.0);
/// assert_eq!(hhi(&[0.5, 0.5]), 0.5);
/// ```
pub fn hhi(shares: &[f64]) -> f64 {
    shares.iter().map(|s| s * s).sum()
}

/// Gini coefficient: (N + 1 − 2·Σcumsum / cumsum_last) / N over ascending shares
///
/// Zero for an empty set or when every share is zero.
pub fn gini(shares: &[f64]) -> f64 {
    let n = shares.len();
    if n == 0 || shares.iter().sum::<f64>() == 0.0 {
        return 0.0;
    }

    let mut sorted = shares.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));

    let mut running = 0.0;
    let mut cumsum_total = 0.0;
    for s in &sorted {
        running += s;
        cumsum_total += running;
    }

    (n as f64 + 1.0 - 2.0 * cumsum_total / running) / n as f64
}

/// One entity's share in one year
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct EntityShare {
    pub year: usize,
    pub entity_id: usize,
    pub market_share: f64,
    pub num_customers: usize,
}

/// Shares recomputed from customer counts
pub fn market_share_evolution(snapshots: &[EntitySnapshot]) -> Vec<EntityShare> {
    let mut totals: BTreeMap<usize, usize> = BTreeMap::new();
    for s in snapshots {
        *totals.entry(s.year).or_insert(0) += s.num_customers;
    }

    snapshots
        .iter()
        .map(|s| {
            let total = totals.get(&s.year).copied().unwrap_or(0);
            EntityShare {
                year: s.year,
                entity_id: s.entity_id,
                market_share: if total > 0 {
                    s.num_customers as f64 / total as f64
                } else {
                    0.0
                },
                num_customers: s.num_customers,
            }
        })
        .collect()
}

/// Shares per `source`; reported shares that sum to zero in a year are replaced
/// by that year's customer-derived shares
pub fn entity_shares(snapshots: &[EntitySnapshot], source: ShareSource) -> Vec<EntityShare> {
    let from_customers = market_share_evolution(snapshots);
    if source == ShareSource::Customers {
        return from_customers;
    }

    let mut reported_totals: BTreeMap<usize, f64> = BTreeMap::new();
    for s in snapshots {
        *reported_totals.entry(s.year).or_insert(0.0) += s.market_share;
    }

    snapshots
        .iter()
        .zip(from_customers)
        .map(|(s, derived)| {
            let reported_total = reported_totals.get(&s.year).copied().unwrap_or(0.0);
            if reported_total > 0.0 {
                EntityShare {
                    market_share: s.market_share,
                    ..derived
                }
            } else {
                derived
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationRecord {
    pub year: usize,
    pub hhi: f64,
    pub gini: f64,
    pub num_active: usize,
}

/// One record per year, ascending
///
/// A year with no positive share gets hhi, gini and num_active of zero.
pub fn concentration_timeseries(shares: &[EntityShare]) -> Vec<ConcentrationRecord> {
    let mut by_year: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
    for s in shares {
        by_year.entry(s.year).or_default().push(s.market_share);
    }

    by_year
        .into_iter()
        .map(|(year, year_shares)| {
            let num_active = year_shares.iter().filter(|&&s| s > 0.0).count();
            if num_active == 0 {
                debug!(year, "no market share in year");
                return ConcentrationRecord {
                    year,
                    hhi: 0.0,
                    gini: 0.0,
                    num_active,
                };
            }
            ConcentrationRecord {
                year,
                hhi: hhi(&year_shares),
                gini: gini(&year_shares),
                num_active,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConcentrationLevel {
    Competitive,
    Moderate,
    HighlyConcentrated,
}

impl ConcentrationLevel {
    /// Above 0.25 highly concentrated, above 0.15 moderate
    pub fn classify(hhi: f64) -> Self {
        if hhi > 0.25 {
            ConcentrationLevel::HighlyConcentrated
        } else if hhi > 0.15 {
            ConcentrationLevel::Moderate
        } else {
            ConcentrationLevel::Competitive
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TopFirm {
    pub entity_id: usize,
    pub average_share: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConcentrationSummary {
    pub num_years: usize,
    pub mean_hhi: f64,
    /// Sample standard deviations across years
    pub std_hhi: f64,
    pub min_hhi: f64,
    pub max_hhi: f64,
    pub mean_gini: f64,
    pub std_gini: f64,
    pub level: ConcentrationLevel,
    pub top_firms: Vec<TopFirm>,
    pub mean_max_share: f64,
    pub dominant_firm: bool,
}

/// Concentration over a run's snapshots
#[derive(Debug, Clone, Copy)]
pub struct ConcentrationAnalyzer {
    pub source: ShareSource,
    pub top_n: usize,
}

impl Default for ConcentrationAnalyzer {
    fn default() -> Self {
        ConcentrationAnalyzer {
            source: ShareSource::default(),
            top_n: 5,
        }
    }
}

impl ConcentrationAnalyzer {
    pub fn records(&self, snapshots: &[EntitySnapshot]) -> Vec<ConcentrationRecord> {
        concentration_timeseries(&entity_shares(snapshots, self.source))
    }

    /// Statistics over the years with at least one positive share; `None` when there
    /// are no such years
    pub fn summarize(&self, snapshots: &[EntitySnapshot]) -> Option<ConcentrationSummary> {
        let shares = entity_shares(snapshots, self.source);
        let records: Vec<ConcentrationRecord> = concentration_timeseries(&shares)
            .into_iter()
            .filter(|r| r.num_active > 0)
            .collect();
        if records.is_empty() {
            return None;
        }

        let hhis: Vec<f64> = records.iter().map(|r| r.hhi).collect();
        let ginis: Vec<f64> = records.iter().map(|r| r.gini).collect();
        let mean_hhi = mean(&hhis);

        let mut per_entity: BTreeMap<usize, Vec<f64>> = BTreeMap::new();
        let mut yearly_max: BTreeMap<usize, f64> = BTreeMap::new();
        for s in &shares {
            per_entity.entry(s.entity_id).or_default().push(s.market_share);
            let max = yearly_max.entry(s.year).or_insert(f64::NEG_INFINITY);
            *max = max.max(s.market_share);
        }

        let mut top_firms: Vec<TopFirm> = per_entity
            .into_iter()
            .map(|(entity_id, values)| TopFirm {
                entity_id,
                average_share: mean(&values),
            })
            .collect();
        top_firms.sort_by(|a, b| {
            b.average_share
                .total_cmp(&a.average_share)
                .then(a.entity_id.cmp(&b.entity_id))
        });
        top_firms.truncate(self.top_n);

        let maxima: Vec<f64> = yearly_max.into_values().collect();
        let mean_max_share = mean(&maxima);

        Some(ConcentrationSummary {
            num_years: records.len(),
            mean_hhi,
            std_hhi: std_dev(&hhis, 1),
            min_hhi: hhis.iter().copied().fold(f64::INFINITY, f64::min),
            max_hhi: hhis.iter().copied().fold(f64::NEG_INFINITY, f64::max),
            mean_gini: mean(&ginis),
            std_gini: std_dev(&ginis, 1),
            level: ConcentrationLevel::classify(mean_hhi),
            top_firms,
            mean_max_share,
            dominant_firm: mean_max_share > DOMINANT_SHARE,
        })
    }
}
