//! Per-row statistics of attributions across runs

use super::assembler::{AttributionRecord, AttributionTable};
use crate::error::{AttributionError, Result};
use crate::features::{FeatureId, RowId};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Which attribution column to aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttributionScale {
    /// Attribution in units of the target
    Absolute,
    /// Attribution as a fraction of the prediction
    Relative,
}

impl AttributionScale {
    pub fn value(&self, record: &AttributionRecord) -> f64 {
        match self {
            AttributionScale::Absolute => record.attribution,
            AttributionScale::Relative => record.relative_attribution,
        }
    }
}

/// Cross-run statistics of one feature's attribution at one row.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AggregatedStat {
    pub row_id: RowId,
    /// Sample weight of the row
    pub weight: f64,
    pub feature_value: f64,
    pub mean: f64,
    /// Sample standard deviation; NaN with fewer than two finite values
    pub std: f64,
    /// `mean - 2 * std`
    pub lower: f64,
    /// `mean + 2 * std`
    pub upper: f64,
    /// Runs that sampled this row
    pub n_runs: usize,
}

struct RowGroup {
    weight: f64,
    feature_value: f64,
    values: Vec<f64>,
}

fn same(a: f64, b: f64) -> bool {
    a == b || (a.is_nan() && b.is_nan())
}

/// Aggregate one feature by original row, ordered by feature value.
///
/// Fails with [`AttributionError::DeterminismViolation`] if a row carries a
/// different feature value or weight in different runs.
pub fn aggregate(
    table: &AttributionTable,
    feature: &FeatureId,
    scale: AttributionScale,
) -> Result<Vec<AggregatedStat>> {
    aggregate_records(table.records(feature)?, feature, scale)
}

pub fn aggregate_records(
    records: &[AttributionRecord],
    feature: &FeatureId,
    scale: AttributionScale,
) -> Result<Vec<AggregatedStat>> {
    let mut groups: BTreeMap<RowId, RowGroup> = BTreeMap::new();

    for record in records {
        let value = scale.value(record);
        match groups.get_mut(&record.row_id) {
            Some(group) => {
                if !same(group.feature_value, record.feature_value) {
                    return Err(AttributionError::DeterminismViolation {
                        feature: feature.to_string(),
                        row_id: record.row_id.0,
                        first: group.feature_value,
                        other: record.feature_value,
                    });
                }
                if !same(group.weight, record.sample_weight) {
                    return Err(AttributionError::DeterminismViolation {
                        feature: format!("{feature} (sample weight)"),
                        row_id: record.row_id.0,
                        first: group.weight,
                        other: record.sample_weight,
                    });
                }
                group.values.push(value);
            }
            None => {
                groups.insert(
                    record.row_id,
                    RowGroup {
                        weight: record.sample_weight,
                        feature_value: record.feature_value,
                        values: vec![value],
                    },
                );
            }
        }
    }

    let mut stats: Vec<AggregatedStat> = groups
        .into_iter()
        .map(|(row_id, group)| {
            let (mean, std) = mean_std(&group.values);
            AggregatedStat {
                row_id,
                weight: group.weight,
                feature_value: group.feature_value,
                mean,
                std,
                lower: mean - 2.0 * std,
                upper: mean + 2.0 * std,
                n_runs: group.values.len(),
            }
        })
        .collect();

    // Stable, so equal feature values stay in row id order.
    stats.sort_by(|a, b| a.feature_value.total_cmp(&b.feature_value));
    Ok(stats)
}

/// Mean and sample standard deviation of the non-NaN values.
fn mean_std(values: &[f64]) -> (f64, f64) {
    let finite: Vec<f64> = values.iter().copied().filter(|v| !v.is_nan()).collect();
    let n = finite.len();
    if n == 0 {
        return (f64::NAN, f64::NAN);
    }
    let mean = finite.iter().sum::<f64>() / n as f64;
    if n < 2 {
        return (mean, f64::NAN);
    }
    let var = finite.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1) as f64;
    (mean, var.sqrt())
}
