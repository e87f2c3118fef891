//! Display bounds for aggregated attributions

use super::aggregate::{AggregatedStat, AttributionScale};
use crate::error::{AttributionError, Result};

const ABSOLUTE_BUCKET: f64 = 10_000.0;
const ABSOLUTE_PADDING: f64 = 20_000.0;

/// Relative means beyond this are clipped to a quantile.
const RELATIVE_OUTLIER: f64 = 0.5;
/// Smallest half-range shown in relative mode.
const RELATIVE_MIN_SPAN: f64 = 0.25;

/// `(min, max)` axis bounds for the mean attributions in `stats`.
///
/// Absolute bounds are padded round numbers. Relative bounds clip a few
/// extreme rows and never collapse below `[-0.25, 0.25]`. NaN means are ignored.
pub fn bounds(stats: &[AggregatedStat], scale: AttributionScale) -> Result<(f64, f64)> {
    let mut means: Vec<f64> = stats.iter().map(|s| s.mean).filter(|m| !m.is_nan()).collect();
    if means.is_empty() {
        return Err(AttributionError::EmptyInput("no finite mean attributions to bound".to_string()));
    }
    means.sort_by(f64::total_cmp);
    let min_mean = means[0];
    let max_mean = means[means.len() - 1];

    Ok(match scale {
        AttributionScale::Absolute => (
            (min_mean / ABSOLUTE_BUCKET).floor() * ABSOLUTE_BUCKET - ABSOLUTE_PADDING,
            (max_mean / ABSOLUTE_BUCKET).floor() * ABSOLUTE_BUCKET + ABSOLUTE_PADDING,
        ),
        AttributionScale::Relative => {
            let mut max = max_mean;
            let mut min = min_mean;
            if max > RELATIVE_OUTLIER {
                max = RELATIVE_OUTLIER.max(quantile_higher(&means, 0.98));
            }
            if min < -RELATIVE_OUTLIER {
                min = (-RELATIVE_OUTLIER).min(quantile_lower(&means, 0.02));
            }
            (min.min(-RELATIVE_MIN_SPAN), max.max(RELATIVE_MIN_SPAN))
        }
    })
}

/// Order statistic at or above the `q` position of sorted values.
fn quantile_higher(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    sorted[(pos.ceil() as usize).min(sorted.len() - 1)]
}

/// Order statistic at or below the `q` position of sorted values.
fn quantile_lower(sorted: &[f64], q: f64) -> f64 {
    let pos = q * (sorted.len() - 1) as f64;
    sorted[pos.floor() as usize]
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::features::RowId;

    fn stats(means: &[f64]) -> Vec<AggregatedStat> {
        means
            .iter()
            .enumerate()
            .map(|(i, &mean)| AggregatedStat {
                row_id: RowId(i),
                weight: 1.0,
                feature_value: i as f64,
                mean,
                std: 0.0,
                lower: mean,
                upper: mean,
                n_runs: 2,
            })
            .collect()
    }

    #[test]
    fn test_absolute_bounds() {
        let b = bounds(&stats(&[12345.0, 40000.0, 67890.0]), AttributionScale::Absolute).unwrap();
        assert_eq!(b, (-10000.0, 80000.0));
    }

    #[test]
    fn test_absolute_bounds_negative() {
        let b = bounds(&stats(&[-12345.0, 5.0]), AttributionScale::Absolute).unwrap();
        assert_eq!(b, (-40000.0, 20000.0));
    }

    #[test]
    fn test_relative_low_variance() {
        let b = bounds(&stats(&[-0.1, 0.0, 0.1]), AttributionScale::Relative).unwrap();
        assert_eq!(b, (-0.25, 0.25));
    }

    #[test]
    fn test_relative_keeps_moderate_range() {
        let b = bounds(&stats(&[-0.4, 0.45]), AttributionScale::Relative).unwrap();
        assert_eq!(b, (-0.4, 0.45));
    }

    #[test]
    fn test_relative_clips_outliers() {
        // 101 values: 0.00, 0.01, ..., 0.99 and one outlier at 5.0.
        let mut means: Vec<f64> = (0..100).map(|i| i as f64 / 100.0).collect();
        means.push(5.0);
        let (_, max) = bounds(&stats(&means), AttributionScale::Relative).unwrap();
        // Position 0.98 * 100 = 98 -> 0.98.
        assert_eq!(max, 0.98);

        let negated: Vec<f64> = means.iter().map(|m| -m).collect();
        let (min, _) = bounds(&stats(&negated), AttributionScale::Relative).unwrap();
        assert_eq!(min, -0.98);
    }

    #[test]
    fn test_relative_clip_never_inside_half() {
        // The 98th percentile is below 0.5, so the bound stays at 0.5.
        let mut means = vec![0.1; 99];
        means.push(3.0);
        let (min, max) = bounds(&stats(&means), AttributionScale::Relative).unwrap();
        assert_eq!(max, 0.5);
        assert_eq!(min, -0.25);
    }

    #[test]
    fn test_nan_means_ignored() {
        let b = bounds(&stats(&[f64::NAN, 0.1]), AttributionScale::Relative).unwrap();
        assert_eq!(b, (-0.25, 0.25));
        assert!(bounds(&stats(&[f64::NAN]), AttributionScale::Absolute).is_err());
        assert!(bounds(&[], AttributionScale::Absolute).is_err());
    }
}
