//! Feature extraction module
//!
//! Turns raw block-group rows into the matrices the ensemble trains on:
//! - [`FeatureSource`] - the extraction contract (pure in rows, year and grouping flag)
//! - [`FeatureFrame`] - feature matrix, sample weights and regression target
//! - [`BlockGroupTable`] - polars-backed source for census block-group tables

mod block_group;

pub use block_group::{BlockGroupTable, ExtractorConfig, FeatureGroup};

use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Column prefix shared by every demographic fraction feature.
pub const FRACTION_PREFIX: &str = "frac_";

/// Stable identity of an input row that survives resampling.
///
/// This is the row's position in the source table, so the same block group
/// keeps the same id in every bootstrap run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RowId(pub usize);

impl fmt::Display for RowId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Name of a model feature (a column of the feature matrix).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureId(String);

impl FeatureId {
    pub fn new(name: impl Into<String>) -> Self {
        Self(name.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is a fraction-of-population feature.
    pub fn is_fraction(&self) -> bool {
        self.0.starts_with(FRACTION_PREFIX)
    }

    /// The census variable code behind the feature (`frac_B03002_003E` -> `B03002_003E`).
    pub fn variable(&self) -> &str {
        self.0.strip_prefix(FRACTION_PREFIX).unwrap_or(&self.0)
    }
}

impl fmt::Display for FeatureId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for FeatureId {
    fn from(name: &str) -> Self {
        Self::new(name)
    }
}

/// Training inputs for one set of rows.
#[derive(Debug, Clone)]
pub struct FeatureFrame {
    /// Original identity of each matrix row
    pub row_ids: Vec<RowId>,
    /// Column names of `x`
    pub features: Vec<FeatureId>,
    /// Feature matrix, one row per entry of `row_ids`
    pub x: Array2<f64>,
    /// Sample weight per row
    pub weights: Array1<f64>,
    /// Regression target per row
    pub target: Array1<f64>,
}

impl FeatureFrame {
    /// Build a frame, checking that every part agrees on the row and column counts.
    pub fn new(
        row_ids: Vec<RowId>,
        features: Vec<FeatureId>,
        x: Array2<f64>,
        weights: Array1<f64>,
        target: Array1<f64>,
    ) -> Result<Self> {
        let n = row_ids.len();
        if x.nrows() != n || weights.len() != n || target.len() != n {
            return Err(AttributionError::ShapeError {
                expected: format!("{n} rows"),
                actual: format!(
                    "x: {}, weights: {}, target: {}",
                    x.nrows(),
                    weights.len(),
                    target.len()
                ),
            });
        }
        if x.ncols() != features.len() {
            return Err(AttributionError::ShapeError {
                expected: format!("{} feature columns", features.len()),
                actual: format!("{} columns", x.ncols()),
            });
        }
        Ok(Self { row_ids, features, x, weights, target })
    }

    pub fn n_rows(&self) -> usize {
        self.row_ids.len()
    }

    pub fn n_features(&self) -> usize {
        self.features.len()
    }

    /// Column index of a feature, if present.
    pub fn feature_index(&self, feature: &FeatureId) -> Option<usize> {
        self.features.iter().position(|f| f == feature)
    }
}

/// Source of training data for the ensemble.
///
/// Implementations must be pure: the same `(rows, year, group)` always yields
/// the same frame. The aggregator checks this after the fact and aborts on
/// any drift.
pub trait FeatureSource: Sync {
    /// Number of rows available for sampling.
    fn n_rows(&self) -> usize;

    /// Extract features, weights and target for `rows`, in the given order.
    fn extract(&self, rows: &[RowId], year: i32, group: bool) -> Result<FeatureFrame>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::array;

    #[test]
    fn test_feature_id_variable() {
        let f = FeatureId::new("frac_B03002_003E");
        assert!(f.is_fraction());
        assert_eq!(f.variable(), "B03002_003E");

        let aux = FeatureId::new("B01003_001E");
        assert!(!aux.is_fraction());
        assert_eq!(aux.variable(), "B01003_001E");
    }

    #[test]
    fn test_frame_shape_validation() {
        let ok = FeatureFrame::new(
            vec![RowId(0), RowId(4)],
            vec!["frac_a".into()],
            array![[0.1], [0.2]],
            array![1.0, 2.0],
            array![10.0, 20.0],
        );
        assert!(ok.is_ok());

        let bad = FeatureFrame::new(
            vec![RowId(0)],
            vec!["frac_a".into()],
            array![[0.1], [0.2]],
            array![1.0, 2.0],
            array![10.0, 20.0],
        );
        assert!(matches!(bad, Err(AttributionError::ShapeError { .. })));
    }

    #[test]
    fn test_feature_index() {
        let frame = FeatureFrame::new(
            vec![RowId(0)],
            vec!["frac_a".into(), "frac_b".into()],
            array![[0.1, 0.9]],
            array![1.0],
            array![10.0],
        )
        .unwrap();
        assert_eq!(frame.feature_index(&"frac_b".into()), Some(1));
        assert_eq!(frame.feature_index(&"frac_c".into()), None);
    }
}
