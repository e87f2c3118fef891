//! Model explainability module
//!
//! Additive per-feature attributions of model predictions:
//! - [`AttributionExplainer`] - the capability the ensemble depends on
//! - [`TreeExplainer`] - exact TreeSHAP for boosted trees
//! - [`SamplingExplainer`] - permutation-sampling Shapley values for any model
//!
//! Every implementation must satisfy the reconstruction property: for each
//! row, the attributions plus the baseline equal the model's prediction.

mod sampling;
mod tree_shap;

pub use sampling::SamplingExplainer;
pub use tree_shap::TreeExplainer;

use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2};

/// Per-row, per-feature attributions plus the shared baseline.
#[derive(Debug, Clone, PartialEq)]
pub struct Attributions {
    values: Array2<f64>,
    baseline: f64,
}

/// A row whose attributions fail to reconstruct its prediction.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ReconstructionGap {
    /// Row position in the explained matrix
    pub row: usize,
    /// The model's prediction
    pub expected: f64,
    /// Sum of attributions plus baseline
    pub actual: f64,
}

impl Attributions {
    pub fn new(values: Array2<f64>, baseline: f64) -> Self {
        Self { values, baseline }
    }

    /// `[n_rows, n_features]` attribution matrix.
    pub fn values(&self) -> &Array2<f64> {
        &self.values
    }

    /// Expected model output, identical for every row.
    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    pub fn n_rows(&self) -> usize {
        self.values.nrows()
    }

    pub fn n_features(&self) -> usize {
        self.values.ncols()
    }

    /// Sum of attributions plus baseline for one row.
    pub fn reconstruct(&self, row: usize) -> f64 {
        self.values.row(row).sum() + self.baseline
    }

    /// First row where `|reconstruct - prediction| > tolerance * max(1, |prediction|)`.
    pub fn first_violation(&self, predictions: &Array1<f64>, tolerance: f64) -> Option<ReconstructionGap> {
        predictions.iter().enumerate().find_map(|(row, &expected)| {
            let actual = self.reconstruct(row);
            let allowed = tolerance * expected.abs().max(1.0);
            if (actual - expected).abs() <= allowed {
                None
            } else {
                Some(ReconstructionGap { row, expected, actual })
            }
        })
    }
}

/// Decomposes model predictions into additive feature attributions.
pub trait AttributionExplainer {
    /// Attribute every row of `x`. The result has one row per input row,
    /// including the single-row case.
    fn explain(&self, x: &Array2<f64>) -> Result<Attributions>;
}

pub(crate) fn check_width(x: &Array2<f64>, n_features: usize) -> Result<()> {
    if x.ncols() != n_features {
        return Err(AttributionError::ShapeError {
            expected: format!("{n_features} features"),
            actual: x.ncols().to_string(),
        });
    }
    Ok(())
}
