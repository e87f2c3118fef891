//! Long-form attribution table across runs

use crate::error::{AttributionError, Result};
use crate::explainability::Attributions;
use crate::features::{FeatureFrame, FeatureId, RowId};
use ndarray::Array1;
use serde::{Deserialize, Serialize};

/// Everything one bootstrap run produced. Immutable once built.
#[derive(Debug, Clone)]
pub struct RunResult {
    pub run_id: usize,
    pub seed: i32,
    pub frame: FeatureFrame,
    pub predictions: Array1<f64>,
    pub attributions: Attributions,
}

impl RunResult {
    /// Check that predictions and attributions line up with the frame.
    pub fn new(
        run_id: usize,
        seed: i32,
        frame: FeatureFrame,
        predictions: Array1<f64>,
        attributions: Attributions,
    ) -> Result<Self> {
        let n = frame.n_rows();
        if predictions.len() != n
            || attributions.n_rows() != n
            || attributions.n_features() != frame.n_features()
        {
            return Err(AttributionError::ShapeError {
                expected: format!("{n} rows x {} features", frame.n_features()),
                actual: format!(
                    "{} predictions, {}x{} attributions",
                    predictions.len(),
                    attributions.n_rows(),
                    attributions.n_features()
                ),
            });
        }
        Ok(Self { run_id, seed, frame, predictions, attributions })
    }
}

/// One (row, run) observation of a single feature.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AttributionRecord {
    pub row_id: RowId,
    pub run_id: usize,
    pub seed: i32,
    /// Raw value of the feature for this row
    pub feature_value: f64,
    pub attribution: f64,
    /// `attribution / prediction`; NaN when the prediction is exactly zero
    pub relative_attribution: f64,
    pub prediction: f64,
    pub baseline: f64,
    pub sample_weight: f64,
}

/// `attribution / prediction`, NaN for a zero prediction.
pub fn relative_attribution(attribution: f64, prediction: f64) -> f64 {
    if prediction == 0.0 {
        f64::NAN
    } else {
        attribution / prediction
    }
}

/// Append-only accumulator of every run's records, keyed by feature.
///
/// Rows sampled by several runs appear once per run. Nothing is merged or
/// deduplicated here.
#[derive(Debug, Clone, Default)]
pub struct AttributionTable {
    features: Vec<FeatureId>,
    records: Vec<Vec<AttributionRecord>>,
    seeds: Vec<i32>,
}

impl AttributionTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one run. The first run fixes the feature set.
    pub fn append(&mut self, run: RunResult) -> Result<()> {
        if self.seeds.is_empty() {
            self.features = run.frame.features.clone();
            self.records = vec![Vec::new(); self.features.len()];
        } else if run.frame.features != self.features {
            return Err(AttributionError::SchemaMismatch(format!(
                "run {} has features {:?}, table has {:?}",
                run.run_id, run.frame.features, self.features
            )));
        }

        let baseline = run.attributions.baseline();
        let values = run.attributions.values();
        for (j, column) in self.records.iter_mut().enumerate() {
            column.extend(run.frame.row_ids.iter().enumerate().map(|(i, &row_id)| {
                let prediction = run.predictions[i];
                let attribution = values[[i, j]];
                AttributionRecord {
                    row_id,
                    run_id: run.run_id,
                    seed: run.seed,
                    feature_value: run.frame.x[[i, j]],
                    attribution,
                    relative_attribution: relative_attribution(attribution, prediction),
                    prediction,
                    baseline,
                    sample_weight: run.frame.weights[i],
                }
            }));
        }
        self.seeds.push(run.seed);
        Ok(())
    }

    pub fn features(&self) -> &[FeatureId] {
        &self.features
    }

    /// Number of runs appended so far.
    pub fn n_runs(&self) -> usize {
        self.seeds.len()
    }

    /// Run seeds in append order.
    pub fn seeds(&self) -> &[i32] {
        &self.seeds
    }

    /// All records of one feature, in append order.
    pub fn records(&self, feature: &FeatureId) -> Result<&[AttributionRecord]> {
        self.features
            .iter()
            .position(|f| f == feature)
            .map(|j| self.records[j].as_slice())
            .ok_or_else(|| AttributionError::FeatureNotFound(feature.to_string()))
    }

    /// Record count per feature.
    pub fn len(&self) -> usize {
        self.records.first().map_or(0, Vec::len)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
