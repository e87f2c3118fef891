//! Permutation-sampling Shapley values for black-box models

use super::{check_width, Attributions, AttributionExplainer};
use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;

/// One sampled coalition ordering paired with a background row.
#[derive(Debug, Clone)]
struct Draw {
    permutation: Vec<usize>,
    background_row: usize,
    background_prediction: f64,
}

/// Shapley values estimated by walking random feature permutations.
///
/// The same draws are replayed for every explained row, so the baseline (mean
/// prediction over the drawn background rows) is shared by all rows and each
/// row's attributions sum exactly to `prediction - baseline`.
pub struct SamplingExplainer<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Sync,
{
    predict_fn: F,
    background: Array2<f64>,
    draws: Vec<Draw>,
    baseline: f64,
}

impl<F> SamplingExplainer<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Sync,
{
    /// Create an explainer with `n_samples` permutation draws from `seed`.
    pub fn new(predict_fn: F, background: Array2<f64>, n_samples: usize, seed: u64) -> Result<Self> {
        if background.nrows() == 0 {
            return Err(AttributionError::EmptyInput("background set has no rows".to_string()));
        }
        let n_samples = n_samples.max(1);
        let n_features = background.ncols();
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed);

        let background_predictions = predict_fn(&background)?;
        let draws: Vec<Draw> = (0..n_samples)
            .map(|_| {
                let mut permutation: Vec<usize> = (0..n_features).collect();
                permutation.shuffle(&mut rng);
                let background_row = rng.gen_range(0..background.nrows());
                Draw {
                    permutation,
                    background_row,
                    background_prediction: background_predictions[background_row],
                }
            })
            .collect();

        let baseline =
            draws.iter().map(|d| d.background_prediction).sum::<f64>() / draws.len() as f64;

        Ok(Self { predict_fn, background, draws, baseline })
    }

    pub fn baseline(&self) -> f64 {
        self.baseline
    }

    fn explain_row(&self, instance: ndarray::ArrayView1<'_, f64>) -> Result<Vec<f64>> {
        let n_features = instance.len();
        let mut contributions = vec![0.0; n_features];

        for draw in &self.draws {
            // Row k holds the coalition after the first k+1 features of the permutation.
            let mut coalitions = Array2::zeros((n_features, n_features));
            let mut current = self.background.row(draw.background_row).to_owned();
            for (k, &feature) in draw.permutation.iter().enumerate() {
                current[feature] = instance[feature];
                coalitions.row_mut(k).assign(&current);
            }
            let predictions = (self.predict_fn)(&coalitions)?;

            let mut before = draw.background_prediction;
            for (k, &feature) in draw.permutation.iter().enumerate() {
                contributions[feature] += predictions[k] - before;
                before = predictions[k];
            }
        }

        let n = self.draws.len() as f64;
        for c in &mut contributions {
            *c /= n;
        }
        Ok(contributions)
    }
}

impl<F> AttributionExplainer for SamplingExplainer<F>
where
    F: Fn(&Array2<f64>) -> Result<Array1<f64>> + Sync,
{
    fn explain(&self, x: &Array2<f64>) -> Result<Attributions> {
        let n_features = self.background.ncols();
        check_width(x, n_features)?;

        let rows: Vec<_> = x.outer_iter().collect();
        let per_row = rows
            .par_iter()
            .map(|row| self.explain_row(*row))
            .collect::<Result<Vec<Vec<f64>>>>()?;

        let values = Array2::from_shape_vec((x.nrows(), n_features), per_row.concat())?;
        Ok(Attributions::new(values, self.baseline))
    }
}
