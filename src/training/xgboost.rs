//! XGBoost-style gradient boosting with second-order approximation
//!
//! Key properties:
//! - Uses both gradient (first derivative) and hessian (second derivative) of loss
//! - Regularized leaf weights: w* = -G / (H + lambda)
//! - Gain-based split scoring: Gain = 0.5 * [GL²/(HL+λ) + GR²/(HR+λ) - (GL+GR)²/(HL+HR+λ)]
//! - Sample weights scale each row's gradient and hessian
//! - Every node records its cover (weighted hessian sum) for TreeSHAP

use super::metrics;
use super::objective::Objective;
use crate::error::{AttributionError, Result};
use ndarray::{Array1, Array2, ArrayView1};
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use rayon::prelude::*;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;

/// XGBoost configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct XGBoostConfig {
    pub n_estimators: usize,
    pub learning_rate: f64,
    pub max_depth: usize,
    pub min_child_weight: f64,
    /// L2 regularization on leaf weights
    pub reg_lambda: f64,
    /// L1 regularization on leaf weights
    pub reg_alpha: f64,
    /// Minimum loss reduction to make a split (gamma)
    pub gamma: f64,
    pub subsample: f64,
    pub colsample_bytree: f64,
    pub objective: Objective,
    pub random_state: Option<u64>,
}

impl Default for XGBoostConfig {
    fn default() -> Self {
        Self {
            n_estimators: 100,
            learning_rate: 0.3,
            max_depth: 6,
            min_child_weight: 1.0,
            reg_lambda: 1.0,
            reg_alpha: 0.0,
            gamma: 0.0,
            subsample: 1.0,
            colsample_bytree: 1.0,
            objective: Objective::default(),
            random_state: Some(42),
        }
    }
}

impl XGBoostConfig {
    pub fn with_random_state(mut self, seed: u64) -> Self {
        self.random_state = Some(seed);
        self
    }

    /// Check ranges before training.
    pub fn validate(&self) -> Result<()> {
        let fail = |name: &str, value: String, reason: &str| {
            Err(AttributionError::InvalidParameter {
                name: name.to_string(),
                value,
                reason: reason.to_string(),
            })
        };
        if self.n_estimators == 0 {
            return fail("n_estimators", "0".into(), "must be at least 1");
        }
        if !(self.learning_rate > 0.0) {
            return fail("learning_rate", self.learning_rate.to_string(), "must be positive");
        }
        if !(self.subsample > 0.0 && self.subsample <= 1.0) {
            return fail("subsample", self.subsample.to_string(), "must be in (0, 1]");
        }
        if !(self.colsample_bytree > 0.0 && self.colsample_bytree <= 1.0) {
            return fail("colsample_bytree", self.colsample_bytree.to_string(), "must be in (0, 1]");
        }
        if self.reg_lambda < 0.0 || self.reg_alpha < 0.0 || self.gamma < 0.0 {
            return fail("regularization", "negative".into(), "lambda, alpha and gamma must be >= 0");
        }
        Ok(())
    }
}

/// A single node in a boosted tree.
///
/// Leaf weights already include the learning rate, so a tree's output is
/// exactly the value of the leaf a sample lands in.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum TreeNode {
    Leaf {
        weight: f64,
        cover: f64,
    },
    Split {
        feature: usize,
        threshold: f64,
        cover: f64,
        left: Box<TreeNode>,
        right: Box<TreeNode>,
    },
}

impl TreeNode {
    pub fn predict(&self, sample: ArrayView1<'_, f64>) -> f64 {
        match self {
            TreeNode::Leaf { weight, .. } => *weight,
            TreeNode::Split { feature, threshold, left, right, .. } => {
                if goes_left(sample[*feature], *threshold) {
                    left.predict(sample)
                } else {
                    right.predict(sample)
                }
            }
        }
    }

    /// Weighted hessian mass of the training rows that reached this node.
    pub fn cover(&self) -> f64 {
        match self {
            TreeNode::Leaf { cover, .. } | TreeNode::Split { cover, .. } => *cover,
        }
    }

    pub fn depth(&self) -> usize {
        match self {
            TreeNode::Leaf { .. } => 1,
            TreeNode::Split { left, right, .. } => 1 + left.depth().max(right.depth()),
        }
    }
}

/// Routing rule shared by prediction and explanation. NaN goes right.
#[inline]
pub fn goes_left(value: f64, threshold: f64) -> bool {
    value <= threshold
}

/// Per-row gradient statistics for one boosting round.
struct GradStats<'a> {
    grad: &'a [f64],
    hess: &'a [f64],
}

/// Build an XGBoost tree using exact greedy split finding
fn build_xgb_tree(
    x: &Array2<f64>,
    stats: &GradStats<'_>,
    indices: &[usize],
    feature_indices: &[usize],
    depth: usize,
    config: &XGBoostConfig,
) -> TreeNode {
    let g_sum: f64 = indices.iter().map(|&i| stats.grad[i]).sum();
    let h_sum: f64 = indices.iter().map(|&i| stats.hess[i]).sum();

    let leaf = TreeNode::Leaf {
        weight: config.learning_rate
            * compute_leaf_weight(g_sum, h_sum, config.reg_lambda, config.reg_alpha),
        cover: h_sum,
    };

    if depth >= config.max_depth || indices.len() < 2 || h_sum < config.min_child_weight {
        return leaf;
    }

    // Collect in feature order so ties resolve the same way on every run.
    let candidates: Vec<Option<SplitCandidate>> = feature_indices
        .par_iter()
        .map(|&f| find_best_split_for_feature(x, stats, indices, f, config))
        .collect();
    let best_split = candidates.into_iter().flatten().fold(None, |best: Option<SplitCandidate>, c| {
        match best {
            Some(b) if b.gain.total_cmp(&c.gain).is_ge() => Some(b),
            _ => Some(c),
        }
    });

    match best_split {
        Some(split) if split.gain > config.gamma => {
            let (left_idx, right_idx): (Vec<usize>, Vec<usize>) = indices
                .iter()
                .partition(|&&i| goes_left(x[[i, split.feature]], split.threshold));

            if left_idx.is_empty() || right_idx.is_empty() {
                return leaf;
            }

            let left = build_xgb_tree(x, stats, &left_idx, feature_indices, depth + 1, config);
            let right = build_xgb_tree(x, stats, &right_idx, feature_indices, depth + 1, config);

            TreeNode::Split {
                feature: split.feature,
                threshold: split.threshold,
                cover: h_sum,
                left: Box::new(left),
                right: Box::new(right),
            }
        }
        _ => leaf,
    }
}

/// Optimal leaf weight with L1 (alpha) and L2 (lambda) regularization
fn compute_leaf_weight(g_sum: f64, h_sum: f64, lambda: f64, alpha: f64) -> f64 {
    if h_sum + lambda <= 0.0 {
        return 0.0;
    }
    if alpha > 0.0 {
        // Soft-threshold for L1
        let g_adj = if g_sum > alpha {
            g_sum - alpha
        } else if g_sum < -alpha {
            g_sum + alpha
        } else {
            return 0.0;
        };
        -g_adj / (h_sum + lambda)
    } else {
        -g_sum / (h_sum + lambda)
    }
}

#[derive(Debug, Clone, Copy)]
struct SplitCandidate {
    feature: usize,
    threshold: f64,
    gain: f64,
}

/// Find best split for a single feature using exact greedy method
fn find_best_split_for_feature(
    x: &Array2<f64>,
    stats: &GradStats<'_>,
    indices: &[usize],
    feature: usize,
    config: &XGBoostConfig,
) -> Option<SplitCandidate> {
    let mut sorted_indices: Vec<usize> = indices.to_vec();
    sorted_indices.sort_by(|&a, &b| {
        x[[a, feature]].partial_cmp(&x[[b, feature]]).unwrap_or(Ordering::Equal)
    });

    let g_total: f64 = sorted_indices.iter().map(|&i| stats.grad[i]).sum();
    let h_total: f64 = sorted_indices.iter().map(|&i| stats.hess[i]).sum();

    let mut g_left = 0.0;
    let mut h_left = 0.0;
    let mut best: Option<SplitCandidate> = None;
    let lambda = config.reg_lambda;

    for (pos, &idx) in sorted_indices.iter().enumerate() {
        g_left += stats.grad[idx];
        h_left += stats.hess[idx];

        // A split point needs a strictly larger value to its right.
        let Some(&next_idx) = sorted_indices.get(pos + 1) else {
            break;
        };
        if x[[next_idx, feature]] <= x[[idx, feature]] {
            continue;
        }

        let g_right = g_total - g_left;
        let h_right = h_total - h_left;

        if h_left < config.min_child_weight || h_right < config.min_child_weight {
            continue;
        }
        // Zero-weight rows carry no hessian; an empty side has no defined gain.
        if h_left + lambda <= 0.0 || h_right + lambda <= 0.0 {
            continue;
        }

        let gain = 0.5
            * ((g_left * g_left) / (h_left + lambda) + (g_right * g_right) / (h_right + lambda)
                - (g_total * g_total) / (h_total + lambda));
        if !gain.is_finite() {
            continue;
        }

        if best.map_or(true, |b| gain > b.gain) {
            best = Some(SplitCandidate {
                feature,
                threshold: (x[[idx, feature]] + x[[next_idx, feature]]) / 2.0,
                gain,
            });
        }
    }

    best
}

// ─── XGBoost Regressor ─────────────────────────────────────────────────────

/// Weighted XGBoost regressor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct XGBoostRegressor {
    config: XGBoostConfig,
    trees: Vec<TreeNode>,
    base_score: f64,
    n_features: usize,
}

impl XGBoostRegressor {
    pub fn new(config: XGBoostConfig) -> Self {
        Self {
            config,
            trees: Vec::new(),
            base_score: 0.0,
            n_features: 0,
        }
    }

    pub fn config(&self) -> &XGBoostConfig {
        &self.config
    }

    /// Fit on `x` and `y`. Rows without a weight count once.
    pub fn fit(&mut self, x: &Array2<f64>, y: &Array1<f64>, weights: Option<&Array1<f64>>) -> Result<()> {
        self.config.validate()?;
        let n_samples = x.nrows();
        let n_features = x.ncols();

        if n_samples == 0 || n_features == 0 {
            return Err(AttributionError::EmptyInput(format!(
                "cannot fit on a {n_samples}x{n_features} feature matrix"
            )));
        }
        if y.len() != n_samples {
            return Err(AttributionError::ShapeError {
                expected: format!("{n_samples} targets"),
                actual: y.len().to_string(),
            });
        }
        if let Some((idx, v)) = x.indexed_iter().find(|(_, v)| !v.is_finite()) {
            return Err(AttributionError::InvalidInput(format!(
                "feature matrix has non-finite value {v} at {idx:?}"
            )));
        }
        for &t in y {
            self.config.objective.validate_target(t)?;
        }

        let weights = match weights {
            Some(w) if w.len() != n_samples => {
                return Err(AttributionError::ShapeError {
                    expected: format!("{n_samples} weights"),
                    actual: w.len().to_string(),
                });
            }
            Some(w) => w.clone(),
            None => Array1::ones(n_samples),
        };
        if weights.iter().any(|w| !w.is_finite() || *w < 0.0) {
            return Err(AttributionError::InvalidInput(
                "sample weights must be finite and non-negative".to_string(),
            ));
        }
        if weights.sum() <= 0.0 {
            return Err(AttributionError::InvalidInput("sample weights sum to zero".to_string()));
        }

        self.n_features = n_features;
        let objective = self.config.objective;
        let (y_slice, w_slice) = (y.to_vec(), weights.to_vec());
        self.base_score = objective.base_score(&y_slice, &w_slice);
        let mut preds = Array1::from_elem(n_samples, self.base_score);

        let mut rng = match self.config.random_state {
            Some(seed) => Xoshiro256PlusPlus::seed_from_u64(seed),
            None => Xoshiro256PlusPlus::from_entropy(),
        };

        self.trees.clear();
        let mut grad = vec![0.0; n_samples];
        let mut hess = vec![0.0; n_samples];

        for _ in 0..self.config.n_estimators {
            for i in 0..n_samples {
                let (g, h) = objective.grad_hess(preds[i], y_slice[i]);
                grad[i] = g * w_slice[i];
                hess[i] = h * w_slice[i];
            }
            let stats = GradStats { grad: &grad, hess: &hess };

            let row_indices = subsample(&mut rng, n_samples, self.config.subsample);
            let col_indices = subsample(&mut rng, n_features, self.config.colsample_bytree);

            let tree = build_xgb_tree(x, &stats, &row_indices, &col_indices, 0, &self.config);

            for (i, row) in x.rows().into_iter().enumerate() {
                preds[i] += tree.predict(row);
            }

            self.trees.push(tree);
        }

        Ok(())
    }

    pub fn predict(&self, x: &Array2<f64>) -> Result<Array1<f64>> {
        if self.trees.is_empty() {
            return Err(AttributionError::InvalidInput("model is not fitted".to_string()));
        }
        if x.ncols() != self.n_features {
            return Err(AttributionError::ShapeError {
                expected: format!("{} features", self.n_features),
                actual: x.ncols().to_string(),
            });
        }
        Ok(x.rows()
            .into_iter()
            .map(|row| self.base_score + self.trees.iter().map(|t| t.predict(row)).sum::<f64>())
            .collect())
    }

    /// Evaluation metric matching the objective (RMSLE or RMSE).
    pub fn score(&self, x: &Array2<f64>, y: &Array1<f64>, weights: &Array1<f64>) -> Result<f64> {
        let p = self.predict(x)?;
        Ok(match self.config.objective {
            Objective::SquaredLogError => metrics::rmsle(y, &p, weights),
            Objective::SquaredError => metrics::rmse(y, &p, weights),
        })
    }

    pub fn trees(&self) -> &[TreeNode] {
        &self.trees
    }

    pub fn base_score(&self) -> f64 {
        self.base_score
    }

    pub fn n_features(&self) -> usize {
        self.n_features
    }
}

// ─── Helpers ────────────────────────────────────────────────────────────────

fn subsample(rng: &mut Xoshiro256PlusPlus, n: usize, ratio: f64) -> Vec<usize> {
    if ratio >= 1.0 {
        return (0..n).collect();
    }
    let k = ((n as f64) * ratio).ceil() as usize;
    let mut indices: Vec<usize> = (0..n).collect();
    indices.shuffle(rng);
    indices.truncate(k.max(1));
    indices.sort();
    indices
}
