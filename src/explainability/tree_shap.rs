//! TreeSHAP explainer for boosted trees.
//!
//! Implements the polynomial-time exact algorithm from Lundberg et al. (2020):
//! "From local explanations to global understanding with explainable AI for trees".
//! Node covers stand in for the background distribution.

use super::{check_width, Attributions, AttributionExplainer};
use crate::error::{AttributionError, Result};
use crate::training::{goes_left, TreeNode, XGBoostRegressor};
use ndarray::{Array2, ArrayView1};
use rayon::prelude::*;

/// TreeSHAP explainer for a fitted [`XGBoostRegressor`].
pub struct TreeExplainer<'a> {
    model: &'a XGBoostRegressor,
    expected_value: f64,
}

impl<'a> TreeExplainer<'a> {
    /// Create an explainer, computing the model's expected output from node covers.
    pub fn new(model: &'a XGBoostRegressor) -> Result<Self> {
        if model.trees().is_empty() {
            return Err(AttributionError::InvalidInput(
                "cannot explain a model with no trees".to_string(),
            ));
        }
        let expected_value =
            model.base_score() + model.trees().iter().map(tree_expected_value).sum::<f64>();
        Ok(Self { model, expected_value })
    }

    /// Cover-weighted mean prediction.
    pub fn expected_value(&self) -> f64 {
        self.expected_value
    }

    fn explain_row(&self, row: ArrayView1<'_, f64>) -> Vec<f64> {
        let mut phi = vec![0.0; self.model.n_features()];
        for tree in self.model.trees() {
            tree_shap(tree, row, &mut phi, &[], 1.0, 1.0, None);
        }
        phi
    }
}

impl AttributionExplainer for TreeExplainer<'_> {
    fn explain(&self, x: &Array2<f64>) -> Result<Attributions> {
        let n_features = self.model.n_features();
        check_width(x, n_features)?;

        let rows: Vec<ArrayView1<'_, f64>> = x.outer_iter().collect();
        let per_row: Vec<Vec<f64>> = rows.par_iter().map(|row| self.explain_row(*row)).collect();

        let values = Array2::from_shape_vec((x.nrows(), n_features), per_row.concat())?;
        Ok(Attributions::new(values, self.expected_value))
    }
}

/// Share of the parent's cover that flows to each child.
fn split_fractions(left_cover: f64, right_cover: f64) -> (f64, f64) {
    let total = left_cover + right_cover;
    if total > 0.0 {
        (left_cover / total, right_cover / total)
    } else {
        (0.5, 0.5)
    }
}

fn tree_expected_value(node: &TreeNode) -> f64 {
    match node {
        TreeNode::Leaf { weight, .. } => *weight,
        TreeNode::Split { left, right, .. } => {
            let (l, r) = split_fractions(left.cover(), right.cover());
            l * tree_expected_value(left) + r * tree_expected_value(right)
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct PathElement {
    /// `None` for the root placeholder
    feature: Option<usize>,
    /// Fraction of background paths that flow through when the feature is absent
    zero_fraction: f64,
    /// Whether the explained row flows through when the feature is present
    one_fraction: f64,
    /// Permutation weight of subsets of this size
    pweight: f64,
}

fn extend_path(path: &mut Vec<PathElement>, zero_fraction: f64, one_fraction: f64, feature: Option<usize>) {
    let depth = path.len();
    path.push(PathElement {
        feature,
        zero_fraction,
        one_fraction,
        pweight: if depth == 0 { 1.0 } else { 0.0 },
    });
    let denom = (depth + 1) as f64;
    for i in (0..depth).rev() {
        path[i + 1].pweight += one_fraction * path[i].pweight * (i + 1) as f64 / denom;
        path[i].pweight = zero_fraction * path[i].pweight * (depth - i) as f64 / denom;
    }
}

fn unwind_path(path: &mut Vec<PathElement>, path_index: usize) {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = path[i].pweight;
            path[i].pweight = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            next_one_portion = tmp - path[i].pweight * zero_fraction * (depth - i) as f64 / denom;
        } else {
            path[i].pweight = path[i].pweight * denom / (zero_fraction * (depth - i) as f64);
        }
    }

    for i in path_index..depth {
        path[i].feature = path[i + 1].feature;
        path[i].zero_fraction = path[i + 1].zero_fraction;
        path[i].one_fraction = path[i + 1].one_fraction;
    }
    path.pop();
}

/// Total permutation weight of the path with element `path_index` removed.
fn unwound_path_sum(path: &[PathElement], path_index: usize) -> f64 {
    let depth = path.len() - 1;
    let one_fraction = path[path_index].one_fraction;
    let zero_fraction = path[path_index].zero_fraction;
    let denom = (depth + 1) as f64;
    let mut next_one_portion = path[depth].pweight;
    let mut total = 0.0;

    for i in (0..depth).rev() {
        if one_fraction != 0.0 {
            let tmp = next_one_portion * denom / ((i + 1) as f64 * one_fraction);
            total += tmp;
            next_one_portion = path[i].pweight - tmp * zero_fraction * (depth - i) as f64 / denom;
        } else if zero_fraction != 0.0 {
            total += (path[i].pweight / zero_fraction) / ((depth - i) as f64 / denom);
        }
    }
    total
}

fn tree_shap(
    node: &TreeNode,
    row: ArrayView1<'_, f64>,
    phi: &mut [f64],
    parent_path: &[PathElement],
    parent_zero_fraction: f64,
    parent_one_fraction: f64,
    parent_feature: Option<usize>,
) {
    let mut path = parent_path.to_vec();
    extend_path(&mut path, parent_zero_fraction, parent_one_fraction, parent_feature);

    match node {
        TreeNode::Leaf { weight, .. } => {
            for i in 1..path.len() {
                let el = path[i];
                if let Some(feature) = el.feature {
                    let w = unwound_path_sum(&path, i);
                    phi[feature] += w * (el.one_fraction - el.zero_fraction) * weight;
                }
            }
        }
        TreeNode::Split { feature, threshold, left, right, .. } => {
            let (left_fraction, right_fraction) = split_fractions(left.cover(), right.cover());
            let (hot, cold, hot_fraction, cold_fraction) = if goes_left(row[*feature], *threshold) {
                (left, right, left_fraction, right_fraction)
            } else {
                (right, left, right_fraction, left_fraction)
            };

            // A feature seen higher up is unwound and re-split here.
            let mut incoming_zero = 1.0;
            let mut incoming_one = 1.0;
            if let Some(k) = path.iter().position(|e| e.feature == Some(*feature)) {
                incoming_zero = path[k].zero_fraction;
                incoming_one = path[k].one_fraction;
                unwind_path(&mut path, k);
            }

            // Branches no path can reach contribute nothing.
            let hot_zero = hot_fraction * incoming_zero;
            if hot_zero > 0.0 || incoming_one > 0.0 {
                tree_shap(hot, row, phi, &path, hot_zero, incoming_one, Some(*feature));
            }
            let cold_zero = cold_fraction * incoming_zero;
            if cold_zero > 0.0 {
                tree_shap(cold, row, phi, &path, cold_zero, 0.0, Some(*feature));
            }
        }
    }
}
