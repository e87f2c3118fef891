//! Ensemble configuration and parameter files

use crate::error::{AttributionError, Result};
use crate::features::FeatureId;
use crate::training::{Objective, XGBoostConfig};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::HashMap;
use std::path::Path;
use tracing::warn;

/// Master seed of the published ensembles.
pub const DEFAULT_MASTER_SEED: u64 = 0x6A1C_55E7;

/// Number of bootstrap runs per ensemble.
pub const DEFAULT_N_RUNS: usize = 50;

/// How each run's predictions are decomposed into attributions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ExplainerKind {
    /// Exact TreeSHAP over the boosted trees
    #[default]
    Tree,
    /// Permutation-sampling Shapley values against the run's own rows
    Sampling { n_samples: usize },
}

/// Configuration for the bootstrap attribution ensemble
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EnsembleConfig {
    /// Number of bootstrap runs
    pub n_runs: usize,

    /// Seed for drawing the per-run seeds
    pub master_seed: u64,

    /// Fraction of rows sampled (without replacement) per run
    pub sample_fraction: f64,

    /// Allowed |sum(attributions) + baseline - prediction|, relative to max(1, |prediction|)
    pub reconstruction_tolerance: f64,

    /// Vintage passed to the feature source
    pub year: i32,

    /// Collapse the configured feature group into one feature
    pub group_features: bool,

    /// Train runs on the rayon pool
    pub parallel: bool,

    /// Attribution method applied to every run
    pub explainer: ExplainerKind,
}

impl Default for EnsembleConfig {
    fn default() -> Self {
        Self {
            n_runs: DEFAULT_N_RUNS,
            master_seed: DEFAULT_MASTER_SEED,
            sample_fraction: 0.8,
            reconstruction_tolerance: 1e-3,
            year: 2020,
            group_features: false,
            parallel: true,
            explainer: ExplainerKind::Tree,
        }
    }
}

impl EnsembleConfig {
    /// Create a new config with defaults
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_n_runs(mut self, n_runs: usize) -> Self {
        self.n_runs = n_runs;
        self
    }

    pub fn with_master_seed(mut self, seed: u64) -> Self {
        self.master_seed = seed;
        self
    }

    pub fn with_sample_fraction(mut self, fraction: f64) -> Self {
        self.sample_fraction = fraction;
        self
    }

    pub fn with_reconstruction_tolerance(mut self, tolerance: f64) -> Self {
        self.reconstruction_tolerance = tolerance;
        self
    }

    pub fn with_year(mut self, year: i32) -> Self {
        self.year = year;
        self
    }

    pub fn with_group_features(mut self, group: bool) -> Self {
        self.group_features = group;
        self
    }

    pub fn with_parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn with_explainer(mut self, explainer: ExplainerKind) -> Self {
        self.explainer = explainer;
        self
    }

    pub fn validate(&self) -> Result<()> {
        if self.n_runs == 0 {
            return Err(invalid("n_runs", "0", "must be at least 1"));
        }
        if !(self.sample_fraction > 0.0 && self.sample_fraction <= 1.0) {
            return Err(invalid(
                "sample_fraction",
                &self.sample_fraction.to_string(),
                "must be in (0, 1]",
            ));
        }
        if !(self.reconstruction_tolerance >= 0.0) {
            return Err(invalid(
                "reconstruction_tolerance",
                &self.reconstruction_tolerance.to_string(),
                "must be non-negative",
            ));
        }
        if self.explainer == (ExplainerKind::Sampling { n_samples: 0 }) {
            return Err(invalid("n_samples", "0", "must be at least 1"));
        }
        Ok(())
    }
}

fn invalid(name: &str, value: &str, reason: &str) -> AttributionError {
    AttributionError::InvalidParameter {
        name: name.to_string(),
        value: value.to_string(),
        reason: reason.to_string(),
    }
}

/// Tuned regression hyperparameters as a flat key/value map.
///
/// The core does not interpret these beyond handing them to the trainer.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Hyperparameters(Map<String, Value>);

#[derive(Deserialize)]
struct ParamFile {
    params: Map<String, Value>,
}

impl Hyperparameters {
    pub fn new(params: Map<String, Value>) -> Self {
        Self(params)
    }

    /// Read the `params` object of a JSON parameter file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Self::from_json(&json)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        let file: ParamFile = serde_json::from_str(json)?;
        Ok(Self(file.params))
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: Value) {
        self.0.insert(key.into(), value);
    }

    /// Trainer configuration for one run, seeded with that run's seed.
    pub fn to_xgboost_config(&self, seed: i32) -> Result<XGBoostConfig> {
        let mut config = XGBoostConfig::default();
        for (key, value) in &self.0 {
            match key.as_str() {
                "n_estimators" | "num_boost_round" => config.n_estimators = as_usize(key, value)?,
                "learning_rate" | "eta" => config.learning_rate = as_f64(key, value)?,
                "max_depth" => config.max_depth = as_usize(key, value)?,
                "min_child_weight" => config.min_child_weight = as_f64(key, value)?,
                "reg_lambda" | "lambda" => config.reg_lambda = as_f64(key, value)?,
                "reg_alpha" | "alpha" => config.reg_alpha = as_f64(key, value)?,
                "gamma" | "min_split_loss" => config.gamma = as_f64(key, value)?,
                "subsample" => config.subsample = as_f64(key, value)?,
                "colsample_bytree" => config.colsample_bytree = as_f64(key, value)?,
                "objective" => {
                    let name = value.as_str().ok_or_else(|| invalid(key, &value.to_string(), "expected a string"))?;
                    config.objective = Objective::from_name(name)?;
                }
                // The run seed always wins.
                "random_state" | "seed" => {}
                other => warn!(key = other, "ignoring unsupported hyperparameter"),
            }
        }
        config.random_state = Some(seed as u64);
        config.validate()?;
        Ok(config)
    }
}

fn as_f64(key: &str, value: &Value) -> Result<f64> {
    value
        .as_f64()
        .ok_or_else(|| invalid(key, &value.to_string(), "expected a number"))
}

fn as_usize(key: &str, value: &Value) -> Result<usize> {
    value
        .as_u64()
        .map(|v| v as usize)
        .ok_or_else(|| invalid(key, &value.to_string(), "expected a non-negative integer"))
}

/// Coefficients of a reference linear regression on the same features.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearReference {
    pub full: LinearFit,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct LinearFit {
    pub coefficients: HashMap<String, f64>,
}

impl LinearReference {
    /// Load the reference if the file exists; a missing file is not an error.
    pub fn load_optional(path: impl AsRef<Path>) -> Result<Option<Self>> {
        let path = path.as_ref();
        if !path.exists() {
            return Ok(None);
        }
        let json = std::fs::read_to_string(path)?;
        Ok(Some(serde_json::from_str(&json)?))
    }

    pub fn coefficient(&self, feature: &FeatureId) -> Option<f64> {
        self.full.coefficients.get(feature.as_str()).copied()
    }
}

/// Census variable code to label, e.g. `B03002_003E` -> `Estimate!!Total:!!Not Hispanic or Latino:!!White alone`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VariableLabels(HashMap<String, String>);

impl VariableLabels {
    pub fn new(labels: HashMap<String, String>) -> Self {
        Self(labels)
    }

    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        let json = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&json)?)
    }

    pub fn get(&self, variable: &str) -> Option<&str> {
        self.0.get(variable).map(String::as_str)
    }
}
