//! rih-shap - Bootstrap-ensemble attribution for block-group home values
//!
//! This crate measures how much each demographic and housing feature of a
//! census block group contributes to a model's prediction of median home
//! value, with confidence bounds from a bootstrap ensemble.
//!
//! # Modules
//!
//! ## Pipeline
//! - [`features`] - Feature, weight and target extraction
//! - [`training`] - Weighted boosted-tree regression
//! - [`explainability`] - Additive attributions (TreeSHAP, permutation sampling)
//! - [`ensemble`] - Sampling, per-run checks, assembly, aggregation, bounds
//! - [`report`] - Series consumed by the plot renderer
//!
//! ## Infrastructure
//! - [`config`] - Ensemble settings and parameter files
//! - [`cli`] - Command-line interface

// Core error handling
pub mod error;

// Configuration
pub mod config;

// Pipeline
pub mod features;
pub mod training;
pub mod explainability;
pub mod ensemble;
pub mod report;

// Services
pub mod cli;

pub use error::{AttributionError, Result};

/// Re-export commonly used types
pub mod prelude {
    // Error handling
    pub use crate::error::{AttributionError, Result};

    // Configuration
    pub use crate::config::{EnsembleConfig, ExplainerKind, Hyperparameters, LinearReference, VariableLabels};

    // Features
    pub use crate::features::{BlockGroupTable, ExtractorConfig, FeatureFrame, FeatureId, FeatureSource, RowId};

    // Training
    pub use crate::training::{Objective, XGBoostConfig, XGBoostRegressor};

    // Explainability
    pub use crate::explainability::{AttributionExplainer, Attributions, SamplingExplainer, TreeExplainer};

    // Ensemble
    pub use crate::ensemble::{
        aggregate, bounds, AggregatedStat, AttributionEnsemble, AttributionRecord, AttributionScale,
        AttributionTable, EnsembleSampler,
    };

    // Reports
    pub use crate::report::{build_reports, FeatureReport, ReportOptions};
}
