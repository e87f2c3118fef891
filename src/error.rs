//! Error types for the attribution ensemble

use thiserror::Error;

/// Result type alias for attribution operations
pub type Result<T> = std::result::Result<T, AttributionError>;

/// Main error type for the attribution ensemble.
///
/// Every fatal variant carries the key (run, row, feature) that identifies
/// where the ensemble went wrong. None of them are retried.
#[derive(Error, Debug)]
pub enum AttributionError {
    #[error("Empty input: {0}")]
    EmptyInput(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("Invalid parameter: {name} = {value}, {reason}")]
    InvalidParameter {
        name: String,
        value: String,
        reason: String,
    },

    #[error("Training failed for run {run_id} (seed {seed}): {reason}")]
    TrainingError {
        run_id: usize,
        seed: i32,
        reason: String,
    },

    #[error(
        "Attributions do not reconstruct the prediction for row {row_id} in run {run_id} \
         (seed {seed}): expected {expected}, got {actual}"
    )]
    ReconstructionViolation {
        run_id: usize,
        seed: i32,
        row_id: usize,
        expected: f64,
        actual: f64,
    },

    #[error(
        "Feature {feature} is not deterministic for row {row_id}: \
         saw {first} and {other} across runs"
    )]
    DeterminismViolation {
        feature: String,
        row_id: usize,
        first: f64,
        other: f64,
    },

    #[error("Schema mismatch: {0}")]
    SchemaMismatch(String),

    #[error("Feature not found: {0}")]
    FeatureNotFound(String),

    #[error("Data error: {0}")]
    DataError(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    SerializationError(String),

    #[error("Invalid shape: expected {expected}, got {actual}")]
    ShapeError { expected: String, actual: String },
}

impl AttributionError {
    /// Attach run context to an error raised inside a single bootstrap run.
    ///
    /// Errors that already name their run pass through untouched.
    pub fn in_run(self, run_id: usize, seed: i32) -> Self {
        match self {
            err @ (AttributionError::TrainingError { .. }
            | AttributionError::ReconstructionViolation { .. }) => err,
            other => AttributionError::TrainingError {
                run_id,
                seed,
                reason: other.to_string(),
            },
        }
    }
}

impl From<polars::error::PolarsError> for AttributionError {
    fn from(err: polars::error::PolarsError) -> Self {
        AttributionError::DataError(err.to_string())
    }
}

impl From<serde_json::Error> for AttributionError {
    fn from(err: serde_json::Error) -> Self {
        AttributionError::SerializationError(err.to_string())
    }
}

impl From<ndarray::ShapeError> for AttributionError {
    fn from(err: ndarray::ShapeError) -> Self {
        AttributionError::ShapeError {
            expected: "valid shape".to_string(),
            actual: err.to_string(),
        }
    }
}
