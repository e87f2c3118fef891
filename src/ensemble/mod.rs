//! Bootstrap attribution ensemble
//!
//! Provides the ensemble pipeline, leaves first:
//! - Sampling (reproducible run seeds and 80% row subsamples)
//! - Per-run training, explanation and reconstruction checks
//! - Assembly of every run into one long-form table
//! - Per-row aggregation across runs with determinism checks
//! - Display bounds for the aggregated means

mod aggregate;
mod assembler;
mod range;
mod runner;
mod sampler;

pub use aggregate::{aggregate, aggregate_records, AggregatedStat, AttributionScale};
pub use assembler::{relative_attribution, AttributionRecord, AttributionTable, RunResult};
pub use range::bounds;
pub use runner::{check_reconstruction, train_and_predict, AttributionEnsemble, RunFit};
pub use sampler::{BootstrapRun, EnsembleSampler};
