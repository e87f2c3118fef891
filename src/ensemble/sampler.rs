//! Reproducible bootstrap sampling

use crate::error::{AttributionError, Result};
use crate::features::RowId;
use rand::prelude::*;
use rand_xoshiro::Xoshiro256PlusPlus;
use serde::{Deserialize, Serialize};

/// One bootstrap run: its position, seed and sampled rows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BootstrapRun {
    /// Position of the run in the ensemble
    pub run_id: usize,
    /// Seed for the run's sample and model
    pub seed: i32,
    /// Original rows in draw order, without repeats
    pub row_ids: Vec<RowId>,
}

/// Draws run seeds and per-run row samples.
#[derive(Debug, Clone)]
pub struct EnsembleSampler {
    master_seed: u64,
    fraction: f64,
}

impl EnsembleSampler {
    pub fn new(master_seed: u64, fraction: f64) -> Self {
        Self { master_seed, fraction }
    }

    /// The first `n_runs` seeds of the master stream, each in `[0, i32::MAX)`.
    pub fn run_seeds(&self, n_runs: usize) -> Vec<i32> {
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(self.master_seed);
        (0..n_runs).map(|_| rng.gen_range(0..i32::MAX)).collect()
    }

    /// Rows drawn per run out of `n_rows`.
    pub fn sample_size(&self, n_rows: usize) -> usize {
        (self.fraction * n_rows as f64).floor() as usize
    }

    /// Sample `floor(fraction * n_rows)` distinct rows, reseeded by `seed`.
    pub fn sample(&self, n_rows: usize, seed: i32) -> Result<Vec<RowId>> {
        if n_rows == 0 {
            return Err(AttributionError::EmptyInput("cannot sample from zero rows".to_string()));
        }
        let size = self.sample_size(n_rows);
        if size == 0 {
            return Err(AttributionError::InvalidInput(format!(
                "a fraction of {} of {n_rows} rows samples nothing",
                self.fraction
            )));
        }
        let mut rng = Xoshiro256PlusPlus::seed_from_u64(seed as u64);
        Ok(rand::seq::index::sample(&mut rng, n_rows, size)
            .into_iter()
            .map(RowId)
            .collect())
    }

    /// All runs of an ensemble of `n_runs` over `n_rows` input rows.
    pub fn runs(&self, n_rows: usize, n_runs: usize) -> Result<Vec<BootstrapRun>> {
        self.run_seeds(n_runs)
            .into_iter()
            .enumerate()
            .map(|(run_id, seed)| {
                Ok(BootstrapRun { run_id, seed, row_ids: self.sample(n_rows, seed)? })
            })
            .collect()
    }
}
