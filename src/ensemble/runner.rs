//! Training, explaining and checking each bootstrap run

use super::assembler::{AttributionTable, RunResult};
use super::sampler::{BootstrapRun, EnsembleSampler};
use crate::config::{EnsembleConfig, ExplainerKind, Hyperparameters};
use crate::error::{AttributionError, Result};
use crate::explainability::{AttributionExplainer, Attributions, SamplingExplainer, TreeExplainer};
use crate::features::{FeatureFrame, FeatureSource, RowId};
use crate::training::XGBoostRegressor;
use ndarray::{Array1, Array2};
use rayon::prelude::*;
use std::time::Instant;
use tracing::{debug, info};

/// A model fitted on one run's sample, with its in-sample predictions.
#[derive(Debug, Clone)]
pub struct RunFit {
    pub frame: FeatureFrame,
    pub model: XGBoostRegressor,
    pub predictions: Array1<f64>,
}

/// Fit one model on every sampled row (no internal holdout) and predict them.
pub fn train_and_predict(
    source: &dyn FeatureSource,
    rows: &[RowId],
    seed: i32,
    params: &Hyperparameters,
    year: i32,
    group: bool,
) -> Result<RunFit> {
    let frame = source.extract(rows, year, group)?;
    let mut model = XGBoostRegressor::new(params.to_xgboost_config(seed)?);
    model.fit(&frame.x, &frame.target, Some(&frame.weights))?;
    let predictions = model.predict(&frame.x)?;

    let score = model.score(&frame.x, &frame.target, &frame.weights)?;
    debug!(seed, n_rows = frame.n_rows(), trees = model.trees().len(), score, "trained run model");

    Ok(RunFit { frame, model, predictions })
}

/// Fail on the first row whose attributions do not add up to its prediction.
pub fn check_reconstruction(
    run: &BootstrapRun,
    frame: &FeatureFrame,
    predictions: &Array1<f64>,
    attributions: &Attributions,
    tolerance: f64,
) -> Result<()> {
    match attributions.first_violation(predictions, tolerance) {
        None => Ok(()),
        Some(gap) => Err(AttributionError::ReconstructionViolation {
            run_id: run.run_id,
            seed: run.seed,
            row_id: frame.row_ids[gap.row].0,
            expected: gap.expected,
            actual: gap.actual,
        }),
    }
}

/// The full bootstrap ensemble over one feature source.
pub struct AttributionEnsemble<'a> {
    source: &'a dyn FeatureSource,
    params: Hyperparameters,
    config: EnsembleConfig,
}

impl<'a> AttributionEnsemble<'a> {
    pub fn new(source: &'a dyn FeatureSource, params: Hyperparameters, config: EnsembleConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self { source, params, config })
    }

    pub fn config(&self) -> &EnsembleConfig {
        &self.config
    }

    /// Train and explain every run, in run order.
    ///
    /// Any failing run aborts the ensemble; partial tables are never returned.
    pub fn run(&self) -> Result<AttributionTable> {
        let start = Instant::now();
        let n_rows = self.source.n_rows();
        info!(
            n_runs = self.config.n_runs,
            n_rows,
            master_seed = %format!("{:08X}", self.config.master_seed),
            parallel = self.config.parallel,
            "starting attribution ensemble"
        );

        let sampler = EnsembleSampler::new(self.config.master_seed, self.config.sample_fraction);
        let runs = sampler.runs(n_rows, self.config.n_runs)?;

        let results: Vec<RunResult> = if self.config.parallel {
            runs.par_iter().map(|run| self.run_one(run)).collect::<Result<_>>()?
        } else {
            runs.iter().map(|run| self.run_one(run)).collect::<Result<_>>()?
        };

        let mut table = AttributionTable::new();
        for result in results {
            table.append(result)?;
        }

        info!(
            runs = table.n_runs(),
            records_per_feature = table.len(),
            elapsed_ms = start.elapsed().as_millis() as u64,
            "attribution ensemble finished"
        );
        Ok(table)
    }

    /// Train, explain and verify a single run.
    pub fn run_one(&self, run: &BootstrapRun) -> Result<RunResult> {
        self.try_run(run).map_err(|e| e.in_run(run.run_id, run.seed))
    }

    fn try_run(&self, run: &BootstrapRun) -> Result<RunResult> {
        let fit = train_and_predict(
            self.source,
            &run.row_ids,
            run.seed,
            &self.params,
            self.config.year,
            self.config.group_features,
        )?;
        let attributions = self.explain(&fit, run.seed)?;
        check_reconstruction(
            run,
            &fit.frame,
            &fit.predictions,
            &attributions,
            self.config.reconstruction_tolerance,
        )?;
        debug!(run_id = run.run_id, baseline = attributions.baseline(), "run explained");
        RunResult::new(run.run_id, run.seed, fit.frame, fit.predictions, attributions)
    }

    fn explain(&self, fit: &RunFit, seed: i32) -> Result<Attributions> {
        match self.config.explainer {
            ExplainerKind::Tree => TreeExplainer::new(&fit.model)?.explain(&fit.frame.x),
            ExplainerKind::Sampling { n_samples } => {
                let model = &fit.model;
                SamplingExplainer::new(
                    |x: &Array2<f64>| model.predict(x),
                    fit.frame.x.clone(),
                    n_samples,
                    seed as u64,
                )?
                .explain(&fit.frame.x)
            }
        }
    }
}
