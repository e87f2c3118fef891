//! Integration test: attribution ensemble end-to-end

use ndarray::{array, Array1, Array2};
use polars::prelude::*;
use rih_shap::config::{EnsembleConfig, Hyperparameters};
use rih_shap::ensemble::{
    aggregate, bounds, AggregatedStat, AttributionEnsemble, AttributionScale, AttributionTable,
    EnsembleSampler, RunResult,
};
use rih_shap::error::{AttributionError, Result};
use rih_shap::explainability::Attributions;
use rih_shap::features::{BlockGroupTable, ExtractorConfig, FeatureFrame, FeatureId, FeatureSource, RowId};
use serde_json::json;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

const N_ROWS: usize = 30;

fn block_group_df() -> DataFrame {
    let white: Vec<f64> = (0..N_ROWS).map(|i| ((i * 7) % 10) as f64 / 10.0).collect();
    let black: Vec<f64> = white.iter().map(|w| (1.0 - w) * 0.5).collect();
    let owners: Vec<f64> = (0..N_ROWS).map(|i| 50.0 + (i % 5) as f64 * 20.0).collect();
    let value: Vec<f64> = white
        .iter()
        .zip(&black)
        .enumerate()
        .map(|(i, (w, b))| 150_000.0 + 200_000.0 * w - 80_000.0 * b + (i % 3) as f64 * 5_000.0)
        .collect();
    df!(
        "frac_B03002_003E" => white,
        "frac_B03002_004E" => black,
        "B25003_002E" => owners,
        "B25077_001E" => value
    )
    .unwrap()
}

fn params() -> Hyperparameters {
    Hyperparameters::from_json(
        &json!({"params": {
            "n_estimators": 15,
            "max_depth": 3,
            "learning_rate": 0.3,
            "objective": "reg:squarederror"
        }})
        .to_string(),
    )
    .unwrap()
}

fn table() -> BlockGroupTable {
    BlockGroupTable::new(block_group_df(), ExtractorConfig::default()).unwrap()
}

fn run_ensemble(source: &dyn FeatureSource, n_runs: usize) -> Result<AttributionTable> {
    let config = EnsembleConfig::new().with_n_runs(n_runs);
    AttributionEnsemble::new(source, params(), config)?.run()
}

fn same_bits(a: &[AggregatedStat], b: &[AggregatedStat]) -> bool {
    a.len() == b.len()
        && a.iter().zip(b).all(|(x, y)| {
            x.row_id == y.row_id
                && x.n_runs == y.n_runs
                && [
                    (x.mean, y.mean),
                    (x.std, y.std),
                    (x.lower, y.lower),
                    (x.upper, y.upper),
                    (x.feature_value, y.feature_value),
                    (x.weight, y.weight),
                ]
                .iter()
                .all(|(p, q)| p.to_bits() == q.to_bits())
        })
}

#[test]
fn test_ensemble_on_block_groups() {
    let source = table();
    let result = run_ensemble(&source, 5);
    assert!(result.is_ok(), "ensemble should succeed: {:?}", result.err());
    let table = result.unwrap();

    assert_eq!(table.n_runs(), 5);
    assert_eq!(table.len(), 5 * 24);
    assert_eq!(
        table.features(),
        &[
            FeatureId::new("frac_B03002_003E"),
            FeatureId::new("frac_B03002_004E"),
            FeatureId::new("B25003_002E"),
        ]
    );

    let feature = FeatureId::new("frac_B03002_003E");
    let stats = aggregate(&table, &feature, AttributionScale::Absolute).unwrap();
    assert!(!stats.is_empty() && stats.len() <= N_ROWS);
    assert!(stats.windows(2).all(|w| w[0].feature_value <= w[1].feature_value));
    assert_eq!(stats.iter().map(|s| s.n_runs).sum::<usize>(), 5 * 24);

    let (min, max) = bounds(&stats, AttributionScale::Absolute).unwrap();
    assert_eq!(min % 10_000.0, 0.0);
    assert_eq!(max % 10_000.0, 0.0);
    assert!(stats.iter().all(|s| s.mean > min && s.mean < max));
}

/// Home values in thousands of dollars, driven by one fraction only.
fn single_driver_df() -> DataFrame {
    let white: Vec<f64> = (0..N_ROWS).map(|i| ((i * 7) % 10) as f64 / 10.0).collect();
    let owners: Vec<f64> = (0..N_ROWS).map(|i| 50.0 + 40.0 * (i / 10) as f64).collect();
    let value: Vec<f64> = white.iter().map(|w| 150.0 + 250.0 * w).collect();
    df!(
        "frac_B03002_003E" => white,
        "B25003_002E" => owners,
        "B25077_001E" => value
    )
    .unwrap()
}

#[test]
fn test_default_objective_learns_monotone_curve() {
    let source = BlockGroupTable::new(single_driver_df(), ExtractorConfig::default()).unwrap();
    // No objective key: the squared log error default applies.
    let params = Hyperparameters::from_json(
        &json!({"params": {
            "n_estimators": 60,
            "max_depth": 3,
            "learning_rate": 0.3,
            "reg_lambda": 0.0,
            "min_child_weight": 0.0
        }})
        .to_string(),
    )
    .unwrap();
    let config = EnsembleConfig::new().with_n_runs(4);
    let table = AttributionEnsemble::new(&source, params, config).unwrap().run().unwrap();

    let mut sums: HashMap<(RowId, usize), f64> = HashMap::new();
    for feature in table.features() {
        for r in table.records(feature).unwrap() {
            *sums.entry((r.row_id, r.run_id)).or_insert(0.0) += r.attribution;
        }
    }
    let feature = FeatureId::new("frac_B03002_003E");
    for r in table.records(&feature).unwrap() {
        let total = sums[&(r.row_id, r.run_id)] + r.baseline;
        assert!((total - r.prediction).abs() <= 1e-3 * r.prediction.abs().max(1.0));
        assert!((r.prediction - (150.0 + 250.0 * r.feature_value)).abs() < 10.0,
            "prediction {} at {}", r.prediction, r.feature_value);
    }

    // Mean attribution per distinct fraction value, in increasing order.
    let stats = aggregate(&table, &feature, AttributionScale::Absolute).unwrap();
    let mut curve: Vec<(f64, f64, usize)> = Vec::new();
    for s in &stats {
        match curve.last_mut() {
            Some((x, sum, n)) if *x == s.feature_value => {
                *sum += s.mean;
                *n += 1;
            }
            _ => curve.push((s.feature_value, s.mean, 1)),
        }
    }
    let means: Vec<f64> = curve.iter().map(|(_, sum, n)| sum / *n as f64).collect();
    let span = means[means.len() - 1] - means[0];
    assert!(span > 150.0, "attribution span {span}");
    assert!(means[0] < 0.0 && means[means.len() - 1] > 0.0);
    assert!(
        means.windows(2).all(|w| w[1] >= w[0] - 0.05 * span),
        "curve is not increasing: {means:?}"
    );
}

#[test]
fn test_attributions_reconstruct_predictions() {
    let source = table();
    let table = run_ensemble(&source, 3).unwrap();

    // (row, run) -> sum of attributions
    let mut sums: HashMap<(RowId, usize), f64> = HashMap::new();
    for feature in table.features() {
        for r in table.records(feature).unwrap() {
            *sums.entry((r.row_id, r.run_id)).or_insert(0.0) += r.attribution;
        }
    }
    let first = table.records(&table.features()[0]).unwrap();
    for r in first {
        let total = sums[&(r.row_id, r.run_id)] + r.baseline;
        assert!(
            (total - r.prediction).abs() <= 1e-3 * r.prediction.abs().max(1.0),
            "row {} run {}: {} vs {}",
            r.row_id,
            r.run_id,
            total,
            r.prediction
        );
    }
}

#[test]
fn test_same_master_seed_is_bit_identical() {
    let source = table();
    let a = run_ensemble(&source, 4).unwrap();
    let b = run_ensemble(&source, 4).unwrap();

    for feature in a.features() {
        for scale in [AttributionScale::Absolute, AttributionScale::Relative] {
            let sa = aggregate(&a, feature, scale).unwrap();
            let sb = aggregate(&b, feature, scale).unwrap();
            assert!(same_bits(&sa, &sb), "{feature} differs between identical ensembles");
        }
    }
}

#[test]
fn test_different_master_seed_changes_samples() {
    let a = EnsembleSampler::new(0x6A1C55E7, 0.8).runs(N_ROWS, 3).unwrap();
    let b = EnsembleSampler::new(0x6A1C55E8, 0.8).runs(N_ROWS, 3).unwrap();
    assert_ne!(a, b);
    for run in &a {
        assert_eq!(run.row_ids.len(), 24);
    }
}

#[test]
fn test_grouping_flag_collapses_features() {
    let mut df = block_group_df();
    let latino: Vec<f64> = (0..N_ROWS).map(|i| (i % 4) as f64 * 0.02).collect();
    let mexican: Vec<f64> = (0..N_ROWS).map(|i| (i % 2) as f64 * 0.03).collect();
    df.with_column(Series::new("frac_B03002_013E".into(), latino)).unwrap();
    df.with_column(Series::new("frac_B03002_014E".into(), mexican)).unwrap();
    let source = BlockGroupTable::new(df, ExtractorConfig::default()).unwrap();

    let config = EnsembleConfig::new().with_n_runs(2).with_group_features(true);
    let table = AttributionEnsemble::new(&source, params(), config).unwrap().run().unwrap();
    let names: Vec<&str> = table.features().iter().map(|f| f.as_str()).collect();
    assert!(names.contains(&"frac_B03002_012E"));
    assert!(!names.contains(&"frac_B03002_013E"));
}

/// Returns a slightly different feature value on every call.
struct Drifting {
    calls: AtomicUsize,
}

impl FeatureSource for Drifting {
    fn n_rows(&self) -> usize {
        10
    }

    fn extract(&self, rows: &[RowId], _year: i32, _group: bool) -> Result<FeatureFrame> {
        let call = self.calls.fetch_add(1, Ordering::SeqCst) as f64;
        let x = Array2::from_shape_fn((rows.len(), 1), |(i, _)| rows[i].0 as f64 / 10.0 + call * 1e-3);
        let target = x.column(0).mapv(|v| 100.0 + 50.0 * v);
        FeatureFrame::new(
            rows.to_vec(),
            vec![FeatureId::new("frac_drift")],
            x,
            Array1::from_elem(rows.len(), 1.0),
            target,
        )
    }
}

#[test]
fn test_non_deterministic_features_abort_aggregation() {
    let source = Drifting { calls: AtomicUsize::new(0) };
    let config = EnsembleConfig::new().with_n_runs(3).with_parallel(false);
    let table = AttributionEnsemble::new(&source, params(), config).unwrap().run().unwrap();

    let result = aggregate(&table, &FeatureId::new("frac_drift"), AttributionScale::Absolute);
    assert!(
        matches!(result, Err(AttributionError::DeterminismViolation { ref feature, .. }) if feature == "frac_drift"),
        "expected a determinism violation, got {result:?}"
    );
}

#[test]
fn test_hand_computed_three_runs_two_rows() {
    // Row 0 (x = 0.25) and row 1 (x = 0.75) sampled by all three runs.
    let runs = [
        (array![110.0, 140.0], array![[10.0], [40.0]]),
        (array![120.0, 160.0], array![[20.0], [60.0]]),
        (array![90.0, 150.0], array![[-10.0], [50.0]]),
    ];
    let mut table = AttributionTable::new();
    for (run_id, (predictions, values)) in runs.into_iter().enumerate() {
        let frame = FeatureFrame::new(
            vec![RowId(0), RowId(1)],
            vec![FeatureId::new("frac_a")],
            array![[0.25], [0.75]],
            array![5.0, 8.0],
            predictions.clone(),
        )
        .unwrap();
        let attributions = Attributions::new(values, 100.0);
        assert!(attributions.first_violation(&predictions, 1e-12).is_none());
        table
            .append(RunResult::new(run_id, run_id as i32, frame, predictions, attributions).unwrap())
            .unwrap();
    }

    let stats = aggregate(&table, &FeatureId::new("frac_a"), AttributionScale::Absolute).unwrap();
    assert_eq!(stats.len(), 2);

    // Row 0: 10, 20, -10 -> mean 20/3, sample variance ((10/3)^2 + (40/3)^2 + (50/3)^2) / 2
    assert_eq!(stats[0].row_id, RowId(0));
    assert_eq!(stats[0].weight, 5.0);
    assert!((stats[0].mean - 20.0 / 3.0).abs() < 1e-12);
    assert!((stats[0].std - (700.0f64 / 3.0).sqrt()).abs() < 1e-12);

    // Row 1: 40, 60, 50 -> mean 50, std 10
    assert_eq!(stats[1].row_id, RowId(1));
    assert_eq!(stats[1].mean, 50.0);
    assert_eq!(stats[1].std, 10.0);
    assert_eq!(stats[1].lower, 30.0);
    assert_eq!(stats[1].upper, 70.0);
    assert_eq!(stats[1].n_runs, 3);
}

#[test]
fn test_bounds_examples() {
    let stat = |mean: f64| AggregatedStat {
        row_id: RowId(0),
        weight: 1.0,
        feature_value: 0.0,
        mean,
        std: 0.0,
        lower: mean,
        upper: mean,
        n_runs: 1,
    };
    assert_eq!(
        bounds(&[stat(12345.0), stat(67890.0)], AttributionScale::Absolute).unwrap(),
        (-10000.0, 80000.0)
    );
    assert_eq!(
        bounds(&[stat(-0.1), stat(0.1)], AttributionScale::Relative).unwrap(),
        (-0.25, 0.25)
    );
}

#[test]
fn test_empty_table_is_rejected() {
    let df = df!("frac_a" => Vec::<f64>::new(), "B25003_002E" => Vec::<f64>::new()).unwrap();
    assert!(matches!(
        BlockGroupTable::new(df, ExtractorConfig::default()),
        Err(AttributionError::EmptyInput(_))
    ));
}
