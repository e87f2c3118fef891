//! Report series for attribution plots
//!
//! Everything a renderer needs to draw one feature's attribution curve,
//! written as pretty JSON, one file per feature and scale.

use crate::config::{LinearReference, VariableLabels};
use crate::ensemble::{aggregate, bounds, AggregatedStat, AttributionRecord, AttributionScale, AttributionTable};
use crate::error::Result;
use crate::features::FeatureId;
use serde::{Deserialize, Serialize};
use std::fs::{self, File};
use std::io::BufWriter;
use std::path::{Path, PathBuf};
use tracing::info;

/// Strip the census label boilerplate: `Estimate!!Total:!!A:!!B` -> `A; B`.
pub fn clean_label(raw: &str) -> String {
    raw.replace("Estimate!!Total:!!", "").replace(":!!", "; ")
}

/// Output file name (without extension) for a label and scale.
pub fn file_stem(label: &str, scale: AttributionScale) -> String {
    let stem = label.replace(' ', "-").replace(';', "");
    match scale {
        AttributionScale::Absolute => format!("abs-{stem}"),
        AttributionScale::Relative => stem,
    }
}

/// Identifies the data behind a plot: `(f = B03002_003E; n = 12,345; k = 50; s = 6A1C55E7)`.
pub fn plot_id(variable: &str, n_rows: usize, n_runs: usize, master_seed: u64) -> String {
    format!(
        "(f = {variable}; n = {}; k = {n_runs}; s = {master_seed:08X})",
        with_thousands(n_rows)
    )
}

fn with_thousands(n: usize) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

/// A point on the reference linear model's curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct LinearPoint {
    pub feature_value: f64,
    pub value: f64,
}

/// `coef * (x - mean x)` at every aggregated row, divided by the mean
/// prediction in relative scale. Means are over the long-form records.
pub fn linear_overlay(
    records: &[AttributionRecord],
    stats: &[AggregatedStat],
    coefficient: f64,
    scale: AttributionScale,
) -> Vec<LinearPoint> {
    let n = records.len() as f64;
    let mean_x = records.iter().map(|r| r.feature_value).sum::<f64>() / n;
    let divisor = match scale {
        AttributionScale::Absolute => 1.0,
        AttributionScale::Relative => records.iter().map(|r| r.prediction).sum::<f64>() / n,
    };
    stats
        .iter()
        .map(|s| LinearPoint {
            feature_value: s.feature_value,
            value: coefficient * (s.feature_value - mean_x) / divisor,
        })
        .collect()
}

/// Every run's raw (feature value, attribution) points for one seed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BackgroundSeries {
    pub seed: i32,
    pub points: Vec<(f64, f64)>,
}

/// Per-run scatter points, one series per run in run order.
pub fn background_series(records: &[AttributionRecord], scale: AttributionScale) -> Vec<BackgroundSeries> {
    let mut series: Vec<BackgroundSeries> = Vec::new();
    for record in records {
        let point = (record.feature_value, scale.value(record));
        match series.iter_mut().find(|s| s.seed == record.seed) {
            Some(s) => s.points.push(point),
            None => series.push(BackgroundSeries { seed: record.seed, points: vec![point] }),
        }
    }
    series
}

/// Vertical axis range.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct AxisBounds {
    pub min: f64,
    pub max: f64,
}

/// What to include in each report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReportOptions {
    /// Also emit relative-scale reports
    pub relative: bool,
    /// Include per-run scatter points
    pub background: bool,
    /// Include the mean ± 2 std series
    pub confidence_bounds: bool,
    /// Rows in the input table
    pub n_rows: usize,
    pub master_seed: u64,
}

impl Default for ReportOptions {
    fn default() -> Self {
        Self {
            relative: true,
            background: false,
            confidence_bounds: false,
            n_rows: 0,
            master_seed: crate::config::DEFAULT_MASTER_SEED,
        }
    }
}

/// Numeric series for one feature in one scale.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FeatureReport {
    pub feature: FeatureId,
    pub label: String,
    pub scale: AttributionScale,
    pub plot_id: String,
    pub file_stem: String,
    pub axis: AxisBounds,
    pub show_confidence_bounds: bool,
    pub stats: Vec<AggregatedStat>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub linear_overlay: Option<Vec<LinearPoint>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub background: Option<Vec<BackgroundSeries>>,
}

impl FeatureReport {
    /// Write `<dir>/<file_stem>.json`, creating `dir` if needed.
    pub fn write_json(&self, dir: impl AsRef<Path>) -> Result<PathBuf> {
        let dir = dir.as_ref();
        fs::create_dir_all(dir)?;
        let path = dir.join(format!("{}.json", self.file_stem));
        let file = File::create(&path)?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)?;
        Ok(path)
    }
}

/// Reports for every fraction feature in the table, absolute scale first.
pub fn build_reports(
    table: &AttributionTable,
    labels: Option<&VariableLabels>,
    linear: Option<&LinearReference>,
    options: &ReportOptions,
) -> Result<Vec<FeatureReport>> {
    let mut scales = vec![AttributionScale::Absolute];
    if options.relative {
        scales.push(AttributionScale::Relative);
    }

    let mut reports = Vec::new();
    for feature in table.features().iter().filter(|f| f.is_fraction()) {
        let variable = feature.variable();
        let label = labels
            .and_then(|l| l.get(variable))
            .map(clean_label)
            .unwrap_or_else(|| variable.to_string());
        info!(feature = %feature, label = %label, "building report");

        let records = table.records(feature)?;
        let coefficient = linear.and_then(|l| l.coefficient(feature));
        let id = plot_id(variable, options.n_rows, table.n_runs(), options.master_seed);

        for &scale in &scales {
            let stats = aggregate(table, feature, scale)?;
            let (min, max) = bounds(&stats, scale)?;
            reports.push(FeatureReport {
                feature: feature.clone(),
                label: label.clone(),
                scale,
                plot_id: id.clone(),
                file_stem: file_stem(&label, scale),
                axis: AxisBounds { min, max },
                show_confidence_bounds: options.confidence_bounds,
                linear_overlay: coefficient.map(|c| linear_overlay(records, &stats, c, scale)),
                background: options.background.then(|| background_series(records, scale)),
                stats,
            });
        }
    }
    Ok(reports)
}
