//! rih-shap CLI Module
//!
//! Runs the attribution ensemble over a block-group table and writes one
//! report per feature and scale.

use clap::{Parser, ValueEnum};
use colored::*;
use std::path::{Path, PathBuf};
use std::time::Instant;

use crate::config::{EnsembleConfig, ExplainerKind, Hyperparameters, LinearReference, VariableLabels, DEFAULT_N_RUNS};
use crate::ensemble::AttributionEnsemble;
use crate::features::{BlockGroupTable, ExtractorConfig, FeatureSource};
use crate::report::{build_reports, ReportOptions};

// ─── Styling helpers ───────────────────────────────────────────────────────────

fn dim(s: &str) -> ColoredString   { s.truecolor(100, 100, 100) }
fn accent(s: &str) -> ColoredString { s.truecolor(120, 170, 255) }
fn muted(s: &str) -> ColoredString  { s.truecolor(140, 140, 140) }
fn ok(s: &str) -> ColoredString     { s.truecolor(100, 210, 120) }

fn step_run(msg: &str) {
    print!("  {} {}... ", accent("›"), msg);
}

fn step_done(detail: &str) {
    println!("{} {}", ok("done"), dim(detail));
}

fn section(title: &str) {
    println!();
    println!("  {}", title.white().bold());
    println!("  {}", dim(&"─".repeat(56)));
}

// ─── CLI definition ────────────────────────────────────────────────────────────

/// Attribution method for each run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum ExplainerArg {
    /// Exact TreeSHAP
    Tree,
    /// Permutation sampling
    Sampling,
}

#[derive(Parser, Debug)]
#[command(name = "rih-shap")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Bootstrap-ensemble attribution curves for block-group home values")]
#[command(long_about = None)]
pub struct Cli {
    /// ACS vintage year of the target column
    #[arg(long, default_value = "2020")]
    pub vintage: i32,

    /// Merge the Hispanic or Latino race breakdown into one feature
    #[arg(long)]
    pub group_hispanic_latino: bool,

    /// JSON file with tuned hyperparameters under `params`
    #[arg(long)]
    pub param_file: PathBuf,

    /// Directory for the report files
    #[arg(long)]
    pub output_dir: PathBuf,

    /// Also write relative-scale reports (default)
    #[arg(long, overrides_with = "no_relative")]
    pub relative: bool,

    /// Only write absolute-scale reports
    #[arg(long, overrides_with = "relative")]
    pub no_relative: bool,

    /// Include every run's points in the reports
    #[arg(long)]
    pub background: bool,

    /// Include the mean ± 2 std series in the reports
    #[arg(long)]
    pub bounds: bool,

    /// Number of bootstrap runs
    #[arg(long, default_value_t = DEFAULT_N_RUNS)]
    pub runs: usize,

    /// Master seed (decimal or 0x-prefixed hex)
    #[arg(long, value_parser = parse_seed, default_value = "0x6A1C55E7")]
    pub seed: u64,

    /// Attribution method
    #[arg(long, value_enum, default_value_t = ExplainerArg::Tree)]
    pub explainer: ExplainerArg,

    /// Permutations per row for the sampling explainer
    #[arg(long, default_value = "100")]
    pub samples: usize,

    /// Target column; `{year}` is replaced by the vintage
    #[arg(long)]
    pub target_column: Option<String>,

    /// Reference linear regression (defaults to INPUT with .linreg.json)
    #[arg(long)]
    pub linreg: Option<PathBuf>,

    /// JSON map of variable codes to census labels
    #[arg(long)]
    pub labels: Option<PathBuf>,

    /// Log level for this crate (overrides RUST_LOG)
    #[arg(long)]
    pub log_level: Option<String>,

    /// Block-group table (CSV)
    pub input: PathBuf,
}

impl Cli {
    pub fn relative(&self) -> bool {
        !self.no_relative
    }

    pub fn ensemble_config(&self) -> EnsembleConfig {
        let explainer = match self.explainer {
            ExplainerArg::Tree => ExplainerKind::Tree,
            ExplainerArg::Sampling => ExplainerKind::Sampling { n_samples: self.samples },
        };
        EnsembleConfig::new()
            .with_n_runs(self.runs)
            .with_master_seed(self.seed)
            .with_year(self.vintage)
            .with_group_features(self.group_hispanic_latino)
            .with_explainer(explainer)
    }

    pub fn linreg_path(&self) -> PathBuf {
        self.linreg.clone().unwrap_or_else(|| default_linreg_path(&self.input))
    }
}

fn parse_seed(s: &str) -> Result<u64, String> {
    let parsed = match s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        Some(hex) => u64::from_str_radix(hex, 16),
        None => s.parse(),
    };
    parsed.map_err(|e| format!("invalid seed {s:?}: {e}"))
}

/// `data/bg.csv` -> `data/bg.linreg.json`.
pub fn default_linreg_path(input: &Path) -> PathBuf {
    input.with_extension("linreg.json")
}

// ─── Commands ──────────────────────────────────────────────────────────────────

pub fn cmd_run(cli: &Cli) -> anyhow::Result<()> {
    section("Attribution ensemble");

    step_run("Loading data");
    let start = Instant::now();
    let mut extractor = ExtractorConfig::default();
    if let Some(target) = &cli.target_column {
        extractor = extractor.with_target_column(target.clone());
    }
    let table = BlockGroupTable::from_csv(&cli.input, extractor)?;
    step_done(&format!("{} rows in {:?}", table.n_rows(), start.elapsed()));

    let params = Hyperparameters::from_file(&cli.param_file)?;
    let linear = LinearReference::load_optional(cli.linreg_path())?;
    let labels = cli.labels.as_ref().map(VariableLabels::from_file).transpose()?;
    if linear.is_none() {
        println!("  {} {}", muted("no linear reference at"), cli.linreg_path().display());
    }

    let config = cli.ensemble_config();
    step_run(&format!("Running {} bootstrap runs", config.n_runs.to_string().cyan()));
    let start = Instant::now();
    let ensemble = AttributionEnsemble::new(&table, params, config)?;
    let attributions = ensemble.run()?;
    step_done(&format!("{:?}", start.elapsed()));

    let options = ReportOptions {
        relative: cli.relative(),
        background: cli.background,
        confidence_bounds: cli.bounds,
        n_rows: table.n_rows(),
        master_seed: cli.seed,
    };
    step_run("Writing reports");
    let reports = build_reports(&attributions, labels.as_ref(), linear.as_ref(), &options)?;
    for report in &reports {
        report.write_json(&cli.output_dir)?;
    }
    step_done(&format!("{} files → {}", reports.len(), cli.output_dir.display()));

    println!();
    println!("  {:<16} {}", muted("Seed"), format!("{:08X}", cli.seed).white().bold());
    println!("  {:<16} {}", muted("Runs"), attributions.n_runs().to_string().white());
    println!();

    Ok(())
}
