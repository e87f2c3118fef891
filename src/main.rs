//! rih-shap - Main Entry Point
//!
//! Bootstrap-ensemble attribution curves for block-group home value models.

use clap::Parser;
use rih_shap::cli::{cmd_run, Cli};
use tracing_subscriber::EnvFilter;

fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // --log-level wins over RUST_LOG
    let filter = match &cli.log_level {
        Some(level) => EnvFilter::try_new(format!("rih_shap={level}"))?,
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| "rih_shap=info".into()),
    };
    tracing_subscriber::fmt().with_env_filter(filter).init();

    cmd_run(&cli)
}
