//! Command-line parsing for the `vl` binary.
//!
//! The goal of this module is to keep **argument parsing** and **command
//! dispatch** separate from the modeling/math code.

use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Top-level CLI.
#[derive(Debug, Parser)]
#[command(
    name = "vl",
    version,
    about = "Regional LASSO + bootstrap of vote share against census covariates"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

/// CLI subcommands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Fit the global and per-super-region models, print summaries and export tables.
    Fit(FitArgs),
    /// Write a synthetic dataset and matching run file.
    Simulate(SimulateArgs),
}

/// Options for `vl fit`.
#[derive(Debug, Args, Clone)]
pub struct FitArgs {
    /// Unit-level CSV (id, outcome, region, covariates).
    #[arg(long, value_name = "CSV")]
    pub data: PathBuf,

    /// Run file (TOML) with column names, covariates and the region map.
    #[arg(long, value_name = "TOML")]
    pub config: PathBuf,

    /// Directory for coefficients.csv, fit_summary.csv, residuals.csv and run.json.
    #[arg(long, value_name = "DIR")]
    pub out: Option<PathBuf>,

    /// Override both the CV and bootstrap seeds.
    #[arg(long)]
    pub seed: Option<u64>,

    /// Override the bootstrap replicate count.
    #[arg(short = 'B', long)]
    pub replicates: Option<usize>,

    /// Override the number of CV folds.
    #[arg(short = 'k', long)]
    pub folds: Option<usize>,

    /// Worker threads (default: all cores).
    #[arg(short = 'j', long)]
    pub threads: Option<usize>,

    /// Abandon the run (exit code 130) once this many seconds have passed.
    #[arg(long, value_name = "SECS")]
    pub time_budget: Option<u64>,

    /// Show top-N over- and under-performing units per partition.
    #[arg(long, default_value_t = 10)]
    pub top: usize,

    /// Debug-level logging (RUST_LOG still takes precedence).
    #[arg(short, long)]
    pub verbose: bool,
}

/// Options for `vl simulate`.
#[derive(Debug, Args, Clone)]
pub struct SimulateArgs {
    /// Output directory for units.csv and run.toml.
    #[arg(long, value_name = "DIR")]
    pub out: PathBuf,

    /// Number of units to generate.
    #[arg(short = 'n', long, default_value_t = 600)]
    pub units: usize,

    /// Random seed.
    #[arg(long, default_value_t = 42)]
    pub seed: u64,

    /// Standard deviation of the outcome noise.
    #[arg(long, default_value_t = 0.03)]
    pub noise: f64,

    /// Debug-level logging (RUST_LOG still takes precedence).
    #[arg(short, long)]
    pub verbose: bool,
}
