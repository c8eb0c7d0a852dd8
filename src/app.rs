//! Top-level application orchestration.
//!
//! `src/main.rs` is intentionally tiny; this module is the "real main" that:
//! - parses CLI arguments and sets up logging
//! - loads the run file and applies CLI overrides
//! - runs the partitioned fit pipeline on a bounded worker pool
//! - prints reports and writes exports
//! - generates synthetic datasets

use std::time::Duration;

use clap::Parser;
use log::{LevelFilter, info};

use crate::cli::{Command, FitArgs, SimulateArgs};
use crate::control::CancelToken;
use crate::data::{SampleOptions, generate_sample, write_sample};
use crate::domain::EngineConfig;
use crate::error::{AppError, EngineError};

pub mod pipeline;

/// Entry point for the `vl` binary.
pub fn run() -> Result<(), AppError> {
    let cli = crate::cli::Cli::parse();

    match cli.command {
        Command::Fit(args) => {
            init_logging(args.verbose);
            handle_fit(args)
        }
        Command::Simulate(args) => {
            init_logging(args.verbose);
            handle_simulate(args)
        }
    }
}

fn init_logging(verbose: bool) {
    let default = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    // RUST_LOG wins over the default when set.
    let _ = env_logger::Builder::new()
        .filter_level(default)
        .parse_default_env()
        .format_timestamp(None)
        .try_init();
}

/// Merge CLI overrides into the run file.
pub fn apply_overrides(mut config: EngineConfig, args: &FitArgs) -> EngineConfig {
    if let Some(seed) = args.seed {
        config.cv.seed = seed;
        config.bootstrap.seed = seed;
    }
    if let Some(replicates) = args.replicates {
        config.bootstrap.replicates = replicates;
    }
    if let Some(folds) = args.folds {
        config.cv.folds = folds;
    }
    config
}

fn handle_fit(args: FitArgs) -> Result<(), AppError> {
    let config = apply_overrides(EngineConfig::load(&args.config)?, &args);
    config.validate()?;

    let cancel = match args.time_budget {
        Some(secs) => {
            info!("time budget: {secs}s");
            CancelToken::with_deadline(Duration::from_secs(secs))
        }
        None => CancelToken::new(),
    };
    let run = || pipeline::run_fit(&config, &args.data, args.top, &cancel);
    let output = match args.threads {
        Some(threads) => {
            if threads == 0 {
                return Err(EngineError::config("--threads must be > 0").into());
            }
            let pool = rayon::ThreadPoolBuilder::new()
                .num_threads(threads)
                .build()
                .map_err(|e| AppError::new(2, format!("failed to build worker pool: {e}")))?;
            info!("using {threads} worker threads");
            pool.install(run)?
        }
        None => run()?,
    };

    println!(
        "{}",
        crate::report::format_run_summary(&config, output.n_observations, &output.results)
    );
    println!("{}", crate::report::format_coefficients(&output.results));
    println!("{}", crate::report::format_rankings(&output.results.rankings));

    if let Some(dir) = &args.out {
        let paths = crate::io::write_outputs(dir, &config, &output.runs, &output.results)?;
        for path in paths {
            info!("wrote {}", path.display());
        }
    }

    Ok(())
}

fn handle_simulate(args: SimulateArgs) -> Result<(), AppError> {
    let sample = generate_sample(&SampleOptions {
        units: args.units,
        seed: args.seed,
        noise: args.noise,
    })?;
    let paths = write_sample(&args.out, &sample)?;

    println!("Generated {} units (seed {}).", sample.observations.len(), args.seed);
    println!("True coefficients by super-region:");
    for truth in &sample.truth {
        let coefs: Vec<String> = truth
            .coefficients
            .iter()
            .map(|(name, b)| format!("{name}={b:+.2}"))
            .collect();
        println!("  {:<10} intercept={:.2} {}", truth.name, truth.intercept, coefs.join(" "));
    }
    for path in paths {
        println!("wrote {}", path.display());
    }
    Ok(())
}
