//! Nonparametric bootstrap of the penalized fit.
//!
//! Each replicate draws `n` row indices uniformly with replacement, refits the
//! solver at a fixed λ (selected once on the full sample, not re-tuned per
//! replicate), and records:
//!
//! - the coefficient vector over the full variable list (zeros included)
//! - the replicate model's predictions on the original rows
//!
//! Replicates run in parallel. Each one seeds its own RNG from
//! `(seed, replicate index)`, so output does not depend on thread count or
//! scheduling. A replicate that fails to converge, needs the λ floor, or
//! hits a numerical error is skipped and counted, never silently dropped.

use log::debug;
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rayon::prelude::*;

use crate::control::CancelToken;
use crate::domain::{
    BootstrapDistribution, BootstrapOptions, BootstrapReplicate, CoefficientEstimate, DesignMatrix,
    Model, PredictionInterval, SignClass, SolverOptions,
};
use crate::error::EngineError;
use crate::fit::solver::fit_lasso;
use crate::math::{quantile_pair, stream_seed};
use crate::models::predict;

enum ReplicateOutcome {
    Fitted(BootstrapReplicate),
    NotConverged,
    Numerical,
}

/// Draw `n` indices uniformly with replacement from `0..n`.
pub fn resample_indices(n: usize, rng: &mut impl Rng) -> Vec<usize> {
    (0..n).map(|_| rng.gen_range(0..n)).collect()
}

/// Run `opts.replicates` bootstrap replicates of the fit at `lambda`.
///
/// On cancellation the whole replicate set is discarded and
/// `EngineError::Cancelled` is returned.
pub fn run_bootstrap(
    design: &DesignMatrix,
    lambda: f64,
    opts: &BootstrapOptions,
    solver: &SolverOptions,
    cancel: &CancelToken,
) -> Result<BootstrapDistribution, EngineError> {
    let n = design.n_rows();
    if n < 2 {
        return Err(EngineError::data(format!(
            "bootstrap needs at least 2 observations, got {n}"
        )));
    }

    let outcomes: Vec<ReplicateOutcome> = (0..opts.replicates)
        .into_par_iter()
        .map(|b| {
            cancel.check()?;
            Ok(run_replicate(design, lambda, b, opts.seed, solver))
        })
        .collect::<Result<_, EngineError>>()?;
    // A cancel that lands after the last check still invalidates the run.
    cancel.check()?;

    let mut coefficients = Vec::with_capacity(outcomes.len());
    let mut per_replicate_predictions = Vec::with_capacity(outcomes.len());
    let mut skipped_not_converged = 0;
    let mut skipped_numerical = 0;

    for outcome in outcomes {
        match outcome {
            ReplicateOutcome::Fitted(rep) => {
                per_replicate_predictions.push(predict(&rep.model, design));
                coefficients.push(rep.model.coefficients);
            }
            ReplicateOutcome::NotConverged => skipped_not_converged += 1,
            ReplicateOutcome::Numerical => skipped_numerical += 1,
        }
    }

    // Transpose to observation-major.
    let predictions: Vec<Vec<f64>> = (0..n)
        .map(|i| per_replicate_predictions.iter().map(|p| p[i]).collect())
        .collect();

    let dist = BootstrapDistribution {
        variables: design.variables().to_vec(),
        lambda,
        coefficients,
        predictions,
        requested: opts.replicates,
        skipped_not_converged,
        skipped_numerical,
    };

    if dist.used() == 0 {
        return Err(EngineError::numerical(format!(
            "all {} bootstrap replicates failed",
            opts.replicates
        )));
    }
    debug!(
        "bootstrap: {} of {} replicates used at λ={lambda:.3e}",
        dist.used(),
        dist.requested
    );

    Ok(dist)
}

fn run_replicate(
    design: &DesignMatrix,
    lambda: f64,
    index: usize,
    seed: u64,
    solver: &SolverOptions,
) -> ReplicateOutcome {
    let mut rng = StdRng::seed_from_u64(stream_seed(seed, index as u64));
    let indices = resample_indices(design.n_rows(), &mut rng);
    let sample = design.select_rows(&indices);

    match fit_lasso(&sample, lambda, solver) {
        Ok(model) if model.lambda_floor_applied => ReplicateOutcome::Numerical,
        Ok(model) if !model.converged => ReplicateOutcome::NotConverged,
        Ok(model) => ReplicateOutcome::Fitted(BootstrapReplicate {
            index,
            indices,
            model,
        }),
        Err(err) => {
            debug!("bootstrap replicate {index} failed: {err}");
            ReplicateOutcome::Numerical
        }
    }
}

/// Summarize a bootstrap distribution into per-variable estimates.
///
/// `full` is the full-sample model; its coefficients are the point estimates
/// and its convergence flag is carried into every row.
pub fn coefficient_estimates(
    partition: &str,
    full: &Model,
    dist: &BootstrapDistribution,
    opts: &BootstrapOptions,
) -> Vec<CoefficientEstimate> {
    let (q_lo, q_hi) = opts.quantile_levels();
    let reduced = dist.skip_rate() > opts.skip_rate_threshold;

    full.variables
        .iter()
        .enumerate()
        .map(|(j, variable)| {
            let draws: Vec<f64> = dist.coefficients.iter().map(|c| c[j]).collect();
            let observed = full.coefficients[j];
            let (lower, upper) = quantile_pair(&draws, q_lo, q_hi).unwrap_or((observed, observed));
            CoefficientEstimate {
                partition: partition.to_string(),
                variable: variable.clone(),
                observed,
                lower,
                upper,
                sign: SignClass::of(observed),
                uncertainty: upper - lower,
                converged: full.converged,
                reduced_replicates: reduced,
            }
        })
        .collect()
}

/// Per-observation prediction intervals from the bootstrap predictions.
pub fn prediction_intervals(
    dist: &BootstrapDistribution,
    opts: &BootstrapOptions,
) -> Vec<PredictionInterval> {
    let (q_lo, q_hi) = opts.quantile_levels();
    dist.predictions
        .iter()
        .map(|draws| {
            let (lower, upper) = quantile_pair(draws, q_lo, q_hi).unwrap_or((f64::NAN, f64::NAN));
            PredictionInterval { lower, upper }
        })
        .collect()
}
