//! Penalty (λ) grid generation.
//!
//! The grid runs from `λ_max` (every coefficient zero) down to
//! `λ_max · min_ratio` in log-spaced steps. Descending order matches how the
//! regularization path is usually read: empty model first, densest last.

use crate::domain::{DesignMatrix, GridOptions, PenaltyGrid};
use crate::error::EngineError;
use crate::fit::solver::{lambda_max, standardize};

/// Generate `steps` log-spaced points between `min` and `max` (inclusive), ascending.
pub fn log_space(min: f64, max: f64, steps: usize) -> Result<Vec<f64>, EngineError> {
    if !(min.is_finite() && max.is_finite() && min > 0.0 && max > 0.0 && max > min) {
        return Err(EngineError::config(format!(
            "invalid log-space range: min={min}, max={max} (must be finite, >0, and max>min)"
        )));
    }
    if steps < 2 {
        return Err(EngineError::config("grid steps must be >= 2"));
    }

    let ln_min = min.ln();
    let ln_max = max.ln();
    let step = (ln_max - ln_min) / (steps as f64 - 1.0);

    let mut out = Vec::with_capacity(steps);
    for i in 0..steps {
        out.push((ln_min + step * i as f64).exp());
    }
    // Pin the endpoints exactly; exp(ln(x)) is not always x.
    out[0] = min;
    out[steps - 1] = max;
    Ok(out)
}

/// Descending λ values from `lambda_max` to `lambda_max * min_ratio`.
pub fn log_grid(lambda_max: f64, min_ratio: f64, steps: usize) -> Result<Vec<f64>, EngineError> {
    let mut values = log_space(lambda_max * min_ratio, lambda_max, steps)?;
    values.reverse();
    Ok(values)
}

/// Build the penalty grid for `design`.
///
/// Fails with a `DataError` when the outcome has no linear association with
/// any covariate at all (`λ_max = 0`): there is no path to search.
pub fn penalty_grid(design: &DesignMatrix, opts: &GridOptions) -> Result<PenaltyGrid, EngineError> {
    let std = standardize(design)?;
    let lambda_max = lambda_max(&std);
    let y_sd = (std.y.iter().map(|v| v * v).sum::<f64>() / std.n() as f64).sqrt();
    // λ_max / sd(y) is the largest absolute covariate–outcome correlation.
    if !(lambda_max.is_finite() && y_sd > 1e-12 && lambda_max > 1e-10 * y_sd) {
        return Err(EngineError::data(
            "outcome is constant or uncorrelated with every covariate (λ_max = 0)",
        ));
    }
    let lambdas = log_grid(lambda_max, opts.min_ratio, opts.n_lambda)?;
    Ok(PenaltyGrid { lambda_max, lambdas })
}
