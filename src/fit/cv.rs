//! Penalty selection by k-fold cross-validation.
//!
//! For every λ on the grid and every fold, the solver is fit on the other
//! k−1 folds and scored by mean squared error on the held-out fold. The
//! selected λ follows the one-standard-error rule: the largest λ whose mean CV
//! error is within one standard error of the minimum. Among near-equivalent
//! fits this picks the sparser one.
//!
//! Fold assignment: rows are shuffled with a seeded RNG and dealt round-robin,
//! so fold sizes differ by at most one and a fixed seed reproduces the split.

use log::{debug, info};
use rand::SeedableRng;
use rand::rngs::StdRng;
use rand::seq::SliceRandom;
use rayon::prelude::*;

use crate::domain::{CvPoint, CvResult, DesignMatrix, PenaltyGrid, SolverOptions};
use crate::error::EngineError;
use crate::fit::solver::{Standardized, fit_standardized, standardize};
use crate::math::{mean, sample_std, stream_seed};
use crate::models::mean_squared_error;

/// Minimum rows needed so every training split keeps at least two rows.
const MIN_ROWS: usize = 3;

/// Fold id (`0..k`) for each of `n` rows.
pub fn assign_folds(n: usize, k: usize, seed: u64) -> Vec<usize> {
    let mut order: Vec<usize> = (0..n).collect();
    let mut rng = StdRng::seed_from_u64(stream_seed(seed, 0));
    order.shuffle(&mut rng);

    let mut folds = vec![0; n];
    for (pos, &row) in order.iter().enumerate() {
        folds[row] = pos % k;
    }
    folds
}

struct FoldData {
    train: DesignMatrix,
    train_std: Standardized,
    test: DesignMatrix,
}

/// Cross-validate `grid` on `design` with `folds` folds (clamped to the row count).
pub fn cross_validate(
    design: &DesignMatrix,
    grid: &PenaltyGrid,
    folds: usize,
    seed: u64,
    solver: &SolverOptions,
) -> Result<CvResult, EngineError> {
    let n = design.n_rows();
    if n < MIN_ROWS {
        return Err(EngineError::data(format!(
            "cross-validation needs at least {MIN_ROWS} observations, got {n}"
        )));
    }
    if grid.is_empty() {
        return Err(EngineError::config("penalty grid is empty"));
    }
    if folds < 2 {
        return Err(EngineError::config("cross-validation needs at least 2 folds"));
    }
    let k = folds.min(n);

    let assignment = assign_folds(n, k, seed);
    let fold_data: Vec<FoldData> = (0..k)
        .into_par_iter()
        .map(|f| {
            let train_rows: Vec<usize> = (0..n).filter(|&i| assignment[i] != f).collect();
            let test_rows: Vec<usize> = (0..n).filter(|&i| assignment[i] == f).collect();
            let train = design.select_rows(&train_rows);
            let train_std = standardize(&train)?;
            Ok(FoldData {
                train,
                train_std,
                test: design.select_rows(&test_rows),
            })
        })
        .collect::<Result<_, EngineError>>()?;

    // Every (fold, λ) pair is independent; results come back in input order.
    let tasks: Vec<(usize, usize)> = (0..k)
        .flat_map(|f| (0..grid.len()).map(move |l| (f, l)))
        .collect();
    let scores: Vec<(f64, bool)> = tasks
        .par_iter()
        .map(|&(f, l)| {
            let fd = &fold_data[f];
            let model = fit_standardized(&fd.train, &fd.train_std, grid.lambdas[l], solver)?;
            Ok((mean_squared_error(&model, &fd.test), model.converged))
        })
        .collect::<Result<_, EngineError>>()?;

    let not_converged = scores.iter().filter(|(_, ok)| !ok).count();
    if not_converged > 0 {
        debug!("{not_converged} of {} CV fits hit the iteration cap", scores.len());
    }

    let mut curve = Vec::with_capacity(grid.len());
    for (l, &lambda) in grid.lambdas.iter().enumerate() {
        let errors: Vec<f64> = (0..k).map(|f| scores[f * grid.len() + l].0).collect();
        if errors.iter().any(|e| !e.is_finite()) {
            return Err(EngineError::numerical(format!("non-finite CV error at λ={lambda:e}")));
        }
        let mean_mse = mean(&errors).unwrap_or(f64::NAN);
        let std_error = sample_std(&errors).unwrap_or(0.0) / (k as f64).sqrt();
        curve.push(CvPoint {
            lambda,
            mean_mse,
            std_error,
        });
    }

    let result = select_one_se(&curve, k)?;
    info!(
        "cv: k={k}, λ_1se={:.3e} (λ_min={:.3e}), mse={:.4e}",
        result.selected_lambda, result.min_error_lambda, result.selected_mse
    );
    Ok(result)
}

/// Apply the one-standard-error rule to a CV curve.
///
/// Ties at the minimum resolve towards the larger λ.
pub fn select_one_se(curve: &[CvPoint], folds: usize) -> Result<CvResult, EngineError> {
    let Some(min_point) = curve.iter().copied().reduce(|best, p| {
        if p.mean_mse < best.mean_mse || (p.mean_mse == best.mean_mse && p.lambda > best.lambda) {
            p
        } else {
            best
        }
    }) else {
        return Err(EngineError::config("empty CV curve"));
    };

    let threshold = min_point.mean_mse + min_point.std_error;
    let selected = curve
        .iter()
        .filter(|p| p.mean_mse <= threshold)
        .copied()
        .reduce(|a, b| if b.lambda > a.lambda { b } else { a })
        .unwrap_or(min_point);

    Ok(CvResult {
        selected_lambda: selected.lambda,
        min_error_lambda: min_point.lambda,
        selected_mse: selected.mean_mse,
        folds,
        curve: curve.to_vec(),
    })
}
