//! Dense least squares and rank detection.
//!
//! The coordinate-descent solver never needs a matrix factorization. These
//! helpers exist for two narrower jobs:
//!
//! - detecting a rank-deficient design before an unpenalized (λ = 0) fit
//! - providing a closed-form OLS reference (tests, diagnostics)
//!
//! Both use SVD so tall and near-singular matrices are handled without panics.

use nalgebra::{DMatrix, DVector};

/// Relative singular-value cutoff used by [`numerical_rank`].
pub const RANK_RTOL: f64 = 1e-10;

/// Solve a least squares problem using SVD.
///
/// Returns `None` if the system is too ill-conditioned to solve robustly.
pub fn solve_least_squares(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<DVector<f64>> {
    let svd = x.clone().svd(true, true);

    for &tol in &[1e-10, 1e-8, 1e-6] {
        if let Ok(beta) = svd.solve(y, tol) {
            if beta.iter().all(|v| v.is_finite()) {
                return Some(beta);
            }
        }
    }

    None
}

/// OLS with an unpenalized intercept: returns `(intercept, slopes)`.
pub fn ols_with_intercept(x: &DMatrix<f64>, y: &DVector<f64>) -> Option<(f64, Vec<f64>)> {
    let n = x.nrows();
    let p = x.ncols();
    let mut xi = DMatrix::<f64>::zeros(n, p + 1);
    for i in 0..n {
        xi[(i, 0)] = 1.0;
        for j in 0..p {
            xi[(i, j + 1)] = x[(i, j)];
        }
    }
    let beta = solve_least_squares(&xi, y)?;
    Some((beta[0], beta.iter().skip(1).copied().collect()))
}

/// Numerical rank: singular values above `RANK_RTOL * σ_max`.
pub fn numerical_rank(x: &DMatrix<f64>) -> usize {
    if x.nrows() == 0 || x.ncols() == 0 {
        return 0;
    }
    let sv = x.singular_values();
    let max = sv.iter().copied().fold(0.0_f64, f64::max);
    if max <= 0.0 {
        return 0;
    }
    sv.iter().filter(|&&s| s > RANK_RTOL * max).count()
}
