//! L1-penalized least squares by cyclic coordinate descent.
//!
//! Objective, on standardized covariates `x̃` (zero mean, unit population
//! variance) and centered outcome `ỹ`:
//!
//! ```text
//! minimize (1 / 2n) Σ (ỹ_i - x̃_i^T β)^2 + λ Σ |β_j|
//! ```
//!
//! Each coordinate update takes the one-variable OLS solution against the
//! partial residual and soft-thresholds it by λ. Cycles repeat until the
//! largest coefficient change in a cycle, in original units, is below the
//! tolerance, or the cycle cap is hit (non-fatal: the last iterate is returned with `converged = false`).
//!
//! Coefficients are mapped back to original units on output and the intercept
//! is recomputed from the unstandardized means.
//!
//! Non-convergence and the λ floor are reported through flags on the returned
//! `Model`, not logged as warnings here: the bootstrap calls this thousands of
//! times and decides itself what is worth surfacing.

use log::debug;
use nalgebra::DMatrix;

use crate::domain::{DesignMatrix, Model, SolverOptions};
use crate::error::EngineError;
use crate::math::numerical_rank;
use crate::models::predict_row;

/// Columns with a standard deviation at or below this are treated as constant.
const CONSTANT_SD: f64 = 1e-12;

/// Relative slack so that `|z| == λ` up to rounding lands exactly on zero.
const TIE_SLACK: f64 = 1e-10;

/// Soft-thresholding operator `S(z, λ) = sign(z) · max(|z| - λ, 0)`.
///
/// Magnitudes within rounding of λ are clamped to zero.
pub fn soft_threshold(z: f64, lambda: f64) -> f64 {
    let excess = z.abs() - lambda;
    if excess <= TIE_SLACK * lambda {
        0.0
    } else {
        z.signum() * excess
    }
}

/// A design matrix on the standardized scale the optimizer works in.
#[derive(Debug, Clone)]
pub struct Standardized {
    /// `n × p`; constant columns are all zero.
    pub x: DMatrix<f64>,
    /// Centered outcome.
    pub y: Vec<f64>,
    pub x_means: Vec<f64>,
    /// Population standard deviations; `0.0` marks a constant column.
    pub x_scales: Vec<f64>,
    pub y_mean: f64,
}

impl Standardized {
    pub fn n(&self) -> usize {
        self.y.len()
    }

    /// Indices of non-constant columns.
    pub fn active_columns(&self) -> Vec<usize> {
        (0..self.x_scales.len())
            .filter(|&j| self.x_scales[j] > 0.0)
            .collect()
    }

    /// `x̃_j^T r / n`.
    fn column_dot(&self, j: usize, r: &[f64]) -> f64 {
        let col = self.x.column(j);
        col.iter().zip(r).map(|(a, b)| a * b).sum::<f64>() / self.n() as f64
    }
}

/// Standardize every column of `design` and center its outcome.
pub fn standardize(design: &DesignMatrix) -> Result<Standardized, EngineError> {
    let n = design.n_rows();
    let p = design.n_cols();
    if n < 2 {
        return Err(EngineError::data(format!(
            "need at least 2 observations to fit, got {n}"
        )));
    }

    let nf = n as f64;
    let y_mean = design.y().iter().sum::<f64>() / nf;
    let y: Vec<f64> = design.y().iter().map(|v| v - y_mean).collect();

    let src = design.x();
    let mut x = DMatrix::<f64>::zeros(n, p);
    let mut x_means = Vec::with_capacity(p);
    let mut x_scales = Vec::with_capacity(p);

    for j in 0..p {
        let col = src.column(j);
        let mean = col.iter().sum::<f64>() / nf;
        let var = col.iter().map(|v| (v - mean) * (v - mean)).sum::<f64>() / nf;
        let sd = var.sqrt();
        x_means.push(mean);
        if sd > CONSTANT_SD && sd.is_finite() {
            x_scales.push(sd);
            for i in 0..n {
                x[(i, j)] = (src[(i, j)] - mean) / sd;
            }
        } else {
            x_scales.push(0.0);
        }
    }

    Ok(Standardized {
        x,
        y,
        x_means,
        x_scales,
        y_mean,
    })
}

/// Smallest λ at which every coefficient is zero: `max_j |x̃_j^T ỹ| / n`.
pub fn lambda_max(std: &Standardized) -> f64 {
    std.active_columns()
        .into_iter()
        .map(|j| std.column_dot(j, &std.y).abs())
        .fold(0.0, f64::max)
}

/// Fit the penalized model on `design` at penalty `lambda`.
pub fn fit_lasso(design: &DesignMatrix, lambda: f64, opts: &SolverOptions) -> Result<Model, EngineError> {
    let std = standardize(design)?;
    fit_standardized(design, &std, lambda, opts)
}

/// Same as [`fit_lasso`] with a precomputed standardization of `design`.
pub fn fit_standardized(
    design: &DesignMatrix,
    std: &Standardized,
    lambda: f64,
    opts: &SolverOptions,
) -> Result<Model, EngineError> {
    if !(lambda.is_finite() && lambda >= 0.0) {
        return Err(EngineError::numerical(format!("invalid penalty λ={lambda}")));
    }

    let n = std.n();
    let p = std.x_scales.len();
    let active = std.active_columns();

    // An unpenalized fit needs a full-rank design; otherwise fall back to a
    // small positive penalty, which makes the solution unique again.
    let mut lambda_used = lambda;
    let mut lambda_floor_applied = false;
    if lambda == 0.0 && !active.is_empty() {
        let sub = std.x.select_columns(active.iter());
        let rank = numerical_rank(&sub);
        if rank < active.len() {
            debug!(
                "rank-deficient design at λ=0 (rank {rank} < {} columns); using λ floor {:e}",
                active.len(),
                opts.lambda_floor
            );
            lambda_used = opts.lambda_floor;
            lambda_floor_applied = true;
        }
    }

    let d: Vec<f64> = (0..p)
        .map(|j| {
            let col = std.x.column(j);
            col.iter().map(|v| v * v).sum::<f64>() / n as f64
        })
        .collect();

    let mut beta = vec![0.0; p];
    let mut r = std.y.clone();
    let mut converged = active.is_empty();
    let mut iterations = 0;

    while !converged && iterations < opts.max_iterations {
        iterations += 1;
        let mut max_change = 0.0_f64;

        for &j in &active {
            let old = beta[j];
            let z = std.column_dot(j, &r) + d[j] * old;
            let new = soft_threshold(z, lambda_used) / d[j];
            let delta = new - old;
            if delta != 0.0 {
                let col = std.x.column(j);
                for (ri, xij) in r.iter_mut().zip(col.iter()) {
                    *ri -= xij * delta;
                }
                beta[j] = new;
                // Measured in original units, where the tolerance applies.
                max_change = max_change.max(delta.abs() / std.x_scales[j]);
            }
        }

        if !max_change.is_finite() {
            return Err(EngineError::numerical(format!(
                "coordinate descent diverged at λ={lambda_used:e}"
            )));
        }
        if max_change < opts.tolerance {
            converged = true;
        }
    }

    if !converged {
        debug!(
            "coordinate descent hit the cap of {} cycles at λ={lambda_used:e} without meeting tolerance {:e}",
            opts.max_iterations, opts.tolerance
        );
    } else {
        debug!("coordinate descent converged in {iterations} cycles at λ={lambda_used:e}");
    }

    let coefficients: Vec<f64> = (0..p)
        .map(|j| {
            if std.x_scales[j] > 0.0 {
                beta[j] / std.x_scales[j]
            } else {
                0.0
            }
        })
        .collect();
    let intercept = std.y_mean
        - coefficients
            .iter()
            .zip(&std.x_means)
            .map(|(b, m)| b * m)
            .sum::<f64>();

    if !intercept.is_finite() || coefficients.iter().any(|b| !b.is_finite()) {
        return Err(EngineError::numerical("non-finite coefficients after fitting"));
    }

    let x = design.x();
    let residuals = (0..n)
        .map(|i| design.y()[i] - predict_row(intercept, &coefficients, x.row(i).iter().copied()))
        .collect();

    Ok(Model {
        variables: design.variables().to_vec(),
        coefficients,
        intercept,
        lambda: lambda_used,
        requested_lambda: lambda,
        residuals,
        iterations,
        converged,
        lambda_floor_applied,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::ols_with_intercept;
    use approx::assert_abs_diff_eq;
    use nalgebra::DVector;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use rand_distr::{Distribution, Normal};

    fn design_from_columns(cols: &[(&str, Vec<f64>)], y: Vec<f64>) -> DesignMatrix {
        let n = y.len();
        let p = cols.len();
        let x = DMatrix::from_fn(n, p, |i, j| cols[j].1[i]);
        DesignMatrix::from_parts(
            (0..n).map(|i| format!("u{i}")).collect(),
            cols.iter().map(|(name, _)| name.to_string()).collect(),
            x,
            DVector::from_vec(y),
        )
    }

    fn random_design(n: usize, seed: u64) -> DesignMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let noise = Normal::new(0.0, 0.05).unwrap();
        let x1: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        let x2: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        let x3: Vec<f64> = (0..n).map(|_| rng.gen_range(-1.0..1.0)).collect();
        let y = (0..n)
            .map(|i| 0.2 + 0.5 * x1[i] - 0.3 * x2[i] + 0.1 * x3[i] + noise.sample(&mut rng))
            .collect();
        design_from_columns(&[("x1", x1), ("x2", x2), ("x3", x3)], y)
    }

    fn tight() -> SolverOptions {
        SolverOptions {
            tolerance: 1e-12,
            max_iterations: 100_000,
            lambda_floor: 1e-6,
        }
    }

    #[test]
    fn soft_threshold_shrinks_and_clamps() {
        assert_abs_diff_eq!(soft_threshold(0.5, 0.2), 0.3);
        assert_abs_diff_eq!(soft_threshold(-0.5, 0.2), -0.3);
        assert_eq!(soft_threshold(0.1, 0.2), 0.0);
        assert_eq!(soft_threshold(0.2, 0.2), 0.0);
        assert_eq!(soft_threshold(0.0, 0.0), 0.0);
        assert_abs_diff_eq!(soft_threshold(0.7, 0.0), 0.7);
    }

    #[test]
    fn zero_penalty_matches_closed_form_ols() {
        let design = random_design(120, 11);
        let model = fit_lasso(&design, 0.0, &tight()).unwrap();
        let (b0, b) = ols_with_intercept(design.x(), design.y()).unwrap();

        assert!(model.converged);
        assert!(!model.lambda_floor_applied);
        assert_abs_diff_eq!(model.intercept, b0, epsilon = 1e-6);
        for (got, want) in model.coefficients.iter().zip(&b) {
            assert_abs_diff_eq!(*got, *want, epsilon = 1e-6);
        }
    }

    /// Census-like proportions: small spread around a base share, with a
    /// common factor giving pairwise correlation `rho`.
    fn proportion_design(n: usize, rho: f64, seed: u64) -> DesignMatrix {
        let mut rng = StdRng::seed_from_u64(seed);
        let z = Normal::new(0.0, 1.0).unwrap();
        let noise = Normal::new(0.0, 0.02).unwrap();
        let bases = [0.30, 0.25, 0.15];
        let sds = [0.07, 0.07, 0.05];
        let mut cols = vec![Vec::with_capacity(n); 3];
        let mut y = Vec::with_capacity(n);
        for _ in 0..n {
            let common = z.sample(&mut rng);
            let row: Vec<f64> = (0..3)
                .map(|j| bases[j] + sds[j] * (rho.sqrt() * common + (1.0 - rho).sqrt() * z.sample(&mut rng)))
                .collect();
            y.push(0.4 + 0.5 * row[0] - 0.3 * row[1] + 0.2 * row[2] + noise.sample(&mut rng));
            for (col, v) in cols.iter_mut().zip(row) {
                col.push(v);
            }
        }
        let named: Vec<(&str, Vec<f64>)> = ["pct_degree", "pct_over_65", "pct_social_rent"]
            .into_iter()
            .zip(cols)
            .collect();
        design_from_columns(&named, y)
    }

    #[test]
    fn default_settings_match_ols_on_correlated_proportions() {
        for (k, rho) in [0.0, 0.5, 0.8, 0.9].into_iter().enumerate() {
            let design = proportion_design(200, rho, 40 + k as u64);
            let model = fit_lasso(&design, 0.0, &SolverOptions::default()).unwrap();
            let (b0, b) = ols_with_intercept(design.x(), design.y()).unwrap();

            assert!(model.converged, "ρ={rho}");
            assert!(!model.lambda_floor_applied, "ρ={rho}");
            assert_abs_diff_eq!(model.intercept, b0, epsilon = 1e-6);
            for (got, want) in model.coefficients.iter().zip(&b) {
                assert!((got - want).abs() < 1e-6, "ρ={rho}: {got} vs OLS {want}");
            }
        }
    }

    #[test]
    fn residuals_are_training_residuals() {
        let design = random_design(40, 3);
        let model = fit_lasso(&design, 0.01, &SolverOptions::default()).unwrap();
        let mean_resid: f64 = model.residuals.iter().sum::<f64>() / 40.0;
        assert_abs_diff_eq!(mean_resid, 0.0, epsilon = 1e-10);
        assert_eq!(model.residuals.len(), 40);
    }

    #[test]
    fn lambda_max_zeroes_everything() {
        let design = random_design(80, 5);
        let std = standardize(&design).unwrap();
        let lmax = lambda_max(&std);
        assert!(lmax > 0.0);

        let model = fit_standardized(&design, &std, lmax, &SolverOptions::default()).unwrap();
        assert!(model.coefficients.iter().all(|b| *b == 0.0));
        assert_abs_diff_eq!(model.intercept, std.y_mean, epsilon = 1e-12);

        let big = fit_lasso(&design, 10.0 * lmax, &SolverOptions::default()).unwrap();
        assert_eq!(big.n_zero(), 3);
    }

    #[test]
    fn coefficient_magnitudes_shrink_monotonically_on_orthogonal_design() {
        // Balanced ±1 patterns: mean zero and mutually orthogonal.
        let n = 64;
        let x1: Vec<f64> = (0..n).map(|i| if i % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let x2: Vec<f64> = (0..n).map(|i| if (i / 2) % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let x3: Vec<f64> = (0..n).map(|i| if (i / 4) % 2 == 0 { 1.0 } else { -1.0 }).collect();
        let y: Vec<f64> = (0..n)
            .map(|i| 0.4 * x1[i] - 0.25 * x2[i] + 0.05 * x3[i] + 0.01 * ((i * 7 % 5) as f64 - 2.0))
            .collect();
        let design = design_from_columns(&[("x1", x1), ("x2", x2), ("x3", x3)], y);
        let std = standardize(&design).unwrap();
        let lmax = lambda_max(&std);

        let grid = crate::fit::penalty_grid::log_grid(lmax, 1e-4, 30).unwrap();
        // Walk from the smallest λ to the largest.
        let mut prev: Option<Vec<f64>> = None;
        for &lambda in grid.iter().rev() {
            let m = fit_standardized(&design, &std, lambda, &tight()).unwrap();
            if let Some(prev) = &prev {
                for (a, b) in m.coefficients.iter().zip(prev) {
                    assert!(a.abs() <= b.abs() + 1e-9, "|{a}| > |{b}| at λ={lambda}");
                }
            }
            prev = Some(m.coefficients.clone());
        }
        let at_max = fit_standardized(&design, &std, grid[0], &tight()).unwrap();
        assert!(at_max.coefficients.iter().all(|b| *b == 0.0));
    }

    #[test]
    fn duplicate_covariate_is_zeroed_at_moderate_penalty() {
        let mut rng = StdRng::seed_from_u64(21);
        let noise = Normal::new(0.0, 0.02).unwrap();
        let n = 150;
        let x1: Vec<f64> = (0..n).map(|_| rng.gen_range(0.0..1.0)).collect();
        let y: Vec<f64> = x1.iter().map(|v| 0.5 * v + noise.sample(&mut rng)).collect();
        let design = design_from_columns(&[("x1", x1.clone()), ("x2", x1)], y);

        let std = standardize(&design).unwrap();
        let lambda = 0.1 * lambda_max(&std);
        let m = fit_standardized(&design, &std, lambda, &SolverOptions::default()).unwrap();

        let zeros = m.coefficients.iter().filter(|b| **b == 0.0).count();
        assert_eq!(zeros, 1, "coefficients: {:?}", m.coefficients);
        let combined: f64 = m.coefficients.iter().sum();
        // Shrinkage of 0.1·λmax on a ~0.5 slope keeps the combined effect close.
        assert!(combined > 0.4 && combined < 0.5, "combined = {combined}");
    }

    #[test]
    fn rank_deficient_zero_penalty_uses_floor() {
        let x1: Vec<f64> = (0..30).map(|i| i as f64 / 30.0).collect();
        let y: Vec<f64> = x1.iter().map(|v| 1.0 + 2.0 * v).collect();
        let design = design_from_columns(&[("a", x1.clone()), ("b", x1)], y);
        let m = fit_lasso(&design, 0.0, &SolverOptions::default()).unwrap();
        assert!(m.lambda_floor_applied);
        assert_eq!(m.requested_lambda, 0.0);
        assert_eq!(m.lambda, SolverOptions::default().lambda_floor);
        assert_abs_diff_eq!(m.coefficients.iter().sum::<f64>(), 2.0, epsilon = 1e-3);
    }

    #[test]
    fn iteration_cap_returns_flagged_iterate() {
        let design = random_design(60, 9);
        let opts = SolverOptions {
            tolerance: 1e-15,
            max_iterations: 1,
            lambda_floor: 1e-6,
        };
        let m = fit_lasso(&design, 0.0, &opts).unwrap();
        assert!(!m.converged);
        assert_eq!(m.iterations, 1);
        assert!(m.coefficients.iter().all(|b| b.is_finite()));
    }

    #[test]
    fn constant_column_gets_zero_coefficient() {
        let x1: Vec<f64> = (0..20).map(|i| i as f64).collect();
        let c = vec![3.0; 20];
        let y: Vec<f64> = x1.iter().map(|v| 0.5 * v + 1.0).collect();
        let design = design_from_columns(&[("x1", x1), ("const", c)], y);
        let m = fit_lasso(&design, 0.0, &tight()).unwrap();
        assert_eq!(m.coefficient("const"), Some(0.0));
        assert_abs_diff_eq!(m.coefficient("x1").unwrap(), 0.5, epsilon = 1e-8);
        assert_abs_diff_eq!(m.intercept, 1.0, epsilon = 1e-8);
    }

    #[test]
    fn too_few_rows_is_a_data_error() {
        let design = design_from_columns(&[("x1", vec![1.0])], vec![0.5]);
        assert!(matches!(
            fit_lasso(&design, 0.1, &SolverOptions::default()),
            Err(EngineError::Data(_))
        ));
    }

    proptest! {
        #![proptest_config(ProptestConfig { cases: 24, .. ProptestConfig::default() })]

        #[test]
        fn coefficients_follow_their_names_under_column_reordering(
            seed in 0u64..1_000,
            lambda_frac in 0.0f64..0.5,
            perm in Just(vec![0usize, 1, 2]).prop_shuffle(),
        ) {
            let design = random_design(60, seed);
            let std = standardize(&design).unwrap();
            let lambda = lambda_frac * lambda_max(&std);
            let base = fit_lasso(&design, lambda, &tight()).unwrap();

            let names = design.variables();
            let cols: Vec<(&str, Vec<f64>)> = perm
                .iter()
                .map(|&j| (names[j].as_str(), design.x().column(j).iter().copied().collect()))
                .collect();
            let shuffled = design_from_columns(&cols, design.y().iter().copied().collect());
            let other = fit_lasso(&shuffled, lambda, &tight()).unwrap();

            for name in names {
                let a = base.coefficient(name).unwrap();
                let b = other.coefficient(name).unwrap();
                prop_assert!((a - b).abs() < 1e-6, "{name}: {a} vs {b}");
            }
            prop_assert!((base.intercept - other.intercept).abs() < 1e-6);
        }
    }
}
