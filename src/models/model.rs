//! Linear-model evaluation.
//!
//! The solver, cross-validator, bootstrap engine and report all need the same
//! two primitives:
//! - predict one row given intercept + coefficients
//! - predict every row of a design matrix

use crate::domain::{DesignMatrix, Model};

/// Predict a single row.
///
/// # Panics
/// Panics if `row` is shorter than `coefficients`.
pub fn predict_row(intercept: f64, coefficients: &[f64], row: impl IntoIterator<Item = f64>) -> f64 {
    let mut y = intercept;
    for (b, x) in coefficients.iter().zip(row) {
        y += b * x;
    }
    y
}

/// Predict every row of `design` with `model`.
pub fn predict(model: &Model, design: &DesignMatrix) -> Vec<f64> {
    let x = design.x();
    (0..design.n_rows())
        .map(|i| predict_row(model.intercept, &model.coefficients, x.row(i).iter().copied()))
        .collect()
}

/// Mean squared prediction error of `model` on `design`.
pub fn mean_squared_error(model: &Model, design: &DesignMatrix) -> f64 {
    let n = design.n_rows();
    if n == 0 {
        return f64::NAN;
    }
    let y = design.y();
    predict(model, design)
        .iter()
        .enumerate()
        .map(|(i, y_fit)| {
            let r = y[i] - y_fit;
            r * r
        })
        .sum::<f64>()
        / n as f64
}

#[cfg(test)]
mod tests {
    use super::*;
    use nalgebra::{DMatrix, DVector};

    fn model(intercept: f64, coefficients: Vec<f64>) -> Model {
        Model {
            variables: (0..coefficients.len()).map(|j| format!("x{j}")).collect(),
            coefficients,
            intercept,
            lambda: 0.0,
            requested_lambda: 0.0,
            residuals: vec![],
            iterations: 0,
            converged: true,
            lambda_floor_applied: false,
        }
    }

    #[test]
    fn predict_and_mse_smoke() {
        let design = DesignMatrix::from_parts(
            vec!["a".into(), "b".into()],
            vec!["x0".into(), "x1".into()],
            DMatrix::from_row_slice(2, 2, &[1.0, 2.0, 3.0, 4.0]),
            DVector::from_row_slice(&[1.5, 3.0]),
        );
        let m = model(0.5, vec![1.0, 0.0]);
        assert_eq!(predict(&m, &design), vec![1.5, 3.5]);
        assert!((mean_squared_error(&m, &design) - 0.125).abs() < 1e-12);
    }
}
