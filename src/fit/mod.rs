//! Model fitting.
//!
//! Responsibilities:
//!
//! - solve the L1-penalized least-squares problem for one λ (`solver`)
//! - build the λ grid (`penalty_grid`)
//! - pick λ by k-fold cross-validation (`cv`)
//! - resample at the selected λ for intervals (`bootstrap`)

pub mod bootstrap;
pub mod cv;
pub mod penalty_grid;
pub mod solver;

pub use bootstrap::*;
pub use cv::*;
pub use penalty_grid::*;
pub use solver::*;
