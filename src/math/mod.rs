//! Mathematical utilities: least squares, rank detection and summary statistics.

pub mod ols;
pub mod stats;

pub use ols::*;
pub use stats::*;
