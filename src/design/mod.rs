//! Observation table → design matrix.

pub mod builder;

pub use builder::*;
