//! Data sources.
//!
//! - `sample`: seeded synthetic datasets with known coefficients

pub mod sample;

pub use sample::*;
