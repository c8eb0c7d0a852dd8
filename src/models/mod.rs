//! Linear model evaluation.
//!
//! Models are plain coefficient vectors; evaluation is kept in small pure
//! functions so fitting and reporting code can share them.

pub mod model;

pub use model::*;
