//! Domain types used throughout the pipeline.
//!
//! This module defines:
//!
//! - the data model (`Observation`, `DesignMatrix`, `Model`, `CoefficientEstimate`, ...)
//! - the run configuration (`EngineConfig`, region map, numerical settings)

pub mod config;
pub mod types;

pub use config::*;
pub use types::*;
