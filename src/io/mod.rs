//! Input/output helpers.
//!
//! - CSV ingest + validation (`ingest`)
//! - result table exports (CSV) (`export`)
//! - run JSON read/write (`run_json`)

pub mod export;
pub mod ingest;
pub mod run_json;

pub use export::*;
pub use ingest::*;
pub use run_json::*;
