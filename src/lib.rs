//! `vote-lasso` library crate.
//!
//! The binary (`vl`) is a thin wrapper around this library so that:
//!
//! - core logic is testable without spawning processes
//! - the engine (design matrix → LASSO → CV → bootstrap → aggregation) can be
//!   driven from other front-ends
//! - code stays easy to navigate as the project grows

pub mod app;
pub mod cli;
pub mod control;
pub mod data;
pub mod design;
pub mod domain;
pub mod error;
pub mod fit;
pub mod io;
pub mod math;
pub mod models;
pub mod partition;
pub mod report;
