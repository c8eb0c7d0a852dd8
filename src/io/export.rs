//! Export result tables to CSV.
//!
//! The three tables are meant to be easy to consume in spreadsheets or by a
//! charting script: one row per record, empty cells for values an omitted
//! partition does not have.

use std::fs::{self, File};
use std::path::{Path, PathBuf};

use serde::Serialize;

use crate::domain::{EngineConfig, PartitionRun};
use crate::error::EngineError;
use crate::io::run_json::write_run_json;
use crate::report::RunResults;

pub const COEFFICIENTS_FILE: &str = "coefficients.csv";
pub const FIT_SUMMARY_FILE: &str = "fit_summary.csv";
pub const RESIDUALS_FILE: &str = "residuals.csv";
pub const RUN_FILE: &str = "run.json";

/// Write serializable rows to a CSV file (header from the field names).
pub fn write_csv<T: Serialize>(path: &Path, rows: &[T]) -> Result<(), EngineError> {
    let file = File::create(path)
        .map_err(|e| EngineError::Io(format!("failed to create '{}': {e}", path.display())))?;
    let mut writer = csv::Writer::from_writer(file);
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| EngineError::Io(format!("failed to write '{}': {e}", path.display())))?;
    }
    writer
        .flush()
        .map_err(|e| EngineError::Io(format!("failed to flush '{}': {e}", path.display())))?;
    Ok(())
}

/// Write every output artifact into `dir` (created if needed).
///
/// Returns the written paths in a stable order.
pub fn write_outputs(
    dir: &Path,
    config: &EngineConfig,
    runs: &[PartitionRun],
    results: &RunResults,
) -> Result<Vec<PathBuf>, EngineError> {
    fs::create_dir_all(dir)
        .map_err(|e| EngineError::Io(format!("failed to create '{}': {e}", dir.display())))?;

    let coefficients = dir.join(COEFFICIENTS_FILE);
    write_csv(&coefficients, &results.coefficients)?;

    let summary = dir.join(FIT_SUMMARY_FILE);
    write_csv(&summary, &results.summaries)?;

    let residuals = dir.join(RESIDUALS_FILE);
    write_csv(&residuals, &results.residuals)?;

    let run = dir.join(RUN_FILE);
    write_run_json(&run, config, runs, results)?;

    Ok(vec![coefficients, summary, residuals, run])
}
