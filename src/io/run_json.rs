//! Read/write the run JSON file.
//!
//! The run file is the portable record of a run:
//! - the effective configuration (after CLI overrides)
//! - per-partition status, selected λ, CV curve and replicate counts
//! - the variable ordering and any warnings
//! - a generation timestamp

use std::fs::File;
use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::domain::{CvPoint, EngineConfig, PartitionRun, PartitionStatus};
use crate::error::EngineError;
use crate::report::{RunResults, cv_r_squared, in_sample_r_squared};

/// Per-partition section of the run file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRecord {
    pub name: String,
    pub regions: Vec<String>,
    pub n: usize,
    pub status: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub fit: Option<FitRecord>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitRecord {
    pub lambda_max: f64,
    pub selected_lambda: f64,
    pub min_error_lambda: f64,
    pub folds: usize,
    pub r_squared: Option<f64>,
    pub r_squared_in_sample: Option<f64>,
    pub intercept: f64,
    pub iterations: usize,
    pub converged: bool,
    pub lambda_floor_applied: bool,
    pub replicates_requested: usize,
    pub replicates_used: usize,
    pub skipped_not_converged: usize,
    pub skipped_numerical: usize,
    pub cv_curve: Vec<CvPoint>,
}

/// Top-level run file.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RunFile {
    pub tool: String,
    pub version: String,
    pub generated_at: DateTime<Utc>,
    pub config: EngineConfig,
    pub variables: Vec<String>,
    pub variable_order: Vec<String>,
    pub partitions: Vec<PartitionRecord>,
    pub warnings: Vec<String>,
}

fn partition_record(run: &PartitionRun) -> PartitionRecord {
    match &run.status {
        PartitionStatus::Fitted(fit) => PartitionRecord {
            name: run.name.clone(),
            regions: run.regions.clone(),
            n: run.n,
            status: "fitted".to_string(),
            reason: None,
            fit: Some(FitRecord {
                lambda_max: fit.lambda_max,
                selected_lambda: fit.model.lambda,
                min_error_lambda: fit.cv.min_error_lambda,
                folds: fit.cv.folds,
                r_squared: cv_r_squared(fit),
                r_squared_in_sample: in_sample_r_squared(fit),
                intercept: fit.model.intercept,
                iterations: fit.model.iterations,
                converged: fit.model.converged,
                lambda_floor_applied: fit.model.lambda_floor_applied,
                replicates_requested: fit.replicates_requested,
                replicates_used: fit.replicates_used,
                skipped_not_converged: fit.skipped_not_converged,
                skipped_numerical: fit.skipped_numerical,
                cv_curve: fit.cv.curve.clone(),
            }),
        },
        PartitionStatus::Omitted { reason } => PartitionRecord {
            name: run.name.clone(),
            regions: run.regions.clone(),
            n: run.n,
            status: "omitted".to_string(),
            reason: Some(reason.clone()),
            fit: None,
        },
    }
}

/// Human-readable warnings collected from the runs.
pub fn run_warnings(runs: &[PartitionRun]) -> Vec<String> {
    let mut out = Vec::new();
    for run in runs {
        match &run.status {
            PartitionStatus::Omitted { reason } => {
                out.push(format!("{}: omitted ({reason})", run.name));
            }
            PartitionStatus::Fitted(fit) => {
                if !fit.model.converged {
                    out.push(format!("{}: full-sample fit did not converge", run.name));
                }
                if fit.model.lambda_floor_applied {
                    out.push(format!("{}: λ floor applied", run.name));
                }
                if fit.reduced_replicates() {
                    out.push(format!(
                        "{}: {} of {} bootstrap replicates skipped",
                        run.name,
                        fit.replicates_requested - fit.replicates_used,
                        fit.replicates_requested
                    ));
                }
            }
        }
    }
    out
}

/// Build the run file contents.
pub fn build_run_file(config: &EngineConfig, runs: &[PartitionRun], results: &RunResults) -> RunFile {
    RunFile {
        tool: "vl".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        generated_at: Utc::now(),
        config: config.clone(),
        variables: results.variables.clone(),
        variable_order: results.variable_order.clone(),
        partitions: runs.iter().map(partition_record).collect(),
        warnings: run_warnings(runs),
    }
}

/// Write the run JSON file.
pub fn write_run_json(
    path: &Path,
    config: &EngineConfig,
    runs: &[PartitionRun],
    results: &RunResults,
) -> Result<(), EngineError> {
    let file = File::create(path)
        .map_err(|e| EngineError::Io(format!("failed to create run JSON '{}': {e}", path.display())))?;
    serde_json::to_writer_pretty(file, &build_run_file(config, runs, results))
        .map_err(|e| EngineError::Io(format!("failed to write run JSON: {e}")))?;
    Ok(())
}

/// Read a run JSON file.
pub fn read_run_json(path: &Path) -> Result<RunFile, EngineError> {
    let file = File::open(path)
        .map_err(|e| EngineError::Io(format!("failed to open run JSON '{}': {e}", path.display())))?;
    serde_json::from_reader(file).map_err(|e| EngineError::Io(format!("invalid run JSON: {e}")))
}
