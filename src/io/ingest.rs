//! CSV ingest of the observation table.
//!
//! Turns a unit-level CSV into `Observation`s that are safe to partition.
//!
//! - Strict schema: the id, outcome and region columns and every configured
//!   covariate/categorical column must exist (clear error, exit code 2).
//! - Row-level validation: bad rows are collected and reported together.
//! - Covariate cells that are empty or not numbers are left out of the
//!   observation. The design-matrix builder rejects them later, so only the
//!   partitions containing that unit fail.
//! - Header lookup is case-insensitive and tolerates a UTF-8 BOM.

use std::collections::{BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use csv::StringRecord;
use log::{debug, info};

use crate::domain::{EngineConfig, Observation};
use crate::error::EngineError;

/// How many row errors are spelled out in the error message.
const MAX_LISTED_ROW_ERRORS: usize = 10;

/// A row-level error encountered during ingest.
#[derive(Debug, Clone, PartialEq)]
pub struct RowError {
    pub line: usize,
    pub id: Option<String>,
    pub message: String,
}

/// Ingest output.
#[derive(Debug, Clone)]
pub struct IngestedData {
    pub observations: Vec<Observation>,
    pub rows_read: usize,
    /// Covariate cells left out because they were empty or not numeric.
    pub missing_cells: usize,
}

/// Load observations from a CSV file.
pub fn load_observations(path: &Path, config: &EngineConfig) -> Result<IngestedData, EngineError> {
    let file = File::open(path).map_err(|e| {
        EngineError::Io(format!("failed to open CSV '{}': {e}", path.display()))
    })?;
    let data = read_observations(file, config)?;
    info!(
        "read {} observations from {} ({} missing covariate cells)",
        data.observations.len(),
        path.display(),
        data.missing_cells
    );
    Ok(data)
}

/// Parse observations from any CSV reader.
pub fn read_observations<R: Read>(input: R, config: &EngineConfig) -> Result<IngestedData, EngineError> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .trim(csv::Trim::All)
        .from_reader(input);

    let headers = reader
        .headers()
        .map_err(|e| EngineError::data(format!("failed to read CSV headers: {e}")))?
        .clone();
    let header_map = build_header_map(&headers);
    ensure_required_columns_exist(config, &header_map)?;

    let mut observations = Vec::new();
    let mut row_errors = Vec::new();
    let mut seen_ids = BTreeSet::new();
    let mut rows_read = 0usize;
    let mut missing_cells = 0usize;

    for (idx, result) in reader.records().enumerate() {
        // Header is line 1.
        let line = idx + 2;
        rows_read += 1;

        let record = match result {
            Ok(r) => r,
            Err(e) => {
                row_errors.push(RowError {
                    line,
                    id: None,
                    message: format!("CSV parse error: {e}"),
                });
                continue;
            }
        };

        match parse_row(&record, &header_map, config) {
            Ok((obs, missing)) => {
                if !seen_ids.insert(obs.unit_id.clone()) {
                    row_errors.push(RowError {
                        line,
                        id: Some(obs.unit_id),
                        message: "duplicate unit id".to_string(),
                    });
                    continue;
                }
                if missing > 0 {
                    debug!("line {line}: unit '{}' has {missing} missing covariate(s)", obs.unit_id);
                }
                missing_cells += missing;
                observations.push(obs);
            }
            Err((id, message)) => row_errors.push(RowError { line, id, message }),
        }
    }

    if !row_errors.is_empty() {
        return Err(EngineError::data(describe_row_errors(&row_errors)));
    }
    if observations.is_empty() {
        return Err(EngineError::data("CSV contains no observations"));
    }

    Ok(IngestedData {
        observations,
        rows_read,
        missing_cells,
    })
}

fn describe_row_errors(errors: &[RowError]) -> String {
    let mut msg = format!("{} invalid row(s) in CSV:", errors.len());
    for e in errors.iter().take(MAX_LISTED_ROW_ERRORS) {
        match &e.id {
            Some(id) => msg.push_str(&format!("\n  line {} ({id}): {}", e.line, e.message)),
            None => msg.push_str(&format!("\n  line {}: {}", e.line, e.message)),
        }
    }
    if errors.len() > MAX_LISTED_ROW_ERRORS {
        msg.push_str(&format!("\n  ... and {} more", errors.len() - MAX_LISTED_ROW_ERRORS));
    }
    msg
}

fn build_header_map(headers: &StringRecord) -> HashMap<String, usize> {
    headers
        .iter()
        .enumerate()
        .map(|(idx, name)| (normalize_header_name(name), idx))
        .collect()
}

fn normalize_header_name(name: &str) -> String {
    // Spreadsheet exports often prefix the first header with a BOM.
    let name = name.trim().trim_start_matches('\u{feff}');
    name.to_ascii_lowercase()
}

fn ensure_required_columns_exist(
    config: &EngineConfig,
    header_map: &HashMap<String, usize>,
) -> Result<(), EngineError> {
    let required = [&config.unit_id, &config.outcome, &config.region]
        .into_iter()
        .chain(config.covariates.iter())
        .chain(config.categorical.iter());

    let missing: Vec<&str> = required
        .filter(|name| !header_map.contains_key(&normalize_header_name(name)))
        .map(String::as_str)
        .collect();

    if missing.is_empty() {
        Ok(())
    } else {
        Err(EngineError::data(format!(
            "missing required column(s): {}",
            missing.join(", ")
        )))
    }
}

type RowFailure = (Option<String>, String);

fn parse_row(
    record: &StringRecord,
    header_map: &HashMap<String, usize>,
    config: &EngineConfig,
) -> Result<(Observation, usize), RowFailure> {
    let unit_id = get_required(record, header_map, &config.unit_id).map_err(|e| (None, e))?;
    let with_id = |e: String| (Some(unit_id.to_string()), e);

    let outcome_raw = get_required(record, header_map, &config.outcome).map_err(with_id)?;
    let outcome = parse_f64(outcome_raw)
        .ok_or_else(|| with_id(format!("outcome '{}' is not a finite number: '{outcome_raw}'", config.outcome)))?;
    let region = get_required(record, header_map, &config.region).map_err(with_id)?;

    let mut obs = Observation::new(unit_id, outcome, region);
    let mut missing = 0usize;

    for name in &config.covariates {
        match get_optional(record, header_map, name).and_then(parse_f64) {
            Some(v) => {
                obs.covariates.insert(name.clone(), v);
            }
            None => missing += 1,
        }
    }
    for field in &config.categorical {
        if let Some(level) = get_optional(record, header_map, field) {
            obs.categories.insert(field.clone(), level.to_string());
        }
    }

    Ok((obs, missing))
}

fn get_required<'a>(
    record: &'a StringRecord,
    header_map: &HashMap<String, usize>,
    name: &str,
) -> Result<&'a str, String> {
    let idx = header_map
        .get(&normalize_header_name(name))
        .ok_or_else(|| format!("missing required column: `{name}`"))?;
    record
        .get(*idx)
        .filter(|s| !s.is_empty())
        .ok_or_else(|| format!("missing required value: `{name}`"))
}

fn get_optional<'a>(record: &'a StringRecord, header_map: &HashMap<String, usize>, name: &str) -> Option<&'a str> {
    let idx = header_map.get(&normalize_header_name(name))?;
    record.get(*idx).filter(|s| !s.is_empty())
}

fn parse_f64(s: &str) -> Option<f64> {
    let v = s.parse::<f64>().ok()?;
    if v.is_finite() { Some(v) } else { None }
}
