//! Run configuration.
//!
//! A run is described by a TOML file (column names, covariates, the explicit
//! region → super-region table, numerical settings). CLI flags may override a
//! handful of settings afterwards; `validate` is called once both are merged.

use std::collections::{BTreeMap, BTreeSet};
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::EngineError;

pub const DEFAULT_GLOBAL_PARTITION: &str = "Global";

/// Coordinate-descent settings.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SolverOptions {
    /// Stop when the largest coefficient change in a cycle (original units) is below this.
    pub tolerance: f64,
    /// Cap on full coordinate cycles.
    pub max_iterations: usize,
    /// Positive λ used instead of 0 when the design is rank-deficient.
    pub lambda_floor: f64,
}

impl Default for SolverOptions {
    fn default() -> Self {
        Self {
            tolerance: 1e-8,
            max_iterations: 10_000,
            lambda_floor: 1e-6,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GridOptions {
    pub n_lambda: usize,
    /// Smallest λ as a fraction of `lambda_max`.
    pub min_ratio: f64,
}

impl Default for GridOptions {
    fn default() -> Self {
        Self {
            n_lambda: 50,
            min_ratio: 1e-4,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CvOptions {
    pub folds: usize,
    pub seed: u64,
}

impl Default for CvOptions {
    fn default() -> Self {
        Self { folds: 10, seed: 42 }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BootstrapOptions {
    pub replicates: usize,
    pub seed: u64,
    /// Fraction of skipped replicates above which estimates are flagged.
    pub skip_rate_threshold: f64,
    /// Two-sided interval coverage (0.95 → 2.5% / 97.5% quantiles).
    pub confidence: f64,
}

impl Default for BootstrapOptions {
    fn default() -> Self {
        Self {
            replicates: 1000,
            seed: 7,
            skip_rate_threshold: 0.01,
            confidence: 0.95,
        }
    }
}

impl BootstrapOptions {
    /// Lower and upper quantile levels for the configured coverage.
    pub fn quantile_levels(&self) -> (f64, f64) {
        let tail = (1.0 - self.confidence) / 2.0;
        (tail, 1.0 - tail)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PartitionOptions {
    pub min_samples: usize,
}

impl Default for PartitionOptions {
    fn default() -> Self {
        Self { min_samples: 30 }
    }
}

/// Explicit fine-region → super-region table.
pub type RegionMap = BTreeMap<String, String>;

/// Full run configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_unit_id")]
    pub unit_id: String,
    pub outcome: String,
    #[serde(default = "default_region")]
    pub region: String,
    pub covariates: Vec<String>,
    #[serde(default)]
    pub categorical: Vec<String>,
    #[serde(default = "default_global_partition")]
    pub global_partition: String,

    #[serde(default)]
    pub solver: SolverOptions,
    #[serde(default)]
    pub grid: GridOptions,
    #[serde(default)]
    pub cv: CvOptions,
    #[serde(default)]
    pub bootstrap: BootstrapOptions,
    #[serde(default)]
    pub partition: PartitionOptions,

    pub regions: RegionMap,
}

fn default_unit_id() -> String {
    "unit_id".to_string()
}

fn default_region() -> String {
    "region".to_string()
}

fn default_global_partition() -> String {
    DEFAULT_GLOBAL_PARTITION.to_string()
}

impl EngineConfig {
    /// Minimal config with defaults for everything but the required fields.
    pub fn new(outcome: impl Into<String>, covariates: Vec<String>, regions: RegionMap) -> Self {
        Self {
            unit_id: default_unit_id(),
            outcome: outcome.into(),
            region: default_region(),
            covariates,
            categorical: Vec::new(),
            global_partition: default_global_partition(),
            solver: SolverOptions::default(),
            grid: GridOptions::default(),
            cv: CvOptions::default(),
            bootstrap: BootstrapOptions::default(),
            partition: PartitionOptions::default(),
            regions,
        }
    }

    pub fn from_toml_str(text: &str) -> Result<Self, EngineError> {
        toml::from_str(text).map_err(|e| EngineError::config(format!("invalid run file: {e}")))
    }

    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| {
            EngineError::config(format!("failed to read run file '{}': {e}", path.display()))
        })?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String, EngineError> {
        toml::to_string_pretty(self)
            .map_err(|e| EngineError::config(format!("failed to serialize run file: {e}")))
    }

    /// Reject settings the engine cannot run with.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.covariates.is_empty() && self.categorical.is_empty() {
            return Err(EngineError::config("at least one covariate is required"));
        }

        let mut seen = BTreeSet::new();
        for name in self.covariates.iter().chain(self.categorical.iter()) {
            if !seen.insert(name.as_str()) {
                return Err(EngineError::config(format!("covariate '{name}' is listed twice")));
            }
            if name == &self.outcome || name == &self.unit_id || name == &self.region {
                return Err(EngineError::config(format!(
                    "'{name}' cannot be both a covariate and an id/outcome/region column"
                )));
            }
        }

        if self.regions.is_empty() {
            return Err(EngineError::config("the [regions] table is empty"));
        }
        if self.regions.values().any(|s| s == &self.global_partition) {
            return Err(EngineError::config(format!(
                "super-region name '{}' collides with the global partition",
                self.global_partition
            )));
        }

        let s = &self.solver;
        if !(s.tolerance.is_finite() && s.tolerance > 0.0) {
            return Err(EngineError::config("solver.tolerance must be finite and > 0"));
        }
        if s.max_iterations == 0 {
            return Err(EngineError::config("solver.max_iterations must be > 0"));
        }
        if !(s.lambda_floor.is_finite() && s.lambda_floor > 0.0) {
            return Err(EngineError::config("solver.lambda_floor must be finite and > 0"));
        }

        if self.grid.n_lambda < 2 {
            return Err(EngineError::config("grid.n_lambda must be >= 2"));
        }
        if !(self.grid.min_ratio > 0.0 && self.grid.min_ratio < 1.0) {
            return Err(EngineError::config("grid.min_ratio must lie in (0, 1)"));
        }

        if self.cv.folds < 2 {
            return Err(EngineError::config("cv.folds must be >= 2"));
        }

        let b = &self.bootstrap;
        if b.replicates == 0 {
            return Err(EngineError::config("bootstrap.replicates must be > 0"));
        }
        if !(b.confidence > 0.0 && b.confidence < 1.0) {
            return Err(EngineError::config("bootstrap.confidence must lie in (0, 1)"));
        }
        if !(b.skip_rate_threshold >= 0.0 && b.skip_rate_threshold < 1.0) {
            return Err(EngineError::config(
                "bootstrap.skip_rate_threshold must lie in [0, 1)",
            ));
        }

        if self.partition.min_samples < 2 {
            return Err(EngineError::config("partition.min_samples must be >= 2"));
        }

        Ok(())
    }
}
