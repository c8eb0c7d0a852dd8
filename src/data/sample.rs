//! Synthetic unit-level dataset generation.
//!
//! Produces a census-style observation table with known per-super-region
//! coefficients, plus the matching run configuration (region map included).
//! Useful for demos (`vl simulate`) and for exercising the whole pipeline
//! end to end.

use std::fs;
use std::path::{Path, PathBuf};

use rand::prelude::*;
use rand::rngs::StdRng;
use rand_distr::Normal;

use crate::domain::{EngineConfig, Observation, RegionMap};
use crate::error::EngineError;

pub const OUTCOME: &str = "vote_share";
pub const URBANITY: &str = "urbanity";
pub const UNITS_FILE: &str = "units.csv";
pub const CONFIG_FILE: &str = "run.toml";

/// Covariates and their sampling ranges (proportions).
const COVARIATES: [(&str, f64, f64); 4] = [
    ("pct_degree", 0.10, 0.60),
    ("pct_over_65", 0.10, 0.35),
    ("pct_manufacturing", 0.05, 0.25),
    ("pct_private_rent", 0.05, 0.30),
];

const URBANITY_LEVELS: [&str; 3] = ["rural", "suburban", "urban"];

/// Fine region → super-region table the generator draws from.
const REGIONS: [(&str, &str); 9] = [
    ("North East", "North"),
    ("North West", "North"),
    ("Yorkshire", "North"),
    ("East Midlands", "Midlands"),
    ("West Midlands", "Midlands"),
    ("East of England", "Midlands"),
    ("London", "South"),
    ("South East", "South"),
    ("South West", "South"),
];

/// Generator settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SampleOptions {
    pub units: usize,
    pub seed: u64,
    /// Standard deviation of the additive outcome noise.
    pub noise: f64,
}

impl Default for SampleOptions {
    fn default() -> Self {
        Self {
            units: 600,
            seed: 42,
            noise: 0.03,
        }
    }
}

/// True model of one super-region.
#[derive(Debug, Clone, PartialEq)]
pub struct SuperRegionTruth {
    pub name: String,
    pub intercept: f64,
    /// One entry per entry of `COVARIATES`; zero means no effect.
    pub coefficients: Vec<(String, f64)>,
    /// Shift for `urbanity=suburban` and `urbanity=urban` against rural.
    pub urbanity_shift: [f64; 2],
}

#[derive(Debug, Clone)]
pub struct SampleData {
    pub observations: Vec<Observation>,
    pub regions: RegionMap,
    pub truth: Vec<SuperRegionTruth>,
    pub config: EngineConfig,
}

/// Known effects per super-region. `pct_private_rent` is pure noise everywhere.
pub fn true_models() -> Vec<SuperRegionTruth> {
    let make = |name: &str, intercept: f64, coefs: [f64; 4], shift: [f64; 2]| SuperRegionTruth {
        name: name.to_string(),
        intercept,
        coefficients: COVARIATES
            .iter()
            .zip(coefs)
            .map(|((cov, _, _), b)| (cov.to_string(), b))
            .collect(),
        urbanity_shift: shift,
    };
    vec![
        make("Midlands", 0.35, [-0.40, 0.50, 0.45, 0.0], [0.01, -0.03]),
        make("North", 0.40, [-0.30, 0.30, 0.60, 0.0], [0.00, -0.04]),
        make("South", 0.30, [-0.60, 0.40, 0.10, 0.0], [0.02, -0.06]),
    ]
}

pub fn region_map() -> RegionMap {
    REGIONS
        .iter()
        .map(|(r, s)| (r.to_string(), s.to_string()))
        .collect()
}

/// Generate a dataset. The same options always give the same data.
pub fn generate_sample(opts: &SampleOptions) -> Result<SampleData, EngineError> {
    if opts.units == 0 {
        return Err(EngineError::config("unit count must be > 0"));
    }
    if !(opts.noise.is_finite() && opts.noise >= 0.0) {
        return Err(EngineError::config("noise must be a finite, non-negative number"));
    }

    let mut rng = StdRng::seed_from_u64(opts.seed);
    let normal = Normal::new(0.0, opts.noise)
        .map_err(|e| EngineError::config(format!("noise distribution error: {e}")))?;

    let regions = region_map();
    let truth = true_models();

    let mut observations = Vec::with_capacity(opts.units);
    for i in 0..opts.units {
        let (region, super_region) = REGIONS[rng.gen_range(0..REGIONS.len())];
        let model = truth
            .iter()
            .find(|t| t.name == super_region)
            .ok_or_else(|| EngineError::config(format!("no true model for '{super_region}'")))?;

        let mut obs = Observation::new(format!("U{:05}", i + 1), 0.0, region);
        let mut y = model.intercept;
        for ((name, lo, hi), (_, b)) in COVARIATES.iter().zip(&model.coefficients) {
            let v: f64 = rng.gen_range(*lo..*hi);
            y += b * v;
            obs.covariates.insert(name.to_string(), v);
        }

        let level = rng.gen_range(0..URBANITY_LEVELS.len());
        if level > 0 {
            y += model.urbanity_shift[level - 1];
        }
        obs.categories.insert(URBANITY.to_string(), URBANITY_LEVELS[level].to_string());

        y += normal.sample(&mut rng);
        obs.outcome = y.clamp(0.0, 1.0);
        observations.push(obs);
    }

    let mut config = EngineConfig::new(
        OUTCOME,
        COVARIATES.iter().map(|(name, _, _)| name.to_string()).collect(),
        regions.clone(),
    );
    config.categorical = vec![URBANITY.to_string()];

    Ok(SampleData {
        observations,
        regions,
        truth,
        config,
    })
}

/// Write `units.csv` and `run.toml` into `dir` (created if needed).
pub fn write_sample(dir: &Path, sample: &SampleData) -> Result<Vec<PathBuf>, EngineError> {
    fs::create_dir_all(dir)
        .map_err(|e| EngineError::Io(format!("failed to create '{}': {e}", dir.display())))?;

    let units = dir.join(UNITS_FILE);
    let io_err = |e: csv::Error| EngineError::Io(format!("failed to write '{}': {e}", units.display()));
    let mut writer = csv::Writer::from_path(&units).map_err(io_err)?;

    let mut header = vec![
        sample.config.unit_id.clone(),
        sample.config.outcome.clone(),
        sample.config.region.clone(),
    ];
    header.extend(sample.config.covariates.iter().cloned());
    header.extend(sample.config.categorical.iter().cloned());
    writer.write_record(&header).map_err(io_err)?;

    for obs in &sample.observations {
        let mut record = vec![obs.unit_id.clone(), format!("{:.6}", obs.outcome), obs.region.clone()];
        for name in &sample.config.covariates {
            record.push(
                obs.covariates
                    .get(name)
                    .map(|v| format!("{v:.6}"))
                    .unwrap_or_default(),
            );
        }
        for field in &sample.config.categorical {
            record.push(obs.categories.get(field).cloned().unwrap_or_default());
        }
        writer.write_record(&record).map_err(io_err)?;
    }
    writer
        .flush()
        .map_err(|e| EngineError::Io(format!("failed to flush '{}': {e}", units.display())))?;

    let config_path = dir.join(CONFIG_FILE);
    fs::write(&config_path, sample.config.to_toml_string()?)
        .map_err(|e| EngineError::Io(format!("failed to write '{}': {e}", config_path.display())))?;

    Ok(vec![units, config_path])
}
