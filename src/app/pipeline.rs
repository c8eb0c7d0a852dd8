//! Shared "fit pipeline" logic.
//!
//! Keeping this in one place avoids duplicating the core workflow:
//! ingest -> partition -> per-partition fit/bootstrap -> aggregation
//!
//! The CLI then only deals with presentation and files.

use std::path::Path;

use log::info;

use crate::control::CancelToken;
use crate::domain::{EngineConfig, Observation, PartitionRun};
use crate::error::EngineError;
use crate::io::ingest::{IngestedData, load_observations};
use crate::partition::RegionPartitioner;
use crate::report::{RunResults, aggregate};

/// All computed outputs of a single `vl fit` run.
#[derive(Debug, Clone)]
pub struct RunOutput {
    pub n_observations: usize,
    pub runs: Vec<PartitionRun>,
    pub results: RunResults,
}

/// Load the CSV at `data` and run the pipeline on it.
pub fn run_fit(
    config: &EngineConfig,
    data: &Path,
    top_n: usize,
    cancel: &CancelToken,
) -> Result<RunOutput, EngineError> {
    let IngestedData { observations, .. } = load_observations(data, config)?;
    run_fit_with_observations(config, &observations, top_n, cancel)
}

/// Run the pipeline on observations that are already in memory.
pub fn run_fit_with_observations(
    config: &EngineConfig,
    observations: &[Observation],
    top_n: usize,
    cancel: &CancelToken,
) -> Result<RunOutput, EngineError> {
    config.validate()?;

    let partitioner = RegionPartitioner::new(config, cancel.clone());
    let runs = partitioner.run(observations)?;
    let variables = partitioner.variables(observations);
    let results = aggregate(&runs, &variables, top_n);

    info!(
        "run complete: {} partitions, {} omitted",
        runs.len(),
        results.omitted_partitions().len()
    );

    Ok(RunOutput {
        n_observations: observations.len(),
        runs,
        results,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::{SampleOptions, generate_sample};
    use crate::report::STATUS_FITTED;

    fn quick(config: &mut EngineConfig) {
        config.grid.n_lambda = 20;
        config.cv.folds = 5;
        config.bootstrap.replicates = 60;
    }

    #[test]
    fn synthetic_run_end_to_end() {
        let sample = generate_sample(&SampleOptions {
            units: 450,
            ..SampleOptions::default()
        })
        .unwrap();
        let mut config = sample.config.clone();
        quick(&mut config);

        let out = run_fit_with_observations(&config, &sample.observations, 3, &CancelToken::new()).unwrap();

        let names: Vec<&str> = out.runs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Global", "Midlands", "North", "South"]);
        assert!(out.results.omitted_partitions().is_empty());
        assert!(out.results.summaries.iter().all(|s| s.status == STATUS_FITTED));

        // 4 numeric covariates + 2 urbanity indicators, for each of 4 partitions.
        assert_eq!(out.results.variables.len(), 6);
        assert!(out.results.variables.contains(&"urbanity=urban".to_string()));
        assert_eq!(out.results.coefficients.len(), 24);
        assert_eq!(out.results.residuals.len(), 450 * 2);

        let degree = out
            .results
            .coefficients
            .iter()
            .find(|r| r.partition == "Global" && r.variable == "pct_degree")
            .unwrap();
        assert!(degree.observed.unwrap() < -0.2, "{degree:?}");
        assert!(degree.upper.unwrap() < 0.0, "{degree:?}");

        let global_r2 = out.results.summaries[0].r_squared.unwrap();
        assert!(global_r2 > 0.3 && global_r2 < 1.0, "R² = {global_r2}");
    }

    #[test]
    fn invalid_config_is_rejected_before_fitting() {
        let sample = generate_sample(&SampleOptions {
            units: 20,
            ..SampleOptions::default()
        })
        .unwrap();
        let mut config = sample.config.clone();
        config.cv.folds = 1;
        let err = run_fit_with_observations(&config, &sample.observations, 3, &CancelToken::new()).unwrap_err();
        assert!(matches!(err, EngineError::Config(_)));
    }
}
