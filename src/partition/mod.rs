//! Region partitioning and the per-partition pipeline.
//!
//! Fine regions are merged into super-regions through the explicit region map.
//! Each super-region, plus one global partition over every observation, runs
//! an independent build → grid → cross-validation → full fit → bootstrap
//! pipeline.
//!
//! A partition that fails (too small, bad data, numerical trouble) is recorded
//! as omitted and the run carries on. Two things do abort the whole run:
//! regions missing from the map (a configuration error) and cancellation.

use std::collections::{BTreeMap, BTreeSet};

use log::{info, warn};
use rayon::prelude::*;

use crate::control::CancelToken;
use crate::design::{DesignMatrixBuilder, categorical_domains};
use crate::domain::{
    EngineConfig, Observation, Partition, PartitionFit, PartitionRun, PartitionStatus, RegionMap,
};
use crate::error::EngineError;
use crate::fit::{coefficient_estimates, cross_validate, fit_lasso, penalty_grid, prediction_intervals, run_bootstrap};
use crate::models::predict;

/// Copy `observations` with `super_region` filled in from `regions`.
///
/// Every region must be mapped; the error lists all unmapped ones.
pub fn assign_super_regions(
    observations: &[Observation],
    regions: &RegionMap,
) -> Result<Vec<Observation>, EngineError> {
    let unmapped: BTreeSet<&str> = observations
        .iter()
        .filter(|o| !regions.contains_key(&o.region))
        .map(|o| o.region.as_str())
        .collect();
    if !unmapped.is_empty() {
        let list: Vec<&str> = unmapped.into_iter().collect();
        return Err(EngineError::config(format!(
            "regions missing from the region map: {}",
            list.join(", ")
        )));
    }

    Ok(observations
        .iter()
        .map(|o| Observation {
            super_region: regions.get(&o.region).cloned(),
            ..o.clone()
        })
        .collect())
}

/// Group observations into one partition per super-region, sorted by name.
///
/// Every super-region named in `regions` gets a partition, even an empty one,
/// so a declared but unpopulated super-region is reported rather than lost.
/// Observations keep their input order within a partition.
pub fn partition_observations(
    observations: &[Observation],
    regions: &RegionMap,
) -> Result<Vec<Partition>, EngineError> {
    let assigned = assign_super_regions(observations, regions)?;

    let mut groups: BTreeMap<&str, Partition> = BTreeMap::new();
    for (region, super_region) in regions {
        groups
            .entry(super_region.as_str())
            .or_insert_with(|| Partition {
                name: super_region.clone(),
                regions: Vec::new(),
                observations: Vec::new(),
            })
            .regions
            .push(region.clone());
    }

    for obs in assigned {
        let key = obs.super_region.clone().unwrap_or_default();
        if let Some(group) = groups.get_mut(key.as_str()) {
            group.observations.push(obs);
        }
    }

    Ok(groups.into_values().collect())
}

/// The unpartitioned partition: every observation, every region.
pub fn global_partition(name: &str, observations: &[Observation]) -> Partition {
    let regions: BTreeSet<&str> = observations.iter().map(|o| o.region.as_str()).collect();
    Partition {
        name: name.to_string(),
        regions: regions.into_iter().map(str::to_string).collect(),
        observations: observations.to_vec(),
    }
}

/// `PartitionSize` error when `partition` is below `min_samples`.
pub fn check_size(partition: &Partition, min_samples: usize) -> Result<(), EngineError> {
    if partition.len() < min_samples {
        return Err(EngineError::PartitionSize {
            partition: partition.name.clone(),
            n: partition.len(),
            min: min_samples,
        });
    }
    Ok(())
}

/// Run the full pipeline for one partition.
pub fn fit_partition(
    partition: &Partition,
    builder: &DesignMatrixBuilder,
    config: &EngineConfig,
    cancel: &CancelToken,
) -> Result<PartitionFit, EngineError> {
    check_size(partition, config.partition.min_samples)?;
    cancel.check()?;

    let design = builder.build(&partition.observations)?;
    let grid = penalty_grid(&design, &config.grid)?;
    let cv = cross_validate(&design, &grid, config.cv.folds, config.cv.seed, &config.solver)?;
    cancel.check()?;

    let model = fit_lasso(&design, cv.selected_lambda, &config.solver)?;
    if !model.converged {
        warn!(
            "{}: full-sample fit did not converge in {} cycles at λ={:.3e}",
            partition.name, model.iterations, model.lambda
        );
    }
    if model.lambda_floor_applied {
        warn!(
            "{}: rank-deficient design, λ raised to the floor {:e}",
            partition.name, model.lambda
        );
    }

    let dist = run_bootstrap(&design, model.lambda, &config.bootstrap, &config.solver, cancel)?;
    if dist.skip_rate() > config.bootstrap.skip_rate_threshold {
        warn!(
            "{}: skipped {} of {} bootstrap replicates ({:.1}%), intervals use a reduced replicate count",
            partition.name,
            dist.skipped(),
            dist.requested,
            100.0 * dist.skip_rate()
        );
    }

    let estimates = coefficient_estimates(&partition.name, &model, &dist, &config.bootstrap);
    let intervals = prediction_intervals(&dist, &config.bootstrap);
    let fitted = predict(&model, &design);

    info!(
        "{}: n={}, λ={:.3e}, {} of {} variables kept, {} replicates",
        partition.name,
        design.n_rows(),
        model.lambda,
        model.coefficients.len() - model.n_zero(),
        model.coefficients.len(),
        dist.used()
    );

    Ok(PartitionFit {
        lambda_max: grid.lambda_max,
        unit_ids: design.unit_ids().to_vec(),
        observed: design.y().iter().copied().collect(),
        fitted,
        estimates,
        intervals,
        replicates_requested: dist.requested,
        replicates_used: dist.used(),
        skipped_not_converged: dist.skipped_not_converged,
        skipped_numerical: dist.skipped_numerical,
        cv,
        model,
    })
}

/// Drives every partition's pipeline for one run.
#[derive(Debug, Clone)]
pub struct RegionPartitioner<'a> {
    config: &'a EngineConfig,
    cancel: CancelToken,
}

impl<'a> RegionPartitioner<'a> {
    pub fn new(config: &'a EngineConfig, cancel: CancelToken) -> Self {
        Self { config, cancel }
    }

    /// Global partition first, then super-regions by name.
    pub fn partitions(&self, observations: &[Observation]) -> Result<Vec<Partition>, EngineError> {
        let mut out = vec![global_partition(&self.config.global_partition, observations)];
        out.extend(partition_observations(observations, &self.config.regions)?);
        Ok(out)
    }

    /// Full variable list every partition reports on.
    ///
    /// Falls back to the numeric covariates when the categorical domains
    /// cannot be built (every partition is then omitted anyway).
    pub fn variables(&self, observations: &[Observation]) -> Vec<String> {
        categorical_domains(observations, &self.config.categorical)
            .map(|domains| DesignMatrixBuilder::new(self.config.covariates.clone(), domains).variables())
            .unwrap_or_else(|_| self.config.covariates.clone())
    }

    /// Fit every partition. Results come back in `partitions` order.
    pub fn run(&self, observations: &[Observation]) -> Result<Vec<PartitionRun>, EngineError> {
        let partitions = self.partitions(observations)?;

        // Indicator columns are fixed once so every partition shares them.
        let builder = categorical_domains(observations, &self.config.categorical)
            .map(|domains| DesignMatrixBuilder::new(self.config.covariates.clone(), domains));

        let results: Vec<Result<PartitionFit, EngineError>> = partitions
            .par_iter()
            .map(|partition| {
                info!("{}: fitting {} observations", partition.name, partition.len());
                let builder = builder.as_ref().map_err(Clone::clone)?;
                fit_partition(partition, builder, self.config, &self.cancel)
            })
            .collect();

        if results.iter().any(|r| matches!(r, Err(EngineError::Cancelled))) {
            return Err(EngineError::Cancelled);
        }

        Ok(partitions
            .into_iter()
            .zip(results)
            .map(|(partition, result)| {
                let status = match result {
                    Ok(fit) => PartitionStatus::Fitted(Box::new(fit)),
                    Err(err) => {
                        warn!("{}: omitted ({err})", partition.name);
                        PartitionStatus::Omitted {
                            reason: err.to_string(),
                        }
                    }
                };
                PartitionRun {
                    n: partition.len(),
                    name: partition.name,
                    regions: partition.regions,
                    status,
                }
            })
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};

    fn region_map(pairs: &[(&str, &str)]) -> RegionMap {
        pairs
            .iter()
            .map(|(r, s)| (r.to_string(), s.to_string()))
            .collect()
    }

    fn synthetic(counts: &[(&str, usize)], seed: u64) -> Vec<Observation> {
        let mut rng = StdRng::seed_from_u64(seed);
        let mut out = Vec::new();
        for (region, count) in counts {
            for i in 0..*count {
                let x1: f64 = rng.gen_range(0.0..1.0);
                let x2: f64 = rng.gen_range(0.0..1.0);
                let noise: f64 = rng.gen_range(-0.02..0.02);
                out.push(
                    Observation::new(format!("{region}-{i}"), 0.4 + 0.3 * x1 - 0.2 * x2 + noise, *region)
                        .with_covariate("x1", x1)
                        .with_covariate("x2", x2),
                );
            }
        }
        out
    }

    fn quick_config(regions: RegionMap) -> EngineConfig {
        let mut config = EngineConfig::new("vote_share", vec!["x1".into(), "x2".into()], regions);
        config.grid.n_lambda = 15;
        config.cv.folds = 5;
        config.bootstrap.replicates = 40;
        config.partition.min_samples = 30;
        config
    }

    #[test]
    fn unmapped_region_is_a_config_error() {
        let obs = synthetic(&[("r1", 3), ("r9", 2)], 1);
        let err = assign_super_regions(&obs, &region_map(&[("r1", "North")])).unwrap_err();
        assert!(matches!(err, EngineError::Config(ref m) if m.contains("r9")));
    }

    #[test]
    fn declared_empty_super_region_still_gets_a_partition() {
        let obs = synthetic(&[("r1", 4)], 2);
        let parts = partition_observations(&obs, &region_map(&[("r1", "North"), ("r2", "South")])).unwrap();
        assert_eq!(parts.len(), 2);
        assert_eq!(parts[1].name, "South");
        assert!(parts[1].is_empty());
        assert_eq!(parts[0].regions, vec!["r1".to_string()]);
    }

    #[test]
    fn regions_merge_into_super_regions() {
        let obs = synthetic(&[("r1", 5), ("r2", 7), ("r3", 2)], 3);
        let map = region_map(&[("r1", "North"), ("r2", "North"), ("r3", "South")]);
        let parts = partition_observations(&obs, &map).unwrap();
        assert_eq!(parts[0].name, "North");
        assert_eq!(parts[0].len(), 12);
        assert_eq!(parts[0].regions, vec!["r1".to_string(), "r2".to_string()]);
        assert!(parts[0].observations.iter().all(|o| o.super_region.as_deref() == Some("North")));
        assert_eq!(parts[1].len(), 2);
    }

    #[test]
    fn undersized_partition_is_omitted_and_the_rest_still_fit() {
        let obs = synthetic(&[("r1", 30), ("r2", 30), ("r3", 5)], 4);
        let map = region_map(&[("r1", "North"), ("r2", "North"), ("r3", "Islands")]);
        let config = quick_config(map);
        let runs = RegionPartitioner::new(&config, CancelToken::new()).run(&obs).unwrap();

        let names: Vec<&str> = runs.iter().map(|r| r.name.as_str()).collect();
        assert_eq!(names, vec!["Global", "Islands", "North"]);

        let islands = &runs[1];
        assert_eq!(islands.n, 5);
        match &islands.status {
            PartitionStatus::Omitted { reason } => {
                assert!(reason.contains("Islands") && reason.contains("minimum of 30"), "{reason}");
            }
            other => panic!("expected omitted, got {other:?}"),
        }

        let global = runs[0].fit().unwrap();
        assert_eq!(global.unit_ids.len(), 65);
        assert_eq!(global.estimates.len(), 2);
        assert_eq!(global.intervals.len(), 65);
        assert!(runs[2].fit().is_some());
    }

    #[test]
    fn missing_covariate_omits_only_its_partitions() {
        let mut obs = synthetic(&[("r1", 35), ("r2", 35)], 5);
        obs[0].covariates.remove("x2");
        let config = quick_config(region_map(&[("r1", "North"), ("r2", "South")]));
        let runs = RegionPartitioner::new(&config, CancelToken::new()).run(&obs).unwrap();

        assert!(runs[0].is_omitted());
        assert!(runs[1].is_omitted());
        assert!(runs[2].fit().is_some());
    }

    #[test]
    fn constant_outcome_partition_is_omitted_as_a_data_error() {
        let mut obs = synthetic(&[("r1", 35), ("r2", 35)], 7);
        for o in obs.iter_mut().filter(|o| o.region == "r2") {
            o.outcome = 0.5;
        }
        let config = quick_config(region_map(&[("r1", "North"), ("r2", "South")]));
        let runs = RegionPartitioner::new(&config, CancelToken::new()).run(&obs).unwrap();

        assert!(runs[0].fit().is_some());
        assert!(runs[1].fit().is_some());
        match &runs[2].status {
            PartitionStatus::Omitted { reason } => {
                assert!(reason.starts_with("data error") && reason.contains("constant"), "{reason}");
            }
            other => panic!("expected omitted, got {other:?}"),
        }
    }

    #[test]
    fn cancelled_run_returns_cancelled() {
        let obs = synthetic(&[("r1", 35)], 6);
        let config = quick_config(region_map(&[("r1", "North")]));
        let cancel = CancelToken::new();
        cancel.cancel();
        let err = RegionPartitioner::new(&config, cancel).run(&obs).unwrap_err();
        assert_eq!(err, EngineError::Cancelled);
    }

    proptest! {
        #[test]
        fn super_region_partitions_are_exhaustive_and_disjoint(
            labels in prop::collection::vec(0usize..6, 0..80),
            targets in prop::collection::vec(0usize..3, 6),
        ) {
            let regions: RegionMap = (0..6)
                .map(|r| (format!("r{r}"), format!("S{}", targets[r])))
                .collect();
            let obs: Vec<Observation> = labels
                .iter()
                .enumerate()
                .map(|(i, r)| Observation::new(format!("u{i}"), 0.5, format!("r{r}")))
                .collect();

            let parts = partition_observations(&obs, &regions).unwrap();

            let mut seen = BTreeSet::new();
            for part in &parts {
                for o in &part.observations {
                    prop_assert!(seen.insert(o.unit_id.clone()), "{} in two partitions", o.unit_id);
                    prop_assert_eq!(&regions[&o.region], &part.name);
                }
            }
            prop_assert_eq!(seen.len(), obs.len());
        }
    }
}
