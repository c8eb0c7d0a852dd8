//! Result aggregation: coefficient tables, fit summaries, residuals and rankings.
//!
//! Everything here reads the per-partition results and produces new
//! rectangular tables; nothing is written back into the runs.

pub mod format;

pub use format::*;

use serde::{Deserialize, Serialize};

use crate::domain::{CoefficientEstimate, PartitionFit, PartitionRun, PartitionStatus};
use crate::math::population_variance;

pub const STATUS_FITTED: &str = "fitted";
pub const STATUS_OMITTED: &str = "omitted";

/// One (partition, variable) row of the coefficient table.
///
/// Omitted partitions still get a row per variable, with empty estimates.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientRow {
    pub partition: String,
    pub variable: String,
    pub status: String,
    pub observed: Option<f64>,
    pub lower: Option<f64>,
    pub upper: Option<f64>,
    pub sign: Option<String>,
    pub uncertainty: Option<f64>,
    pub converged: Option<bool>,
    pub reduced_replicates: Option<bool>,
}

impl CoefficientRow {
    fn from_estimate(e: &CoefficientEstimate) -> Self {
        Self {
            partition: e.partition.clone(),
            variable: e.variable.clone(),
            status: STATUS_FITTED.to_string(),
            observed: Some(e.observed),
            lower: Some(e.lower),
            upper: Some(e.upper),
            sign: Some(e.sign.label().to_string()),
            uncertainty: Some(e.uncertainty),
            converged: Some(e.converged),
            reduced_replicates: Some(e.reduced_replicates),
        }
    }

    fn dropped(partition: &str, variable: &str, fit: &PartitionFit) -> Self {
        Self {
            partition: partition.to_string(),
            variable: variable.to_string(),
            status: STATUS_FITTED.to_string(),
            observed: Some(0.0),
            lower: Some(0.0),
            upper: Some(0.0),
            sign: Some("zero".to_string()),
            uncertainty: Some(0.0),
            converged: Some(fit.model.converged),
            reduced_replicates: Some(fit.reduced_replicates()),
        }
    }

    fn omitted(partition: &str, variable: &str) -> Self {
        Self {
            partition: partition.to_string(),
            variable: variable.to_string(),
            status: STATUS_OMITTED.to_string(),
            observed: None,
            lower: None,
            upper: None,
            sign: None,
            uncertainty: None,
            converged: None,
            reduced_replicates: None,
        }
    }

    pub fn excludes_zero(&self) -> bool {
        matches!((self.lower, self.upper), (Some(lo), Some(hi)) if lo > 0.0 || hi < 0.0)
    }
}

/// Per-partition fit summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FitSummaryRow {
    pub partition: String,
    pub status: String,
    pub n: usize,
    /// Cross-validated: `1 - CV MSE(λ*) / Var(y)`.
    pub r_squared: Option<f64>,
    pub r_squared_in_sample: Option<f64>,
    pub selected_lambda: Option<f64>,
    pub min_error_lambda: Option<f64>,
    pub lambda_max: Option<f64>,
    pub cv_mse: Option<f64>,
    pub nonzero: Option<usize>,
    pub replicates_requested: Option<usize>,
    pub replicates_used: Option<usize>,
    pub converged: Option<bool>,
    pub reduced_replicates: Option<bool>,
    /// Omission reason or warnings, `;`-separated.
    pub note: String,
}

/// Observed minus full-sample fitted value, with the bootstrap prediction interval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResidualRow {
    pub unit_id: String,
    pub partition: String,
    pub observed: f64,
    pub fitted: f64,
    pub residual: f64,
    pub prediction_lower: f64,
    pub prediction_upper: f64,
}

/// Largest positive and negative residuals of one partition.
#[derive(Debug, Clone, PartialEq)]
pub struct Rankings {
    pub partition: String,
    /// Outcome above the model, largest residual first.
    pub over: Vec<ResidualRow>,
    /// Outcome below the model, most negative residual first.
    pub under: Vec<ResidualRow>,
}

/// Aggregated output of a run.
#[derive(Debug, Clone, PartialEq)]
pub struct RunResults {
    /// Full variable list every partition reports on, in design order.
    pub variables: Vec<String>,
    /// Variables by decreasing mean |observed coefficient| over fitted partitions.
    pub variable_order: Vec<String>,
    pub coefficients: Vec<CoefficientRow>,
    pub summaries: Vec<FitSummaryRow>,
    pub residuals: Vec<ResidualRow>,
    pub rankings: Vec<Rankings>,
}

impl RunResults {
    pub fn omitted_partitions(&self) -> Vec<&str> {
        self.summaries
            .iter()
            .filter(|s| s.status == STATUS_OMITTED)
            .map(|s| s.partition.as_str())
            .collect()
    }
}

/// Cross-validated R²; `None` for a constant outcome.
pub fn cv_r_squared(fit: &PartitionFit) -> Option<f64> {
    let var = population_variance(&fit.observed)?;
    (var > 0.0).then(|| 1.0 - fit.cv.selected_mse / var)
}

/// In-sample R² of the full-sample fit.
pub fn in_sample_r_squared(fit: &PartitionFit) -> Option<f64> {
    let var = population_variance(&fit.observed)?;
    if var <= 0.0 {
        return None;
    }
    let sse: f64 = fit
        .observed
        .iter()
        .zip(&fit.fitted)
        .map(|(y, f)| (y - f) * (y - f))
        .sum();
    Some(1.0 - sse / (var * fit.observed.len() as f64))
}

/// Residual rows for one fitted partition.
pub fn compute_residuals(partition: &str, fit: &PartitionFit) -> Vec<ResidualRow> {
    fit.unit_ids
        .iter()
        .enumerate()
        .map(|(i, unit_id)| ResidualRow {
            unit_id: unit_id.clone(),
            partition: partition.to_string(),
            observed: fit.observed[i],
            fitted: fit.fitted[i],
            residual: fit.observed[i] - fit.fitted[i],
            prediction_lower: fit.intervals[i].lower,
            prediction_upper: fit.intervals[i].upper,
        })
        .collect()
}

/// Top-N over- and under-performers by residual.
pub fn rank_residuals(partition: &str, residuals: &[ResidualRow], top_n: usize) -> Rankings {
    let mut sorted: Vec<&ResidualRow> = residuals.iter().collect();
    sorted.sort_by(|a, b| b.residual.total_cmp(&a.residual));

    let over = sorted
        .iter()
        .filter(|r| r.residual > 0.0)
        .take(top_n)
        .map(|r| (*r).clone())
        .collect();
    let under = sorted
        .iter()
        .rev()
        .filter(|r| r.residual < 0.0)
        .take(top_n)
        .map(|r| (*r).clone())
        .collect();

    Rankings {
        partition: partition.to_string(),
        over,
        under,
    }
}

/// Order variables by mean absolute observed coefficient, largest first.
///
/// Ties keep design order.
pub fn order_variables(variables: &[String], rows: &[CoefficientRow]) -> Vec<String> {
    let mut scored: Vec<(usize, f64)> = variables
        .iter()
        .enumerate()
        .map(|(j, v)| {
            let mags: Vec<f64> = rows
                .iter()
                .filter(|r| &r.variable == v)
                .filter_map(|r| r.observed.map(f64::abs))
                .collect();
            let score = if mags.is_empty() {
                0.0
            } else {
                mags.iter().sum::<f64>() / mags.len() as f64
            };
            (j, score)
        })
        .collect();
    scored.sort_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)));
    scored.into_iter().map(|(j, _)| variables[j].clone()).collect()
}

fn summary_note(fit: &PartitionFit) -> String {
    let mut notes = Vec::new();
    if !fit.model.converged {
        notes.push("full fit did not converge".to_string());
    }
    if fit.model.lambda_floor_applied {
        notes.push(format!("λ floor {:e} applied", fit.model.lambda));
    }
    if fit.reduced_replicates() {
        notes.push(format!(
            "reduced replicates ({} of {})",
            fit.replicates_used, fit.replicates_requested
        ));
    }
    notes.join("; ")
}

/// Merge every partition's results into the output tables.
///
/// `variables` is the full variable list; each partition gets exactly one
/// coefficient row per entry, in that order.
pub fn aggregate(runs: &[PartitionRun], variables: &[String], top_n: usize) -> RunResults {
    let mut coefficients = Vec::with_capacity(runs.len() * variables.len());
    let mut summaries = Vec::with_capacity(runs.len());
    let mut residuals = Vec::new();
    let mut rankings = Vec::new();

    for run in runs {
        match &run.status {
            PartitionStatus::Fitted(fit) => {
                for variable in variables {
                    let row = fit
                        .estimates
                        .iter()
                        .find(|e| &e.variable == variable)
                        .map(CoefficientRow::from_estimate)
                        .unwrap_or_else(|| CoefficientRow::dropped(&run.name, variable, fit));
                    coefficients.push(row);
                }

                summaries.push(FitSummaryRow {
                    partition: run.name.clone(),
                    status: STATUS_FITTED.to_string(),
                    n: run.n,
                    r_squared: cv_r_squared(fit),
                    r_squared_in_sample: in_sample_r_squared(fit),
                    selected_lambda: Some(fit.model.lambda),
                    min_error_lambda: Some(fit.cv.min_error_lambda),
                    lambda_max: Some(fit.lambda_max),
                    cv_mse: Some(fit.cv.selected_mse),
                    nonzero: Some(fit.model.coefficients.len() - fit.model.n_zero()),
                    replicates_requested: Some(fit.replicates_requested),
                    replicates_used: Some(fit.replicates_used),
                    converged: Some(fit.model.converged),
                    reduced_replicates: Some(fit.reduced_replicates()),
                    note: summary_note(fit),
                });

                let rows = compute_residuals(&run.name, fit);
                rankings.push(rank_residuals(&run.name, &rows, top_n));
                residuals.extend(rows);
            }
            PartitionStatus::Omitted { reason } => {
                coefficients.extend(variables.iter().map(|v| CoefficientRow::omitted(&run.name, v)));
                summaries.push(FitSummaryRow {
                    partition: run.name.clone(),
                    status: STATUS_OMITTED.to_string(),
                    n: run.n,
                    r_squared: None,
                    r_squared_in_sample: None,
                    selected_lambda: None,
                    min_error_lambda: None,
                    lambda_max: None,
                    cv_mse: None,
                    nonzero: None,
                    replicates_requested: None,
                    replicates_used: None,
                    converged: None,
                    reduced_replicates: None,
                    note: reason.clone(),
                });
            }
        }
    }

    let variable_order = order_variables(variables, &coefficients);
    RunResults {
        variables: variables.to_vec(),
        variable_order,
        coefficients,
        summaries,
        residuals,
        rankings,
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::domain::{CvPoint, CvResult, Model, PredictionInterval, SignClass};
    use approx::assert_abs_diff_eq;
    use std::collections::BTreeSet;

    /// Small hand-built fit: y = [1, 2, 3, 6], fitted = [1.5, 2, 3, 5.5].
    pub(crate) fn sample_fit(name: &str, coefs: &[(&str, f64)]) -> PartitionFit {
        let estimates = coefs
            .iter()
            .map(|(v, b)| CoefficientEstimate {
                partition: name.to_string(),
                variable: v.to_string(),
                observed: *b,
                lower: b - 0.1,
                upper: b + 0.1,
                sign: SignClass::of(*b),
                uncertainty: 0.2,
                converged: true,
                reduced_replicates: false,
            })
            .collect();
        PartitionFit {
            lambda_max: 1.0,
            cv: CvResult {
                selected_lambda: 0.1,
                min_error_lambda: 0.05,
                selected_mse: 0.5,
                folds: 4,
                curve: vec![CvPoint {
                    lambda: 0.1,
                    mean_mse: 0.5,
                    std_error: 0.1,
                }],
            },
            model: Model {
                variables: coefs.iter().map(|(v, _)| v.to_string()).collect(),
                coefficients: coefs.iter().map(|(_, b)| *b).collect(),
                intercept: 0.0,
                lambda: 0.1,
                requested_lambda: 0.1,
                residuals: vec![-0.5, 0.0, 0.0, 0.5],
                iterations: 3,
                converged: true,
                lambda_floor_applied: false,
            },
            unit_ids: vec!["a".into(), "b".into(), "c".into(), "d".into()],
            observed: vec![1.0, 2.0, 3.0, 6.0],
            fitted: vec![1.5, 2.0, 3.0, 5.5],
            estimates,
            intervals: vec![PredictionInterval { lower: 1.0, upper: 2.0 }; 4],
            replicates_requested: 100,
            replicates_used: 100,
            skipped_not_converged: 0,
            skipped_numerical: 0,
        }
    }

    fn vars(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn r_squared_cv_and_in_sample() {
        let fit = sample_fit("P", &[("x1", 0.4)]);
        // Var(y) = 3.5; CV MSE 0.5; SSE 0.5.
        assert_abs_diff_eq!(cv_r_squared(&fit).unwrap(), 1.0 - 0.5 / 3.5, epsilon = 1e-12);
        assert_abs_diff_eq!(in_sample_r_squared(&fit).unwrap(), 1.0 - 0.5 / 14.0, epsilon = 1e-12);
    }

    #[test]
    fn every_partition_reports_the_same_variable_set() {
        let runs = vec![
            PartitionRun {
                name: "Global".into(),
                regions: vec![],
                n: 4,
                status: PartitionStatus::Fitted(Box::new(sample_fit("Global", &[("x1", 0.4), ("x2", -0.2)]))),
            },
            // A partition whose estimates are missing x2 entirely.
            PartitionRun {
                name: "North".into(),
                regions: vec![],
                n: 4,
                status: PartitionStatus::Fitted(Box::new(sample_fit("North", &[("x1", 0.3)]))),
            },
        ];
        let results = aggregate(&runs, &vars(&["x1", "x2"]), 5);

        for partition in ["Global", "North"] {
            let set: BTreeSet<&str> = results
                .coefficients
                .iter()
                .filter(|r| r.partition == partition)
                .map(|r| r.variable.as_str())
                .collect();
            assert_eq!(set, BTreeSet::from(["x1", "x2"]));
        }
        let filled = results
            .coefficients
            .iter()
            .find(|r| r.partition == "North" && r.variable == "x2")
            .unwrap();
        assert_eq!(filled.observed, Some(0.0));
        assert_eq!(filled.uncertainty, Some(0.0));
        assert_eq!(filled.sign.as_deref(), Some("zero"));
    }

    #[test]
    fn omitted_partition_is_explicit() {
        let runs = vec![
            PartitionRun {
                name: "Global".into(),
                regions: vec![],
                n: 4,
                status: PartitionStatus::Fitted(Box::new(sample_fit("Global", &[("x1", 0.4), ("x2", -0.2)]))),
            },
            PartitionRun {
                name: "Islands".into(),
                regions: vec!["r3".into()],
                n: 5,
                status: PartitionStatus::Omitted {
                    reason: "partition 'Islands' has 5 observations, below the minimum of 30".into(),
                },
            },
        ];
        let results = aggregate(&runs, &vars(&["x1", "x2"]), 5);

        let omitted: Vec<&CoefficientRow> = results
            .coefficients
            .iter()
            .filter(|r| r.partition == "Islands")
            .collect();
        assert_eq!(omitted.len(), 2);
        assert!(omitted.iter().all(|r| r.status == STATUS_OMITTED && r.observed.is_none()));
        assert_eq!(results.omitted_partitions(), vec!["Islands"]);
        assert!(results.summaries[1].note.contains("minimum of 30"));
        assert!(results.residuals.iter().all(|r| r.partition == "Global"));
    }

    #[test]
    fn residuals_and_rankings() {
        let fit = sample_fit("P", &[("x1", 0.4)]);
        let rows = compute_residuals("P", &fit);
        assert_eq!(rows.len(), 4);
        assert_abs_diff_eq!(rows[0].residual, -0.5);
        assert_abs_diff_eq!(rows[3].residual, 0.5);

        let ranked = rank_residuals("P", &rows, 1);
        assert_eq!(ranked.over.len(), 1);
        assert_eq!(ranked.over[0].unit_id, "d");
        assert_eq!(ranked.under[0].unit_id, "a");
    }

    #[test]
    fn variable_order_by_mean_absolute_coefficient() {
        let runs = vec![
            PartitionRun {
                name: "A".into(),
                regions: vec![],
                n: 4,
                status: PartitionStatus::Fitted(Box::new(sample_fit(
                    "A",
                    &[("x1", 0.1), ("x2", -0.6), ("x3", 0.0)],
                ))),
            },
            PartitionRun {
                name: "B".into(),
                regions: vec![],
                n: 4,
                status: PartitionStatus::Fitted(Box::new(sample_fit(
                    "B",
                    &[("x1", 0.3), ("x2", 0.2), ("x3", 0.0)],
                ))),
            },
        ];
        let results = aggregate(&runs, &vars(&["x1", "x2", "x3"]), 5);
        assert_eq!(results.variable_order, vars(&["x2", "x1", "x3"]));
        // Coefficient rows keep design order.
        assert_eq!(results.coefficients[0].variable, "x1");
    }
}
