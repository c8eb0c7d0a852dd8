//! Shared domain types.
//!
//! These types are kept lightweight and serializable so they can be:
//!
//! - passed between pipeline stages by value (no stage mutates another's data)
//! - exported to CSV/JSON for the charting side

use std::collections::BTreeMap;

use nalgebra::{DMatrix, DVector};
use serde::{Deserialize, Serialize};

/// A single spatial unit as read from the input table.
///
/// Covariates that were missing or non-numeric in the source are simply absent
/// from `covariates`; the design-matrix builder turns that into a hard error.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Observation {
    pub unit_id: String,
    pub outcome: f64,
    pub covariates: BTreeMap<String, f64>,
    /// Raw categorical fields (expanded into indicators by the builder).
    pub categories: BTreeMap<String, String>,
    pub region: String,
    /// Derived from `region` through the region map; `None` until assigned.
    pub super_region: Option<String>,
}

impl Observation {
    pub fn new(unit_id: impl Into<String>, outcome: f64, region: impl Into<String>) -> Self {
        Self {
            unit_id: unit_id.into(),
            outcome,
            covariates: BTreeMap::new(),
            categories: BTreeMap::new(),
            region: region.into(),
            super_region: None,
        }
    }

    pub fn with_covariate(mut self, name: impl Into<String>, value: f64) -> Self {
        self.covariates.insert(name.into(), value);
        self
    }

    pub fn with_category(mut self, field: impl Into<String>, level: impl Into<String>) -> Self {
        self.categories.insert(field.into(), level.into());
        self
    }
}

/// Outcome vector plus covariate matrix with a fixed column order.
///
/// Immutable once built: row subsets (folds, bootstrap resamples) produce new
/// matrices rather than views into this one.
#[derive(Debug, Clone)]
pub struct DesignMatrix {
    unit_ids: Vec<String>,
    variables: Vec<String>,
    x: DMatrix<f64>,
    y: DVector<f64>,
}

impl DesignMatrix {
    /// Assemble a design matrix from already-validated parts.
    ///
    /// # Panics
    /// Panics if the dimensions of `x`, `y`, `unit_ids`, and `variables` disagree.
    pub fn from_parts(
        unit_ids: Vec<String>,
        variables: Vec<String>,
        x: DMatrix<f64>,
        y: DVector<f64>,
    ) -> Self {
        assert_eq!(x.nrows(), y.len(), "row count mismatch between X and y");
        assert_eq!(x.nrows(), unit_ids.len(), "row count mismatch between X and ids");
        assert_eq!(x.ncols(), variables.len(), "column count mismatch between X and names");
        Self {
            unit_ids,
            variables,
            x,
            y,
        }
    }

    pub fn n_rows(&self) -> usize {
        self.x.nrows()
    }

    pub fn n_cols(&self) -> usize {
        self.x.ncols()
    }

    pub fn variables(&self) -> &[String] {
        &self.variables
    }

    pub fn unit_ids(&self) -> &[String] {
        &self.unit_ids
    }

    pub fn x(&self) -> &DMatrix<f64> {
        &self.x
    }

    pub fn y(&self) -> &DVector<f64> {
        &self.y
    }

    /// New design matrix made of the given rows (repeats allowed).
    pub fn select_rows(&self, rows: &[usize]) -> DesignMatrix {
        let p = self.n_cols();
        let x = DMatrix::from_fn(rows.len(), p, |i, j| self.x[(rows[i], j)]);
        let y = DVector::from_iterator(rows.len(), rows.iter().map(|&r| self.y[r]));
        let unit_ids = rows.iter().map(|&r| self.unit_ids[r].clone()).collect();
        DesignMatrix {
            unit_ids,
            variables: self.variables.clone(),
            x,
            y,
        }
    }
}

/// Descending sequence of penalty values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PenaltyGrid {
    /// Smallest λ at which every coefficient is zero.
    pub lambda_max: f64,
    /// Values ordered from `lambda_max` downwards.
    pub lambdas: Vec<f64>,
}

impl PenaltyGrid {
    pub fn len(&self) -> usize {
        self.lambdas.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lambdas.is_empty()
    }
}

/// A fitted penalized linear model in original covariate units.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Model {
    /// Variable names, one per coefficient, in design order.
    pub variables: Vec<String>,
    /// Coefficients; zero means dropped, never omitted.
    pub coefficients: Vec<f64>,
    pub intercept: f64,
    /// Penalty the optimizer actually ran with.
    pub lambda: f64,
    /// Penalty the caller asked for (differs only when the λ floor kicked in).
    pub requested_lambda: f64,
    /// Training residuals `y - ŷ`.
    pub residuals: Vec<f64>,
    pub iterations: usize,
    /// False when the iteration cap was reached before the tolerance was met.
    pub converged: bool,
    /// True when a rank-deficient design at λ = 0 forced the λ floor.
    pub lambda_floor_applied: bool,
}

impl Model {
    /// Coefficient for a named variable (zero if dropped).
    pub fn coefficient(&self, variable: &str) -> Option<f64> {
        self.variables
            .iter()
            .position(|v| v == variable)
            .map(|j| self.coefficients[j])
    }

    /// Number of exactly-zero coefficients.
    pub fn n_zero(&self) -> usize {
        self.coefficients.iter().filter(|b| **b == 0.0).count()
    }
}

/// One point of the cross-validation curve.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CvPoint {
    pub lambda: f64,
    pub mean_mse: f64,
    pub std_error: f64,
}

/// Output of penalty selection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CvResult {
    /// λ picked by the one-standard-error rule.
    pub selected_lambda: f64,
    /// λ with the minimum mean CV error (diagnostic only).
    pub min_error_lambda: f64,
    /// Mean CV error at `selected_lambda`.
    pub selected_mse: f64,
    pub folds: usize,
    pub curve: Vec<CvPoint>,
}

/// A single bootstrap draw and the model fit on it.
#[derive(Debug, Clone)]
pub struct BootstrapReplicate {
    pub index: usize,
    /// Row indices drawn with replacement (same count as the partition).
    pub indices: Vec<usize>,
    pub model: Model,
}

/// Summary of all usable replicates of one bootstrap run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BootstrapDistribution {
    pub variables: Vec<String>,
    pub lambda: f64,
    /// `B_used × p` coefficient draws, replicate-major.
    pub coefficients: Vec<Vec<f64>>,
    /// `n × B_used` predictions on the original rows, observation-major.
    pub predictions: Vec<Vec<f64>>,
    pub requested: usize,
    pub skipped_not_converged: usize,
    pub skipped_numerical: usize,
}

impl BootstrapDistribution {
    pub fn used(&self) -> usize {
        self.coefficients.len()
    }

    pub fn skipped(&self) -> usize {
        self.skipped_not_converged + self.skipped_numerical
    }

    pub fn skip_rate(&self) -> f64 {
        if self.requested == 0 {
            return 0.0;
        }
        self.skipped() as f64 / self.requested as f64
    }
}

/// Direction of a point coefficient.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SignClass {
    Positive,
    Negative,
    Zero,
}

impl SignClass {
    pub fn of(value: f64) -> Self {
        if value > 0.0 {
            SignClass::Positive
        } else if value < 0.0 {
            SignClass::Negative
        } else {
            SignClass::Zero
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            SignClass::Positive => "positive",
            SignClass::Negative => "negative",
            SignClass::Zero => "zero",
        }
    }
}

/// Point estimate plus bootstrap interval for one (partition, variable).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CoefficientEstimate {
    pub partition: String,
    pub variable: String,
    pub observed: f64,
    pub lower: f64,
    pub upper: f64,
    pub sign: SignClass,
    /// Interval width `upper - lower`.
    pub uncertainty: f64,
    /// Copied from the full-sample model.
    pub converged: bool,
    /// Skip rate exceeded the threshold, so the effective replicate count is reduced.
    pub reduced_replicates: bool,
}

impl CoefficientEstimate {
    /// True when the interval lies entirely on one side of zero.
    pub fn excludes_zero(&self) -> bool {
        self.lower > 0.0 || self.upper < 0.0
    }
}

/// Per-observation bootstrap prediction interval.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PredictionInterval {
    pub lower: f64,
    pub upper: f64,
}

/// A named, non-overlapping group of observations.
#[derive(Debug, Clone, PartialEq)]
pub struct Partition {
    pub name: String,
    /// Fine regions merged into this partition, sorted.
    pub regions: Vec<String>,
    pub observations: Vec<Observation>,
}

impl Partition {
    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }
}

/// Everything one partition's pipeline produced.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionFit {
    pub lambda_max: f64,
    pub cv: CvResult,
    /// Full-sample fit at the selected λ.
    pub model: Model,
    pub unit_ids: Vec<String>,
    pub observed: Vec<f64>,
    pub fitted: Vec<f64>,
    /// One row per variable, in design order.
    pub estimates: Vec<CoefficientEstimate>,
    /// One interval per observation, aligned with `unit_ids`.
    pub intervals: Vec<PredictionInterval>,
    pub replicates_requested: usize,
    pub replicates_used: usize,
    pub skipped_not_converged: usize,
    pub skipped_numerical: usize,
}

impl PartitionFit {
    pub fn reduced_replicates(&self) -> bool {
        self.estimates.iter().any(|e| e.reduced_replicates)
    }
}

/// Outcome of a partition's pipeline.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum PartitionStatus {
    Fitted(Box<PartitionFit>),
    Omitted { reason: String },
}

/// A partition together with what happened to it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PartitionRun {
    pub name: String,
    pub regions: Vec<String>,
    pub n: usize,
    pub status: PartitionStatus,
}

impl PartitionRun {
    pub fn fit(&self) -> Option<&PartitionFit> {
        match &self.status {
            PartitionStatus::Fitted(fit) => Some(fit),
            PartitionStatus::Omitted { .. } => None,
        }
    }

    pub fn is_omitted(&self) -> bool {
        matches!(self.status, PartitionStatus::Omitted { .. })
    }
}
