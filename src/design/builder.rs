//! Design-matrix assembly.
//!
//! Turns a set of observations into a numeric outcome vector and covariate
//! matrix with a fixed column order:
//!
//! 1. numeric covariates, in the order given
//! 2. one 0/1 indicator per non-reference level of each categorical field
//!
//! Nothing is imputed and no rows are dropped: a missing or non-finite value is
//! a `DataError` for the whole matrix.

use std::collections::BTreeSet;

use nalgebra::{DMatrix, DVector};

use crate::domain::{DesignMatrix, Observation};
use crate::error::EngineError;

/// A categorical field with its full, ordered level set.
///
/// The first level is the reference category and gets no indicator column.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CategoricalField {
    pub name: String,
    pub levels: Vec<String>,
}

impl CategoricalField {
    /// Indicator column names (`field=level`) for the non-reference levels.
    pub fn indicator_names(&self) -> Vec<String> {
        self.levels
            .iter()
            .skip(1)
            .map(|level| format!("{}={}", self.name, level))
            .collect()
    }
}

/// Collect each categorical field's level set from `observations` (sorted).
///
/// Run this once over the full observation set so every partition shares the
/// same indicator columns.
pub fn categorical_domains(
    observations: &[Observation],
    fields: &[String],
) -> Result<Vec<CategoricalField>, EngineError> {
    fields
        .iter()
        .map(|field| {
            let levels: BTreeSet<&str> = observations
                .iter()
                .filter_map(|o| o.categories.get(field).map(String::as_str))
                .collect();
            if levels.is_empty() {
                return Err(EngineError::data(format!(
                    "categorical field '{field}' has no observed values"
                )));
            }
            Ok(CategoricalField {
                name: field.clone(),
                levels: levels.into_iter().map(str::to_string).collect(),
            })
        })
        .collect()
}

/// Builds design matrices for a fixed variable layout.
#[derive(Debug, Clone)]
pub struct DesignMatrixBuilder {
    covariates: Vec<String>,
    categorical: Vec<CategoricalField>,
}

impl DesignMatrixBuilder {
    pub fn new(covariates: Vec<String>, categorical: Vec<CategoricalField>) -> Self {
        Self {
            covariates,
            categorical,
        }
    }

    /// Column names the builder will emit, in order.
    pub fn variables(&self) -> Vec<String> {
        let mut names = self.covariates.clone();
        for field in &self.categorical {
            names.extend(field.indicator_names());
        }
        names
    }

    pub fn build(&self, observations: &[Observation]) -> Result<DesignMatrix, EngineError> {
        if observations.is_empty() {
            return Err(EngineError::data("cannot build a design matrix from zero observations"));
        }
        for field in &self.categorical {
            if field.levels.is_empty() {
                return Err(EngineError::data(format!(
                    "categorical field '{}' has an empty level set",
                    field.name
                )));
            }
        }

        let variables = self.variables();
        let n = observations.len();
        let p = variables.len();
        let mut x = DMatrix::<f64>::zeros(n, p);
        let mut y = DVector::<f64>::zeros(n);

        for (i, obs) in observations.iter().enumerate() {
            if !obs.outcome.is_finite() {
                return Err(EngineError::data(format!(
                    "unit '{}': outcome is not a finite number",
                    obs.unit_id
                )));
            }
            y[i] = obs.outcome;

            for (j, name) in self.covariates.iter().enumerate() {
                let value = obs.covariates.get(name).copied().ok_or_else(|| {
                    EngineError::data(format!("unit '{}': missing covariate '{name}'", obs.unit_id))
                })?;
                if !value.is_finite() {
                    return Err(EngineError::data(format!(
                        "unit '{}': covariate '{name}' is not a finite number",
                        obs.unit_id
                    )));
                }
                x[(i, j)] = value;
            }

            let mut col = self.covariates.len();
            for field in &self.categorical {
                let level = obs.categories.get(&field.name).ok_or_else(|| {
                    EngineError::data(format!(
                        "unit '{}': missing categorical field '{}'",
                        obs.unit_id, field.name
                    ))
                })?;
                let pos = field.levels.iter().position(|l| l == level).ok_or_else(|| {
                    EngineError::data(format!(
                        "unit '{}': level '{level}' is not in the domain of '{}'",
                        obs.unit_id, field.name
                    ))
                })?;
                if pos > 0 {
                    x[(i, col + pos - 1)] = 1.0;
                }
                col += field.levels.len() - 1;
            }
        }

        let unit_ids = observations.iter().map(|o| o.unit_id.clone()).collect();
        Ok(DesignMatrix::from_parts(unit_ids, variables, x, y))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obs(id: &str, y: f64, x1: f64, urb: &str) -> Observation {
        Observation::new(id, y, "R1")
            .with_covariate("x1", x1)
            .with_category("urbanity", urb)
    }

    #[test]
    fn expands_categorical_with_implicit_reference() {
        let data = vec![
            obs("a", 0.1, 1.0, "urban"),
            obs("b", 0.2, 2.0, "rural"),
            obs("c", 0.3, 3.0, "mixed"),
        ];
        let domains = categorical_domains(&data, &["urbanity".to_string()]).unwrap();
        assert_eq!(domains[0].levels, vec!["mixed", "rural", "urban"]);

        let builder = DesignMatrixBuilder::new(vec!["x1".into()], domains);
        let design = builder.build(&data).unwrap();
        assert_eq!(
            design.variables(),
            &["x1".to_string(), "urbanity=rural".to_string(), "urbanity=urban".to_string()]
        );
        // a: urban
        assert_eq!(design.x().row(0).iter().copied().collect::<Vec<_>>(), vec![1.0, 0.0, 1.0]);
        // c: mixed is the reference level
        assert_eq!(design.x().row(2).iter().copied().collect::<Vec<_>>(), vec![3.0, 0.0, 0.0]);
        assert_eq!(design.y()[1], 0.2);
    }

    #[test]
    fn missing_covariate_is_a_data_error() {
        let data = vec![
            Observation::new("a", 0.1, "R1").with_covariate("x1", 1.0),
            Observation::new("b", 0.2, "R1"),
        ];
        let builder = DesignMatrixBuilder::new(vec!["x1".into()], vec![]);
        let err = builder.build(&data).unwrap_err();
        assert!(matches!(err, EngineError::Data(ref m) if m.contains("'b'")));
    }

    #[test]
    fn empty_categorical_domain_is_a_data_error() {
        let data = vec![Observation::new("a", 0.1, "R1").with_covariate("x1", 1.0)];
        assert!(categorical_domains(&data, &["urbanity".to_string()]).is_err());

        let builder = DesignMatrixBuilder::new(
            vec!["x1".into()],
            vec![CategoricalField {
                name: "urbanity".into(),
                levels: vec![],
            }],
        );
        assert!(matches!(builder.build(&data), Err(EngineError::Data(_))));
    }

    #[test]
    fn non_finite_outcome_is_rejected() {
        let data = vec![Observation::new("a", f64::NAN, "R1").with_covariate("x1", 1.0)];
        let builder = DesignMatrixBuilder::new(vec!["x1".into()], vec![]);
        assert!(builder.build(&data).is_err());
    }
}
