//! External transition models.
//!
//! The engine treats a predictor as a black box mapping a covariate table
//! to either one value per row or one probability row per input row. Output
//! is always checked here before anything is drawn or written.

use std::collections::BTreeMap;
use std::fmt;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::errors::PredictorError;
use crate::population::{Table, Value};

/// Tolerance for probability rows summing to one.
pub const PROBABILITY_TOLERANCE: f64 = 1e-6;

/// One probability row per simulant, one column per category.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct ProbabilityTable {
    rows: Vec<Vec<f64>>,
}

impl ProbabilityTable {
    pub fn new(rows: Vec<Vec<f64>>) -> Self {
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<f64>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// A fitted transition model.
///
/// Implementations must be immutable once loaded; they are shared across
/// modules behind an `Arc`.
pub trait Predictor: Send + Sync + fmt::Debug {
    fn name(&self) -> &str;

    /// Columns the model reads.
    fn covariates(&self) -> Vec<String>;

    /// One predicted value per input row.
    fn predict_values(&self, covariates: &Table) -> Result<Vec<f64>, PredictorError> {
        let _ = covariates;
        Err(unsupported(self.name(), "continuous values"))
    }

    /// One probability row per input row.
    fn predict_probabilities(&self, covariates: &Table) -> Result<ProbabilityTable, PredictorError> {
        let _ = covariates;
        Err(unsupported(self.name(), "probabilities"))
    }
}

fn unsupported(name: &str, what: &str) -> PredictorError {
    PredictorError::Covariate {
        module: String::new(),
        predictor: name.to_string(),
        reason: format!("predictor does not produce {what}"),
    }
}

/// Check a predictor's probability output against its input.
pub fn validate_probabilities(
    predictor: &str,
    table: &ProbabilityTable,
    expected_rows: usize,
    categories: usize,
) -> Result<(), PredictorError> {
    if table.len() != expected_rows {
        return Err(PredictorError::RowCountMismatch {
            module: String::new(),
            predictor: predictor.to_string(),
            expected: expected_rows,
            actual: table.len(),
        });
    }
    for (row, probabilities) in table.rows().iter().enumerate() {
        let malformed = |reason: String| PredictorError::MalformedProbabilities {
            module: String::new(),
            predictor: predictor.to_string(),
            row,
            reason,
        };
        if probabilities.len() != categories {
            return Err(PredictorError::CategoryMismatch {
                module: String::new(),
                predictor: predictor.to_string(),
                row,
                expected: categories,
                actual: probabilities.len(),
            });
        }
        if let Some(p) = probabilities.iter().find(|p| !p.is_finite() || **p < 0.0) {
            return Err(malformed(format!("invalid probability {p}")));
        }
        let total: f64 = probabilities.iter().sum();
        if (total - 1.0).abs() > PROBABILITY_TOLERANCE {
            return Err(malformed(format!("sums to {total}")));
        }
    }
    Ok(())
}

/// Check a predictor's value output against its input.
pub fn validate_values(predictor: &str, values: &[f64], expected_rows: usize) -> Result<(), PredictorError> {
    if values.len() != expected_rows {
        return Err(PredictorError::RowCountMismatch {
            module: String::new(),
            predictor: predictor.to_string(),
            expected: expected_rows,
            actual: values.len(),
        });
    }
    Ok(())
}

/// Intercept plus coefficients.
///
/// A coefficient key of the form `column=value` is an indicator term: it
/// contributes its coefficient when the column equals the value.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct LinearTerms {
    #[serde(default)]
    pub intercept: f64,
    #[serde(default)]
    pub coefficients: BTreeMap<String, f64>,
}

impl LinearTerms {
    fn columns(&self) -> impl Iterator<Item = &str> {
        self.coefficients
            .keys()
            .map(|key| key.split_once('=').map_or(key.as_str(), |(column, _)| column))
    }

    fn score(&self, predictor: &str, covariates: &Table) -> Result<Vec<f64>, PredictorError> {
        let mut scores = vec![self.intercept; covariates.len()];
        for (key, coefficient) in &self.coefficients {
            let covariate_error = |reason: String| PredictorError::Covariate {
                module: String::new(),
                predictor: predictor.to_string(),
                reason,
            };
            match key.split_once('=') {
                Some((column, level)) => {
                    let level = Value::infer(level);
                    let values = covariates
                        .column(column)
                        .map_err(|e| covariate_error(e.to_string()))?;
                    for (score, value) in scores.iter_mut().zip(values) {
                        if *value == level {
                            *score += coefficient;
                        }
                    }
                }
                None => {
                    let values = covariates
                        .floats(key)
                        .map_err(|e| covariate_error(e.to_string()))?;
                    for (score, value) in scores.iter_mut().zip(values) {
                        *score += coefficient * value;
                    }
                }
            }
        }
        Ok(scores)
    }
}

/// Linear predictor for continuous transitions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinearModel {
    pub name: String,
    #[serde(flatten)]
    pub terms: LinearTerms,
}

impl Predictor for LinearModel {
    fn name(&self) -> &str {
        &self.name
    }

    fn covariates(&self) -> Vec<String> {
        dedup(self.terms.columns())
    }

    fn predict_values(&self, covariates: &Table) -> Result<Vec<f64>, PredictorError> {
        self.terms.score(&self.name, covariates)
    }
}

/// Multinomial logit: one linear score per category, then softmax.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MultinomialLogit {
    pub name: String,
    pub scores: Vec<LinearTerms>,
}

impl Predictor for MultinomialLogit {
    fn name(&self) -> &str {
        &self.name
    }

    fn covariates(&self) -> Vec<String> {
        dedup(self.scores.iter().flat_map(LinearTerms::columns))
    }

    fn predict_probabilities(&self, covariates: &Table) -> Result<ProbabilityTable, PredictorError> {
        let per_category = self
            .scores
            .iter()
            .map(|terms| terms.score(&self.name, covariates))
            .collect::<Result<Vec<_>, _>>()?;

        let rows = (0..covariates.len())
            .map(|row| {
                let logits: Vec<f64> = per_category.iter().map(|s| s[row]).collect();
                let max = logits.iter().copied().fold(f64::NEG_INFINITY, f64::max);
                let exp: Vec<f64> = logits.iter().map(|l| (l - max).exp()).collect();
                let total: f64 = exp.iter().sum();
                exp.into_iter().map(|e| e / total).collect()
            })
            .collect();
        Ok(ProbabilityTable::new(rows))
    }
}

/// The same distribution for every row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FixedDistribution {
    pub name: String,
    pub probabilities: Vec<f64>,
}

impl Predictor for FixedDistribution {
    fn name(&self) -> &str {
        &self.name
    }

    fn covariates(&self) -> Vec<String> {
        Vec::new()
    }

    fn predict_probabilities(&self, covariates: &Table) -> Result<ProbabilityTable, PredictorError> {
        Ok(ProbabilityTable::new(vec![
            self.probabilities.clone();
            covariates.len()
        ]))
    }
}

fn dedup<'a>(columns: impl Iterator<Item = &'a str>) -> Vec<String> {
    let mut out: Vec<String> = Vec::new();
    for column in columns {
        if !out.iter().any(|c| c == column) {
            out.push(column.to_string());
        }
    }
    out
}

/// Serializable predictor selection for configuration files.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PredictorSpec {
    Linear(LinearModel),
    MultinomialLogit(MultinomialLogit),
    Fixed(FixedDistribution),
}

impl PredictorSpec {
    pub fn name(&self) -> &str {
        match self {
            Self::Linear(m) => &m.name,
            Self::MultinomialLogit(m) => &m.name,
            Self::Fixed(m) => &m.name,
        }
    }

    pub fn build(&self) -> Arc<dyn Predictor> {
        match self {
            Self::Linear(m) => Arc::new(m.clone()),
            Self::MultinomialLogit(m) => Arc::new(m.clone()),
            Self::Fixed(m) => Arc::new(m.clone()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn covariates() -> Table {
        Table::new(vec![3, 8])
            .with_column("age", vec![20.0.into(), 40.0.into()])
            .unwrap()
            .with_column("sex", vec!["Male".into(), "Female".into()])
            .unwrap()
    }

    #[test]
    fn test_linear_with_indicator() {
        let model: LinearModel = serde_json::from_str(
            r#"{"name": "income", "intercept": 100.0, "coefficients": {"age": 2.0, "sex=Female": -10.0}}"#,
        )
        .unwrap();
        assert_eq!(model.covariates(), vec!["age".to_string(), "sex".to_string()]);
        assert_eq!(model.predict_values(&covariates()).unwrap(), vec![140.0, 170.0]);
    }

    #[test]
    fn test_linear_missing_covariate() {
        let model = LinearModel {
            name: "m".into(),
            terms: LinearTerms {
                intercept: 0.0,
                coefficients: BTreeMap::from([("income".to_string(), 1.0)]),
            },
        };
        let err = model.predict_values(&covariates()).unwrap_err();
        assert!(matches!(err, PredictorError::Covariate { .. }));
    }

    #[test]
    fn test_logit_rows_sum_to_one() {
        let model = MultinomialLogit {
            name: "tenure".into(),
            scores: vec![
                LinearTerms::default(),
                LinearTerms {
                    intercept: 1.0,
                    coefficients: BTreeMap::from([("age".to_string(), 0.01)]),
                },
            ],
        };
        let table = model.predict_probabilities(&covariates()).unwrap();
        validate_probabilities("tenure", &table, 2, 2).unwrap();
        assert!(table.rows()[1][1] > table.rows()[0][1]);
    }

    #[test]
    fn test_validate_row_count() {
        let table = ProbabilityTable::new(vec![vec![1.0]]);
        let err = validate_probabilities("p", &table, 2, 1)
            .unwrap_err()
            .for_module("smoking");
        assert_eq!(
            err,
            PredictorError::RowCountMismatch {
                module: "smoking".into(),
                predictor: "p".into(),
                expected: 2,
                actual: 1
            }
        );
    }

    #[test]
    fn test_validate_malformed_rows() {
        let bad_sum = ProbabilityTable::new(vec![vec![0.5, 0.4]]);
        assert!(matches!(
            validate_probabilities("p", &bad_sum, 1, 2),
            Err(PredictorError::MalformedProbabilities { row: 0, .. })
        ));
        let negative = ProbabilityTable::new(vec![vec![1.5, -0.5]]);
        assert!(validate_probabilities("p", &negative, 1, 2).is_err());
        let short = ProbabilityTable::new(vec![vec![1.0]]);
        assert!(matches!(
            validate_probabilities("p", &short, 1, 2),
            Err(PredictorError::CategoryMismatch { .. })
        ));
    }

    #[test]
    fn test_spec_roundtrip() {
        let spec: PredictorSpec =
            serde_json::from_str(r#"{"kind": "fixed", "name": "coin", "probabilities": [0.5, 0.5]}"#)
                .unwrap();
        let predictor = spec.build();
        let out = predictor.predict_probabilities(&covariates()).unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(predictor.name(), "coin");
    }
}
