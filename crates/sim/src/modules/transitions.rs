//! Generic state transitions driven by a fitted [`Predictor`].
//!
//! A continuous transition replaces a numeric column with the model's
//! prediction; a categorical transition draws a new state from the
//! model's per-row distribution using the module's random stream.

use std::collections::BTreeMap;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::errors::{ConfigError, Result};
use crate::population::{Predicate, RowIndex, Table, Value, ALIVE, HIDP};
use crate::predictor::{validate_probabilities, validate_values, Predictor, PredictorSpec};
use crate::simulation::{Cohort, Module, ModuleContext};

fn default_true() -> bool {
    true
}

fn check_name(name: &str, column: &str) -> Result<(), ConfigError> {
    if name.trim().is_empty() {
        return Err(ConfigError::Invalid("transition module needs a name".into()));
    }
    if column.trim().is_empty() {
        return Err(ConfigError::Invalid(format!("{name}: target column is empty")));
    }
    Ok(())
}

/// Columns read to evaluate a transition.
fn read_columns(predictor: &dyn Predictor, filter: Option<&Predicate>, extra: &[&str]) -> Vec<String> {
    let mut columns: Vec<String> = vec![ALIVE.to_string()];
    let mut push = |c: &str| {
        if !columns.iter().any(|existing| existing == c) {
            columns.push(c.to_string());
        }
    };
    for c in predictor.covariates() {
        push(c.as_str());
    }
    for c in filter.into_iter().flat_map(Predicate::columns) {
        push(c);
    }
    for &c in extra {
        push(c);
    }
    columns
}

/// Living rows that pass the filter, with the predictor's covariates.
fn covariates(
    ctx: &ModuleContext<'_>,
    index: &[RowIndex],
    predictor: &dyn Predictor,
    filter: Option<&Predicate>,
    extra: &[&str],
) -> Result<Table> {
    let names = predictor.covariates();
    let mut columns: Vec<&str> = names.iter().map(String::as_str).collect();
    columns.extend(extra.iter().copied());
    let selection = match filter {
        Some(filter) => Predicate::alive().and(filter.clone()),
        None => Predicate::alive(),
    };
    Ok(ctx.view(index, &columns, Some(&selection))?)
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContinuousTransitionConfig {
    /// Module name; also names its random stream.
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    /// Column receiving the predicted values.
    pub column: String,
    pub predictor: PredictorSpec,
    /// Only rows matching this expression transition.
    #[serde(default)]
    pub filter: Option<Predicate>,
    /// Rescale predictions to this standard deviation around their mean.
    #[serde(default)]
    pub target_sd: Option<f64>,
    /// Replace each prediction with its household mean.
    #[serde(default)]
    pub household: bool,
    /// Whether this module owns `column`. If false the column must come
    /// from the cohort data or another module.
    #[serde(default = "default_true")]
    pub create: bool,
}

impl ContinuousTransitionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_name(&self.name, &self.column)?;
        if let Some(sd) = self.target_sd {
            if !(sd.is_finite() && sd >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{}: target_sd must be a non-negative number",
                    self.name
                )));
            }
        }
        Ok(())
    }
}

/// Sets a numeric column to a predictor's output each tick.
#[derive(Debug, Clone)]
pub struct ContinuousTransition {
    name: String,
    priority: i32,
    column: String,
    predictor: Arc<dyn Predictor>,
    filter: Option<Predicate>,
    target_sd: Option<f64>,
    household: bool,
    create: bool,
}

impl ContinuousTransition {
    pub const DEFAULT_PRIORITY: i32 = 4;

    pub fn new(config: ContinuousTransitionConfig) -> Self {
        Self {
            priority: config.priority.unwrap_or(Self::DEFAULT_PRIORITY),
            predictor: config.predictor.build(),
            name: config.name,
            column: config.column,
            filter: config.filter,
            target_sd: config.target_sd,
            household: config.household,
            create: config.create,
        }
    }

    /// A transition that owns `column`, with default settings.
    pub fn with_predictor(
        name: impl Into<String>,
        column: impl Into<String>,
        predictor: Arc<dyn Predictor>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: Self::DEFAULT_PRIORITY,
            column: column.into(),
            predictor,
            filter: None,
            target_sd: None,
            household: false,
            create: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn with_target_sd(mut self, sd: f64) -> Self {
        self.target_sd = Some(sd);
        self
    }

    pub fn per_household(mut self) -> Self {
        self.household = true;
        self
    }

    /// Update an existing column instead of creating one.
    pub fn updating_existing(mut self) -> Self {
        self.create = false;
        self
    }

    fn extra_columns(&self) -> Vec<&str> {
        if self.household {
            vec![HIDP]
        } else {
            Vec::new()
        }
    }
}

/// Stretch values around their mean so their standard deviation is `sd`.
fn rescale(values: &mut [f64], sd: f64) {
    if values.len() < 2 {
        return;
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let current = (values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / (n - 1.0)).sqrt();
    if current == 0.0 || !current.is_finite() {
        return;
    }
    let factor = sd / current;
    for v in values.iter_mut() {
        *v = mean + (*v - mean) * factor;
    }
}

/// Replace each value with the mean of its group.
fn household_means(values: &mut [f64], households: &[i64]) {
    let mut totals: BTreeMap<i64, (f64, usize)> = BTreeMap::new();
    for (&h, &v) in households.iter().zip(values.iter()) {
        let entry = totals.entry(h).or_insert((0.0, 0));
        entry.0 += v;
        entry.1 += 1;
    }
    for (v, h) in values.iter_mut().zip(households) {
        let (total, count) = totals[h];
        *v = total / count as f64;
    }
}

impl Module for ContinuousTransition {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn columns_required(&self) -> Vec<String> {
        let mut columns = read_columns(self.predictor.as_ref(), self.filter.as_ref(), &self.extra_columns());
        if !self.create {
            columns.push(self.column.clone());
        }
        columns
    }

    fn columns_created(&self) -> Vec<String> {
        if self.create {
            vec![self.column.clone()]
        } else {
            Vec::new()
        }
    }

    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        if self.create {
            ctx.update(&Table::new(cohort.index.clone()).with_constant(self.column.as_str(), Value::Null))?;
        }
        Ok(())
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let view = covariates(
            ctx,
            index,
            self.predictor.as_ref(),
            self.filter.as_ref(),
            &self.extra_columns(),
        )?;
        if view.is_empty() {
            debug!(module = %self.name, "no rows to transition");
            return Ok(());
        }

        let mut values = self
            .predictor
            .predict_values(&view)
            .map_err(|e| e.for_module(&self.name))?;
        validate_values(self.predictor.name(), &values, view.len()).map_err(|e| e.for_module(&self.name))?;

        if let Some(sd) = self.target_sd {
            rescale(&mut values, sd);
        }
        if self.household {
            household_means(&mut values, &view.ints(HIDP)?);
        }

        let update = Table::new(view.index().to_vec())
            .with_column(self.column.as_str(), values.into_iter().map(Value::Float).collect())?;
        ctx.update(&update)?;
        info!(module = %self.name, rows = update.len(), "continuous transition applied");
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CategoricalTransitionConfig {
    pub name: String,
    #[serde(default)]
    pub priority: Option<i32>,
    pub column: String,
    /// Category labels in the predictor's probability order.
    pub categories: Vec<Value>,
    pub predictor: PredictorSpec,
    #[serde(default)]
    pub filter: Option<Predicate>,
    #[serde(default = "default_true")]
    pub create: bool,
}

impl CategoricalTransitionConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_name(&self.name, &self.column)?;
        if self.categories.is_empty() {
            return Err(ConfigError::Invalid(format!("{}: no categories", self.name)));
        }
        Ok(())
    }
}

/// Draws a new state for each row from a predictor's probabilities.
#[derive(Debug, Clone)]
pub struct CategoricalTransition {
    name: String,
    priority: i32,
    column: String,
    categories: Vec<Value>,
    predictor: Arc<dyn Predictor>,
    filter: Option<Predicate>,
    create: bool,
}

impl CategoricalTransition {
    pub const DEFAULT_PRIORITY: i32 = 7;

    pub fn new(config: CategoricalTransitionConfig) -> Self {
        Self {
            priority: config.priority.unwrap_or(Self::DEFAULT_PRIORITY),
            predictor: config.predictor.build(),
            name: config.name,
            column: config.column,
            categories: config.categories,
            filter: config.filter,
            create: config.create,
        }
    }

    pub fn with_predictor(
        name: impl Into<String>,
        column: impl Into<String>,
        categories: Vec<Value>,
        predictor: Arc<dyn Predictor>,
    ) -> Self {
        Self {
            name: name.into(),
            priority: Self::DEFAULT_PRIORITY,
            column: column.into(),
            categories,
            predictor,
            filter: None,
            create: true,
        }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_filter(mut self, filter: Predicate) -> Self {
        self.filter = Some(filter);
        self
    }

    pub fn updating_existing(mut self) -> Self {
        self.create = false;
        self
    }
}

impl Module for CategoricalTransition {
    fn name(&self) -> &str {
        &self.name
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn columns_required(&self) -> Vec<String> {
        let mut columns = read_columns(self.predictor.as_ref(), self.filter.as_ref(), &[]);
        if !self.create {
            columns.push(self.column.clone());
        }
        columns
    }

    fn columns_created(&self) -> Vec<String> {
        if self.create {
            vec![self.column.clone()]
        } else {
            Vec::new()
        }
    }

    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        if self.create {
            ctx.update(&Table::new(cohort.index.clone()).with_constant(self.column.as_str(), Value::Null))?;
        }
        Ok(())
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let view = covariates(ctx, index, self.predictor.as_ref(), self.filter.as_ref(), &[])?;
        if view.is_empty() {
            return Ok(());
        }

        let probabilities = self
            .predictor
            .predict_probabilities(&view)
            .map_err(|e| e.for_module(&self.name))?;
        validate_probabilities(
            self.predictor.name(),
            &probabilities,
            view.len(),
            self.categories.len(),
        )
        .map_err(|e| e.for_module(&self.name))?;

        let states = ctx
            .stream()
            .sample_categorical(view.index(), &self.categories, probabilities.rows())?;
        let update = Table::new(view.index().to_vec()).with_column(self.column.as_str(), states)?;
        ctx.update(&update)?;
        info!(module = %self.name, rows = update.len(), "categorical transition applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{PredictorError, SimulationError};
    use crate::predictor::{FixedDistribution, LinearModel, LinearTerms, ProbabilityTable};
    use crate::testing::{floats, ints, people, simulation, texts};

    fn cohort() -> Table {
        people(vec![
            ("pidp", ints(&[1, 2, 3, 4])),
            ("hidp", ints(&[1, 1, 2, 2])),
            ("age", floats(&[20.0, 40.0, 30.0, 50.0])),
            ("sex", texts(&["Male", "Female", "Female", "Male"])),
        ])
    }

    fn linear(intercept: f64, age: f64) -> Arc<dyn Predictor> {
        Arc::new(LinearModel {
            name: "income_model".into(),
            terms: LinearTerms {
                intercept,
                coefficients: BTreeMap::from([("age".to_string(), age)]),
            },
        })
    }

    #[test]
    fn test_continuous_transition_writes_predictions() {
        let module = ContinuousTransition::with_predictor("income", "income", linear(100.0, 10.0));
        let mut sim = simulation(cohort(), vec![Box::new(module)]);
        assert!(sim.column("income").unwrap().iter().all(Value::is_null));

        sim.step().unwrap();
        let view = sim.view(&["income"], None).unwrap();
        assert_eq!(view.floats("income").unwrap(), vec![300.0, 500.0, 400.0, 600.0]);
    }

    #[test]
    fn test_continuous_transition_household_mean_and_filter() {
        let module = ContinuousTransition::with_predictor("income", "income", linear(0.0, 1.0))
            .per_household()
            .with_filter("sex == 'Female'".parse().unwrap());
        let mut sim = simulation(cohort(), vec![Box::new(module)]);
        sim.step().unwrap();

        let income = sim.column("income").unwrap();
        assert!(income[0].is_null());
        assert_eq!(income[1], Value::Float(40.0));
        assert_eq!(income[2], Value::Float(30.0));
        assert!(income[3].is_null());
    }

    #[test]
    fn test_rescale_sets_standard_deviation() {
        let mut values = vec![1.0, 2.0, 3.0, 4.0];
        rescale(&mut values, 0.0);
        assert!(values.iter().all(|&v| v == 2.5));

        let mut values = vec![1.0, 3.0];
        rescale(&mut values, 2.0f64.sqrt() * 2.0);
        assert!((values[0] - 0.0).abs() < 1e-12);
        assert!((values[1] - 4.0).abs() < 1e-12);
    }

    #[test]
    fn test_categorical_degenerate_distribution() {
        let fixed = Arc::new(FixedDistribution {
            name: "always_b".into(),
            probabilities: vec![0.0, 1.0],
        });
        let module = CategoricalTransition::with_predictor(
            "status",
            "status",
            vec![Value::from("A"), Value::from("B")],
            fixed,
        );
        let mut sim = simulation(cohort(), vec![Box::new(module)]);
        sim.step().unwrap();
        assert!(sim.column("status").unwrap().iter().all(|v| v.as_str() == Some("B")));
    }

    #[derive(Debug)]
    struct ShortModel;

    impl Predictor for ShortModel {
        fn name(&self) -> &str {
            "short"
        }

        fn covariates(&self) -> Vec<String> {
            Vec::new()
        }

        fn predict_probabilities(&self, _: &Table) -> std::result::Result<ProbabilityTable, PredictorError> {
            Ok(ProbabilityTable::new(vec![vec![0.5, 0.5]]))
        }
    }

    #[test]
    fn test_malformed_predictor_output_names_module() {
        let module = CategoricalTransition::with_predictor(
            "status",
            "status",
            vec![Value::from("A"), Value::from("B")],
            Arc::new(ShortModel),
        );
        let mut sim = simulation(cohort(), vec![Box::new(module)]);
        let err = sim.step().unwrap_err();
        match err.root() {
            SimulationError::Predictor(PredictorError::RowCountMismatch { module, expected, actual, .. }) => {
                assert_eq!(module, "status");
                assert_eq!((*expected, *actual), (4, 1));
            }
            other => panic!("unexpected error: {other}"),
        }
        // Nothing written for the failed tick.
        assert!(sim.column("status").unwrap().iter().all(Value::is_null));
    }

    #[test]
    fn test_config_deserializes_with_filter() {
        let json = r#"{
            "name": "smoking",
            "column": "smoker",
            "categories": ["no", "yes"],
            "predictor": {"kind": "fixed", "name": "p", "probabilities": [0.8, 0.2]},
            "filter": "age >= 16"
        }"#;
        let config: CategoricalTransitionConfig = serde_json::from_str(json).unwrap();
        assert!(config.create);
        assert_eq!(config.filter, Some(Predicate::ge("age", 16)));
        config.validate().unwrap();
        let module = CategoricalTransition::new(config);
        assert_eq!(module.priority(), CategoricalTransition::DEFAULT_PRIORITY);
        assert!(module.columns_required().contains(&"age".to_string()));
    }
}
