//! Births to living women from an age-specific fertility table.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::RateTable;
use crate::errors::{ConfigError, Result};
use crate::population::{Predicate, RowIndex, Table, Value, AGE, ALIVE, HIDP, PIDP};
use crate::randomness::rate_to_probability;
use crate::simulation::{Cohort, CohortKind, Module, ModuleContext};

pub const LAST_BIRTH_TIME: &str = "last_birth_time";
pub const PARENT_ID: &str = "parent_id";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FertilityConfig {
    #[serde(default)]
    pub priority: Option<i32>,
    /// Annual birth rates by mother's age.
    pub rates: RateTable,
    #[serde(default = "default_sex_column")]
    pub sex_column: String,
    /// Value of `sex_column` that marks potential mothers.
    #[serde(default = "default_female")]
    pub female: String,
    /// Sex labels assigned to newborns.
    #[serde(default = "default_sexes")]
    pub sexes: Vec<String>,
    #[serde(default = "default_sex_weights")]
    pub sex_weights: Vec<f64>,
    /// Extra columns a newborn copies from its mother.
    #[serde(default)]
    pub inherit: Vec<String>,
    /// Minimum years between two births to the same mother.
    #[serde(default = "default_min_birth_interval")]
    pub min_birth_interval: f64,
}

fn default_sex_column() -> String {
    "sex".to_string()
}

fn default_female() -> String {
    "Female".to_string()
}

fn default_sexes() -> Vec<String> {
    vec!["Male".to_string(), "Female".to_string()]
}

fn default_sex_weights() -> Vec<f64> {
    vec![0.5, 0.5]
}

fn default_min_birth_interval() -> f64 {
    0.75
}

impl FertilityConfig {
    /// Defaults for everything but the rate table.
    pub fn with_rates(rates: RateTable) -> Self {
        Self {
            priority: None,
            rates,
            sex_column: default_sex_column(),
            female: default_female(),
            sexes: default_sexes(),
            sex_weights: default_sex_weights(),
            inherit: Vec::new(),
            min_birth_interval: default_min_birth_interval(),
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rates.validate(Fertility::NAME)?;
        if self.sexes.is_empty() || self.sexes.len() != self.sex_weights.len() {
            return Err(ConfigError::Invalid(format!(
                "{}: {} sex weights for {} sexes",
                Fertility::NAME,
                self.sex_weights.len(),
                self.sexes.len()
            )));
        }
        if self.sex_weights.iter().any(|w| !w.is_finite() || *w < 0.0)
            || self.sex_weights.iter().sum::<f64>() <= 0.0
        {
            return Err(ConfigError::Invalid(format!(
                "{}: sex weights must be non-negative and not all zero",
                Fertility::NAME
            )));
        }
        if self.min_birth_interval < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "{}: min_birth_interval must not be negative",
                Fertility::NAME
            )));
        }
        let reserved = [PIDP, HIDP, AGE, self.sex_column.as_str()];
        if let Some(column) = self.inherit.iter().find(|c| reserved.contains(&c.as_str())) {
            return Err(ConfigError::Invalid(format!(
                "{}: '{column}' is set for every newborn and cannot be inherited",
                Fertility::NAME
            )));
        }
        Ok(())
    }
}

/// Selects mothers among living women, creates one newborn per mother in
/// the mother's household and records the parent on the child.
#[derive(Debug, Clone)]
pub struct Fertility {
    config: FertilityConfig,
}

impl Fertility {
    pub const NAME: &'static str = "fertility";
    pub const DEFAULT_PRIORITY: i32 = 3;

    pub fn new(config: FertilityConfig) -> Self {
        Self { config }
    }

    /// Women who may give birth this tick, with their birth probabilities.
    fn eligible(&self, ctx: &ModuleContext<'_>, index: &[RowIndex]) -> Result<(Table, Vec<f64>)> {
        let sex = self.config.sex_column.as_str();
        let women = ctx.view(
            index,
            &[AGE, sex, LAST_BIRTH_TIME],
            Some(&Predicate::alive().and(Predicate::eq(sex, self.config.female.as_str()))),
        )?;

        let now = ctx.step().time();
        let rested: Vec<bool> = women
            .column(LAST_BIRTH_TIME)?
            .iter()
            .map(|last| {
                last.as_f64()
                    .is_none_or(|t| now - t >= self.config.min_birth_interval)
            })
            .collect();
        let women = women.retain(&rested);

        let years = ctx.step().years();
        let probabilities = women
            .floats(AGE)?
            .into_iter()
            .map(|age| rate_to_probability(self.config.rates.rate_for(age, None), years))
            .collect();
        Ok((women, probabilities))
    }
}

impl Module for Fertility {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.config.priority.unwrap_or(Self::DEFAULT_PRIORITY)
    }

    fn columns_required(&self) -> Vec<String> {
        let mut columns = vec![
            ALIVE.to_string(),
            AGE.to_string(),
            PIDP.to_string(),
            HIDP.to_string(),
            self.config.sex_column.clone(),
        ];
        columns.extend(self.config.inherit.iter().cloned());
        columns
    }

    fn columns_created(&self) -> Vec<String> {
        vec![LAST_BIRTH_TIME.to_string(), PARENT_ID.to_string()]
    }

    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        let mut defaults = Table::new(cohort.index.clone()).with_constant(LAST_BIRTH_TIME, Value::Null);
        let parents = match &cohort.parents {
            Some(parents) if cohort.kind == CohortKind::Birth => {
                let ids = ctx.view(parents, &[PIDP], None)?;
                let lookup = ids.positions();
                let pidps = ids.column(PIDP)?;
                parents
                    .iter()
                    .map(|row| lookup.get(row).map_or(Value::Null, |&p| pidps[p].clone()))
                    .collect()
            }
            _ => vec![Value::Null; cohort.index.len()],
        };
        defaults.insert_column(PARENT_ID, parents)?;
        ctx.update(&defaults)?;
        Ok(())
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let (women, probabilities) = self.eligible(ctx, index)?;
        if women.is_empty() {
            return Ok(());
        }
        let mothers = ctx
            .stream()
            .filter_for_probability(women.index(), &probabilities)?;
        if mothers.is_empty() {
            return Ok(());
        }

        let sexes: Vec<Value> = self.config.sexes.iter().map(|s| Value::from(s.as_str())).collect();
        let baby_sexes = ctx
            .stream_for("sex")
            .choice(&mothers, &sexes, &self.config.sex_weights)?;

        let mut inherited: Vec<&str> = vec![HIDP];
        inherited.extend(self.config.inherit.iter().map(String::as_str));
        let from_mothers = ctx.view(&mothers, &inherited, None)?;

        let mut babies = Table::with_len(mothers.len())
            .with_constant(AGE, 0.0)
            .with_column(self.config.sex_column.clone(), baby_sexes)?;
        for column in &inherited {
            babies.insert_column(*column, from_mothers.column(column)?.to_vec())?;
        }
        let born = ctx.create_cohort(babies, CohortKind::Birth, Some(mothers.clone()))?;

        let rested = Table::new(mothers).with_constant(LAST_BIRTH_TIME, ctx.step().time());
        ctx.update(&rested)?;

        info!(year = ctx.year(), births = born.len(), "births added");
        Ok(())
    }
}
