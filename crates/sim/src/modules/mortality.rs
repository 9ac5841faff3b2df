//! All-cause mortality from an age (and optionally sex) rate table.

use serde::{Deserialize, Serialize};
use tracing::info;

use super::RateTable;
use crate::errors::{ConfigError, Result};
use crate::population::{RowIndex, Table, Value, AGE, ALIVE, EXIT_TIME};
use crate::randomness::rate_to_probability;
use crate::simulation::{Cohort, Module, ModuleContext};

pub const CAUSE_OF_DEATH: &str = "cause_of_death";
pub const YEARS_OF_LIFE_LOST: &str = "years_of_life_lost";

const ALL_CAUSES: &str = "all_causes";
const NO_DEATH: &str = "no_death";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MortalityConfig {
    #[serde(default)]
    pub priority: Option<i32>,
    /// Annual death rates.
    pub rates: RateTable,
    /// Reference life expectancy for years of life lost.
    #[serde(default = "default_life_expectancy")]
    pub life_expectancy: f64,
    /// Column holding sex, needed when the rate table is sex specific.
    #[serde(default)]
    pub sex_column: Option<String>,
}

fn default_life_expectancy() -> f64 {
    Mortality::DEFAULT_LIFE_EXPECTANCY
}

impl MortalityConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.rates.validate(Mortality::NAME)?;
        if self.rates.is_sex_specific() && self.sex_column.is_none() {
            return Err(ConfigError::Invalid(format!(
                "{}: sex specific rates need a sex_column",
                Mortality::NAME
            )));
        }
        if !(self.life_expectancy.is_finite() && self.life_expectancy > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "{}: life expectancy must be positive",
                Mortality::NAME
            )));
        }
        Ok(())
    }
}

/// Converts annual rates to per-tick probabilities, draws one death event
/// per living simulant and retires the dead.
#[derive(Debug, Clone)]
pub struct Mortality {
    config: MortalityConfig,
}

impl Mortality {
    pub const NAME: &'static str = "mortality";
    pub const DEFAULT_PRIORITY: i32 = 1;
    pub const DEFAULT_LIFE_EXPECTANCY: f64 = 81.16;

    pub fn new(config: MortalityConfig) -> Self {
        Self { config }
    }

    pub fn with_rates(rates: RateTable) -> Self {
        Self::new(MortalityConfig {
            priority: None,
            rates,
            life_expectancy: Self::DEFAULT_LIFE_EXPECTANCY,
            sex_column: None,
        })
    }
}

impl Module for Mortality {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.config.priority.unwrap_or(Self::DEFAULT_PRIORITY)
    }

    fn columns_required(&self) -> Vec<String> {
        let mut columns = vec![ALIVE.to_string(), AGE.to_string(), EXIT_TIME.to_string()];
        columns.extend(self.config.sex_column.clone());
        columns
    }

    fn columns_created(&self) -> Vec<String> {
        vec![CAUSE_OF_DEATH.to_string(), YEARS_OF_LIFE_LOST.to_string()]
    }

    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        let defaults = Table::new(cohort.index.clone())
            .with_constant(CAUSE_OF_DEATH, Value::Null)
            .with_constant(YEARS_OF_LIFE_LOST, Value::Null);
        ctx.update(&defaults)?;
        Ok(())
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let mut columns = vec![AGE];
        if let Some(sex) = self.config.sex_column.as_deref() {
            columns.push(sex);
        }
        let view = ctx.view_alive(index, &columns)?;
        if view.is_empty() {
            return Ok(());
        }

        let ages = view.floats(AGE)?;
        let sexes: Vec<Option<&str>> = match self.config.sex_column.as_deref() {
            Some(sex) => view.column(sex)?.iter().map(Value::as_str).collect(),
            None => vec![None; view.len()],
        };
        let years = ctx.step().years();
        let probabilities: Vec<Vec<f64>> = ages
            .iter()
            .zip(&sexes)
            .map(|(&age, &sex)| {
                let p = rate_to_probability(self.config.rates.rate_for(age, sex), years);
                vec![p, 1.0 - p]
            })
            .collect();

        let outcomes = ctx
            .stream()
            .sample_categorical(view.index(), &[ALL_CAUSES, NO_DEATH], &probabilities)?;
        let dead: Vec<usize> = outcomes
            .iter()
            .enumerate()
            .filter_map(|(pos, &outcome)| (outcome == ALL_CAUSES).then_some(pos))
            .collect();
        if dead.is_empty() {
            return Ok(());
        }

        let died = view.take(&dead);
        ctx.retire(died.index())?;
        let lost = died
            .floats(AGE)?
            .into_iter()
            .map(|age| Value::Float((self.config.life_expectancy - age).max(0.0)))
            .collect();
        let record = Table::new(died.index().to_vec())
            .with_constant(CAUSE_OF_DEATH, ALL_CAUSES)
            .with_column(YEARS_OF_LIFE_LOST, lost)?;
        ctx.update(&record)?;

        info!(year = ctx.year(), deaths = dead.len(), "mortality applied");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::modules::RateBand;
    use crate::population::{AliveState, Predicate};
    use crate::testing::{floats, ints, people, simulation, texts};

    fn cohort() -> Table {
        people(vec![
            ("pidp", ints(&[1, 2, 3, 4])),
            ("age", floats(&[30.0, 40.0, 90.0, 95.0])),
            ("sex", texts(&["Male", "Female", "Male", "Female"])),
        ])
    }

    #[test]
    fn test_certain_death_retires_and_records() {
        let mut sim = simulation(cohort(), vec![Box::new(Mortality::with_rates(RateTable::flat(1e6)))]);
        sim.step().unwrap();

        assert_eq!(sim.alive_count(), 0);
        assert_eq!(sim.dead_count(), 4);
        let view = sim
            .view(&["pidp", CAUSE_OF_DEATH, YEARS_OF_LIFE_LOST, EXIT_TIME], None)
            .unwrap();
        assert_eq!(view.len(), 4);
        assert!(view.column(CAUSE_OF_DEATH).unwrap().iter().all(|c| c.as_str() == Some(ALL_CAUSES)));
        assert_eq!(view.floats(YEARS_OF_LIFE_LOST).unwrap()[0], 81.16 - 30.0);
        assert_eq!(view.floats(YEARS_OF_LIFE_LOST).unwrap()[2], 0.0);
        assert!(view.floats(EXIT_TIME).unwrap().iter().all(|&t| t == 2021.0));
    }

    #[test]
    fn test_zero_rate_leaves_everyone_alive() {
        let mut sim = simulation(cohort(), vec![Box::new(Mortality::with_rates(RateTable::flat(0.0)))]);
        sim.run_for(3).unwrap();
        assert_eq!(sim.alive_count(), 4);
        assert!(sim.column(CAUSE_OF_DEATH).unwrap().iter().all(Value::is_null));
    }

    #[test]
    fn test_sex_specific_rates() {
        let config = MortalityConfig {
            priority: None,
            rates: RateTable::new(vec![RateBand {
                sex: Some("Female".into()),
                min_age: 0.0,
                max_age: 150.0,
                rate: 1e6,
            }]),
            life_expectancy: 81.16,
            sex_column: Some("sex".into()),
        };
        config.validate().unwrap();
        let mut sim = simulation(cohort(), vec![Box::new(Mortality::new(config))]);
        sim.step().unwrap();

        let dead = sim
            .view(&["pidp"], Some(&Predicate::eq(ALIVE, AliveState::Dead.as_str())))
            .unwrap();
        assert_eq!(dead.ints("pidp").unwrap(), vec![2, 4]);
    }

    #[test]
    fn test_sex_rates_need_sex_column() {
        let config = MortalityConfig {
            priority: None,
            rates: RateTable::new(vec![RateBand {
                sex: Some("Female".into()),
                min_age: 0.0,
                max_age: 150.0,
                rate: 0.1,
            }]),
            life_expectancy: 81.16,
            sex_column: None,
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_dead_are_not_drawn_again() {
        let mut sim = simulation(cohort(), vec![Box::new(Mortality::with_rates(RateTable::flat(1e6)))]);
        sim.step().unwrap();
        sim.step().unwrap();
        // Exit time stays at the year of death.
        assert!(sim
            .view(&[EXIT_TIME], None)
            .unwrap()
            .floats(EXIT_TIME)
            .unwrap()
            .iter()
            .all(|&t| t == 2021.0));
    }
}
