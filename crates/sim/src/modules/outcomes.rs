//! Outcome aggregation run after every other module.

use serde::{Deserialize, Serialize};
use tracing::debug;

use super::default_income_column;
use crate::errors::Result;
use crate::population::{RowIndex, Table, Value, AGE, ALIVE, HIDP};
use crate::simulation::{Cohort, Module, ModuleContext};

pub const EQUIVALISED_INCOME: &str = "equivalised_income";

fn default_adult_age() -> f64 {
    14.0
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EquivalisedIncomeConfig {
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "default_income_column")]
    pub income_column: String,
    /// Members this age or older count as adults.
    #[serde(default = "default_adult_age")]
    pub adult_age: f64,
}

impl Default for EquivalisedIncomeConfig {
    fn default() -> Self {
        Self {
            priority: None,
            income_column: default_income_column(),
            adult_age: default_adult_age(),
        }
    }
}

/// Household income divided by the modified OECD equivalence scale:
/// 1.0 for the first adult, 0.5 for each further adult and 0.3 for each
/// child, counted over living household members.
#[derive(Debug, Clone)]
pub struct EquivalisedIncome {
    config: EquivalisedIncomeConfig,
}

impl EquivalisedIncome {
    pub const NAME: &'static str = "equivalised_income";
    pub const DEFAULT_PRIORITY: i32 = 9;

    pub fn new(config: EquivalisedIncomeConfig) -> Self {
        Self { config }
    }
}

/// Modified OECD scale for a household's member ages.
pub(crate) fn oecd_scale(ages: impl IntoIterator<Item = f64>, adult_age: f64) -> f64 {
    let (adults, children) = ages
        .into_iter()
        .fold((0usize, 0usize), |(adults, children), age| {
            if age >= adult_age {
                (adults + 1, children)
            } else {
                (adults, children + 1)
            }
        });
    // A household of children only still has a head.
    let other_adults = adults.saturating_sub(1);
    let children = if adults > 0 { children } else { children.saturating_sub(1) };
    1.0 + 0.5 * other_adults as f64 + 0.3 * children as f64
}

impl Module for EquivalisedIncome {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.config.priority.unwrap_or(Self::DEFAULT_PRIORITY)
    }

    fn columns_required(&self) -> Vec<String> {
        vec![
            ALIVE.to_string(),
            AGE.to_string(),
            HIDP.to_string(),
            self.config.income_column.clone(),
        ]
    }

    fn columns_created(&self) -> Vec<String> {
        vec![EQUIVALISED_INCOME.to_string()]
    }

    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        ctx.update(&Table::new(cohort.index.clone()).with_constant(EQUIVALISED_INCOME, Value::Null))?;
        Ok(())
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let income = self.config.income_column.as_str();
        let view = ctx.view_alive(index, &[HIDP, AGE, income])?;
        if view.is_empty() {
            return Ok(());
        }

        let ages = view.floats(AGE)?;
        let incomes = view.column(income)?;
        let mut equivalised = vec![Value::Null; view.len()];
        for members in view.group_by_int(HIDP)?.into_values() {
            let scale = oecd_scale(members.iter().map(|&m| ages[m]), self.config.adult_age);
            for &m in &members {
                if let Some(value) = incomes[m].as_f64() {
                    equivalised[m] = Value::Float(value / scale);
                }
            }
        }

        let update = Table::new(view.index().to_vec()).with_column(EQUIVALISED_INCOME, equivalised)?;
        ctx.update(&update)?;
        debug!(rows = update.len(), "equivalised income updated");
        Ok(())
    }
}
