//! Built-in domain and intervention modules.
//!
//! Each one is an ordinary [`Module`](crate::simulation::Module); the
//! engine gives them no special treatment.

mod interventions;
mod mortality;
mod fertility;
mod outcomes;
mod transitions;

use serde::{Deserialize, Serialize};

use crate::errors::ConfigError;

pub use fertility::{Fertility, FertilityConfig, LAST_BIRTH_TIME, PARENT_ID};
pub use interventions::{
    ChildPovertySustain, ChildPovertySustainConfig, ChildUplift, ChildUpliftConfig,
    HouseholdIncomeBoost, HouseholdIncomeBoostConfig, PovertyLineChildUplift,
    PovertyLineChildUpliftConfig, BOOSTED_INCOME, BOOST_AMOUNT, INCOME_BOOSTED, TIMES_BOOSTED,
};
pub use mortality::{Mortality, MortalityConfig, CAUSE_OF_DEATH, YEARS_OF_LIFE_LOST};
pub use outcomes::{EquivalisedIncome, EquivalisedIncomeConfig, EQUIVALISED_INCOME};
pub use transitions::{
    CategoricalTransition, CategoricalTransitionConfig, ContinuousTransition,
    ContinuousTransitionConfig,
};

/// An annual rate that applies to an age band, optionally for one sex.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RateBand {
    #[serde(default)]
    pub sex: Option<String>,
    /// Inclusive lower bound.
    pub min_age: f64,
    /// Exclusive upper bound.
    pub max_age: f64,
    pub rate: f64,
}

/// Rate lookup by age and sex. The first matching band wins; ages with no
/// band have a rate of zero.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RateTable {
    bands: Vec<RateBand>,
}

impl RateTable {
    pub fn new(bands: Vec<RateBand>) -> Self {
        Self { bands }
    }

    /// A single rate for every age.
    pub fn flat(rate: f64) -> Self {
        Self::new(vec![RateBand {
            sex: None,
            min_age: 0.0,
            max_age: f64::INFINITY,
            rate,
        }])
    }

    pub fn rate_for(&self, age: f64, sex: Option<&str>) -> f64 {
        self.bands
            .iter()
            .find(|band| {
                age >= band.min_age
                    && age < band.max_age
                    && band.sex.as_deref().is_none_or(|s| Some(s) == sex)
            })
            .map_or(0.0, |band| band.rate)
    }

    pub fn is_sex_specific(&self) -> bool {
        self.bands.iter().any(|band| band.sex.is_some())
    }

    pub fn validate(&self, module: &str) -> Result<(), ConfigError> {
        for band in &self.bands {
            if !(band.rate.is_finite() && band.rate >= 0.0) {
                return Err(ConfigError::Invalid(format!(
                    "{module}: rate {} must be a non-negative number",
                    band.rate
                )));
            }
            if band.min_age.is_nan() || band.max_age.is_nan() || band.min_age >= band.max_age {
                return Err(ConfigError::Invalid(format!(
                    "{module}: age band [{}, {}) is empty",
                    band.min_age, band.max_age
                )));
            }
        }
        Ok(())
    }
}

/// Linearly interpolated quantile of the non-missing values.
pub(crate) fn quantile(values: impl IntoIterator<Item = f64>, q: f64) -> Option<f64> {
    let mut sorted: Vec<f64> = values.into_iter().filter(|v| !v.is_nan()).collect();
    if sorted.is_empty() {
        return None;
    }
    sorted.sort_by(f64::total_cmp);
    let position = q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64;
    let lower = position.floor() as usize;
    let upper = position.ceil() as usize;
    let fraction = position - lower as f64;
    Some(sorted[lower] + (sorted[upper] - sorted[lower]) * fraction)
}

fn default_income_column() -> String {
    "hh_income".to_string()
}

fn default_kids_column() -> String {
    "nkids".to_string()
}
