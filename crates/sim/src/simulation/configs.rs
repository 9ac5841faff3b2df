//! Run configuration.
//!
//! A [`Configuration`] can be written to and read from JSON to fully
//! reproduce a run: period, seeding, cohort source, output and the ordered
//! list of active modules.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::errors::{ConfigError, PopulationError};
use crate::modules::{
    CategoricalTransition, CategoricalTransitionConfig, ChildPovertySustain,
    ChildPovertySustainConfig, ChildUplift, ChildUpliftConfig, ContinuousTransition,
    ContinuousTransitionConfig, EquivalisedIncome, EquivalisedIncomeConfig, Fertility,
    FertilityConfig, HouseholdIncomeBoost, HouseholdIncomeBoostConfig, Mortality,
    MortalityConfig, PovertyLineChildUplift, PovertyLineChildUpliftConfig, RateBand, RateTable,
};
use crate::population::{Table, Value};
use crate::randomness::SeedMode;
use crate::simulation::lifecycle::{Ageing, AGEING, REPLENISHMENT};
use crate::simulation::module::{Module, DAYS_PER_YEAR};
use crate::source::{CohortSource, CsvCohortSource, MemoryCohortSource};
use crate::storage::RecordingStrategy;

/// The master configuration struct.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Configuration {
    pub execution: ExecutionConfig,
    #[serde(default)]
    pub randomness: RandomnessConfig,
    pub cohorts: CohortConfig,
    #[serde(default)]
    pub modules: Vec<ModuleSpec>,
}

/// Period and output of a run.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExecutionConfig {
    /// Calendar year of the seeded population.
    pub start_year: i32,
    /// Number of annual ticks.
    pub num_years: usize,
    /// Tick length in days.
    #[serde(default = "default_step_days")]
    pub step_days: f64,
    #[serde(default)]
    pub output: OutputConfig,
}

fn default_step_days() -> f64 {
    DAYS_PER_YEAR
}

/// Where snapshots go.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum OutputConfig {
    /// Keep nothing.
    #[default]
    None,
    /// `{dir}/{year}.csv` per recorded tick.
    Csv {
        dir: PathBuf,
        #[serde(default)]
        strategy: RecordingStrategy,
    },
    /// One SQLite database.
    Sqlite {
        path: PathBuf,
        #[serde(default)]
        strategy: RecordingStrategy,
    },
}

/// Common random number seeding.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RandomnessConfig {
    /// Fixed run seed.
    #[serde(default)]
    pub seed: u64,
    /// Per-run value for replicate streams. Drawn from OS entropy if absent.
    #[serde(default)]
    pub replicate: Option<u64>,
    #[serde(default)]
    pub default_mode: SeedMode,
    /// Per-module (or per-stream) overrides.
    #[serde(default)]
    pub modes: BTreeMap<String, SeedMode>,
}

/// Cohort lifecycle settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CohortConfig {
    pub source: CohortSourceConfig,
    /// Inject the next year's cohort every tick.
    #[serde(default = "default_true")]
    pub replenish: bool,
    #[serde(default)]
    pub priority: Option<i32>,
}

fn default_true() -> bool {
    true
}

/// Where cohorts are loaded from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CohortSourceConfig {
    /// `{dir}/{year}_cohort.csv`
    Csv { dir: PathBuf },
    /// Rows given directly.
    Inline { cohorts: Vec<InlineCohort> },
}

/// The rows entering in one year.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InlineCohort {
    pub year: i32,
    pub rows: Vec<BTreeMap<String, Value>>,
}

impl CohortSourceConfig {
    pub fn build(&self) -> Result<Box<dyn CohortSource>, PopulationError> {
        match self {
            Self::Csv { dir } => Ok(Box::new(CsvCohortSource::new(dir.clone()))),
            Self::Inline { cohorts } => {
                let mut source = MemoryCohortSource::new();
                for cohort in cohorts {
                    source = source.with_year(cohort.year, rows_to_table(&cohort.rows)?);
                }
                Ok(Box::new(source))
            }
        }
    }
}

/// Row maps to a table; columns missing from a row read as `Null`.
fn rows_to_table(rows: &[BTreeMap<String, Value>]) -> Result<Table, PopulationError> {
    let names: BTreeSet<&String> = rows.iter().flat_map(|r| r.keys()).collect();
    let mut table = Table::with_len(rows.len());
    for name in names {
        let values = rows
            .iter()
            .map(|r| r.get(name).cloned().unwrap_or_default())
            .collect();
        table.insert_column(name.as_str(), values)?;
    }
    Ok(table)
}

#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct AgeingConfig {
    #[serde(default)]
    pub priority: Option<i32>,
}

/// One active module. The `type` tag selects the implementation; unknown
/// tags fail to deserialize.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ModuleSpec {
    Mortality(MortalityConfig),
    Ageing(AgeingConfig),
    Fertility(FertilityConfig),
    ContinuousTransition(ContinuousTransitionConfig),
    CategoricalTransition(CategoricalTransitionConfig),
    HouseholdIncomeBoost(HouseholdIncomeBoostConfig),
    ChildUplift(ChildUpliftConfig),
    PovertyLineChildUplift(PovertyLineChildUpliftConfig),
    ChildPovertySustain(ChildPovertySustainConfig),
    EquivalisedIncome(EquivalisedIncomeConfig),
}

impl ModuleSpec {
    /// Name the module will register under.
    pub fn name(&self) -> &str {
        match self {
            Self::Mortality(_) => Mortality::NAME,
            Self::Ageing(_) => AGEING,
            Self::Fertility(_) => Fertility::NAME,
            Self::ContinuousTransition(c) => &c.name,
            Self::CategoricalTransition(c) => &c.name,
            Self::HouseholdIncomeBoost(_) => HouseholdIncomeBoost::NAME,
            Self::ChildUplift(_) => ChildUplift::NAME,
            Self::PovertyLineChildUplift(_) => PovertyLineChildUplift::NAME,
            Self::ChildPovertySustain(_) => ChildPovertySustain::NAME,
            Self::EquivalisedIncome(_) => EquivalisedIncome::NAME,
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        match self {
            Self::Mortality(c) => c.validate(),
            Self::Ageing(_) => Ok(()),
            Self::Fertility(c) => c.validate(),
            Self::ContinuousTransition(c) => c.validate(),
            Self::CategoricalTransition(c) => c.validate(),
            Self::HouseholdIncomeBoost(c) => c.validate(),
            Self::ChildUplift(c) => c.validate(),
            Self::PovertyLineChildUplift(c) => c.validate(),
            Self::ChildPovertySustain(c) => c.validate(),
            Self::EquivalisedIncome(_) => Ok(()),
        }
    }

    pub fn build(&self) -> Box<dyn Module> {
        match self {
            Self::Mortality(c) => Box::new(Mortality::new(c.clone())),
            Self::Ageing(c) => {
                let ageing = Ageing::new();
                Box::new(match c.priority {
                    Some(p) => ageing.with_priority(p),
                    None => ageing,
                })
            }
            Self::Fertility(c) => Box::new(Fertility::new(c.clone())),
            Self::ContinuousTransition(c) => Box::new(ContinuousTransition::new(c.clone())),
            Self::CategoricalTransition(c) => Box::new(CategoricalTransition::new(c.clone())),
            Self::HouseholdIncomeBoost(c) => Box::new(HouseholdIncomeBoost::new(c.clone())),
            Self::ChildUplift(c) => Box::new(ChildUplift::new(c.clone())),
            Self::PovertyLineChildUplift(c) => Box::new(PovertyLineChildUplift::new(c.clone())),
            Self::ChildPovertySustain(c) => Box::new(ChildPovertySustain::new(c.clone())),
            Self::EquivalisedIncome(c) => Box::new(EquivalisedIncome::new(c.clone())),
        }
    }
}

impl Configuration {
    /// Load from a JSON file.
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&raw)?)
    }

    /// Write as pretty JSON.
    pub fn to_file(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        std::fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }

    /// Check static constraints before any simulation state exists.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let execution = &self.execution;
        if execution.num_years == 0 {
            return Err(ConfigError::Invalid("num_years must be at least 1".into()));
        }
        if !(execution.step_days.is_finite() && execution.step_days > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "step_days must be positive, got {}",
                execution.step_days
            )));
        }
        if let CohortSourceConfig::Inline { cohorts } = &self.cohorts.source {
            if !cohorts.iter().any(|c| c.year == execution.start_year) {
                return Err(ConfigError::Invalid(format!(
                    "inline cohorts have no rows for start year {}",
                    execution.start_year
                )));
            }
        }

        let mut names = BTreeSet::from([REPLENISHMENT]);
        for spec in &self.modules {
            if !names.insert(spec.name()) {
                return Err(ConfigError::Invalid(format!(
                    "module '{}' is configured more than once",
                    spec.name()
                )));
            }
            spec.validate()?;
        }
        Ok(())
    }

    /// A small self-contained configuration, used by `lifecourse init`.
    pub fn example() -> Self {
        let person = |pidp: i64, hidp: i64, age: f64, sex: &str, income: f64, nkids: i64| {
            BTreeMap::from([
                ("pidp".to_string(), Value::Int(pidp)),
                ("hidp".to_string(), Value::Int(hidp)),
                ("age".to_string(), Value::Float(age)),
                ("sex".to_string(), Value::from(sex)),
                ("hh_income".to_string(), Value::Float(income)),
                ("nkids".to_string(), Value::Int(nkids)),
            ])
        };
        let initial = vec![
            person(1, 1, 34.0, "Female", 900.0, 2),
            person(2, 1, 36.0, "Male", 900.0, 2),
            person(3, 2, 28.0, "Female", 2400.0, 0),
            person(4, 3, 61.0, "Male", 1500.0, 0),
            person(5, 4, 45.0, "Female", 600.0, 1),
        ];
        let incoming = vec![person(6, 5, 16.0, "Male", 1100.0, 0)];

        Self {
            execution: ExecutionConfig {
                start_year: 2020,
                num_years: 5,
                step_days: DAYS_PER_YEAR,
                output: OutputConfig::Csv {
                    dir: PathBuf::from("output"),
                    strategy: RecordingStrategy::All,
                },
            },
            randomness: RandomnessConfig {
                seed: 42,
                ..Default::default()
            },
            cohorts: CohortConfig {
                source: CohortSourceConfig::Inline {
                    cohorts: vec![
                        InlineCohort {
                            year: 2020,
                            rows: initial,
                        },
                        InlineCohort {
                            year: 2021,
                            rows: incoming,
                        },
                    ],
                },
                replenish: true,
                priority: None,
            },
            modules: vec![
                ModuleSpec::Mortality(MortalityConfig {
                    priority: None,
                    rates: RateTable::new(vec![
                        RateBand {
                            sex: None,
                            min_age: 0.0,
                            max_age: 60.0,
                            rate: 0.002,
                        },
                        RateBand {
                            sex: None,
                            min_age: 60.0,
                            max_age: 150.0,
                            rate: 0.02,
                        },
                    ]),
                    life_expectancy: Mortality::DEFAULT_LIFE_EXPECTANCY,
                    sex_column: None,
                }),
                ModuleSpec::Ageing(AgeingConfig::default()),
                ModuleSpec::ChildUplift(ChildUpliftConfig::default()),
                ModuleSpec::EquivalisedIncome(EquivalisedIncomeConfig::default()),
            ],
        }
    }
}
