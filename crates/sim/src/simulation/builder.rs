//! Builder pattern for creating simulations.
//!
//! Provides a fluent API for assembling a run from a cohort source, a set
//! of modules and seeding options, with validation at `build()`.

use tracing::debug;

use super::configs::{Configuration, OutputConfig};
use super::engine::Simulation;
use super::lifecycle::Replenishment;
use super::module::{Module, DAYS_PER_YEAR};
use super::scheduler::{ModuleRegistry, Scheduler};
use crate::errors::{ConfigError, Result};
use crate::randomness::{RandomnessRegistry, SeedMode};
use crate::source::CohortSource;
use crate::storage::{CsvSnapshotWriter, Recorder, SnapshotWriter};

/// Builder for constructing [`Simulation`] instances with a fluent API.
///
/// The cohort lifecycle manager is registered automatically from the
/// cohort source; every other module is added explicitly.
///
/// # Examples
///
/// ```
/// use lifecourse_sim::population::{Table, Value};
/// use lifecourse_sim::simulation::{Ageing, SimulationBuilder};
/// use lifecourse_sim::source::MemoryCohortSource;
///
/// let cohort = Table::with_len(2)
///     .with_column("pidp", vec![Value::Int(1), Value::Int(2)])
///     .unwrap()
///     .with_column("age", vec![Value::Float(30.0), Value::Float(40.0)])
///     .unwrap();
///
/// let mut sim = SimulationBuilder::new()
///     .start_year(2020)
///     .years(2)
///     .seed(42)
///     .cohorts(MemoryCohortSource::new().with_year(2020, cohort))
///     .module(Ageing::new())
///     .build()
///     .unwrap();
///
/// sim.run().unwrap();
/// assert_eq!(sim.year(), 2022);
/// ```
pub struct SimulationBuilder {
    start_year: Option<i32>,
    num_years: Option<usize>,
    step_days: f64,

    seed: u64,
    replicate: Option<u64>,
    default_mode: SeedMode,
    stream_modes: Vec<(String, SeedMode)>,

    cohorts: Option<Box<dyn CohortSource>>,
    replenish: bool,
    lifecycle_priority: Option<i32>,

    modules: Vec<Box<dyn Module>>,
    writer: Option<Box<dyn SnapshotWriter>>,
}

impl SimulationBuilder {
    pub fn new() -> Self {
        Self {
            start_year: None,
            num_years: None,
            step_days: DAYS_PER_YEAR,
            seed: 0,
            replicate: None,
            default_mode: SeedMode::Common,
            stream_modes: Vec::new(),
            cohorts: None,
            replenish: true,
            lifecycle_priority: None,
            modules: Vec::new(),
            writer: None,
        }
    }

    /// Calendar year of the initial population.
    pub fn start_year(mut self, year: i32) -> Self {
        self.start_year = Some(year);
        self
    }

    /// Number of annual ticks to run.
    pub fn years(mut self, years: usize) -> Self {
        self.num_years = Some(years);
        self
    }

    /// Tick length in days (default 365.25).
    pub fn step_days(mut self, days: f64) -> Self {
        self.step_days = days;
        self
    }

    pub fn seed(mut self, seed: u64) -> Self {
        self.seed = seed;
        self
    }

    /// Fix the replicate value instead of drawing it from OS entropy.
    pub fn replicate(mut self, replicate: u64) -> Self {
        self.replicate = Some(replicate);
        self
    }

    /// Seed mode for streams without an override.
    pub fn seed_mode(mut self, mode: SeedMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Override the seed mode of one module or stream.
    pub fn stream_mode(mut self, name: impl Into<String>, mode: SeedMode) -> Self {
        self.stream_modes.push((name.into(), mode));
        self
    }

    pub fn cohorts(mut self, source: impl CohortSource + 'static) -> Self {
        self.cohorts = Some(Box::new(source));
        self
    }

    pub fn cohorts_boxed(mut self, source: Box<dyn CohortSource>) -> Self {
        self.cohorts = Some(source);
        self
    }

    /// Whether a new cohort is injected each tick (default true).
    pub fn replenish(mut self, replenish: bool) -> Self {
        self.replenish = replenish;
        self
    }

    pub fn lifecycle_priority(mut self, priority: i32) -> Self {
        self.lifecycle_priority = Some(priority);
        self
    }

    pub fn module(mut self, module: impl Module + 'static) -> Self {
        self.modules.push(Box::new(module));
        self
    }

    pub fn module_boxed(mut self, module: Box<dyn Module>) -> Self {
        self.modules.push(module);
        self
    }

    pub fn modules(mut self, modules: impl IntoIterator<Item = Box<dyn Module>>) -> Self {
        self.modules.extend(modules);
        self
    }

    pub fn writer(mut self, writer: impl SnapshotWriter + 'static) -> Self {
        self.writer = Some(Box::new(writer));
        self
    }

    pub fn writer_boxed(mut self, writer: Box<dyn SnapshotWriter>) -> Self {
        self.writer = Some(writer);
        self
    }

    /// Validate and assemble the simulation. Registration errors (duplicate
    /// names, overlapping created columns) surface here.
    pub fn build(self) -> Result<Simulation> {
        let start_year = self
            .start_year
            .ok_or(ConfigError::MissingRequired("start_year"))?;
        let num_years = self
            .num_years
            .ok_or(ConfigError::MissingRequired("years"))?;
        if num_years == 0 {
            return Err(ConfigError::Invalid("years must be at least 1".into()).into());
        }
        if !(self.step_days.is_finite() && self.step_days > 0.0) {
            return Err(ConfigError::Invalid(format!(
                "step_days must be positive, got {}",
                self.step_days
            ))
            .into());
        }
        let source = self.cohorts.ok_or(ConfigError::MissingRequired("cohorts"))?;

        let mut lifecycle = Replenishment::new(source).with_replenish(self.replenish);
        if let Some(priority) = self.lifecycle_priority {
            lifecycle = lifecycle.with_priority(priority);
        }

        let mut registry = ModuleRegistry::new();
        registry.register(Box::new(lifecycle))?;
        registry.register_all(self.modules)?;

        let mut randomness = match self.replicate {
            Some(replicate) => RandomnessRegistry::with_replicate(self.seed, replicate),
            None => RandomnessRegistry::new(self.seed),
        }
        .with_default_mode(self.default_mode);
        for (name, mode) in self.stream_modes {
            randomness.set_mode(name, mode);
        }

        let scheduler = Scheduler::new(registry);
        debug!(
            start_year,
            num_years,
            modules = ?scheduler.registry().names(),
            "simulation built"
        );
        Ok(Simulation::new(
            scheduler,
            randomness,
            self.writer,
            start_year,
            num_years,
            self.step_days,
        ))
    }
}

impl Default for SimulationBuilder {
    fn default() -> Self {
        Self::new()
    }
}

impl OutputConfig {
    /// Open the configured snapshot writer, if any.
    pub fn open(&self) -> Result<Option<Box<dyn SnapshotWriter>>> {
        let writer: Box<dyn SnapshotWriter> = match self {
            OutputConfig::None => return Ok(None),
            OutputConfig::Csv { dir, strategy } => {
                Box::new(CsvSnapshotWriter::new(dir.clone(), strategy.clone())?)
            }
            OutputConfig::Sqlite { path, strategy } => Box::new(Recorder::new(path, strategy.clone())?),
        };
        Ok(Some(writer))
    }
}

impl Simulation {
    /// Build a simulation from a validated configuration, writing
    /// snapshots wherever the configuration says.
    pub fn from_config(config: &Configuration) -> Result<Self> {
        let writer = config.execution.output.open()?;
        Self::from_config_with_writer(config, writer)
    }

    /// Build from a configuration with an explicit writer in place of the
    /// configured output.
    pub fn from_config_with_writer(
        config: &Configuration,
        writer: Option<Box<dyn SnapshotWriter>>,
    ) -> Result<Self> {
        config.validate()?;

        let mut builder = SimulationBuilder::new()
            .start_year(config.execution.start_year)
            .years(config.execution.num_years)
            .step_days(config.execution.step_days)
            .seed(config.randomness.seed)
            .seed_mode(config.randomness.default_mode)
            .cohorts_boxed(config.cohorts.source.build()?)
            .replenish(config.cohorts.replenish)
            .modules(config.modules.iter().map(|spec| spec.build()));
        if let Some(replicate) = config.randomness.replicate {
            builder = builder.replicate(replicate);
        }
        if let Some(priority) = config.cohorts.priority {
            builder = builder.lifecycle_priority(priority);
        }
        for (name, mode) in &config.randomness.modes {
            builder = builder.stream_mode(name.clone(), *mode);
        }
        if let Some(writer) = writer {
            builder = builder.writer_boxed(writer);
        }

        let mut sim = builder.build()?;
        sim.write_metadata("seed", &config.randomness.seed.to_string())?;
        sim.write_metadata("replicate", &sim.randomness().replicate().to_string())?;
        sim.write_metadata("configuration", &serde_json::to_string(config).map_err(ConfigError::from)?)?;
        Ok(sim)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::{RegistrationError, SimulationError};
    use crate::population::{Table, Value};
    use crate::simulation::Ageing;
    use crate::source::MemoryCohortSource;

    fn cohort() -> MemoryCohortSource {
        let table = Table::with_len(1)
            .with_column("pidp", vec![Value::Int(1)])
            .unwrap()
            .with_column("age", vec![Value::Float(50.0)])
            .unwrap();
        MemoryCohortSource::new().with_year(2020, table)
    }

    #[test]
    fn test_missing_required_parameters() {
        let err = SimulationBuilder::new().years(1).cohorts(cohort()).build().unwrap_err();
        assert!(matches!(err, SimulationError::Config(ConfigError::MissingRequired("start_year"))));

        let err = SimulationBuilder::new().start_year(2020).years(1).build().unwrap_err();
        assert!(matches!(err, SimulationError::Config(ConfigError::MissingRequired("cohorts"))));

        let err = SimulationBuilder::new()
            .start_year(2020)
            .years(0)
            .cohorts(cohort())
            .build()
            .unwrap_err();
        assert!(matches!(err, SimulationError::Config(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_duplicate_module_rejected_at_build() {
        let err = SimulationBuilder::new()
            .start_year(2020)
            .years(1)
            .cohorts(cohort())
            .module(Ageing::new())
            .module(Ageing::new())
            .build()
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Registration(RegistrationError::DuplicateModule(name)) if name == "ageing"
        ));
    }

    #[test]
    fn test_lifecycle_registered_first() {
        let sim = SimulationBuilder::new()
            .start_year(2020)
            .years(1)
            .cohorts(cohort())
            .module(Ageing::new())
            .build()
            .unwrap();
        assert_eq!(sim.module_names(), vec!["replenishment", "ageing"]);
    }

    #[test]
    fn test_from_config_runs_example() {
        let mut config = Configuration::example();
        config.execution.output = OutputConfig::None;
        let mut sim = Simulation::from_config(&config).unwrap();
        let summaries = sim.run().unwrap();
        assert_eq!(summaries.len(), config.execution.num_years);
        assert_eq!(sim.year(), 2025);
        // The 2021 cohort arrives in the first tick.
        assert_eq!(sim.store().len(), 6);
    }
}
