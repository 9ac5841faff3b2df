//! The contract every pluggable unit implements.

use std::collections::BTreeSet;

use crate::errors::{PopulationError, Result};
use crate::population::{
    AliveState, IndexSet, PopulationStore, Predicate, RowIndex, Table, ALIVE, EXIT_TIME,
};
use crate::randomness::{RandomnessRegistry, Stream};

use super::lifecycle;

/// Days in an average year.
pub const DAYS_PER_YEAR: f64 = 365.25;

/// The clock a module sees during one call.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TimeStep {
    /// Calendar year being simulated.
    pub year: i32,
    /// Ticks completed before this one (0 during setup).
    pub tick: usize,
    /// Length of a tick in days.
    pub step_days: f64,
}

impl TimeStep {
    /// Tick length in years.
    pub fn years(&self) -> f64 {
        self.step_days / DAYS_PER_YEAR
    }

    /// Simulation time stamped into `entrance_time` / `exit_time`.
    pub fn time(&self) -> f64 {
        f64::from(self.year)
    }
}

/// Where a batch of new simulants came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CohortKind {
    /// The starting population loaded during setup.
    Initial,
    /// A periodic batch loaded from the cohort source.
    Replenishment,
    /// Newborns created by a module. Rows carry core columns only.
    Birth,
}

impl CohortKind {
    pub fn as_str(self) -> &'static str {
        match self {
            CohortKind::Initial => "initial",
            CohortKind::Replenishment => "replenishment",
            CohortKind::Birth => "birth",
        }
    }
}

/// A batch of simulants that just entered the population.
#[derive(Debug, Clone, PartialEq)]
pub struct Cohort {
    pub kind: CohortKind,
    pub year: i32,
    /// Store indices assigned to the new rows.
    pub index: IndexSet,
    /// For births, the parent row of each new row.
    pub parents: Option<IndexSet>,
}

/// A pluggable unit: domain model, intervention or lifecycle step.
///
/// Created columns must be disjoint across every registered module. A
/// module may write columns it creates and columns it lists as required.
pub trait Module: Send {
    /// Unique name. Also the default random stream name.
    fn name(&self) -> &str;

    /// Lower runs earlier within a tick.
    fn priority(&self) -> i32;

    /// Columns the module reads.
    fn columns_required(&self) -> Vec<String> {
        Vec::new()
    }

    /// Columns the module owns.
    fn columns_created(&self) -> Vec<String> {
        Vec::new()
    }

    /// One-time hook before the first tick. The lifecycle manager seeds the
    /// initial population here.
    fn setup(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        let _ = ctx;
        Ok(())
    }

    /// Set defaults for owned columns on a new cohort.
    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        let _ = (ctx, cohort);
        Ok(())
    }

    /// Called once per tick with every row index in the store.
    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()>;
}

/// Everything a module may touch during one call.
pub struct ModuleContext<'a> {
    module: &'a str,
    writable: &'a BTreeSet<String>,
    store: &'a mut PopulationStore,
    randomness: &'a mut RandomnessRegistry,
    step: TimeStep,
    created: &'a mut Vec<Cohort>,
}

impl<'a> ModuleContext<'a> {
    pub(crate) fn new(
        module: &'a str,
        writable: &'a BTreeSet<String>,
        store: &'a mut PopulationStore,
        randomness: &'a mut RandomnessRegistry,
        step: TimeStep,
        created: &'a mut Vec<Cohort>,
    ) -> Self {
        Self {
            module,
            writable,
            store,
            randomness,
            step,
            created,
        }
    }

    pub fn module(&self) -> &str {
        self.module
    }

    pub fn step(&self) -> TimeStep {
        self.step
    }

    pub fn year(&self) -> i32 {
        self.step.year
    }

    /// Projection of the given rows.
    pub fn view(
        &self,
        index: &[RowIndex],
        columns: &[&str],
        filter: Option<&Predicate>,
    ) -> Result<Table, PopulationError> {
        self.store.view_rows(index, columns, filter)
    }

    /// Projection of the given rows that are alive.
    pub fn view_alive(&self, index: &[RowIndex], columns: &[&str]) -> Result<Table, PopulationError> {
        self.store.view_rows(index, columns, Some(&Predicate::alive()))
    }

    /// Write back a partial table. Every column must be one this module
    /// requires or creates.
    pub fn update(&mut self, partial: &Table) -> Result<(), PopulationError> {
        if let Some(column) = partial.column_names().find(|c| !self.writable.contains(*c)) {
            return Err(PopulationError::NotInView {
                module: self.module.to_string(),
                column: column.to_string(),
            });
        }
        if partial.is_empty() {
            return Ok(());
        }
        self.store.update(self.module, partial)
    }

    /// The module's own random stream.
    pub fn stream(&mut self) -> Stream<'_> {
        self.randomness.get_stream(self.module)
    }

    /// A purpose-specific stream, named `module.purpose`.
    pub fn stream_for(&mut self, purpose: &str) -> Stream<'_> {
        let name = format!("{}.{purpose}", self.module);
        self.randomness.get_stream(&name)
    }

    /// Mark rows dead and stamp their exit time. Rows stay in the store.
    pub fn retire(&mut self, index: &[RowIndex]) -> Result<(), PopulationError> {
        if index.is_empty() {
            return Ok(());
        }
        let partial = Table::new(index.to_vec())
            .with_constant(ALIVE, AliveState::Dead)
            .with_constant(EXIT_TIME, self.step.time());
        self.update(&partial)
    }

    /// Add a batch of simulants, register them for random draws and queue
    /// them for every module's `on_initialize`.
    ///
    /// Missing identifiers are only filled in for births; other cohorts must
    /// carry their own `pidp`.
    pub fn create_cohort(
        &mut self,
        rows: Table,
        kind: CohortKind,
        parents: Option<IndexSet>,
    ) -> Result<IndexSet> {
        let index = lifecycle::admit(self.store, self.randomness, self.module, rows, kind, self.step)?;
        if !index.is_empty() {
            self.created.push(Cohort {
                kind,
                year: self.step.year,
                index: index.clone(),
                parents,
            });
        }
        Ok(index)
    }

    /// Claim extra columns for this module, e.g. the schema of the
    /// initial cohort.
    pub fn declare_columns(&mut self, columns: &[&str]) -> Result<(), PopulationError> {
        self.store.declare_columns(self.module, columns)
    }

    /// Store rows, alive or dead.
    pub fn population_size(&self) -> usize {
        self.store.len()
    }

    /// Identifiers the store has never held.
    pub fn fresh_identifiers(&self, count: usize) -> Vec<i64> {
        self.store.fresh_identifiers(count)
    }
}
