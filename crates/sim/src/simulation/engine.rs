//! Simulation engine: setup, then one scheduler pass per annual tick.

use std::ops::ControlFlow;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};

use super::module::TimeStep;
use super::scheduler::Scheduler;
use crate::errors::{RegistrationError, Result, SimulationError};
use crate::population::{AliveState, PopulationStore, Predicate, Table, Value, ALIVE};
use crate::randomness::RandomnessRegistry;
use crate::storage::SnapshotWriter;

/// Population counts after a completed tick (or after setup, tick 0).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TickSummary {
    pub tick: usize,
    pub year: i32,
    pub alive: usize,
    pub dead: usize,
    /// Rows added during this tick.
    pub added: usize,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    Built,
    Ready,
    /// A setup or tick error left the store partially updated.
    Failed,
}

fn failed() -> SimulationError {
    RegistrationError::Phase("simulation failed in an earlier tick".into()).into()
}

/// Main simulation engine.
///
/// Owns its population store and randomness registry outright, so
/// independent simulations share no state.
pub struct Simulation {
    store: PopulationStore,
    randomness: RandomnessRegistry,
    scheduler: Scheduler,
    writer: Option<Box<dyn SnapshotWriter>>,
    start_year: i32,
    num_years: usize,
    step_days: f64,
    tick: usize,
    phase: Phase,
    history: Vec<TickSummary>,
}

impl Simulation {
    pub(crate) fn new(
        scheduler: Scheduler,
        randomness: RandomnessRegistry,
        writer: Option<Box<dyn SnapshotWriter>>,
        start_year: i32,
        num_years: usize,
        step_days: f64,
    ) -> Self {
        Self {
            store: PopulationStore::new(),
            randomness,
            scheduler,
            writer,
            start_year,
            num_years,
            step_days,
            tick: 0,
            phase: Phase::Built,
            history: Vec::new(),
        }
    }

    fn time_step(&self) -> TimeStep {
        TimeStep {
            year: self.year(),
            tick: self.tick,
            step_days: self.step_days,
        }
    }

    /// Declare columns, seed the initial population and check every
    /// module's read requirements. Writes the tick-0 snapshot.
    pub fn setup(&mut self) -> Result<TickSummary> {
        match self.phase {
            Phase::Built => {}
            Phase::Ready => {
                return Err(RegistrationError::Phase("simulation is already set up".into()).into())
            }
            Phase::Failed => return Err(failed()),
        }
        let result = self.prepare();
        if result.is_err() {
            self.phase = Phase::Failed;
        }
        result
    }

    fn prepare(&mut self) -> Result<TickSummary> {
        let step = self.time_step();
        let _span = info_span!("setup", year = step.year).entered();

        self.scheduler.declare_columns(&mut self.store)?;
        self.scheduler
            .setup(&mut self.store, &mut self.randomness, step)?;
        self.scheduler.check_requirements(&self.store)?;
        self.phase = Phase::Ready;

        let summary = self.summarize(self.store.len());
        self.write_snapshot()?;
        info!(
            year = summary.year,
            alive = summary.alive,
            modules = self.scheduler.registry().len(),
            "simulation ready"
        );
        self.history.push(summary);
        Ok(summary)
    }

    /// Advance one tick.
    ///
    /// On failure nothing is written for the tick; the last snapshot stays
    /// the last complete state. The store may hold partial updates, so every
    /// later `step` or `run*` call is rejected.
    pub fn step(&mut self) -> Result<TickSummary> {
        match self.phase {
            Phase::Ready => {}
            Phase::Built => {
                return Err(RegistrationError::Phase("step called before setup".into()).into())
            }
            Phase::Failed => return Err(failed()),
        }
        let result = self.advance();
        if let Err(err) = &result {
            warn!(year = self.year() + 1, error = %err, "tick failed, simulation halted");
            self.phase = Phase::Failed;
        }
        result
    }

    fn advance(&mut self) -> Result<TickSummary> {
        let step = TimeStep {
            year: self.year() + 1,
            tick: self.tick + 1,
            step_days: self.step_days,
        };
        let _span = info_span!("tick", year = step.year, tick = step.tick).entered();

        let before = self.store.len();
        self.scheduler
            .run_tick(&mut self.store, &mut self.randomness, step)?;
        self.tick += 1;

        let summary = self.summarize(self.store.len() - before);
        self.write_snapshot()?;
        info!(
            year = summary.year,
            alive = summary.alive,
            dead = summary.dead,
            added = summary.added,
            "tick complete"
        );
        self.history.push(summary);
        Ok(summary)
    }

    /// Run the remaining configured ticks, setting up first if needed.
    pub fn run(&mut self) -> Result<Vec<TickSummary>> {
        let mut summaries = Vec::new();
        self.run_with(|summary| {
            summaries.push(*summary);
            ControlFlow::Continue(())
        })?;
        Ok(summaries)
    }

    /// Run up to `ticks` more ticks.
    pub fn run_for(&mut self, ticks: usize) -> Result<Vec<TickSummary>> {
        if self.phase != Phase::Ready {
            self.setup()?;
        }
        (0..ticks).map(|_| self.step()).collect()
    }

    /// Run the remaining configured ticks, calling `observe` after each.
    /// Returning `ControlFlow::Break` stops the run between ticks.
    pub fn run_with<F>(&mut self, mut observe: F) -> Result<()>
    where
        F: FnMut(&TickSummary) -> ControlFlow<()>,
    {
        if self.phase != Phase::Ready {
            self.setup()?;
        }
        while self.tick < self.num_years {
            let summary = self.step()?;
            if observe(&summary).is_break() {
                info!(year = summary.year, "run stopped early");
                break;
            }
        }
        if let Some(writer) = self.writer.as_mut() {
            writer.finish()?;
        }
        Ok(())
    }

    fn summarize(&self, added: usize) -> TickSummary {
        let alive = self.store.alive_index().len();
        TickSummary {
            tick: self.tick,
            year: self.year(),
            alive,
            dead: self.store.len() - alive,
            added,
        }
    }

    fn write_snapshot(&mut self) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            let snapshot = self.store.snapshot();
            writer.write_snapshot(self.tick, self.start_year + self.tick as i32, &snapshot)?;
        }
        Ok(())
    }

    /// Record run metadata with the snapshot writer, if any.
    pub fn write_metadata(&mut self, key: &str, value: &str) -> Result<()> {
        if let Some(writer) = self.writer.as_mut() {
            writer.write_metadata(key, value)?;
        }
        Ok(())
    }

    /// Calendar year of the last completed tick.
    pub fn year(&self) -> i32 {
        self.start_year + self.tick as i32
    }

    pub fn start_year(&self) -> i32 {
        self.start_year
    }

    /// Completed ticks.
    pub fn tick(&self) -> usize {
        self.tick
    }

    pub fn num_years(&self) -> usize {
        self.num_years
    }

    pub fn is_complete(&self) -> bool {
        self.tick >= self.num_years
    }

    pub fn history(&self) -> &[TickSummary] {
        &self.history
    }

    pub fn store(&self) -> &PopulationStore {
        &self.store
    }

    pub fn randomness(&self) -> &RandomnessRegistry {
        &self.randomness
    }

    /// Module names in execution order.
    pub fn module_names(&self) -> Vec<&str> {
        self.scheduler.registry().names()
    }

    /// Read-only projection of the whole population.
    pub fn view(&self, columns: &[&str], filter: Option<&Predicate>) -> Result<Table> {
        Ok(self.store.view(columns, filter)?)
    }

    /// Single column for every row, in store order.
    pub fn column(&self, column: &str) -> Result<Vec<Value>> {
        Ok(self.store.view(&[column], None)?.column(column)?.to_vec())
    }

    /// Number of rows currently alive.
    pub fn alive_count(&self) -> usize {
        self.store.alive_index().len()
    }

    /// Number of tombstoned rows.
    pub fn dead_count(&self) -> usize {
        self.store
            .view(&[ALIVE], Some(&Predicate::eq(ALIVE, AliveState::Dead.as_str())))
            .map_or(0, |t| t.len())
    }
}

impl std::fmt::Debug for Simulation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Simulation")
            .field("start_year", &self.start_year)
            .field("num_years", &self.num_years)
            .field("tick", &self.tick)
            .field("rows", &self.store.len())
            .field("modules", &self.module_names())
            .finish()
    }
}
