//! Simulation engine and module scheduling.
//!
//! - `Module` / `ModuleContext`: the contract every pluggable unit
//!   implements and the handle it gets to the population and its streams.
//! - `ModuleRegistry` / `Scheduler`: registration checks and
//!   priority-ordered dispatch.
//! - `Replenishment` / `Ageing`: the cohort lifecycle.
//! - `Simulation`: the run loop; `SimulationBuilder` and `Configuration`
//!   assemble one.
//! - `BatchRunner`: independent runs in parallel.

pub mod batch;
pub mod builder;
pub mod configs;
pub mod engine;
pub mod lifecycle;
pub mod module;
pub mod scheduler;

pub use batch::{BatchResult, BatchRun, BatchRunner, RunSummary};
pub use builder::SimulationBuilder;
pub use configs::{
    AgeingConfig, CohortConfig, CohortSourceConfig, Configuration, ExecutionConfig,
    InlineCohort, ModuleSpec, OutputConfig, RandomnessConfig,
};
pub use engine::{Simulation, TickSummary};
pub use lifecycle::{age_alive_population, Ageing, Replenishment, AGEING, REPLENISHMENT};
pub use module::{Cohort, CohortKind, Module, ModuleContext, TimeStep, DAYS_PER_YEAR};
pub use scheduler::{ModuleRegistry, Scheduler};
