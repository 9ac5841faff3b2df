//! Commonly used imports for convenience.
//!
//! # Example
//!
//! ```
//! use lifecourse_sim::prelude::*;
//!
//! let filter: Predicate = "age >= 16".parse().unwrap();
//! assert!(filter.columns().contains("age"));
//! ```

pub use crate::errors::{self, Result, SimulationError};
pub use crate::population::{
    Predicate, PopulationStore, RowIndex, Table, Value, AGE, ALIVE, HIDP, PIDP,
};
pub use crate::predictor::{Predictor, PredictorSpec};
pub use crate::randomness::{RandomnessRegistry, SeedMode, Stream};
pub use crate::simulation::{
    Cohort, CohortKind, Configuration, Module, ModuleContext, Simulation, SimulationBuilder,
    TickSummary, TimeStep,
};
pub use crate::source::{CohortSource, CsvCohortSource, MemoryCohortSource};
pub use crate::storage::{CsvSnapshotWriter, QueryBuilder, Recorder, RecordingStrategy, SnapshotWriter};
