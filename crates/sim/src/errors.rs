//! Error types for every engine subsystem.
//!
//! Each subsystem reports its own enum; [`SimulationError`] collects them so
//! the run loop can propagate any failure with `?`.

use thiserror::Error;

use crate::population::RowIndex;

/// Errors raised by the population store.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PopulationError {
    /// A requested column was never declared or created.
    #[error("unknown column: {0}")]
    UnknownColumn(String),

    /// A module tried to create a column owned by another module.
    #[error("column '{column}' is owned by '{owner}', '{claimant}' cannot create it")]
    ColumnOwnership {
        column: String,
        owner: String,
        claimant: String,
    },

    /// An index passed to `update` does not exist in the store.
    #[error("unknown row index: {0}")]
    UnknownRow(RowIndex),

    /// A module wrote a column outside its declared columns.
    #[error("module '{module}' did not declare column '{column}'")]
    NotInView { module: String, column: String },

    /// A write would bring a tombstoned simulant back to life.
    #[error("row {0} is dead and cannot be set alive again")]
    Resurrection(RowIndex),

    /// A table was assembled with columns of different lengths.
    #[error("column '{column}' has {actual} values, expected {expected}")]
    LengthMismatch {
        column: String,
        expected: usize,
        actual: usize,
    },

    /// A value had a type the caller could not use.
    #[error("column '{column}' at row {index}: expected {expected}")]
    TypeMismatch {
        column: String,
        index: RowIndex,
        expected: &'static str,
    },

    /// A filter expression could not be parsed.
    #[error("invalid filter expression '{expression}': {reason}")]
    InvalidPredicate { expression: String, reason: String },
}

/// Errors raised by the common random number registry.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RandomnessError {
    /// A draw was attempted for a simulant that was never registered.
    #[error("stream '{stream}' drew for unregistered row {index}")]
    Unregistered { stream: String, index: RowIndex },

    /// A simulant was registered twice.
    #[error("row {0} is already registered with the randomness system")]
    AlreadyRegistered(RowIndex),

    /// Registration keys did not line up with the index set.
    #[error("registration got {keys} keys for {rows} rows")]
    KeyCountMismatch { rows: usize, keys: usize },

    /// Invalid argument to a distribution.
    #[error("stream '{stream}': {reason}")]
    InvalidDistribution { stream: String, reason: String },
}

/// Errors raised while registering modules.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum RegistrationError {
    /// Two modules share a name.
    #[error("duplicate module name: {0}")]
    DuplicateModule(String),

    /// Two modules declared the same created column.
    #[error("column '{column}' is created by both '{first}' and '{second}'")]
    ColumnOwnership {
        column: String,
        first: String,
        second: String,
    },

    /// A module reads a column nobody creates.
    #[error("module '{module}' requires column '{column}' which no module creates")]
    MissingColumn { module: String, column: String },

    /// Setup was requested twice or steps were requested before setup.
    #[error("simulation phase error: {0}")]
    Phase(String),
}

/// Errors raised by the cohort lifecycle.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum CohortError {
    /// An incoming identifier is already held (alive or tombstoned) by the store.
    #[error("identifier {pidp} collides with an existing simulant")]
    IdentifierCollision { pidp: i64 },

    /// An incoming batch repeats an identifier.
    #[error("identifier {pidp} appears more than once in the incoming cohort")]
    DuplicateIdentifier { pidp: i64 },

    /// An incoming row has no usable identifier.
    #[error("incoming cohort row {position} has no integer '{column}'")]
    MissingIdentifier { position: usize, column: &'static str },

    /// The initial population was seeded twice.
    #[error("initial population has already been seeded")]
    AlreadySeeded,

    /// The cohort source failed to produce data.
    #[error("cohort source failed for year {year}: {reason}")]
    Source { year: i32, reason: String },
}

/// Errors raised when an external predictor output is unusable.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum PredictorError {
    /// The predictor returned a different number of rows than it was given.
    #[error("{module}/{predictor}: expected {expected} rows, got {actual}")]
    RowCountMismatch {
        module: String,
        predictor: String,
        expected: usize,
        actual: usize,
    },

    /// A probability row has the wrong number of categories.
    #[error("{module}/{predictor}: row {row} has {actual} probabilities for {expected} categories")]
    CategoryMismatch {
        module: String,
        predictor: String,
        row: usize,
        expected: usize,
        actual: usize,
    },

    /// A probability row is negative, not finite or does not sum to one.
    #[error("{module}/{predictor}: row {row} is not a probability distribution ({reason})")]
    MalformedProbabilities {
        module: String,
        predictor: String,
        row: usize,
        reason: String,
    },

    /// A covariate was missing or non-numeric.
    #[error("{module}/{predictor}: {reason}")]
    Covariate {
        module: String,
        predictor: String,
        reason: String,
    },
}

impl PredictorError {
    /// Attribute the error to the module that called the predictor.
    pub fn for_module(mut self, name: &str) -> Self {
        match &mut self {
            Self::RowCountMismatch { module, .. }
            | Self::CategoryMismatch { module, .. }
            | Self::MalformedProbabilities { module, .. }
            | Self::Covariate { module, .. } => *module = name.to_string(),
        }
        self
    }
}

/// Errors raised by configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid configuration: {0}")]
    Invalid(String),

    #[error("missing required parameter: {0}")]
    MissingRequired(&'static str),

    #[error("failed to read configuration: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse configuration: {0}")]
    Parse(#[from] serde_json::Error),
}

/// Errors raised by snapshot writers, cohort files and the query interface.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    #[error("csv error: {0}")]
    Csv(#[from] csv::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("no snapshot recorded for year {0}")]
    MissingSnapshot(i32),
}

/// Any failure that aborts a run.
#[derive(Debug, Error)]
pub enum SimulationError {
    #[error(transparent)]
    Population(#[from] PopulationError),

    #[error(transparent)]
    Randomness(#[from] RandomnessError),

    #[error(transparent)]
    Registration(#[from] RegistrationError),

    #[error(transparent)]
    Cohort(#[from] CohortError),

    #[error(transparent)]
    Predictor(#[from] PredictorError),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Storage(#[from] StorageError),

    /// A module failed; wraps the underlying error with the module name.
    #[error("module '{module}' failed in year {year}: {source}")]
    Module {
        module: String,
        year: i32,
        #[source]
        source: Box<SimulationError>,
    },
}

impl SimulationError {
    /// Attach the failing module's name and the simulated year.
    pub fn in_module(self, module: &str, year: i32) -> Self {
        match self {
            already @ Self::Module { .. } => already,
            other => Self::Module {
                module: module.to_string(),
                year,
                source: Box::new(other),
            },
        }
    }

    /// The innermost error, skipping module attribution.
    pub fn root(&self) -> &SimulationError {
        match self {
            Self::Module { source, .. } => source.root(),
            other => other,
        }
    }
}

/// Result alias used across the engine.
pub type Result<T, E = SimulationError> = std::result::Result<T, E>;
