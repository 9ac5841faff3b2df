//! The population store and the tables modules exchange with it.

mod predicate;
mod store;
mod table;

pub use predicate::{CmpOp, Predicate};
pub use store::PopulationStore;
pub use table::{Column, IndexSet, RowIndex, Table, Value};

/// Stable person identifier.
pub const PIDP: &str = "pidp";
/// Household identifier.
pub const HIDP: &str = "hidp";
/// Age in years.
pub const AGE: &str = "age";
/// `alive` / `dead`.
pub const ALIVE: &str = "alive";
/// Simulated time the row entered the population.
pub const ENTRANCE_TIME: &str = "entrance_time";
/// Simulated time the row was retired.
pub const EXIT_TIME: &str = "exit_time";
/// Per-row tick counter.
pub const TIME: &str = "time";

/// Columns every population carries.
pub const CORE_COLUMNS: [&str; 7] = [PIDP, HIDP, AGE, ALIVE, ENTRANCE_TIME, EXIT_TIME, TIME];

/// Vital status stored in the `alive` column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AliveState {
    Alive,
    Dead,
}

impl AliveState {
    pub fn as_str(self) -> &'static str {
        match self {
            AliveState::Alive => "alive",
            AliveState::Dead => "dead",
        }
    }

    pub fn from_value(value: &Value) -> Option<Self> {
        match value {
            Value::Text(s) if s == "alive" => Some(AliveState::Alive),
            Value::Text(s) if s == "dead" => Some(AliveState::Dead),
            Value::Bool(true) => Some(AliveState::Alive),
            Value::Bool(false) => Some(AliveState::Dead),
            _ => None,
        }
    }
}

impl From<AliveState> for Value {
    fn from(state: AliveState) -> Self {
        Value::Text(state.as_str().to_string())
    }
}
