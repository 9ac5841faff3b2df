use serde::{Deserialize, Serialize};

/// Which ticks a recorder persists. Tick 0 is the seeded population.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordingStrategy {
    /// Record every N ticks.
    EveryN(usize),

    /// Record at specific ticks.
    Specific(Vec<usize>),

    /// Record every tick.
    #[default]
    All,

    /// No recording.
    None,
}

impl RecordingStrategy {
    pub fn should_record(&self, tick: usize) -> bool {
        match self {
            Self::EveryN(0) => false,
            Self::EveryN(n) => tick % n == 0,
            Self::Specific(ticks) => ticks.contains(&tick),
            Self::All => true,
            Self::None => false,
        }
    }
}

/// Alive/dead counts for one recorded year.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct YearSummary {
    pub year: i32,
    pub rows: usize,
    pub alive: usize,
    pub dead: usize,
}
