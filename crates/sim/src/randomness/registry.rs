use std::collections::HashMap;

use rand::Rng;
use tracing::debug;

use super::stream::{Stream, StreamState};
use super::SeedMode;
use crate::errors::RandomnessError;
use crate::population::RowIndex;

/// Owns every named stream and the simulant keys they draw for.
#[derive(Debug)]
pub struct RandomnessRegistry {
    seed: u64,
    replicate: u64,
    default_mode: SeedMode,
    modes: HashMap<String, SeedMode>,
    keys: HashMap<RowIndex, u64>,
    streams: HashMap<String, StreamState>,
}

impl RandomnessRegistry {
    /// Registry with a fixed run seed and a replicate value drawn from OS
    /// entropy.
    pub fn new(seed: u64) -> Self {
        Self::with_replicate(seed, rand::rng().random())
    }

    pub fn with_replicate(seed: u64, replicate: u64) -> Self {
        Self {
            seed,
            replicate,
            default_mode: SeedMode::Common,
            modes: HashMap::new(),
            keys: HashMap::new(),
            streams: HashMap::new(),
        }
    }

    pub fn with_default_mode(mut self, mode: SeedMode) -> Self {
        self.default_mode = mode;
        self
    }

    /// Override the mode for one stream, or for every stream whose name
    /// starts with `name.`.
    pub fn set_mode(&mut self, name: impl Into<String>, mode: SeedMode) {
        self.modes.insert(name.into(), mode);
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn replicate(&self) -> u64 {
        self.replicate
    }

    /// Mode a stream with this name uses.
    pub fn mode_for(&self, name: &str) -> SeedMode {
        if let Some(mode) = self.modes.get(name) {
            return *mode;
        }
        name.split_once('.')
            .and_then(|(owner, _)| self.modes.get(owner))
            .copied()
            .unwrap_or(self.default_mode)
    }

    /// Register new simulants with their keys.
    ///
    /// Each row may be registered exactly once. The call is all-or-nothing.
    pub fn register(&mut self, index: &[RowIndex], keys: &[u64]) -> Result<(), RandomnessError> {
        if index.len() != keys.len() {
            return Err(RandomnessError::KeyCountMismatch {
                rows: index.len(),
                keys: keys.len(),
            });
        }
        let mut seen = std::collections::HashSet::with_capacity(index.len());
        for &row in index {
            if self.keys.contains_key(&row) || !seen.insert(row) {
                return Err(RandomnessError::AlreadyRegistered(row));
            }
        }
        self.keys.extend(index.iter().copied().zip(keys.iter().copied()));
        debug!(rows = index.len(), total = self.keys.len(), "registered simulants");
        Ok(())
    }

    pub fn is_registered(&self, row: RowIndex) -> bool {
        self.keys.contains_key(&row)
    }

    pub fn registered_count(&self) -> usize {
        self.keys.len()
    }

    /// The stream called `name`, created on first use.
    pub fn get_stream(&mut self, name: &str) -> Stream<'_> {
        let mode = self.mode_for(name);
        let (seed, replicate) = (self.seed, self.replicate);
        let state = self
            .streams
            .entry(name.to_string())
            .or_insert_with(|| StreamState::new(name, mode, seed, replicate));
        Stream::new(state, &self.keys)
    }

    pub fn stream_names(&self) -> impl Iterator<Item = &str> {
        self.streams.keys().map(String::as_str)
    }
}
