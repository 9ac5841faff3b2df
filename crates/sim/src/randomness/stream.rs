use std::collections::HashMap;

use rand::{Rng, SeedableRng};
use rand_distr::{Distribution, Normal};
use rand_xoshiro::Xoshiro256PlusPlus;

use super::{first_u64, SeedMode};
use crate::errors::RandomnessError;
use crate::population::{IndexSet, RowIndex};

/// Persistent state of one named stream.
#[derive(Debug)]
pub(crate) struct StreamState {
    name: String,
    seed: u64,
    generators: HashMap<RowIndex, Xoshiro256PlusPlus>,
}

impl StreamState {
    pub(crate) fn new(name: &str, mode: SeedMode, seed: u64, replicate: u64) -> Self {
        let mut hasher = blake3::Hasher::new();
        hasher.update(name.as_bytes());
        hasher.update(&[0]);
        hasher.update(&seed.to_le_bytes());
        if mode == SeedMode::Replicate {
            hasher.update(&replicate.to_le_bytes());
        }
        Self {
            name: name.to_string(),
            seed: first_u64(hasher.finalize().as_bytes()),
            generators: HashMap::new(),
        }
    }
}

/// Handle to a named stream for the duration of one module call.
pub struct Stream<'a> {
    state: &'a mut StreamState,
    keys: &'a HashMap<RowIndex, u64>,
}

impl<'a> Stream<'a> {
    pub(crate) fn new(state: &'a mut StreamState, keys: &'a HashMap<RowIndex, u64>) -> Self {
        Self { state, keys }
    }

    pub fn name(&self) -> &str {
        &self.state.name
    }

    fn generator(&mut self, row: RowIndex) -> Result<&mut Xoshiro256PlusPlus, RandomnessError> {
        let key = *self.keys.get(&row).ok_or_else(|| RandomnessError::Unregistered {
            stream: self.state.name.clone(),
            index: row,
        })?;
        let stream_seed = self.state.seed;
        Ok(self.state.generators.entry(row).or_insert_with(|| {
            let mut hasher = blake3::Hasher::new();
            hasher.update(&stream_seed.to_le_bytes());
            hasher.update(&key.to_le_bytes());
            Xoshiro256PlusPlus::from_seed(*hasher.finalize().as_bytes())
        }))
    }

    fn check_registered(&self, index: &[RowIndex]) -> Result<(), RandomnessError> {
        match index.iter().find(|row| !self.keys.contains_key(row)) {
            Some(&row) => Err(RandomnessError::Unregistered {
                stream: self.state.name.clone(),
                index: row,
            }),
            None => Ok(()),
        }
    }

    fn invalid(&self, reason: String) -> RandomnessError {
        RandomnessError::InvalidDistribution {
            stream: self.state.name.clone(),
            reason,
        }
    }

    /// One uniform value in `[0, 1)` per row, in the order given.
    pub fn draw_uniform(&mut self, index: &[RowIndex]) -> Result<Vec<f64>, RandomnessError> {
        self.check_registered(index)?;
        index
            .iter()
            .map(|&row| Ok(self.generator(row)?.random::<f64>()))
            .collect()
    }

    /// Draw one category per row from its probability row.
    ///
    /// A single uniform is compared against the running cumulative sum in
    /// category order; the first category whose cumulative probability
    /// exceeds the draw is chosen. Probabilities are not renormalized. If
    /// rounding leaves the draw above the final cumulative sum, the last
    /// category is chosen.
    pub fn sample_categorical<T: Clone>(
        &mut self,
        index: &[RowIndex],
        categories: &[T],
        probabilities: &[Vec<f64>],
    ) -> Result<Vec<T>, RandomnessError> {
        if categories.is_empty() {
            return Err(self.invalid("no categories".to_string()));
        }
        if probabilities.len() != index.len() {
            return Err(self.invalid(format!(
                "{} probability rows for {} simulants",
                probabilities.len(),
                index.len()
            )));
        }
        if let Some((row, p)) = probabilities
            .iter()
            .enumerate()
            .find(|(_, p)| p.len() != categories.len())
        {
            return Err(self.invalid(format!(
                "row {row} has {} probabilities for {} categories",
                p.len(),
                categories.len()
            )));
        }

        let draws = self.draw_uniform(index)?;
        Ok(draws
            .iter()
            .zip(probabilities)
            .map(|(&u, row)| categories[bucket(u, row)].clone())
            .collect())
    }

    /// Rows whose draw falls below their own probability.
    pub fn filter_for_probability(
        &mut self,
        index: &[RowIndex],
        probabilities: &[f64],
    ) -> Result<IndexSet, RandomnessError> {
        if probabilities.len() != index.len() {
            return Err(self.invalid(format!(
                "{} probabilities for {} simulants",
                probabilities.len(),
                index.len()
            )));
        }
        let draws = self.draw_uniform(index)?;
        Ok(index
            .iter()
            .zip(draws.iter().zip(probabilities))
            .filter(|(_, (u, p))| *u < *p)
            .map(|(&row, _)| row)
            .collect())
    }

    /// Pick one option per row with a shared weight vector.
    ///
    /// Weights are normalized to sum to one.
    pub fn choice<T: Clone>(
        &mut self,
        index: &[RowIndex],
        options: &[T],
        weights: &[f64],
    ) -> Result<Vec<T>, RandomnessError> {
        if options.len() != weights.len() || options.is_empty() {
            return Err(self.invalid(format!(
                "{} weights for {} options",
                weights.len(),
                options.len()
            )));
        }
        let total: f64 = weights.iter().sum();
        if !(total.is_finite() && total > 0.0) || weights.iter().any(|w| *w < 0.0) {
            return Err(self.invalid(format!("unusable weights {weights:?}")));
        }
        let normalized: Vec<f64> = weights.iter().map(|w| w / total).collect();
        let draws = self.draw_uniform(index)?;
        Ok(draws
            .iter()
            .map(|&u| options[bucket(u, &normalized)].clone())
            .collect())
    }

    /// One normal draw per row.
    pub fn draw_normal(
        &mut self,
        index: &[RowIndex],
        mean: f64,
        std_dev: f64,
    ) -> Result<Vec<f64>, RandomnessError> {
        let normal = Normal::new(mean, std_dev)
            .map_err(|e| self.invalid(format!("normal({mean}, {std_dev}): {e}")))?;
        self.check_registered(index)?;
        index
            .iter()
            .map(|&row| Ok(normal.sample(self.generator(row)?)))
            .collect()
    }

    /// The rows reordered by one uniform draw each.
    ///
    /// Each row's position depends only on its own draw, so adding or
    /// removing other rows does not change the relative order of the rest.
    pub fn shuffle(&mut self, index: &[RowIndex]) -> Result<IndexSet, RandomnessError> {
        let draws = self.draw_uniform(index)?;
        let mut keyed: Vec<(f64, RowIndex)> = draws.into_iter().zip(index.iter().copied()).collect();
        keyed.sort_by(|a, b| a.0.total_cmp(&b.0).then(a.1.cmp(&b.1)));
        Ok(keyed.into_iter().map(|(_, row)| row).collect())
    }
}

/// Index of the first cumulative bucket exceeding `u`.
fn bucket(u: f64, probabilities: &[f64]) -> usize {
    let mut cumulative = 0.0;
    for (i, p) in probabilities.iter().enumerate() {
        cumulative += p;
        if cumulative > u {
            return i;
        }
    }
    probabilities.len() - 1
}
