//! Independent runs in parallel.
//!
//! Each run builds its own store and randomness registry from its
//! configuration, so runs share nothing but the thread pool.

use rayon::prelude::*;
use serde::Serialize;
use tracing::{info, warn};

use super::configs::Configuration;
use super::engine::{Simulation, TickSummary};
use crate::errors::Result;

/// One run in a batch.
#[derive(Debug, Clone)]
pub struct BatchRun {
    pub label: String,
    pub config: Configuration,
}

/// Outcome of a completed run.
#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub label: String,
    pub final_year: i32,
    pub alive: usize,
    pub dead: usize,
    pub ticks: Vec<TickSummary>,
}

/// Outcome of one run: its summary, or the error that stopped it.
#[derive(Debug)]
pub struct BatchResult {
    pub label: String,
    pub outcome: Result<RunSummary>,
}

impl BatchResult {
    pub fn is_ok(&self) -> bool {
        self.outcome.is_ok()
    }
}

/// Runs a set of configurations with rayon.
#[derive(Debug, Default)]
pub struct BatchRunner {
    runs: Vec<BatchRun>,
}

impl BatchRunner {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add(mut self, label: impl Into<String>, config: Configuration) -> Self {
        self.runs.push(BatchRun {
            label: label.into(),
            config,
        });
        self
    }

    /// One run per replicate value, labelled `{label}-r{replicate}`.
    pub fn add_replicates(mut self, label: &str, config: &Configuration, replicates: u64) -> Self {
        for replicate in 0..replicates {
            let mut config = config.clone();
            config.randomness.replicate = Some(replicate);
            self.runs.push(BatchRun {
                label: format!("{label}-r{replicate}"),
                config,
            });
        }
        self
    }

    pub fn len(&self) -> usize {
        self.runs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.runs.is_empty()
    }

    /// Run everything. Results come back in the order runs were added.
    pub fn run(&self) -> Vec<BatchResult> {
        info!(runs = self.runs.len(), "starting batch");
        let results: Vec<BatchResult> = self
            .runs
            .par_iter()
            .map(|run| BatchResult {
                label: run.label.clone(),
                outcome: run_one(run),
            })
            .collect();
        let failed = results.iter().filter(|r| !r.is_ok()).count();
        info!(runs = results.len(), failed, "batch complete");
        results
    }
}

fn run_one(run: &BatchRun) -> Result<RunSummary> {
    let mut sim = Simulation::from_config(&run.config)?;
    let ticks = sim.run().inspect_err(|e| warn!(run = %run.label, error = %e, "run failed"))?;
    Ok(RunSummary {
        label: run.label.clone(),
        final_year: sim.year(),
        alive: sim.alive_count(),
        dead: sim.dead_count(),
        ticks,
    })
}
