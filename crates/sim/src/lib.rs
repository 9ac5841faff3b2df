//! # Lifecourse Simulation
//!
//! A discrete-time, module-based microsimulation engine. A population of
//! simulants lives in a columnar store; pluggable modules read and write
//! their own columns once per tick in priority order, drawing randomness
//! from common-random-number streams keyed by simulant identity so that
//! scenarios differing only in policy stay comparable draw for draw.
//!
//! Start with [`simulation::SimulationBuilder`] or
//! [`simulation::Configuration`], and see [`modules`] for the built-in
//! mortality, fertility, transition, intervention and outcome modules.

pub mod errors;
pub mod modules;
pub mod population;
pub mod predictor;
pub mod prelude;
pub mod randomness;
pub mod simulation;
pub mod source;
pub mod storage;

#[cfg(test)]
mod testing;
