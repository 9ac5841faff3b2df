//! Shared default values for command-line arguments.

pub const CONFIG_FILE: &str = "lifecourse.json";
pub const DATABASE: &str = "simulation.db";

pub const START_YEAR: i32 = 2020;
pub const YEARS: usize = 5;
pub const SEED: u64 = 42;

pub const REPLICATES: u64 = 4;

pub const LOG_FILTER: &str = "info";
