use clap::Args;
use std::path::PathBuf;

use crate::defaults;

#[derive(Args, Debug)]
pub struct InitArgs {
    /// Where to write the configuration
    #[arg(short, long, default_value = defaults::CONFIG_FILE)]
    pub output: PathBuf,

    /// First simulated year
    #[arg(long, default_value_t = defaults::START_YEAR)]
    pub start_year: i32,

    /// Number of annual ticks
    #[arg(short = 'y', long, default_value_t = defaults::YEARS)]
    pub years: usize,

    /// Random seed
    #[arg(long, default_value_t = defaults::SEED)]
    pub seed: u64,

    /// Record snapshots to this SQLite database instead of CSV files
    #[arg(long)]
    pub database: Option<PathBuf>,

    /// Overwrite an existing file
    #[arg(long)]
    pub force: bool,
}

#[derive(Args, Debug)]
pub struct RunArgs {
    /// Configuration file
    #[arg(short, long, default_value = defaults::CONFIG_FILE)]
    pub config: PathBuf,

    /// Override the configured seed
    #[arg(long)]
    pub seed: Option<u64>,

    /// Fix the replicate value (default: configured, else random)
    #[arg(long)]
    pub replicate: Option<u64>,

    /// Override the number of years
    #[arg(short = 'y', long)]
    pub years: Option<usize>,

    /// Record to this SQLite database instead of the configured output
    #[arg(short, long)]
    pub database: Option<PathBuf>,

    /// Show progress bar
    #[arg(long, default_value_t = true, action = clap::ArgAction::Set)]
    pub progress: bool,
}

#[derive(Args, Debug)]
pub struct BatchArgs {
    /// Configuration file
    #[arg(short, long, default_value = defaults::CONFIG_FILE)]
    pub config: PathBuf,

    /// Number of replicates
    #[arg(short = 'n', long, default_value_t = defaults::REPLICATES)]
    pub replicates: u64,

    /// Directory for one SQLite database per replicate (default: no output)
    #[arg(short, long)]
    pub output_dir: Option<PathBuf>,

    /// Write per-run summaries as JSON to this file
    #[arg(long)]
    pub summary: Option<PathBuf>,
}
