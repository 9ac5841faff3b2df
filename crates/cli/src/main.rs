mod args;
mod commands;
pub mod defaults;
mod printing;

use anyhow::Result;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use args::{BatchArgs, InitArgs, RunArgs};
use commands::{batch, export, init, inspect, run, validate};

/// Lifecourse: a discrete-time microsimulation engine
///
/// Simulates a population year by year through pluggable modules
/// (mortality, ageing, fertility, transitions, income interventions) with
/// common random numbers, so policy scenarios stay comparable.
#[derive(Parser, Debug)]
#[command(name = "lifecourse")]
#[command(author, version, about = "Runs module-based population microsimulations", long_about = None)]
struct Cli {
    /// Number of threads to use for parallel batch runs
    ///
    /// If not specified, defaults to the number of logical CPUs.
    #[arg(short = 't', long, global = true)]
    threads: Option<usize>,

    /// Log filter (e.g. "debug", "lifecourse_sim=trace"). Overrides RUST_LOG.
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Write an example configuration to start from.
    Init(InitArgs),

    /// Check a configuration without running it.
    ///
    /// Parses the file, validates every module and assembles the
    /// simulation, so registration conflicts surface too.
    Validate {
        /// Configuration file
        #[arg(short, long, default_value = defaults::CONFIG_FILE)]
        config: PathBuf,
    },

    /// Run a simulation from a configuration file.
    ///
    /// Executes the configured years tick by tick and records snapshots
    /// to the configured output.
    Run(RunArgs),

    /// Run several replicates of one configuration in parallel.
    Batch(BatchArgs),

    /// Show metadata and per-year counts of a recorded run.
    Inspect {
        /// Database path
        #[arg(short, long, default_value = defaults::DATABASE)]
        database: PathBuf,
    },

    /// Export one recorded year to CSV or JSON.
    ///
    /// Use this to get data out for analysis in Python, R, or other tools.
    Export {
        /// Database path
        #[arg(short, long, default_value = defaults::DATABASE)]
        database: PathBuf,

        /// Year to export (default: last recorded)
        #[arg(short, long)]
        year: Option<i32>,

        /// Output format (csv, json)
        #[arg(short, long, default_value = "csv")]
        format: String,

        /// Output file (stdout if not specified)
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

fn init_logging(level: Option<&str>) {
    let filter = match level {
        Some(level) => EnvFilter::new(level),
        None => EnvFilter::try_from_default_env()
            .unwrap_or_else(|_| EnvFilter::new(defaults::LOG_FILTER)),
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

fn main() -> Result<()> {
    let cli = Cli::parse();
    init_logging(cli.log_level.as_deref());

    if let Some(threads) = cli.threads {
        rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .build_global()?;
    }

    match cli.command {
        Commands::Init(args) => {
            init::init_configuration(&args)?;
        }
        Commands::Validate { config } => {
            validate::validate_configuration(&config)?;
        }
        Commands::Run(args) => {
            run::run_simulation(&args)?;
        }
        Commands::Batch(args) => {
            batch::run_batch(&args)?;
        }
        Commands::Inspect { database } => {
            inspect::show_run(&database)?;
        }
        Commands::Export {
            database,
            year,
            format,
            output,
        } => {
            export::export_snapshot(&database, year, &format, output.as_ref())?;
        }
    }

    Ok(())
}
