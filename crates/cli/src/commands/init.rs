use anyhow::{Context, Result};
use lifecourse_sim::simulation::{CohortSourceConfig, Configuration, OutputConfig};
use lifecourse_sim::storage::RecordingStrategy;

use crate::args::InitArgs;
use crate::printing::print_parameters;

pub fn init_configuration(args: &InitArgs) -> Result<()> {
    println!("👥 Lifecourse - Microsimulation Engine");
    println!("============================================\n");

    if args.output.exists() && !args.force {
        anyhow::bail!(
            "{} already exists. Use --force to overwrite it.",
            args.output.display()
        );
    }

    let config = build_configuration(args);
    config.validate().context("Generated configuration is invalid")?;

    print_parameters(&config);

    config
        .to_file(&args.output)
        .with_context(|| format!("Failed to write {}", args.output.display()))?;

    println!("✓ Configuration written to {}", args.output.display());
    println!(
        "\n💡 Use 'lifecourse run --config {}' to run it",
        args.output.display()
    );

    Ok(())
}

/// The example configuration with command-line overrides applied.
///
/// Inline cohorts are keyed by calendar year, so a different start year
/// shifts them along with it.
fn build_configuration(args: &InitArgs) -> Configuration {
    let mut config = Configuration::example();
    let shift = args.start_year - config.execution.start_year;
    if let CohortSourceConfig::Inline { cohorts } = &mut config.cohorts.source {
        for cohort in cohorts.iter_mut() {
            cohort.year += shift;
        }
    }
    config.execution.start_year = args.start_year;
    config.execution.num_years = args.years;
    config.randomness.seed = args.seed;
    if let Some(database) = &args.database {
        config.execution.output = OutputConfig::Sqlite {
            path: database.clone(),
            strategy: RecordingStrategy::All,
        };
    }
    config
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;

    fn args() -> InitArgs {
        InitArgs {
            output: PathBuf::from("unused.json"),
            start_year: 2030,
            years: 3,
            seed: 7,
            database: Some(PathBuf::from("runs.db")),
            force: false,
        }
    }

    #[test]
    fn test_overrides_keep_configuration_valid() {
        let config = build_configuration(&args());
        config.validate().unwrap();
        assert_eq!(config.execution.start_year, 2030);
        assert_eq!(config.execution.num_years, 3);
        assert_eq!(config.randomness.seed, 7);
        assert!(matches!(config.execution.output, OutputConfig::Sqlite { .. }));
    }
}
