use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use lifecourse_sim::simulation::{Configuration, OutputConfig, Simulation};
use lifecourse_sim::storage::RecordingStrategy;
use std::ops::ControlFlow;
use tracing::info;

use crate::args::RunArgs;
use crate::printing::{print_parameters, print_ticks};

pub fn run_simulation(args: &RunArgs) -> Result<()> {
    println!("👥 Lifecourse - Running Simulation");
    println!("============================================\n");

    let mut config = Configuration::from_file(&args.config).with_context(|| {
        format!(
            "Failed to load {}. Did you run 'lifecourse init' first?",
            args.config.display()
        )
    })?;
    apply_overrides(&mut config, args);
    info!(config = %args.config.display(), "configuration loaded");

    print_parameters(&config);

    let mut sim = Simulation::from_config(&config).context("Failed to build simulation")?;
    println!(
        "Running {} years from {} (replicate {})...",
        sim.num_years(),
        sim.start_year(),
        sim.randomness().replicate()
    );

    let pb = if args.progress {
        let pb = ProgressBar::new(sim.num_years() as u64);
        pb.set_style(
            ProgressStyle::default_bar()
                .template(
                    "{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {pos}/{len} ({eta}) {msg}",
                )
                .context("Invalid progress template")?
                .progress_chars("#>-"),
        );
        Some(pb)
    } else {
        None
    };

    sim.run_with(|summary| {
        if let Some(pb) = &pb {
            pb.set_message(format!("{} alive", summary.alive));
            pb.inc(1);
        }
        ControlFlow::Continue(())
    })
    .context("Simulation failed")?;

    if let Some(pb) = pb {
        pb.finish_with_message("Done");
    }

    println!("\n✓ Simulation complete!");
    println!("  Final year: {}", sim.year());
    println!("  Alive: {}, dead: {}\n", sim.alive_count(), sim.dead_count());
    print_ticks(sim.history());

    match &config.execution.output {
        OutputConfig::Sqlite { path, .. } => {
            println!(
                "\n💡 Use 'lifecourse inspect --database {}' to view results",
                path.display()
            );
        }
        OutputConfig::Csv { dir, .. } => {
            println!("\n💡 Snapshots written to {}", dir.display());
        }
        OutputConfig::None => {}
    }

    Ok(())
}

fn apply_overrides(config: &mut Configuration, args: &RunArgs) {
    if let Some(seed) = args.seed {
        config.randomness.seed = seed;
    }
    if let Some(replicate) = args.replicate {
        config.randomness.replicate = Some(replicate);
    }
    if let Some(years) = args.years {
        config.execution.num_years = years;
    }
    if let Some(database) = &args.database {
        config.execution.output = OutputConfig::Sqlite {
            path: database.clone(),
            strategy: RecordingStrategy::All,
        };
    }
}
