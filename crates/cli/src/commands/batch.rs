use anyhow::{Context, Result};
use indicatif::{ProgressBar, ProgressStyle};
use lifecourse_sim::simulation::{BatchRunner, Configuration, OutputConfig, RunSummary};
use lifecourse_sim::storage::RecordingStrategy;
use std::time::Duration;

use crate::args::BatchArgs;
use crate::printing::print_run_summary;

pub fn run_batch(args: &BatchArgs) -> Result<()> {
    println!("👥 Lifecourse - Batch Run");
    println!("============================================\n");

    let config = Configuration::from_file(&args.config)
        .with_context(|| format!("Failed to load {}", args.config.display()))?;
    let runner = build_runner(&config, args)?;

    println!(
        "Running {} replicate(s) on {} thread(s)...",
        runner.len(),
        rayon::current_num_threads()
    );

    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.green} [{elapsed_precise}] {msg}")
            .context("Invalid progress template")?,
    );
    spinner.set_message("simulating");
    spinner.enable_steady_tick(Duration::from_millis(100));
    let results = runner.run();
    spinner.finish_and_clear();

    let mut summaries: Vec<&RunSummary> = Vec::new();
    let mut failed = 0;
    println!("\n📊 Results");
    println!("{}", "=".repeat(50));
    for result in &results {
        match &result.outcome {
            Ok(summary) => {
                print_run_summary(summary);
                summaries.push(summary);
            }
            Err(e) => {
                failed += 1;
                println!("  ✗ {}: {e}", result.label);
            }
        }
    }

    if let Some(path) = &args.summary {
        let json = serde_json::to_string_pretty(&summaries)?;
        std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?;
        println!("\n✓ Summaries written to {}", path.display());
    }

    if failed > 0 {
        anyhow::bail!("{failed} of {} runs failed", results.len());
    }
    println!("\n✓ All {} runs complete", results.len());
    Ok(())
}

/// One run per replicate. With an output directory each run records to its
/// own database, otherwise nothing is written.
fn build_runner(config: &Configuration, args: &BatchArgs) -> Result<BatchRunner> {
    let Some(dir) = &args.output_dir else {
        let mut config = config.clone();
        config.execution.output = OutputConfig::None;
        return Ok(BatchRunner::new().add_replicates("run", &config, args.replicates));
    };

    std::fs::create_dir_all(dir)
        .with_context(|| format!("Failed to create {}", dir.display()))?;
    let runner = (0..args.replicates).fold(BatchRunner::new(), |runner, replicate| {
        let label = format!("run-r{replicate}");
        let mut config = config.clone();
        config.randomness.replicate = Some(replicate);
        config.execution.output = OutputConfig::Sqlite {
            path: dir.join(format!("{label}.db")),
            strategy: RecordingStrategy::All,
        };
        runner.add(label, config)
    });
    Ok(runner)
}
