use lifecourse_sim::simulation::{
    CohortSourceConfig, Configuration, OutputConfig, RunSummary, TickSummary,
};

pub fn print_parameters(config: &Configuration) {
    let execution = &config.execution;
    let randomness = &config.randomness;

    println!("\n📋 Simulation Configuration");
    println!(
        "  • Period: {} to {} ({} years) [-y, --years]",
        execution.start_year,
        execution.start_year + execution.num_years as i32,
        execution.num_years
    );
    println!("  • Step: {} days", execution.step_days);
    println!("  • Random Seed: {} [--seed]", randomness.seed);
    match randomness.replicate {
        Some(replicate) => println!("  • Replicate: {replicate} [--replicate]"),
        None => println!("  • Replicate: Random [--replicate]"),
    }
    println!("  • Default Seed Mode: {:?}", randomness.default_mode);
    for (stream, mode) in &randomness.modes {
        println!("    - {stream}: {mode:?}");
    }

    println!("\n👥 Cohorts");
    match &config.cohorts.source {
        CohortSourceConfig::Csv { dir } => println!("  • Source: CSV files in {}", dir.display()),
        CohortSourceConfig::Inline { cohorts } => {
            let rows: usize = cohorts.iter().map(|c| c.rows.len()).sum();
            println!("  • Source: Inline ({} years, {rows} rows)", cohorts.len());
        }
    }
    println!(
        "  • Replenishment: {}",
        if config.cohorts.replenish { "Enabled" } else { "Disabled" }
    );

    println!("\n⚙️  Modules");
    if config.modules.is_empty() {
        println!("  • None");
    }
    for spec in &config.modules {
        println!("  • {}", spec.name());
    }

    println!("\n💾 Output");
    match &execution.output {
        OutputConfig::None => println!("  • None"),
        OutputConfig::Csv { dir, strategy } => {
            println!("  • CSV: {} ({strategy:?})", dir.display())
        }
        OutputConfig::Sqlite { path, strategy } => {
            println!("  • SQLite: {} ({strategy:?})", path.display())
        }
    }
    println!();
}

pub fn print_ticks(ticks: &[TickSummary]) {
    println!("{:>6} {:>6} {:>8} {:>8} {:>8}", "Tick", "Year", "Alive", "Dead", "Added");
    for t in ticks {
        println!(
            "{:>6} {:>6} {:>8} {:>8} {:>8}",
            t.tick, t.year, t.alive, t.dead, t.added
        );
    }
}

pub fn print_run_summary(summary: &RunSummary) {
    println!(
        "  • {}: final year {}, {} alive, {} dead",
        summary.label, summary.final_year, summary.alive, summary.dead
    );
}
