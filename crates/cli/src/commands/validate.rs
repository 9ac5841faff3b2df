use anyhow::{Context, Result};
use lifecourse_sim::simulation::{Configuration, Simulation};
use std::path::Path;

pub fn validate_configuration(path: &Path) -> Result<()> {
    println!("\n🔍 Validating {}", path.display());
    println!("{}", "=".repeat(50));

    let config = Configuration::from_file(path)
        .with_context(|| format!("Failed to load {}", path.display()))?;
    println!("✓ Parsed {} module(s)", config.modules.len());

    config.validate().context("Invalid configuration")?;
    println!("✓ Static checks passed");

    // Assemble without output so nothing is written.
    let sim = Simulation::from_config_with_writer(&config, None)
        .context("Failed to assemble simulation")?;
    println!("✓ Registered modules: {}", sim.module_names().join(", "));

    println!("\n✓ Configuration is valid");
    Ok(())
}
