use anyhow::{Context, Result};
use lifecourse_sim::storage::QueryBuilder;
use std::path::Path;

pub fn show_run(database: &Path) -> Result<()> {
    let query = QueryBuilder::new(database).context("Failed to open database")?;

    println!("\n📊 Run Information");
    println!("{}", "=".repeat(50));
    let metadata = query.get_metadata().context("Failed to read metadata")?;
    let mut keys: Vec<&String> = metadata.keys().filter(|k| *k != "configuration").collect();
    keys.sort();
    for key in keys {
        println!("{key}: {}", metadata[key]);
    }
    if let Some(raw) = metadata.get("configuration") {
        let config: serde_json::Value =
            serde_json::from_str(raw).context("Stored configuration is not valid JSON")?;
        println!("\nConfiguration:");
        println!("{}", serde_json::to_string_pretty(&config)?);
    }

    let years = query.years().context("Failed to list recorded years")?;
    if years.is_empty() {
        println!("\nNo recorded years found.");
        return Ok(());
    }

    println!("\n📈 Recorded Years:");
    println!("{}", "=".repeat(50));
    println!("{:>6} {:>8} {:>8} {:>8}", "Year", "Rows", "Alive", "Dead");
    for year in &years {
        let summary = query
            .summary(*year)
            .with_context(|| format!("Failed to summarize {year}"))?;
        println!(
            "{:>6} {:>8} {:>8} {:>8}",
            summary.year, summary.rows, summary.alive, summary.dead
        );
    }
    println!("Total: {} snapshots", years.len());

    Ok(())
}
