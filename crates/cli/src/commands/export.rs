use anyhow::{Context, Result};
use lifecourse_sim::population::Table;
use lifecourse_sim::storage::{write_csv_table, QueryBuilder};
use std::collections::BTreeMap;
use std::path::PathBuf;

pub fn export_snapshot(
    database: &PathBuf,
    year: Option<i32>,
    format: &str,
    output: Option<&PathBuf>,
) -> Result<()> {
    let query = QueryBuilder::new(database).context("Failed to open database")?;

    let year = match year {
        Some(year) => year,
        None => query
            .years()
            .context("Failed to list recorded years")?
            .last()
            .copied()
            .context("No recorded years found")?,
    };
    let snapshot = query
        .get_snapshot(year)
        .with_context(|| format!("Failed to load snapshot for {year}"))?;

    match format {
        "csv" => export_csv(&snapshot, output)?,
        "json" => export_json(&snapshot, output)?,
        other => anyhow::bail!("Unknown format '{other}'. Supported: csv, json"),
    }

    if let Some(path) = output {
        eprintln!(
            "✓ Exported {} rows for {year} to {}",
            snapshot.len(),
            path.display()
        );
    }
    Ok(())
}

fn export_csv(snapshot: &Table, output: Option<&PathBuf>) -> Result<()> {
    match output {
        Some(path) => write_csv_table(path, snapshot)
            .with_context(|| format!("Failed to write {}", path.display())),
        None => {
            let names: Vec<&str> = snapshot.column_names().collect();
            println!("{}", names.join(","));
            for position in 0..snapshot.len() {
                let row: Vec<String> = snapshot
                    .columns()
                    .iter()
                    .map(|column| column.values()[position].to_string())
                    .collect();
                println!("{}", row.join(","));
            }
            Ok(())
        }
    }
}

/// One JSON object per row.
fn export_json(snapshot: &Table, output: Option<&PathBuf>) -> Result<()> {
    let rows: Vec<BTreeMap<&str, _>> = (0..snapshot.len())
        .map(|position| {
            snapshot
                .columns()
                .iter()
                .map(|column| (column.name(), &column.values()[position]))
                .collect()
        })
        .collect();
    let json = serde_json::to_string_pretty(&rows)?;

    match output {
        Some(path) => std::fs::write(path, json)
            .with_context(|| format!("Failed to write {}", path.display()))?,
        None => println!("{json}"),
    }
    Ok(())
}
