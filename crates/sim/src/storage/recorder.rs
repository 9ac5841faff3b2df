//! Snapshot writers: persist the population after each completed tick.

use std::path::{Path, PathBuf};

use rusqlite::params;
use tracing::{debug, info};

use super::database::Database;
use super::types::RecordingStrategy;
use crate::errors::StorageError;
use crate::population::{AliveState, Table, ALIVE, PIDP};

/// Receives the full population once per completed tick.
pub trait SnapshotWriter: Send {
    /// Persist the population as it stands after `tick` (0 = seeded).
    fn write_snapshot(&mut self, tick: usize, year: i32, population: &Table) -> Result<(), StorageError>;

    /// Record a run-level key/value pair. Writers without metadata ignore it.
    fn write_metadata(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        let _ = (key, value);
        Ok(())
    }

    /// Flush anything buffered. Called once when the run ends.
    fn finish(&mut self) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Counters kept by a recorder.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RecorderStats {
    pub snapshots_written: usize,
    pub rows_written: usize,
}

/// Writes snapshots into a SQLite database.
#[derive(Debug)]
pub struct Recorder {
    db: Database,
    strategy: RecordingStrategy,
    stats: RecorderStats,
}

impl Recorder {
    pub fn new(path: impl AsRef<Path>, strategy: RecordingStrategy) -> Result<Self, StorageError> {
        let db = Database::open(path)?;
        info!(path = db.path(), "recording snapshots to database");
        Ok(Self {
            db,
            strategy,
            stats: RecorderStats::default(),
        })
    }

    pub fn stats(&self) -> RecorderStats {
        self.stats
    }

    pub fn database(&self) -> &Database {
        &self.db
    }

    /// Close the connection and remove WAL files.
    pub fn close(self) -> Result<(), StorageError> {
        self.db.close()
    }
}

impl SnapshotWriter for Recorder {
    fn write_snapshot(&mut self, tick: usize, year: i32, population: &Table) -> Result<(), StorageError> {
        if !self.strategy.should_record(tick) {
            return Ok(());
        }

        let names: Vec<&str> = population.column_names().collect();
        let columns: Vec<&[crate::population::Value]> = names
            .iter()
            .map(|name| population.column(name))
            .collect::<Result<_, _>>()
            .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?;
        let pidps = population.column(PIDP).ok();
        let alive = population.column(ALIVE).ok();

        let tx = self.db.transaction()?;
        tx.execute("DELETE FROM snapshots WHERE year = ?1", params![year])?;
        tx.execute("DELETE FROM snapshot_columns WHERE year = ?1", params![year])?;
        {
            let mut insert_column = tx.prepare(
                "INSERT INTO snapshot_columns (year, position, name) VALUES (?1, ?2, ?3)",
            )?;
            for (position, name) in names.iter().enumerate() {
                insert_column.execute(params![year, position as i64, name])?;
            }

            let mut insert_row = tx.prepare(
                "INSERT INTO snapshots (year, row_index, pidp, alive, record)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (position, &row) in population.index().iter().enumerate() {
                let record: Vec<&crate::population::Value> =
                    columns.iter().map(|values| &values[position]).collect();
                let pidp = pidps.and_then(|p| p[position].as_i64());
                let state = alive
                    .and_then(|a| AliveState::from_value(&a[position]))
                    .map(AliveState::as_str);
                insert_row.execute(params![
                    year,
                    row as i64,
                    pidp,
                    state,
                    serde_json::to_string(&record)?
                ])?;
            }
        }
        tx.commit()?;

        self.stats.snapshots_written += 1;
        self.stats.rows_written += population.len();
        debug!(year, rows = population.len(), "snapshot recorded");
        Ok(())
    }

    fn write_metadata(&mut self, key: &str, value: &str) -> Result<(), StorageError> {
        self.db.connection().execute(
            "INSERT OR REPLACE INTO metadata (key, value) VALUES (?1, ?2)",
            params![key, value],
        )?;
        Ok(())
    }

    fn finish(&mut self) -> Result<(), StorageError> {
        self.db
            .connection()
            .execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }
}

/// Writes `{dir}/{year}.csv` per recorded tick.
#[derive(Debug, Clone)]
pub struct CsvSnapshotWriter {
    dir: PathBuf,
    strategy: RecordingStrategy,
}

impl CsvSnapshotWriter {
    pub fn new(dir: impl Into<PathBuf>, strategy: RecordingStrategy) -> Result<Self, StorageError> {
        let dir = dir.into();
        std::fs::create_dir_all(&dir)?;
        Ok(Self { dir, strategy })
    }

    pub fn path_for(&self, year: i32) -> PathBuf {
        self.dir.join(format!("{year}.csv"))
    }
}

/// Write a table as CSV with a header row. `Null` cells are left empty.
pub fn write_csv_table(path: &Path, table: &Table) -> Result<(), StorageError> {
    let mut writer = csv::Writer::from_path(path)?;
    writer.write_record(table.column_names())?;
    for position in 0..table.len() {
        writer.write_record(
            table
                .columns()
                .iter()
                .map(|column| column.values()[position].to_string()),
        )?;
    }
    writer.flush()?;
    Ok(())
}

impl SnapshotWriter for CsvSnapshotWriter {
    fn write_snapshot(&mut self, tick: usize, year: i32, population: &Table) -> Result<(), StorageError> {
        if !self.strategy.should_record(tick) {
            return Ok(());
        }
        let path = self.path_for(year);
        write_csv_table(&path, population)?;
        debug!(year, path = %path.display(), "snapshot written");
        Ok(())
    }
}
