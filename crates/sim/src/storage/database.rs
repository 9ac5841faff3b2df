//! Low-level database operations and schema management.

use std::path::Path;

use rusqlite::{Connection, Transaction};
use tracing::warn;

use crate::errors::StorageError;

/// Database connection wrapper with schema management.
#[derive(Debug)]
pub struct Database {
    conn: Connection,
    db_path: String,
}

impl Database {
    /// Open (or create) a database at the specified path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StorageError> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        let conn = Connection::open(&path_str)?;

        // Bulk inserts dominate; trade durability for speed.
        conn.execute_batch(
            "PRAGMA synchronous = NORMAL;
             PRAGMA journal_mode = WAL;
             PRAGMA temp_store = MEMORY;
             PRAGMA cache_size = -64000;",
        )?;

        let mut db = Self {
            conn,
            db_path: path_str,
        };
        db.initialize_schema()?;
        Ok(db)
    }

    fn initialize_schema(&mut self) -> Result<(), StorageError> {
        self.conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS metadata (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );

            -- Column layout of each recorded year
            CREATE TABLE IF NOT EXISTS snapshot_columns (
                year INTEGER NOT NULL,
                position INTEGER NOT NULL,
                name TEXT NOT NULL,
                PRIMARY KEY (year, position)
            );

            -- One row per simulant per recorded year; record is a JSON array
            -- aligned with snapshot_columns
            CREATE TABLE IF NOT EXISTS snapshots (
                year INTEGER NOT NULL,
                row_index INTEGER NOT NULL,
                pidp INTEGER,
                alive TEXT,
                record TEXT NOT NULL,
                PRIMARY KEY (year, row_index)
            );

            CREATE INDEX IF NOT EXISTS idx_snapshots_year ON snapshots(year);",
        )?;
        Ok(())
    }

    /// Begin a transaction for batched operations.
    pub fn transaction(&mut self) -> Result<Transaction<'_>, StorageError> {
        Ok(self.conn.transaction()?)
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    pub fn path(&self) -> &str {
        &self.db_path
    }

    /// Close the database and clean up WAL files.
    pub fn close(self) -> Result<(), StorageError> {
        if let Err(e) = self.conn.execute_batch(
            "PRAGMA wal_checkpoint(TRUNCATE);
             PRAGMA journal_mode = DELETE;",
        ) {
            warn!("failed to checkpoint WAL: {e}");
        }

        self.conn.close().map_err(|(_conn, e)| StorageError::Database(e))?;

        for suffix in ["-wal", "-shm"] {
            let fname = format!("{}{}", self.db_path, suffix);
            if let Err(e) = std::fs::remove_file(&fname) {
                if e.kind() != std::io::ErrorKind::NotFound {
                    warn!("failed to remove {fname}: {e}");
                }
            }
        }
        Ok(())
    }

    /// Table names and snapshot row counts.
    pub fn stats(&self) -> Result<DatabaseStats, StorageError> {
        let mut stmt = self
            .conn
            .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")?;
        let tables = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;

        let snapshot_rows: i64 = self
            .conn
            .query_row("SELECT COUNT(*) FROM snapshots", [], |row| row.get(0))?;
        let years: i64 = self
            .conn
            .query_row("SELECT COUNT(DISTINCT year) FROM snapshots", [], |row| row.get(0))?;

        Ok(DatabaseStats {
            snapshot_rows: snapshot_rows as usize,
            years: years as usize,
            tables,
        })
    }
}

/// Database statistics.
#[derive(Debug, Clone)]
pub struct DatabaseStats {
    pub snapshot_rows: usize,
    pub years: usize,
    pub tables: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_schema_initialization() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("schema.sqlite");

        let db = Database::open(&path).expect("Failed to create database");
        let stats = db.stats().expect("Failed to get stats");

        assert!(stats.tables.contains(&"metadata".to_string()));
        assert!(stats.tables.contains(&"snapshots".to_string()));
        assert!(stats.tables.contains(&"snapshot_columns".to_string()));
        assert_eq!(stats.snapshot_rows, 0);

        db.close().expect("Failed to close database");
        assert!(!dir.path().join("schema.sqlite-wal").exists());
    }

    #[test]
    fn test_transaction() {
        let dir = tempfile::tempdir().unwrap();
        let mut db = Database::open(dir.path().join("tx.sqlite")).unwrap();
        let tx = db.transaction().expect("Failed to begin transaction");
        tx.commit().expect("Failed to commit transaction");
        db.close().unwrap();
    }
}
