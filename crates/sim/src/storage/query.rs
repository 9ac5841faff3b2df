//! Query interface for analyzing recorded runs.

use std::collections::HashMap;

use rusqlite::{params, OptionalExtension};

use super::database::Database;
use super::types::YearSummary;
use crate::errors::StorageError;
use crate::population::{Table, Value};

/// Read-side access to a recorder database.
pub struct QueryBuilder {
    db: Database,
}

impl QueryBuilder {
    /// Open a database for querying.
    pub fn new(db_path: impl AsRef<std::path::Path>) -> Result<Self, StorageError> {
        let db = Database::open(db_path)?;
        Ok(Self { db })
    }

    /// Get raw metadata value by key.
    pub fn get_metadata_value(&self, key: &str) -> Result<Option<String>, StorageError> {
        let mut stmt = self
            .db
            .connection()
            .prepare("SELECT value FROM metadata WHERE key = ?1")?;
        Ok(stmt.query_row(params![key], |row| row.get(0)).optional()?)
    }

    /// Get all metadata as a map.
    pub fn get_metadata(&self) -> Result<HashMap<String, String>, StorageError> {
        let mut stmt = self.db.connection().prepare("SELECT key, value FROM metadata")?;
        let rows = stmt.query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?;

        let mut meta = HashMap::new();
        for row in rows {
            let (k, v): (String, String) = row?;
            meta.insert(k, v);
        }
        Ok(meta)
    }

    /// Recorded years, ascending.
    pub fn years(&self) -> Result<Vec<i32>, StorageError> {
        let mut stmt = self
            .db
            .connection()
            .prepare("SELECT DISTINCT year FROM snapshot_columns ORDER BY year")?;
        let years = stmt
            .query_map([], |row| row.get(0))?
            .collect::<Result<Vec<i32>, _>>()?;
        Ok(years)
    }

    /// Row, alive and dead counts for a year.
    pub fn summary(&self, year: i32) -> Result<YearSummary, StorageError> {
        let (rows, alive, dead): (i64, i64, i64) = self.db.connection().query_row(
            "SELECT COUNT(*),
                    COALESCE(SUM(alive = 'alive'), 0),
                    COALESCE(SUM(alive = 'dead'), 0)
             FROM snapshots WHERE year = ?1",
            params![year],
            |row| Ok((row.get(0)?, row.get(1)?, row.get(2)?)),
        )?;
        if rows == 0 && !self.years()?.contains(&year) {
            return Err(StorageError::MissingSnapshot(year));
        }
        Ok(YearSummary {
            year,
            rows: rows as usize,
            alive: alive as usize,
            dead: dead as usize,
        })
    }

    /// The full population table recorded for a year.
    pub fn get_snapshot(&self, year: i32) -> Result<Table, StorageError> {
        let mut stmt = self.db.connection().prepare(
            "SELECT name FROM snapshot_columns WHERE year = ?1 ORDER BY position",
        )?;
        let names = stmt
            .query_map(params![year], |row| row.get::<_, String>(0))?
            .collect::<Result<Vec<_>, _>>()?;
        if names.is_empty() {
            return Err(StorageError::MissingSnapshot(year));
        }

        let mut stmt = self.db.connection().prepare(
            "SELECT row_index, record FROM snapshots WHERE year = ?1 ORDER BY row_index",
        )?;
        let rows = stmt.query_map(params![year], |row| {
            Ok((row.get::<_, i64>(0)? as usize, row.get::<_, String>(1)?))
        })?;

        let mut index = Vec::new();
        let mut columns: Vec<Vec<Value>> = vec![Vec::new(); names.len()];
        for row in rows {
            let (row_index, record) = row?;
            let values: Vec<Value> = serde_json::from_str(&record)?;
            index.push(row_index);
            for (column, value) in columns.iter_mut().zip(values) {
                column.push(value);
            }
        }

        let mut table = Table::new(index);
        for (name, values) in names.into_iter().zip(columns) {
            table
                .insert_column(name, values)
                .map_err(|e| StorageError::Io(std::io::Error::other(e.to_string())))?;
        }
        Ok(table)
    }
}
