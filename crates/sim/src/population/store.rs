//! The population store.
//!
//! Holds every simulant ever added, alive or tombstoned. Modules read
//! through [`PopulationStore::view`] and write through
//! [`PopulationStore::update`]; nothing hands out mutable access to the
//! underlying columns. Rows are never removed, so a [`RowIndex`] stays
//! valid for the whole run.

use std::collections::{BTreeMap, HashSet};

use tracing::debug;

use super::predicate::Predicate;
use super::table::{IndexSet, RowIndex, Table, Value};
use super::{AliveState, ALIVE, CORE_COLUMNS, PIDP};
use crate::errors::{CohortError, PopulationError, Result};

#[derive(Debug, Default)]
pub struct PopulationStore {
    len: usize,
    /// Materialized columns, each `len` long.
    columns: BTreeMap<String, Vec<Value>>,
    /// Declared column -> owning module.
    owners: BTreeMap<String, String>,
    /// Every identifier the store has ever held.
    identifiers: HashSet<i64>,
    next_identifier: i64,
}

impl PopulationStore {
    pub fn new() -> Self {
        Self {
            next_identifier: 1,
            ..Default::default()
        }
    }

    /// Number of rows, alive or dead.
    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Every row index in store order.
    pub fn index(&self) -> IndexSet {
        (0..self.len).collect()
    }

    /// Rows whose `alive` column reads `alive`.
    pub fn alive_index(&self) -> IndexSet {
        match self.columns.get(ALIVE) {
            Some(values) => values
                .iter()
                .enumerate()
                .filter(|(_, v)| AliveState::from_value(v) == Some(AliveState::Alive))
                .map(|(i, _)| i)
                .collect(),
            None => Vec::new(),
        }
    }

    /// Record `owner` as the owner of each column.
    ///
    /// All-or-nothing: if any column already belongs to someone else,
    /// nothing is declared.
    pub fn declare_columns(&mut self, owner: &str, columns: &[&str]) -> Result<(), PopulationError> {
        for column in columns {
            if let Some(existing) = self.owners.get(*column) {
                if existing != owner {
                    return Err(PopulationError::ColumnOwnership {
                        column: column.to_string(),
                        owner: existing.clone(),
                        claimant: owner.to_string(),
                    });
                }
            }
        }
        for column in columns {
            self.owners.insert(column.to_string(), owner.to_string());
        }
        Ok(())
    }

    pub fn owner_of(&self, column: &str) -> Option<&str> {
        self.owners.get(column).map(String::as_str)
    }

    pub fn is_declared(&self, column: &str) -> bool {
        self.owners.contains_key(column)
    }

    /// Whether a column holds data yet.
    pub fn is_materialized(&self, column: &str) -> bool {
        self.columns.contains_key(column)
    }

    /// Declared columns, core columns first.
    pub fn column_names(&self) -> Vec<String> {
        let mut names: Vec<String> = CORE_COLUMNS
            .iter()
            .filter(|c| self.owners.contains_key(**c))
            .map(|c| c.to_string())
            .collect();
        names.extend(
            self.owners
                .keys()
                .filter(|c| !CORE_COLUMNS.contains(&c.as_str()))
                .cloned(),
        );
        names
    }

    /// Read-only projection of all rows.
    pub fn view(&self, columns: &[&str], filter: Option<&Predicate>) -> Result<Table, PopulationError> {
        self.view_rows(&self.index(), columns, filter)
    }

    /// Read-only projection of the given rows.
    ///
    /// Declared columns that have not been written yet read as `Null`.
    pub fn view_rows(
        &self,
        rows: &[RowIndex],
        columns: &[&str],
        filter: Option<&Predicate>,
    ) -> Result<Table, PopulationError> {
        for column in columns {
            self.check_declared(column)?;
        }
        if let Some(&bad) = rows.iter().find(|&&r| r >= self.len) {
            return Err(PopulationError::UnknownRow(bad));
        }

        let rows: Vec<RowIndex> = match filter {
            Some(predicate) => {
                let needed: Vec<&str> = predicate.columns().into_iter().collect();
                for column in &needed {
                    self.check_declared(column)?;
                }
                let scratch = self.project(rows.to_vec(), &needed);
                let mask = predicate.mask(&scratch)?;
                rows.iter()
                    .zip(mask)
                    .filter_map(|(&r, keep)| keep.then_some(r))
                    .collect()
            }
            None => rows.to_vec(),
        };

        Ok(self.project(rows, columns))
    }

    fn check_declared(&self, column: &str) -> Result<(), PopulationError> {
        if self.owners.contains_key(column) {
            Ok(())
        } else {
            Err(PopulationError::UnknownColumn(column.to_string()))
        }
    }

    fn project(&self, rows: Vec<RowIndex>, columns: &[&str]) -> Table {
        let mut table = Table::new(rows);
        for column in columns {
            let values = match self.columns.get(*column) {
                Some(stored) => table.index().iter().map(|&r| stored[r].clone()).collect(),
                None => vec![Value::Null; table.len()],
            };
            // Lengths always match the index here.
            let _ = table.insert_column(*column, values);
        }
        table
    }

    /// Write the table's columns back for the rows in its index.
    ///
    /// The write is validated in full before anything changes: unknown
    /// columns, unknown rows, first writes by a non-owner and attempts to
    /// set a dead row alive all fail without touching the store.
    pub fn update(&mut self, caller: &str, partial: &Table) -> Result<(), PopulationError> {
        for column in partial.column_names() {
            let owner = self
                .owners
                .get(column)
                .ok_or_else(|| PopulationError::UnknownColumn(column.to_string()))?;
            if !self.columns.contains_key(column) && owner != caller {
                return Err(PopulationError::ColumnOwnership {
                    column: column.to_string(),
                    owner: owner.clone(),
                    claimant: caller.to_string(),
                });
            }
        }
        if let Some(&bad) = partial.index().iter().find(|&&r| r >= self.len) {
            return Err(PopulationError::UnknownRow(bad));
        }
        if let (Ok(incoming), Some(current)) = (partial.column(ALIVE), self.columns.get(ALIVE)) {
            for (&row, value) in partial.index().iter().zip(incoming) {
                let was_dead = AliveState::from_value(&current[row]) == Some(AliveState::Dead);
                if was_dead && AliveState::from_value(value) != Some(AliveState::Dead) {
                    return Err(PopulationError::Resurrection(row));
                }
            }
        }

        let len = self.len;
        for column in partial.columns() {
            let stored = self
                .columns
                .entry(column.name().to_string())
                .or_insert_with(|| vec![Value::Null; len]);
            for (&row, value) in partial.index().iter().zip(column.values()) {
                stored[row] = value.clone();
            }
        }
        debug!(
            module = caller,
            rows = partial.len(),
            columns = partial.columns().len(),
            "population update"
        );
        Ok(())
    }

    /// Append new simulants and return their fresh indices.
    ///
    /// Every row must carry an integer `pidp` that the store has never held
    /// and that is unique within the batch. On any failure the store is
    /// left exactly as it was.
    pub fn add_rows(&mut self, caller: &str, new_rows: &Table) -> Result<IndexSet> {
        for column in new_rows.column_names() {
            let owner = self
                .owners
                .get(column)
                .ok_or_else(|| PopulationError::UnknownColumn(column.to_string()))?;
            if !self.columns.contains_key(column) && owner != caller {
                return Err(PopulationError::ColumnOwnership {
                    column: column.to_string(),
                    owner: owner.clone(),
                    claimant: caller.to_string(),
                }
                .into());
            }
        }

        let pidps = new_rows.column(PIDP)?;
        let mut batch = HashSet::with_capacity(pidps.len());
        for (position, value) in pidps.iter().enumerate() {
            let pidp = value.as_i64().ok_or(CohortError::MissingIdentifier {
                position,
                column: PIDP,
            })?;
            if self.identifiers.contains(&pidp) {
                return Err(CohortError::IdentifierCollision { pidp }.into());
            }
            if !batch.insert(pidp) {
                return Err(CohortError::DuplicateIdentifier { pidp }.into());
            }
        }

        let start = self.len;
        let added = new_rows.len();
        let assigned: IndexSet = (start..start + added).collect();

        for stored in self.columns.values_mut() {
            stored.resize(start + added, Value::Null);
        }
        for column in new_rows.columns() {
            let stored = self
                .columns
                .entry(column.name().to_string())
                .or_insert_with(|| vec![Value::Null; start + added]);
            stored[start..].clone_from_slice(column.values());
        }

        self.len += added;
        if let Some(&max) = batch.iter().max() {
            self.next_identifier = self.next_identifier.max(max + 1);
        }
        self.identifiers.extend(batch);

        debug!(module = caller, rows = added, start, "rows added");
        Ok(assigned)
    }

    /// Whether the identifier was ever held by the store.
    pub fn holds_identifier(&self, pidp: i64) -> bool {
        self.identifiers.contains(&pidp)
    }

    /// `count` identifiers that the store has never held.
    ///
    /// Reservation is not recorded; identifiers become taken once the rows
    /// are added.
    pub fn fresh_identifiers(&self, count: usize) -> Vec<i64> {
        (self.next_identifier..).take(count).collect()
    }

    /// Full table of every declared column, for snapshot writers.
    pub fn snapshot(&self) -> Table {
        let names = self.column_names();
        let names: Vec<&str> = names.iter().map(String::as_str).collect();
        self.project(self.index(), &names)
    }
}
