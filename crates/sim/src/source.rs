//! Cohort sources: where new simulants come from.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::errors::{CohortError, Result, StorageError};
use crate::population::{Table, Value};

/// Produces the batch of simulants entering in a given year.
///
/// `Ok(None)` means there is nothing scheduled for that year.
pub trait CohortSource: Send + fmt::Debug {
    fn load(&self, year: i32) -> Result<Option<Table>>;
}

/// Reads `{dir}/{year}_cohort.csv`, inferring cell types.
#[derive(Debug, Clone)]
pub struct CsvCohortSource {
    dir: PathBuf,
}

impl CsvCohortSource {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn path_for(&self, year: i32) -> PathBuf {
        self.dir.join(format!("{year}_cohort.csv"))
    }
}

impl CohortSource for CsvCohortSource {
    fn load(&self, year: i32) -> Result<Option<Table>> {
        let path = self.path_for(year);
        if !path.exists() {
            debug!(year, path = %path.display(), "no cohort file");
            return Ok(None);
        }
        read_csv_table(&path)
            .map(Some)
            .map_err(|e| {
                CohortError::Source {
                    year,
                    reason: e.to_string(),
                }
                .into()
            })
    }
}

/// Read a CSV file with a header row into a table with positional index.
pub fn read_csv_table(path: &Path) -> std::result::Result<Table, StorageError> {
    let mut reader = csv::Reader::from_path(path)?;
    let headers: Vec<String> = reader.headers()?.iter().map(str::to_string).collect();
    let mut columns: Vec<Vec<Value>> = vec![Vec::new(); headers.len()];

    for record in reader.records() {
        let record = record?;
        for (column, field) in columns.iter_mut().zip(record.iter()) {
            column.push(Value::infer(field));
        }
    }

    let len = columns.first().map_or(0, Vec::len);
    let mut table = Table::with_len(len);
    for (name, values) in headers.into_iter().zip(columns) {
        table.insert_column(name, values).map_err(|e| {
            StorageError::Io(std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))
        })?;
    }
    Ok(table)
}

/// Cohorts held in memory, keyed by year. Used by tests and benches.
#[derive(Debug, Clone, Default)]
pub struct MemoryCohortSource {
    cohorts: BTreeMap<i32, Table>,
}

impl MemoryCohortSource {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_year(mut self, year: i32, rows: Table) -> Self {
        self.cohorts.insert(year, rows);
        self
    }

    pub fn years(&self) -> impl Iterator<Item = i32> + '_ {
        self.cohorts.keys().copied()
    }
}

impl CohortSource for MemoryCohortSource {
    fn load(&self, year: i32) -> Result<Option<Table>> {
        Ok(self.cohorts.get(&year).cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;

    #[test]
    fn test_csv_source_reads_and_infers() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("2021_cohort.csv"),
            "pidp,hidp,age,sex,hh_income\n1,10,16,Female,1200.5\n2,11,16,Male,\n",
        )
        .unwrap();

        let source = CsvCohortSource::new(dir.path());
        let table = source.load(2021).unwrap().unwrap();
        assert_eq!(table.len(), 2);
        assert_eq!(table.column("pidp").unwrap(), &[Value::Int(1), Value::Int(2)]);
        assert_eq!(table.value(0, "sex").unwrap(), &Value::from("Female"));
        assert_eq!(table.value(0, "hh_income").unwrap(), &Value::Float(1200.5));
        assert!(table.value(1, "hh_income").unwrap().is_null());
    }

    #[test]
    fn test_csv_source_missing_year() {
        let dir = tempfile::tempdir().unwrap();
        let source = CsvCohortSource::new(dir.path());
        assert!(source.load(2030).unwrap().is_none());
    }

    #[test]
    fn test_csv_source_ragged_file_is_cohort_error() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("2021_cohort.csv"), "pidp,age\n1,16,extra\n").unwrap();
        let err = CsvCohortSource::new(dir.path()).load(2021).unwrap_err();
        assert!(matches!(
            err,
            crate::errors::SimulationError::Cohort(CohortError::Source { year: 2021, .. })
        ));
    }
}
