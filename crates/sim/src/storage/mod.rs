//! Storage module for persisting simulation snapshots.
//!
//! Snapshots go either to per-year CSV files or to a SQLite database that
//! can be read back with [`QueryBuilder`].

mod database;
mod query;
mod recorder;
pub mod types;

pub use database::{Database, DatabaseStats};
pub use query::QueryBuilder;
pub use recorder::{write_csv_table, CsvSnapshotWriter, Recorder, RecorderStats, SnapshotWriter};
pub use types::{RecordingStrategy, YearSummary};
