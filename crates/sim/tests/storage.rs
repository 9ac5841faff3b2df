//! Snapshot output: SQLite recording read back through the query builder,
//! and CSV cohorts in, CSV snapshots out.

use lifecourse_sim::population::{Value, PIDP};
use lifecourse_sim::simulation::{Configuration, OutputConfig, Simulation};
use lifecourse_sim::source::read_csv_table;
use lifecourse_sim::storage::{CsvSnapshotWriter, QueryBuilder, RecordingStrategy};
use tempfile::TempDir;

#[test]
fn test_sqlite_snapshots_match_the_store() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("run.sqlite");

    let mut config = Configuration::example();
    config.randomness.replicate = Some(3);
    config.execution.output = OutputConfig::Sqlite {
        path: db_path.clone(),
        strategy: RecordingStrategy::All,
    };
    let mut sim = Simulation::from_config(&config).unwrap();
    let summaries = sim.run().unwrap();

    let query = QueryBuilder::new(&db_path).unwrap();
    assert_eq!(query.years().unwrap(), (2020..=2025).collect::<Vec<_>>());
    assert_eq!(query.get_metadata_value("seed").unwrap().as_deref(), Some("42"));
    assert_eq!(query.get_metadata_value("replicate").unwrap().as_deref(), Some("3"));
    let stored: Configuration =
        serde_json::from_str(&query.get_metadata_value("configuration").unwrap().unwrap()).unwrap();
    assert_eq!(stored, config);

    for summary in &summaries {
        let recorded = query.summary(summary.year).unwrap();
        assert_eq!(recorded.alive, summary.alive);
        assert_eq!(recorded.dead, summary.dead);
    }
    assert_eq!(query.get_snapshot(2025).unwrap(), sim.store().snapshot());
    assert!(query.get_snapshot(2030).is_err());
}

#[test]
fn test_every_n_strategy_skips_ticks() {
    let dir = TempDir::new().unwrap();
    let db_path = dir.path().join("sparse.sqlite");

    let mut config = Configuration::example();
    config.execution.output = OutputConfig::Sqlite {
        path: db_path.clone(),
        strategy: RecordingStrategy::EveryN(2),
    };
    Simulation::from_config(&config).unwrap().run().unwrap();

    let query = QueryBuilder::new(&db_path).unwrap();
    assert_eq!(query.years().unwrap(), vec![2020, 2022, 2024]);
}

#[test]
fn test_csv_cohorts_in_csv_snapshots_out() {
    let input = TempDir::new().unwrap();
    let output = TempDir::new().unwrap();
    std::fs::write(
        input.path().join("2020_cohort.csv"),
        "pidp,hidp,age,sex,hh_income,nkids\n1,1,34,Female,900.5,2\n2,1,36,Male,900.5,2\n3,2,70,Male,,0\n",
    )
    .unwrap();
    std::fs::write(
        input.path().join("2021_cohort.csv"),
        "pidp,hidp,age,sex,hh_income,nkids\n10,5,16,Female,1100,0\n",
    )
    .unwrap();

    let json = format!(
        r#"{{
            "execution": {{"start_year": 2020, "num_years": 2}},
            "randomness": {{"seed": 9, "replicate": 0}},
            "cohorts": {{"source": {{"kind": "csv", "dir": {input:?}}}}},
            "modules": [{{"type": "ageing"}}, {{"type": "equivalised_income"}}]
        }}"#,
        input = input.path().display().to_string(),
    );
    let config: Configuration = serde_json::from_str(&json).unwrap();
    let writer = CsvSnapshotWriter::new(output.path(), RecordingStrategy::All).unwrap();
    let mut sim = Simulation::from_config_with_writer(&config, Some(Box::new(writer.clone()))).unwrap();
    sim.run().unwrap();
    assert_eq!(sim.store().len(), 4);

    let first = read_csv_table(&writer.path_for(2020)).unwrap();
    assert_eq!(first.len(), 3);
    assert!(first.value(2, "hh_income").unwrap().is_null());

    let last = read_csv_table(&writer.path_for(2022)).unwrap();
    assert_eq!(last.ints(PIDP).unwrap(), vec![1, 2, 3, 10]);
    assert_eq!(last.value(3, "age").unwrap().as_f64(), Some(17.0));
    // Household 1 has two adults sharing 900.5.
    assert_eq!(last.value(0, "equivalised_income").unwrap(), &Value::Float(900.5 / 1.5));
}
