//! Integration tests for the cohort lifecycle: seeding, replenishment,
//! births, ageing and tombstones.

use std::collections::HashSet;

use lifecourse_sim::errors::{CohortError, SimulationError};
use lifecourse_sim::modules::{Fertility, FertilityConfig, Mortality, RateTable};
use lifecourse_sim::population::{Table, Value, AGE, ALIVE, EXIT_TIME, PIDP, TIME};
use lifecourse_sim::simulation::{Ageing, Simulation, SimulationBuilder};
use lifecourse_sim::source::MemoryCohortSource;

fn cohort(pidps: &[i64], ages: &[f64]) -> Table {
    Table::with_len(pidps.len())
        .with_column(PIDP, pidps.iter().map(|&p| Value::Int(p)).collect())
        .unwrap()
        .with_column(AGE, ages.iter().map(|&a| Value::Float(a)).collect())
        .unwrap()
}

fn women(pidps: &[i64], ages: &[f64]) -> Table {
    cohort(pidps, ages).with_constant("sex", "Female")
}

#[test]
fn test_one_tick_of_ageing() {
    let mut sim = SimulationBuilder::new()
        .start_year(2020)
        .years(1)
        .seed(1)
        .cohorts(MemoryCohortSource::new().with_year(2020, cohort(&[1, 2, 3], &[10.0, 20.0, 30.0])))
        .module(Ageing::new())
        .build()
        .unwrap();
    sim.setup().unwrap();

    let before = sim.column(TIME).unwrap();
    sim.step().unwrap();

    let view = sim.view(&[AGE, TIME], None).unwrap();
    assert_eq!(view.floats(AGE).unwrap(), vec![11.0, 21.0, 31.0]);
    let after = view.floats(TIME).unwrap();
    for (old, new) in before.iter().zip(after) {
        assert_eq!(old.as_f64().unwrap() + 1.0, new);
    }
}

#[test]
fn test_colliding_cohort_rejected_without_partial_insert() {
    let source = MemoryCohortSource::new()
        .with_year(2020, cohort(&[101], &[40.0]))
        .with_year(2021, cohort(&[101, 102], &[16.0, 16.0]));
    let mut sim = SimulationBuilder::new()
        .start_year(2020)
        .years(3)
        .seed(1)
        .cohorts(source)
        .build()
        .unwrap();
    sim.setup().unwrap();
    assert_eq!(sim.store().len(), 1);

    let err = sim.step().unwrap_err();
    assert!(matches!(
        err.root(),
        SimulationError::Cohort(CohortError::IdentifierCollision { pidp: 101 })
    ));
    assert_eq!(sim.store().len(), 1);
    assert!(!sim.store().holds_identifier(102));
    // The failed tick is not counted.
    assert_eq!(sim.tick(), 0);
}

#[test]
fn test_missing_cohort_year_is_a_no_op() {
    let source = MemoryCohortSource::new().with_year(2020, cohort(&[1, 2], &[30.0, 40.0]));
    let mut sim = SimulationBuilder::new()
        .start_year(2020)
        .years(2)
        .seed(1)
        .cohorts(source)
        .build()
        .unwrap();
    let summaries = sim.run().unwrap();
    assert!(summaries.iter().all(|s| s.added == 0));
    assert_eq!(sim.store().len(), 2);
}

#[test]
fn test_identifiers_unique_across_run() {
    let source = MemoryCohortSource::new()
        .with_year(2020, women(&[1, 2, 3, 4], &[25.0, 28.0, 31.0, 35.0]))
        .with_year(2021, women(&[50, 51], &[16.0, 16.0]))
        .with_year(2023, women(&[900], &[16.0]));
    let mut sim = SimulationBuilder::new()
        .start_year(2020)
        .years(6)
        .seed(7)
        .replicate(0)
        .cohorts(source)
        .module(Ageing::new())
        .module(Fertility::new(FertilityConfig::with_rates(RateTable::flat(0.8))))
        .build()
        .unwrap();
    sim.run().unwrap();

    let pidps = sim.view(&[PIDP], None).unwrap().ints(PIDP).unwrap();
    let unique: HashSet<i64> = pidps.iter().copied().collect();
    assert_eq!(unique.len(), pidps.len());
    assert!(pidps.len() > 7, "expected some births, got {} rows", pidps.len());
}

fn mortal_run(rate: f64) -> Simulation {
    let ages: Vec<f64> = (0..40).map(|i| 20.0 + i as f64).collect();
    let pidps: Vec<i64> = (1..=40).collect();
    let mut sim = SimulationBuilder::new()
        .start_year(2020)
        .years(8)
        .seed(3)
        .replicate(0)
        .cohorts(MemoryCohortSource::new().with_year(2020, cohort(&pidps, &ages)))
        .module(Mortality::with_rates(RateTable::flat(rate)))
        .module(Ageing::new())
        .build()
        .unwrap();
    sim.setup().unwrap();
    sim
}

#[test]
fn test_tombstones_are_permanent_and_readable() {
    let mut sim = mortal_run(0.3);
    let mut dead_at: Vec<Option<Value>> = vec![None; sim.store().len()];

    while !sim.is_complete() {
        sim.step().unwrap();
        let view = sim.view(&[ALIVE, EXIT_TIME, AGE], None).unwrap();
        assert_eq!(view.len(), 40);
        for (row, status) in view.column(ALIVE).unwrap().iter().enumerate() {
            let exit = view.value(row, EXIT_TIME).unwrap().clone();
            match &dead_at[row] {
                Some(recorded) => {
                    assert_eq!(status, &Value::from("dead"));
                    assert_eq!(&exit, recorded);
                }
                None if status == &Value::from("dead") => {
                    assert_eq!(exit, Value::Float(f64::from(sim.year())));
                    dead_at[row] = Some(exit);
                }
                None => assert!(exit.is_null()),
            }
        }
    }
    assert!(sim.dead_count() > 0);
    assert_eq!(sim.alive_count() + sim.dead_count(), 40);
}

#[test]
fn test_dead_rows_stop_ageing() {
    let mut sim = mortal_run(0.5);
    sim.run().unwrap();
    let view = sim.view(&[AGE, EXIT_TIME], None).unwrap();
    for row in 0..view.len() {
        let Some(exit) = view.value(row, EXIT_TIME).unwrap().as_f64() else {
            continue;
        };
        // Mortality runs before ageing, so the year of death is not aged.
        let start_age = 20.0 + row as f64;
        let expected = start_age + (exit - 2020.0 - 1.0);
        let age = view.value(row, AGE).unwrap().as_f64().unwrap();
        assert!((age - expected).abs() < 1e-9, "row {row}: age {age}, expected {expected}");
    }
}
