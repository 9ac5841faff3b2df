//! Helpers shared by unit tests.

use crate::population::{Table, Value};
use crate::simulation::{Module, Simulation, SimulationBuilder};
use crate::source::MemoryCohortSource;

/// A cohort table from named columns.
pub(crate) fn people(columns: Vec<(&str, Vec<Value>)>) -> Table {
    let len = columns.first().map_or(0, |(_, values)| values.len());
    columns
        .into_iter()
        .fold(Table::with_len(len), |table, (name, values)| {
            table.with_column(name, values).unwrap()
        })
}

pub(crate) fn ints(values: &[i64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Int(v)).collect()
}

pub(crate) fn floats(values: &[f64]) -> Vec<Value> {
    values.iter().map(|&v| Value::Float(v)).collect()
}

pub(crate) fn texts(values: &[&str]) -> Vec<Value> {
    values.iter().map(|&v| Value::from(v)).collect()
}

/// A set-up simulation starting in 2020 over the given cohort, with no
/// replenishment and a fixed seed.
pub(crate) fn simulation(cohort: Table, modules: Vec<Box<dyn Module>>) -> Simulation {
    let mut sim = SimulationBuilder::new()
        .start_year(2020)
        .years(10)
        .seed(42)
        .replicate(0)
        .cohorts(MemoryCohortSource::new().with_year(2020, cohort))
        .replenish(false)
        .modules(modules)
        .build()
        .unwrap();
    sim.setup().unwrap();
    sim
}
