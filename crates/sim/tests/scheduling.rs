//! Integration tests for module registration and priority dispatch.

use std::sync::Arc;

use lifecourse_sim::errors::{PopulationError, RegistrationError, Result, SimulationError};
use lifecourse_sim::modules::CategoricalTransition;
use lifecourse_sim::population::{RowIndex, Table, Value, AGE, PIDP};
use lifecourse_sim::predictor::FixedDistribution;
use lifecourse_sim::simulation::{
    Ageing, Module, ModuleContext, ModuleRegistry, Simulation, SimulationBuilder,
};
use lifecourse_sim::source::MemoryCohortSource;

fn people(n: i64) -> MemoryCohortSource {
    let table = Table::with_len(n as usize)
        .with_column(PIDP, (1..=n).map(Value::Int).collect())
        .unwrap()
        .with_constant(AGE, 30.0);
    MemoryCohortSource::new().with_year(2020, table)
}

/// Writes the current year into `x`.
struct Producer;

impl Module for Producer {
    fn name(&self) -> &str {
        "producer"
    }

    fn priority(&self) -> i32 {
        1
    }

    fn columns_created(&self) -> Vec<String> {
        vec!["x".to_string()]
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let update = Table::new(index.to_vec()).with_constant("x", ctx.year());
        ctx.update(&update)?;
        Ok(())
    }
}

/// Doubles `x` into `y`.
struct Consumer;

impl Module for Consumer {
    fn name(&self) -> &str {
        "consumer"
    }

    fn priority(&self) -> i32 {
        5
    }

    fn columns_required(&self) -> Vec<String> {
        vec!["x".to_string()]
    }

    fn columns_created(&self) -> Vec<String> {
        vec!["y".to_string()]
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let view = ctx.view(index, &["x"], None)?;
        let doubled = view.ints("x")?.into_iter().map(|x| Value::Int(2 * x)).collect();
        ctx.update(&Table::new(view.index().to_vec()).with_column("y", doubled)?)?;
        Ok(())
    }
}

/// Writes a column it neither created nor required.
struct Trespasser;

impl Module for Trespasser {
    fn name(&self) -> &str {
        "trespasser"
    }

    fn priority(&self) -> i32 {
        3
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        ctx.update(&Table::new(index.to_vec()).with_constant(AGE, 0.0))?;
        Ok(())
    }
}

/// Fails its first time step, succeeds afterwards.
struct FailsOnce {
    failed: bool,
}

impl Module for FailsOnce {
    fn name(&self) -> &str {
        "fails_once"
    }

    fn priority(&self) -> i32 {
        9
    }

    fn on_time_step(&mut self, _ctx: &mut ModuleContext<'_>, _index: &[RowIndex]) -> Result<()> {
        if self.failed {
            return Ok(());
        }
        self.failed = true;
        Err(PopulationError::UnknownColumn("income".into()).into())
    }
}

fn build(modules: Vec<Box<dyn Module>>) -> Result<Simulation> {
    SimulationBuilder::new()
        .start_year(2020)
        .years(2)
        .seed(11)
        .replicate(0)
        .cohorts(people(3))
        .modules(modules)
        .build()
}

#[test]
fn test_lower_priority_runs_first_regardless_of_registration() {
    let mut sim = build(vec![Box::new(Consumer), Box::new(Producer)]).unwrap();
    assert_eq!(sim.module_names(), vec!["replenishment", "producer", "consumer"]);

    sim.setup().unwrap();
    sim.step().unwrap();
    let view = sim.view(&["x", "y"], None).unwrap();
    assert_eq!(view.ints("x").unwrap(), vec![2021; 3]);
    assert_eq!(view.ints("y").unwrap(), vec![4042; 3]);
}

#[test]
fn test_created_columns_must_be_disjoint() {
    let first = CategoricalTransition::with_predictor(
        "first",
        "status",
        vec![Value::from("A")],
        Arc::new(FixedDistribution {
            name: "p".into(),
            probabilities: vec![1.0],
        }),
    );
    let second = CategoricalTransition::with_predictor(
        "second",
        "status",
        vec![Value::from("A")],
        Arc::new(FixedDistribution {
            name: "p".into(),
            probabilities: vec![1.0],
        }),
    );

    let mut registry = ModuleRegistry::new();
    registry.register(Box::new(first.clone())).unwrap();
    let err = registry.register(Box::new(second.clone())).unwrap_err();
    assert!(matches!(
        err,
        RegistrationError::ColumnOwnership { ref column, ref first, ref second }
            if column == "status" && first == "first" && second == "second"
    ));
    assert_eq!(registry.names(), vec!["first"]);
    assert_eq!(registry.owners().get("status"), Some(&"first"));

    let err = build(vec![Box::new(first), Box::new(second)]).unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Registration(RegistrationError::ColumnOwnership { .. })
    ));
}

#[test]
fn test_missing_required_column_fails_setup() {
    let mut sim = build(vec![Box::new(Consumer)]).unwrap();
    let err = sim.setup().unwrap_err();
    assert!(matches!(
        err,
        SimulationError::Registration(RegistrationError::MissingColumn { ref column, .. }) if column == "x"
    ));
}

#[test]
fn test_writes_outside_declared_columns_rejected() {
    let mut sim = build(vec![Box::new(Trespasser)]).unwrap();
    sim.setup().unwrap();
    let err = sim.step().unwrap_err();
    assert!(matches!(
        err.root(),
        SimulationError::Population(PopulationError::NotInView { column, .. }) if column == AGE
    ));
    assert!(err.to_string().contains("trespasser"));
    assert_eq!(sim.view(&[AGE], None).unwrap().floats(AGE).unwrap(), vec![30.0; 3]);
}

#[test]
fn test_certain_category_is_always_chosen() {
    let module = CategoricalTransition::with_predictor(
        "status",
        "status",
        vec![Value::from("A"), Value::from("B")],
        Arc::new(FixedDistribution {
            name: "certain_b".into(),
            probabilities: vec![0.0, 1.0],
        }),
    );
    for seed in 0..5 {
        let mut sim = SimulationBuilder::new()
            .start_year(2020)
            .years(1)
            .seed(seed)
            .cohorts(people(1))
            .module(module.clone())
            .build()
            .unwrap();
        sim.run().unwrap();
        assert_eq!(sim.column("status").unwrap(), vec![Value::from("B")]);
    }
}

#[test]
fn test_step_after_failed_tick_is_rejected() {
    let mut sim = build(vec![
        Box::new(Ageing::new()),
        Box::new(FailsOnce { failed: false }),
    ])
    .unwrap();
    sim.setup().unwrap();

    let err = sim.step().unwrap_err();
    assert!(err.to_string().contains("fails_once"));
    assert_eq!(sim.tick(), 0);
    // Ageing ran before the failure and is not rolled back.
    let ages = sim.view(&[AGE], None).unwrap().floats(AGE).unwrap();
    assert_eq!(ages, vec![31.0; 3]);

    let err = sim.step().unwrap_err();
    assert!(matches!(
        err.root(),
        SimulationError::Registration(RegistrationError::Phase(_))
    ));
    assert!(matches!(
        sim.run().unwrap_err().root(),
        SimulationError::Registration(RegistrationError::Phase(_))
    ));
    assert!(sim.run_for(1).is_err());
    assert_eq!(sim.tick(), 0);
    assert_eq!(sim.year(), 2020);
    assert_eq!(sim.view(&[AGE], None).unwrap().floats(AGE).unwrap(), ages);
    assert_eq!(sim.history().len(), 1);
}
