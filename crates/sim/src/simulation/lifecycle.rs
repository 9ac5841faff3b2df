//! Cohort lifecycle: seeding, replenishment, births and ageing.

use tracing::{debug, info};

use super::module::{CohortKind, Module, ModuleContext, TimeStep};
use crate::errors::{CohortError, PopulationError, Result};
use crate::population::{
    AliveState, IndexSet, PopulationStore, RowIndex, Table, Value, AGE, ALIVE, CORE_COLUMNS,
    ENTRANCE_TIME, EXIT_TIME, HIDP, PIDP, TIME,
};
use crate::randomness::{simulant_key, RandomnessRegistry};
use crate::source::CohortSource;

pub const REPLENISHMENT: &str = "replenishment";
pub const AGEING: &str = "ageing";

/// Complete the core columns of an incoming batch, add it to the store and
/// register it for random draws.
///
/// Nothing is added if any identifier collides with one the store has
/// ever held.
pub(crate) fn admit(
    store: &mut PopulationStore,
    randomness: &mut RandomnessRegistry,
    owner: &str,
    mut rows: Table,
    kind: CohortKind,
    step: TimeStep,
) -> Result<IndexSet> {
    if rows.is_empty() {
        info!(cohort = kind.as_str(), year = step.year, "empty cohort, nothing to add");
        return Ok(IndexSet::new());
    }
    let count = rows.len();

    if !rows.has_column(PIDP) {
        if kind != CohortKind::Birth {
            return Err(CohortError::MissingIdentifier {
                position: 0,
                column: PIDP,
            }
            .into());
        }
        let fresh = store.fresh_identifiers(count);
        rows.insert_column(PIDP, fresh.into_iter().map(Value::Int).collect())?;
    }
    if !rows.has_column(AGE) {
        if kind != CohortKind::Birth {
            return Err(PopulationError::UnknownColumn(AGE.to_string()).into());
        }
        rows = rows.with_constant(AGE, 0.0);
    }
    if !rows.has_column(HIDP) {
        let own = rows.column(PIDP)?.to_vec();
        rows.insert_column(HIDP, own)?;
    }
    if !rows.has_column(TIME) {
        rows = rows.with_constant(TIME, step.year);
    }
    let rows = rows
        .with_constant(ALIVE, AliveState::Alive)
        .with_constant(ENTRANCE_TIME, step.time())
        .with_constant(EXIT_TIME, Value::Null);

    let index = store.add_rows(owner, &rows)?;

    let keys: Vec<u64> = rows
        .ints(PIDP)?
        .into_iter()
        .map(|pidp| simulant_key(pidp, step.time()))
        .collect();
    randomness.register(&index, &keys)?;

    info!(
        cohort = kind.as_str(),
        year = step.year,
        rows = index.len(),
        "cohort admitted"
    );
    Ok(index)
}

/// The cohort lifecycle manager.
///
/// Owns the core columns and whatever extra columns the initial cohort
/// carries. Seeds the population during setup and, when enabled, injects
/// the next cohort from the source every tick.
#[derive(Debug)]
pub struct Replenishment {
    source: Box<dyn CohortSource>,
    replenish: bool,
    priority: i32,
    schema: Vec<String>,
    seeded: bool,
}

impl Replenishment {
    pub fn new(source: Box<dyn CohortSource>) -> Self {
        Self {
            source,
            replenish: true,
            priority: 0,
            schema: Vec::new(),
            seeded: false,
        }
    }

    pub fn with_replenish(mut self, replenish: bool) -> Self {
        self.replenish = replenish;
        self
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Columns beyond the core set, taken from the initial cohort.
    pub fn schema(&self) -> &[String] {
        &self.schema
    }

    /// Load the starting population. Runs exactly once.
    pub fn seed_initial_population(&mut self, ctx: &mut ModuleContext<'_>) -> Result<IndexSet> {
        if self.seeded {
            return Err(CohortError::AlreadySeeded.into());
        }
        let year = ctx.year();
        let rows = self
            .source
            .load(year)?
            .filter(|table| !table.is_empty())
            .ok_or_else(|| CohortError::Source {
                year,
                reason: "no initial cohort".to_string(),
            })?;

        self.schema = rows
            .column_names()
            .filter(|c| !CORE_COLUMNS.contains(c))
            .map(str::to_string)
            .collect();
        let schema: Vec<&str> = self.schema.iter().map(String::as_str).collect();
        ctx.declare_columns(&schema)?;

        let index = ctx.create_cohort(rows, CohortKind::Initial, None)?;
        self.seeded = true;
        info!(year, rows = index.len(), columns = self.schema.len(), "initial population seeded");
        Ok(index)
    }

    /// Load and admit the cohort scheduled for `year`.
    ///
    /// An absent or empty batch is not an error; nothing is injected.
    pub fn inject_new_cohort(&mut self, ctx: &mut ModuleContext<'_>, year: i32) -> Result<IndexSet> {
        match self.source.load(year)? {
            Some(rows) if !rows.is_empty() => {
                ctx.create_cohort(rows, CohortKind::Replenishment, None)
            }
            _ => {
                info!(year, "no cohort to inject");
                Ok(IndexSet::new())
            }
        }
    }
}

impl Module for Replenishment {
    fn name(&self) -> &str {
        REPLENISHMENT
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn columns_required(&self) -> Vec<String> {
        CORE_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    fn columns_created(&self) -> Vec<String> {
        CORE_COLUMNS.iter().map(|c| c.to_string()).collect()
    }

    fn setup(&mut self, ctx: &mut ModuleContext<'_>) -> Result<()> {
        self.seed_initial_population(ctx).map(|_| ())
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, _index: &[RowIndex]) -> Result<()> {
        if self.replenish {
            let year = ctx.year();
            self.inject_new_cohort(ctx, year)?;
        }
        Ok(())
    }
}

/// Ages every living simulant by one tick.
#[derive(Debug, Clone)]
pub struct Ageing {
    priority: i32,
}

impl Ageing {
    pub fn new() -> Self {
        Self { priority: 2 }
    }

    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
}

impl Default for Ageing {
    fn default() -> Self {
        Self::new()
    }
}

impl Module for Ageing {
    fn name(&self) -> &str {
        AGEING
    }

    fn priority(&self) -> i32 {
        self.priority
    }

    fn columns_required(&self) -> Vec<String> {
        vec![AGE.to_string(), TIME.to_string(), ALIVE.to_string()]
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        age_alive_population(ctx, index).map(|_| ())
    }
}

/// Add one tick to `age` and one to `time` for every living row.
pub fn age_alive_population(ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<usize> {
    let view = ctx.view_alive(index, &[AGE, TIME])?;
    if view.is_empty() {
        info!(year = ctx.year(), "no living simulants to age");
        return Ok(0);
    }

    let years = ctx.step().years();
    let ages: Vec<Value> = view
        .floats(AGE)?
        .into_iter()
        .map(|age| Value::Float(age + years))
        .collect();
    let times = view
        .column(TIME)?
        .iter()
        .zip(view.index())
        .map(|(time, &row)| match time {
            Value::Int(t) => Ok(Value::Int(t + 1)),
            Value::Float(t) => Ok(Value::Float(t + 1.0)),
            _ => Err(PopulationError::TypeMismatch {
                column: TIME.to_string(),
                index: row,
                expected: "number",
            }),
        })
        .collect::<std::result::Result<Vec<_>, _>>()?;

    let update = Table::new(view.index().to_vec())
        .with_column(AGE, ages)?
        .with_column(TIME, times)?;
    ctx.update(&update)?;
    debug!(rows = update.len(), years, "aged population");
    Ok(update.len())
}

#[cfg(test)]
mod tests {
    use std::collections::BTreeSet;

    use super::*;
    use crate::errors::SimulationError;
    use crate::simulation::module::Cohort;
    use crate::source::MemoryCohortSource;

    fn step(year: i32) -> TimeStep {
        TimeStep {
            year,
            tick: 0,
            step_days: 365.25,
        }
    }

    fn rows(pidps: &[i64], ages: &[f64]) -> Table {
        Table::with_len(pidps.len())
            .with_column(PIDP, pidps.iter().map(|&p| p.into()).collect())
            .unwrap()
            .with_column(AGE, ages.iter().map(|&a| a.into()).collect())
            .unwrap()
    }

    struct Harness {
        store: PopulationStore,
        randomness: RandomnessRegistry,
        writable: BTreeSet<String>,
        created: Vec<Cohort>,
    }

    impl Harness {
        fn new() -> Self {
            let mut store = PopulationStore::new();
            store.declare_columns(REPLENISHMENT, &CORE_COLUMNS).unwrap();
            Self {
                store,
                randomness: RandomnessRegistry::with_replicate(3, 0),
                writable: CORE_COLUMNS.iter().map(|c| c.to_string()).collect(),
                created: Vec::new(),
            }
        }

        fn ctx(&mut self, module: &'static str, year: i32) -> ModuleContext<'_> {
            ModuleContext::new(
                module,
                &self.writable,
                &mut self.store,
                &mut self.randomness,
                step(year),
                &mut self.created,
            )
        }
    }

    #[test]
    fn test_admit_stamps_core_columns() {
        let mut h = Harness::new();
        let index = h
            .ctx(REPLENISHMENT, 2020)
            .create_cohort(rows(&[5, 6], &[16.0, 17.0]), CohortKind::Initial, None)
            .unwrap();
        assert_eq!(index, vec![0, 1]);
        assert!(h.randomness.is_registered(1));
        assert_eq!(h.created.len(), 1);

        let view = h.store.view(&CORE_COLUMNS, None).unwrap();
        assert_eq!(view.column(HIDP).unwrap(), &[Value::Int(5), Value::Int(6)]);
        assert_eq!(view.value(0, ENTRANCE_TIME).unwrap(), &Value::Float(2020.0));
        assert_eq!(view.value(1, TIME).unwrap(), &Value::Int(2020));
        assert!(view.value(0, EXIT_TIME).unwrap().is_null());
        assert_eq!(h.store.alive_index(), vec![0, 1]);
    }

    #[test]
    fn test_collision_rejects_whole_batch() {
        let mut h = Harness::new();
        h.ctx(REPLENISHMENT, 2020)
            .create_cohort(rows(&[101], &[30.0]), CohortKind::Initial, None)
            .unwrap();
        let err = h
            .ctx(REPLENISHMENT, 2021)
            .create_cohort(rows(&[101, 102], &[16.0, 16.0]), CohortKind::Replenishment, None)
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Cohort(CohortError::IdentifierCollision { pidp: 101 })
        ));
        assert_eq!(h.store.len(), 1);
        assert_eq!(h.randomness.registered_count(), 1);
        assert_eq!(h.created.len(), 1);
    }

    #[test]
    fn test_births_get_fresh_identifiers() {
        let mut h = Harness::new();
        h.ctx(REPLENISHMENT, 2020)
            .create_cohort(rows(&[10, 11], &[30.0, 31.0]), CohortKind::Initial, None)
            .unwrap();
        let babies = Table::with_len(2).with_constant(HIDP, 99);
        let index = h
            .ctx("fertility", 2021)
            .create_cohort(babies, CohortKind::Birth, Some(vec![0, 1]))
            .unwrap();
        assert_eq!(index, vec![2, 3]);
        let view = h.store.view_rows(&index, &[PIDP, AGE, HIDP], None).unwrap();
        assert_eq!(view.column(PIDP).unwrap(), &[Value::Int(12), Value::Int(13)]);
        assert_eq!(view.floats(AGE).unwrap(), vec![0.0, 0.0]);
        assert_eq!(h.created[1].parents, Some(vec![0, 1]));
    }

    #[test]
    fn test_replenishment_requires_identifiers() {
        let mut h = Harness::new();
        let no_ids = Table::with_len(1).with_constant(AGE, 16.0);
        let err = h
            .ctx(REPLENISHMENT, 2020)
            .create_cohort(no_ids, CohortKind::Replenishment, None)
            .unwrap_err();
        assert!(matches!(
            err,
            SimulationError::Cohort(CohortError::MissingIdentifier { .. })
        ));
    }

    #[test]
    fn test_seed_then_inject_and_empty_year() {
        let mut h = Harness::new();
        let source = MemoryCohortSource::new()
            .with_year(2020, rows(&[1, 2], &[40.0, 50.0]).with_constant("sex", "Female"))
            .with_year(2021, rows(&[3], &[16.0]).with_constant("sex", "Male"));
        let mut manager = Replenishment::new(Box::new(source));

        manager.seed_initial_population(&mut h.ctx(REPLENISHMENT, 2020)).unwrap();
        assert_eq!(manager.schema(), &["sex".to_string()]);
        assert_eq!(h.store.owner_of("sex"), Some(REPLENISHMENT));

        let again = manager.seed_initial_population(&mut h.ctx(REPLENISHMENT, 2020));
        assert!(matches!(again, Err(SimulationError::Cohort(CohortError::AlreadySeeded))));

        let added = manager.inject_new_cohort(&mut h.ctx(REPLENISHMENT, 2021), 2021).unwrap();
        assert_eq!(added, vec![2]);
        let none = manager.inject_new_cohort(&mut h.ctx(REPLENISHMENT, 2022), 2022).unwrap();
        assert!(none.is_empty());
        assert_eq!(h.store.len(), 3);
    }

    #[test]
    fn test_ageing_skips_dead() {
        let mut h = Harness::new();
        h.ctx(REPLENISHMENT, 2020)
            .create_cohort(rows(&[1, 2, 3], &[10.0, 20.0, 30.0]), CohortKind::Initial, None)
            .unwrap();
        h.ctx(REPLENISHMENT, 2020).retire(&[1]).unwrap();

        let aged = age_alive_population(&mut h.ctx(AGEING, 2021), &[0, 1, 2]).unwrap();
        assert_eq!(aged, 2);
        let view = h.store.view(&[AGE, TIME], None).unwrap();
        assert_eq!(view.floats(AGE).unwrap(), vec![11.0, 20.0, 31.0]);
        assert_eq!(view.ints(TIME).unwrap(), vec![2021, 2020, 2021]);
    }
}
