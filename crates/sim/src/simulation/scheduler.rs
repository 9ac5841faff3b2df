//! Module registration and priority-ordered dispatch.

use std::collections::{BTreeMap, BTreeSet};

use tracing::{debug, info_span};

use super::module::{Cohort, Module, ModuleContext, TimeStep};
use crate::errors::{RegistrationError, Result};
use crate::population::PopulationStore;
use crate::randomness::RandomnessRegistry;

struct Registered {
    module: Box<dyn Module>,
    name: String,
    priority: i32,
    required: BTreeSet<String>,
    created: BTreeSet<String>,
    /// `required ∪ created`: the columns the module may write.
    writable: BTreeSet<String>,
}

/// Every module active in one run, in registration order.
///
/// Registration enforces unique names and disjoint created columns. A
/// rejected module leaves the registry unchanged.
#[derive(Default)]
pub struct ModuleRegistry {
    modules: Vec<Registered>,
}

impl ModuleRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&mut self, module: Box<dyn Module>) -> Result<(), RegistrationError> {
        let name = module.name().to_string();
        if self.modules.iter().any(|m| m.name == name) {
            return Err(RegistrationError::DuplicateModule(name));
        }

        let created: BTreeSet<String> = module.columns_created().into_iter().collect();
        for column in &created {
            if let Some(owner) = self.modules.iter().find(|m| m.created.contains(column)) {
                return Err(RegistrationError::ColumnOwnership {
                    column: column.clone(),
                    first: owner.name.clone(),
                    second: name,
                });
            }
        }

        let required: BTreeSet<String> = module.columns_required().into_iter().collect();
        let writable = required.union(&created).cloned().collect();
        let priority = module.priority();
        debug!(module = %name, priority, "module registered");
        self.modules.push(Registered {
            module,
            name,
            priority,
            required,
            created,
            writable,
        });
        Ok(())
    }

    /// Register several modules; stops at the first rejection.
    pub fn register_all(
        &mut self,
        modules: impl IntoIterator<Item = Box<dyn Module>>,
    ) -> Result<(), RegistrationError> {
        modules.into_iter().try_for_each(|m| self.register(m))
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }

    /// Module names in execution order.
    pub fn names(&self) -> Vec<&str> {
        self.order().into_iter().map(|i| self.modules[i].name.as_str()).collect()
    }

    /// Positions sorted by priority, ties kept in registration order.
    fn order(&self) -> Vec<usize> {
        let mut order: Vec<usize> = (0..self.modules.len()).collect();
        order.sort_by_key(|&i| self.modules[i].priority);
        order
    }

    /// Column -> owning module for every created column.
    pub fn owners(&self) -> BTreeMap<&str, &str> {
        self.modules
            .iter()
            .flat_map(|m| m.created.iter().map(move |c| (c.as_str(), m.name.as_str())))
            .collect()
    }
}

/// Drives modules in priority order against one store and registry.
pub struct Scheduler {
    registry: ModuleRegistry,
    order: Vec<usize>,
}

impl Scheduler {
    pub fn new(registry: ModuleRegistry) -> Self {
        let order = registry.order();
        Self { registry, order }
    }

    pub fn registry(&self) -> &ModuleRegistry {
        &self.registry
    }

    /// Record every module's created columns with the store.
    pub fn declare_columns(&self, store: &mut PopulationStore) -> Result<()> {
        for entry in &self.registry.modules {
            let created: Vec<&str> = entry.created.iter().map(String::as_str).collect();
            store.declare_columns(&entry.name, &created)?;
        }
        Ok(())
    }

    /// Every required column must be created by some module or be part of
    /// the seeded cohort schema.
    pub fn check_requirements(&self, store: &PopulationStore) -> Result<(), RegistrationError> {
        for &i in &self.order {
            let entry = &self.registry.modules[i];
            if let Some(column) = entry.required.iter().find(|c| !store.is_declared(c)) {
                return Err(RegistrationError::MissingColumn {
                    module: entry.name.clone(),
                    column: column.clone(),
                });
            }
        }
        Ok(())
    }

    /// Run every module's `setup` hook in order, then initialize whatever
    /// cohorts they created.
    pub fn setup(
        &mut self,
        store: &mut PopulationStore,
        randomness: &mut RandomnessRegistry,
        step: TimeStep,
    ) -> Result<()> {
        let order = self.order.clone();
        for i in order {
            let mut created = Vec::new();
            let entry = &mut self.registry.modules[i];
            let mut ctx =
                ModuleContext::new(&entry.name, &entry.writable, store, randomness, step, &mut created);
            entry
                .module
                .setup(&mut ctx)
                .map_err(|e| e.in_module(&entry.name, step.year))?;
            self.initialize(created, store, randomness, step)?;
        }
        Ok(())
    }

    /// One tick: every module's `on_time_step` in priority order.
    ///
    /// Every module is handed the index as it stood when the tick began.
    /// Rows added during the tick are initialized straight away but take
    /// part in time steps from the next tick on. A failing module stops the
    /// tick; earlier writes remain.
    pub fn run_tick(
        &mut self,
        store: &mut PopulationStore,
        randomness: &mut RandomnessRegistry,
        step: TimeStep,
    ) -> Result<()> {
        let index = store.index();
        let order = self.order.clone();
        for i in order {
            let mut created = Vec::new();
            let entry = &mut self.registry.modules[i];
            let _span = info_span!("module", module = %entry.name, year = step.year).entered();
            let mut ctx =
                ModuleContext::new(&entry.name, &entry.writable, store, randomness, step, &mut created);
            entry
                .module
                .on_time_step(&mut ctx, &index)
                .map_err(|e| e.in_module(&entry.name, step.year))?;
            self.initialize(created, store, randomness, step)?;
        }
        Ok(())
    }

    /// Call `on_initialize` on every module, in priority order, for each
    /// newly created cohort.
    fn initialize(
        &mut self,
        mut pending: Vec<Cohort>,
        store: &mut PopulationStore,
        randomness: &mut RandomnessRegistry,
        step: TimeStep,
    ) -> Result<()> {
        while !pending.is_empty() {
            let cohort = pending.remove(0);
            for &i in &self.order {
                let entry = &mut self.registry.modules[i];
                let mut ctx = ModuleContext::new(
                    &entry.name,
                    &entry.writable,
                    store,
                    randomness,
                    step,
                    &mut pending,
                );
                entry
                    .module
                    .on_initialize(&mut ctx, &cohort)
                    .map_err(|e| e.in_module(&entry.name, step.year))?;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::errors::SimulationError;
    use crate::population::RowIndex;

    struct Stub {
        name: &'static str,
        priority: i32,
        created: Vec<&'static str>,
        required: Vec<&'static str>,
    }

    impl Stub {
        fn boxed(
            name: &'static str,
            priority: i32,
            created: &[&'static str],
            required: &[&'static str],
        ) -> Box<dyn Module> {
            Box::new(Stub {
                name,
                priority,
                created: created.to_vec(),
                required: required.to_vec(),
            })
        }
    }

    impl Module for Stub {
        fn name(&self) -> &str {
            self.name
        }

        fn priority(&self) -> i32 {
            self.priority
        }

        fn columns_created(&self) -> Vec<String> {
            self.created.iter().map(|c| c.to_string()).collect()
        }

        fn columns_required(&self) -> Vec<String> {
            self.required.iter().map(|c| c.to_string()).collect()
        }

        fn on_time_step(&mut self, _ctx: &mut ModuleContext<'_>, _index: &[RowIndex]) -> Result<()> {
            Ok(())
        }
    }

    #[test]
    fn test_duplicate_created_column_rejected_atomically() {
        let mut registry = ModuleRegistry::new();
        registry.register(Stub::boxed("income", 4, &["hh_income"], &[])).unwrap();
        let err = registry
            .register(Stub::boxed("uplift", 6, &["boost_amount", "hh_income"], &[]))
            .unwrap_err();
        assert_eq!(
            err,
            RegistrationError::ColumnOwnership {
                column: "hh_income".into(),
                first: "income".into(),
                second: "uplift".into(),
            }
        );
        assert_eq!(registry.len(), 1);
        assert!(!registry.owners().contains_key("boost_amount"));
    }

    #[test]
    fn test_duplicate_name_rejected() {
        let mut registry = ModuleRegistry::new();
        registry.register(Stub::boxed("a", 1, &[], &[])).unwrap();
        let err = registry.register(Stub::boxed("a", 2, &[], &[])).unwrap_err();
        assert_eq!(err, RegistrationError::DuplicateModule("a".into()));
    }

    #[test]
    fn test_order_is_stable_by_priority() {
        let mut registry = ModuleRegistry::new();
        registry
            .register_all([
                Stub::boxed("outcome", 9, &[], &[]),
                Stub::boxed("first_at_4", 4, &[], &[]),
                Stub::boxed("lifecycle", 0, &[], &[]),
                Stub::boxed("second_at_4", 4, &[], &[]),
            ])
            .unwrap();
        assert_eq!(
            registry.names(),
            vec!["lifecycle", "first_at_4", "second_at_4", "outcome"]
        );
    }

    #[test]
    fn test_missing_required_column() {
        let mut registry = ModuleRegistry::new();
        registry.register(Stub::boxed("reader", 7, &[], &["sf12"])).unwrap();
        let scheduler = Scheduler::new(registry);
        let mut store = PopulationStore::new();
        scheduler.declare_columns(&mut store).unwrap();
        let err = scheduler.check_requirements(&store).unwrap_err();
        assert!(matches!(err, RegistrationError::MissingColumn { .. }));

        let as_simulation: SimulationError = err.into();
        assert!(as_simulation.to_string().contains("sf12"));
    }
}
