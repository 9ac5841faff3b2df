//! Household income interventions.
//!
//! Every intervention here shares `income_boosted`, `boost_amount` and
//! `boosted_income`, so at most one of them can be active in a run. Each
//! tick starts by taking last tick's boost back out of the income column;
//! the boost is then recomputed from the current state. Re-running a
//! configuration therefore never compounds earlier adjustments.
//!
//! `boosted_income` holds the income as it was right after the boost. If
//! an earlier module has since rewritten the income, the rewritten value
//! already lacks the boost and is taken as the baseline unchanged.

use std::collections::{BTreeSet, HashMap};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use super::{default_income_column, default_kids_column, quantile};
use crate::errors::{ConfigError, Result};
use crate::population::{Predicate, RowIndex, Table, Value, ALIVE, HIDP};
use crate::simulation::{Cohort, Module, ModuleContext};

pub const INCOME_BOOSTED: &str = "income_boosted";
pub const BOOST_AMOUNT: &str = "boost_amount";
pub const TIMES_BOOSTED: &str = "times_boosted";
pub const BOOSTED_INCOME: &str = "boosted_income";

const DEFAULT_PRIORITY: i32 = 6;

/// Weeks in an average month.
const WEEKS_PER_MONTH: f64 = 30.436875 / 7.0;

fn default_weekly_amount() -> f64 {
    25.0
}

fn default_poverty_fraction() -> f64 {
    0.6
}

fn monthly_child_uplift(weekly: f64, kids: f64) -> f64 {
    weekly * WEEKS_PER_MONTH * kids
}

fn boost_columns() -> Vec<String> {
    vec![
        INCOME_BOOSTED.to_string(),
        BOOST_AMOUNT.to_string(),
        BOOSTED_INCOME.to_string(),
    ]
}

fn check_positive(module: &str, what: &str, value: f64) -> Result<(), ConfigError> {
    if value.is_finite() && value > 0.0 {
        Ok(())
    } else {
        Err(ConfigError::Invalid(format!("{module}: {what} must be positive, got {value}")))
    }
}

fn initialize_boosts(ctx: &mut ModuleContext<'_>, cohort: &Cohort, counted: bool) -> Result<()> {
    let mut defaults = Table::new(cohort.index.clone())
        .with_constant(INCOME_BOOSTED, false)
        .with_constant(BOOST_AMOUNT, 0.0)
        .with_constant(BOOSTED_INCOME, Value::Null);
    if counted {
        defaults = defaults.with_constant(TIMES_BOOSTED, 0);
    }
    ctx.update(&defaults)?;
    Ok(())
}

/// Take last tick's boost back out of the income column and zero it.
///
/// The boost is only subtracted while the income still holds the value
/// written when it was applied. With `clear_flags` every row also loses
/// `income_boosted`; cumulative interventions keep the flag as their
/// history.
fn reset_boosts(
    ctx: &mut ModuleContext<'_>,
    index: &[RowIndex],
    income: &str,
    clear_flags: bool,
) -> Result<usize> {
    let view = ctx.view(index, &[income, BOOST_AMOUNT, BOOSTED_INCOME], None)?;
    let boosted: Vec<usize> = view
        .column(BOOST_AMOUNT)?
        .iter()
        .enumerate()
        .filter_map(|(pos, boost)| boost.as_f64().is_some_and(|b| b != 0.0).then_some(pos))
        .collect();

    if !boosted.is_empty() {
        let previous = view.take(&boosted);
        let mut rewritten = 0;
        let restored: Vec<Value> = previous
            .column(income)?
            .iter()
            .zip(previous.column(BOOST_AMOUNT)?)
            .zip(previous.column(BOOSTED_INCOME)?)
            .map(|((value, boost), recorded)| {
                match (value.as_f64(), boost.as_f64(), recorded.as_f64()) {
                    (Some(v), Some(b), Some(r)) if v == r => Value::Float(v - b),
                    _ => {
                        rewritten += 1;
                        value.clone()
                    }
                }
            })
            .collect();
        if rewritten > 0 {
            debug!(rows = rewritten, "income rewritten since last boost, kept as baseline");
        }
        let reset = Table::new(previous.index().to_vec())
            .with_column(income, restored)?
            .with_constant(BOOST_AMOUNT, 0.0)
            .with_constant(BOOSTED_INCOME, Value::Null);
        ctx.update(&reset)?;
    }
    if clear_flags {
        ctx.update(&Table::new(view.index().to_vec()).with_constant(INCOME_BOOSTED, false))?;
    }
    Ok(boosted.len())
}

/// Add each amount to its row's income and record it as the boost.
fn apply_boosts(
    ctx: &mut ModuleContext<'_>,
    income: &str,
    rows: Vec<RowIndex>,
    incomes: &[f64],
    amounts: Vec<f64>,
) -> Result<()> {
    if rows.is_empty() {
        return Ok(());
    }
    let boosted: Vec<Value> = incomes
        .iter()
        .zip(&amounts)
        .map(|(v, b)| Value::Float(v + b))
        .collect();
    let update = Table::new(rows)
        .with_column(income, boosted.clone())?
        .with_column(BOOSTED_INCOME, boosted)?
        .with_column(BOOST_AMOUNT, amounts.into_iter().map(Value::Float).collect())?
        .with_constant(INCOME_BOOSTED, true);
    ctx.update(&update)?;
    Ok(())
}

fn log_boosts(module: &str, year: i32, rows: usize, amounts: &[f64]) {
    let total: f64 = amounts.iter().sum();
    info!(
        module,
        year,
        rows,
        total,
        mean = if rows > 0 { total / rows as f64 } else { 0.0 },
        "intervention applied"
    );
}

/// Living rows with a numeric income: `(positions, incomes)`.
fn with_income(view: &Table, income: &str) -> Result<(Vec<usize>, Vec<f64>)> {
    Ok(view
        .column(income)?
        .iter()
        .enumerate()
        .filter_map(|(pos, v)| v.as_f64().map(|v| (pos, v)))
        .unzip())
}

/// One income per household: that of its first member with a numeric
/// income.
fn household_incomes(view: &Table, income: &str) -> Result<Vec<f64>> {
    let incomes = view.column(income)?;
    Ok(view
        .group_by_int(HIDP)?
        .into_values()
        .filter_map(|members| members.iter().find_map(|&m| incomes[m].as_f64()))
        .collect())
}

/// Child counts with `Null` read as zero.
fn kids(view: &Table, column: &str) -> Result<Vec<f64>> {
    Ok(view
        .column(column)?
        .iter()
        .map(|v| v.as_f64().unwrap_or(0.0))
        .collect())
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HouseholdIncomeBoostConfig {
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "default_income_column")]
    pub income_column: String,
    /// Rows at or below this income percentile (0-100) are boosted.
    pub percentile: f64,
    /// Flat amount added to income.
    pub amount: f64,
}

impl HouseholdIncomeBoostConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=100.0).contains(&self.percentile) {
            return Err(ConfigError::Invalid(format!(
                "{}: percentile must be within 0..=100, got {}",
                HouseholdIncomeBoost::NAME,
                self.percentile
            )));
        }
        check_positive(HouseholdIncomeBoost::NAME, "amount", self.amount)
    }
}

/// Flat uplift for every member of the bottom `percentile` of households.
///
/// The threshold is taken over one income per household, so large
/// households weigh no more than small ones.
#[derive(Debug, Clone)]
pub struct HouseholdIncomeBoost {
    config: HouseholdIncomeBoostConfig,
}

impl HouseholdIncomeBoost {
    pub const NAME: &'static str = "household_income_boost";

    pub fn new(config: HouseholdIncomeBoostConfig) -> Self {
        Self { config }
    }
}

impl Module for HouseholdIncomeBoost {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.config.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    fn columns_required(&self) -> Vec<String> {
        vec![
            ALIVE.to_string(),
            HIDP.to_string(),
            self.config.income_column.clone(),
        ]
    }

    fn columns_created(&self) -> Vec<String> {
        boost_columns()
    }

    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        initialize_boosts(ctx, cohort, false)
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let income = self.config.income_column.as_str();
        reset_boosts(ctx, index, income, true)?;

        let view = ctx.view_alive(index, &[HIDP, income])?;
        let (positions, incomes) = with_income(&view, income)?;
        let per_household = household_incomes(&view, income)?;
        let Some(threshold) = quantile(per_household, self.config.percentile / 100.0) else {
            return Ok(());
        };

        let (rows, eligible): (Vec<RowIndex>, Vec<f64>) = positions
            .iter()
            .zip(&incomes)
            .filter(|(_, v)| **v <= threshold)
            .map(|(&pos, &v)| (view.index()[pos], v))
            .unzip();
        let amounts = vec![self.config.amount; rows.len()];
        log_boosts(Self::NAME, ctx.year(), rows.len(), &amounts);
        apply_boosts(ctx, income, rows, &eligible, amounts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildUpliftConfig {
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "default_income_column")]
    pub income_column: String,
    #[serde(default = "default_kids_column")]
    pub kids_column: String,
    /// Weekly amount per child, paid monthly.
    #[serde(default = "default_weekly_amount")]
    pub weekly_amount: f64,
    /// Restrict the uplift to matching rows.
    #[serde(default)]
    pub filter: Option<Predicate>,
}

impl Default for ChildUpliftConfig {
    fn default() -> Self {
        Self {
            priority: None,
            income_column: default_income_column(),
            kids_column: default_kids_column(),
            weekly_amount: default_weekly_amount(),
            filter: None,
        }
    }
}

impl ChildUpliftConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive(ChildUplift::NAME, "weekly_amount", self.weekly_amount)
    }
}

/// Per-child uplift for every household with children.
#[derive(Debug, Clone)]
pub struct ChildUplift {
    config: ChildUpliftConfig,
}

impl ChildUplift {
    pub const NAME: &'static str = "child_uplift";

    pub fn new(config: ChildUpliftConfig) -> Self {
        Self { config }
    }
}

impl Module for ChildUplift {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.config.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    fn columns_required(&self) -> Vec<String> {
        let mut columns: BTreeSet<String> = [
            ALIVE.to_string(),
            self.config.income_column.clone(),
            self.config.kids_column.clone(),
        ]
        .into();
        if let Some(filter) = &self.config.filter {
            columns.extend(filter.columns().into_iter().map(str::to_string));
        }
        columns.into_iter().collect()
    }

    fn columns_created(&self) -> Vec<String> {
        boost_columns()
    }

    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        initialize_boosts(ctx, cohort, false)
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let income = self.config.income_column.as_str();
        reset_boosts(ctx, index, income, true)?;

        let selection = match &self.config.filter {
            Some(filter) => Predicate::alive().and(filter.clone()),
            None => Predicate::alive(),
        };
        let view = ctx.view(index, &[income, self.config.kids_column.as_str()], Some(&selection))?;
        let (positions, incomes) = with_income(&view, income)?;
        let children = kids(&view, &self.config.kids_column)?;

        let mut rows = Vec::new();
        let mut eligible = Vec::new();
        let mut amounts = Vec::new();
        for (&pos, &v) in positions.iter().zip(&incomes) {
            if children[pos] > 0.0 {
                rows.push(view.index()[pos]);
                eligible.push(v);
                amounts.push(monthly_child_uplift(self.config.weekly_amount, children[pos]));
            }
        }
        log_boosts(Self::NAME, ctx.year(), rows.len(), &amounts);
        apply_boosts(ctx, income, rows, &eligible, amounts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PovertyLineChildUpliftConfig {
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "default_income_column")]
    pub income_column: String,
    #[serde(default = "default_kids_column")]
    pub kids_column: String,
    #[serde(default = "default_weekly_amount")]
    pub weekly_amount: f64,
    /// Poverty line as a fraction of median income.
    #[serde(default = "default_poverty_fraction")]
    pub poverty_fraction: f64,
}

impl Default for PovertyLineChildUpliftConfig {
    fn default() -> Self {
        Self {
            priority: None,
            income_column: default_income_column(),
            kids_column: default_kids_column(),
            weekly_amount: default_weekly_amount(),
            poverty_fraction: default_poverty_fraction(),
        }
    }
}

impl PovertyLineChildUpliftConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_positive(PovertyLineChildUplift::NAME, "weekly_amount", self.weekly_amount)?;
        check_positive(PovertyLineChildUplift::NAME, "poverty_fraction", self.poverty_fraction)
    }
}

/// Per-child uplift for households with children at or under the poverty
/// line.
#[derive(Debug, Clone)]
pub struct PovertyLineChildUplift {
    config: PovertyLineChildUpliftConfig,
}

impl PovertyLineChildUplift {
    pub const NAME: &'static str = "poverty_line_child_uplift";

    pub fn new(config: PovertyLineChildUpliftConfig) -> Self {
        Self { config }
    }
}

impl Module for PovertyLineChildUplift {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.config.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    fn columns_required(&self) -> Vec<String> {
        vec![
            ALIVE.to_string(),
            self.config.income_column.clone(),
            self.config.kids_column.clone(),
        ]
    }

    fn columns_created(&self) -> Vec<String> {
        boost_columns()
    }

    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        initialize_boosts(ctx, cohort, false)
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let income = self.config.income_column.as_str();
        reset_boosts(ctx, index, income, true)?;

        let view = ctx.view_alive(index, &[income, self.config.kids_column.as_str()])?;
        let (positions, incomes) = with_income(&view, income)?;
        let Some(median) = quantile(incomes.iter().copied(), 0.5) else {
            return Ok(());
        };
        let line = median * self.config.poverty_fraction;
        let children = kids(&view, &self.config.kids_column)?;

        let mut rows = Vec::new();
        let mut eligible = Vec::new();
        let mut amounts = Vec::new();
        for (&pos, &v) in positions.iter().zip(&incomes) {
            if v <= line && children[pos] > 0.0 {
                rows.push(view.index()[pos]);
                eligible.push(v);
                amounts.push(monthly_child_uplift(self.config.weekly_amount, children[pos]));
            }
        }
        log_boosts(Self::NAME, ctx.year(), rows.len(), &amounts);
        apply_boosts(ctx, income, rows, &eligible, amounts)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChildPovertySustainConfig {
    #[serde(default)]
    pub priority: Option<i32>,
    #[serde(default = "default_income_column")]
    pub income_column: String,
    #[serde(default = "default_kids_column")]
    pub kids_column: String,
    /// Share of children in relative poverty to reach by `end_year`.
    #[serde(default = "default_target_rate")]
    pub target_rate: f64,
    #[serde(default = "default_end_year")]
    pub end_year: i32,
    #[serde(default = "default_poverty_fraction")]
    pub poverty_fraction: f64,
}

fn default_target_rate() -> f64 {
    0.1
}

fn default_end_year() -> i32 {
    2030
}

impl Default for ChildPovertySustainConfig {
    fn default() -> Self {
        Self {
            priority: None,
            income_column: default_income_column(),
            kids_column: default_kids_column(),
            target_rate: default_target_rate(),
            end_year: default_end_year(),
            poverty_fraction: default_poverty_fraction(),
        }
    }
}

impl ChildPovertySustainConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if !(0.0..=1.0).contains(&self.target_rate) {
            return Err(ConfigError::Invalid(format!(
                "{}: target_rate must be within 0..=1, got {}",
                ChildPovertySustain::NAME,
                self.target_rate
            )));
        }
        check_positive(ChildPovertySustain::NAME, "poverty_fraction", self.poverty_fraction)
    }
}

/// One household as seen through its first living member.
struct Household {
    representative: RowIndex,
    members: Vec<usize>,
    income: f64,
    kids: f64,
    supported: bool,
}

/// Lifts households with children out of relative poverty until the
/// share of poor children falls to `target_rate` by `end_year`.
///
/// Households lifted once keep being supported in later years while they
/// remain under the poverty line; new households are added each year in
/// random order (from the module's stream) until enough children are
/// covered for this year's share of the remaining reduction.
#[derive(Debug, Clone)]
pub struct ChildPovertySustain {
    config: ChildPovertySustainConfig,
}

impl ChildPovertySustain {
    pub const NAME: &'static str = "child_poverty_sustain";

    pub fn new(config: ChildPovertySustainConfig) -> Self {
        Self { config }
    }

    /// Children to lift out of poverty this year.
    fn children_needed(&self, total: f64, in_poverty: f64, year: i32) -> usize {
        let above_target = (in_poverty / total - self.config.target_rate).max(0.0);
        let years_remaining = self.config.end_year - year;
        let proportion = if years_remaining > 0 {
            above_target / f64::from(years_remaining)
        } else {
            above_target
        };
        (total * proportion).ceil() as usize
    }

    fn households(&self, view: &Table) -> Result<Vec<Household>> {
        let income = self.config.income_column.as_str();
        let children = kids(view, &self.config.kids_column)?;
        let incomes = view.column(income)?;
        let flags = view.flags(INCOME_BOOSTED)?;

        let mut households = Vec::new();
        for members in view.group_by_int(HIDP)?.into_values() {
            let first = members[0];
            let Some(value) = incomes[first].as_f64() else {
                continue;
            };
            households.push(Household {
                representative: view.index()[first],
                supported: members.iter().any(|&m| flags[m]),
                income: value,
                kids: children[first],
                members,
            });
        }
        Ok(households)
    }
}

impl Module for ChildPovertySustain {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn priority(&self) -> i32 {
        self.config.priority.unwrap_or(DEFAULT_PRIORITY)
    }

    fn columns_required(&self) -> Vec<String> {
        vec![
            ALIVE.to_string(),
            HIDP.to_string(),
            self.config.income_column.clone(),
            self.config.kids_column.clone(),
        ]
    }

    fn columns_created(&self) -> Vec<String> {
        let mut columns = boost_columns();
        columns.push(TIMES_BOOSTED.to_string());
        columns
    }

    fn on_initialize(&mut self, ctx: &mut ModuleContext<'_>, cohort: &Cohort) -> Result<()> {
        initialize_boosts(ctx, cohort, true)
    }

    fn on_time_step(&mut self, ctx: &mut ModuleContext<'_>, index: &[RowIndex]) -> Result<()> {
        let income = self.config.income_column.as_str();
        reset_boosts(ctx, index, income, false)?;

        let view = ctx.view_alive(
            index,
            &[HIDP, income, self.config.kids_column.as_str(), INCOME_BOOSTED, TIMES_BOOSTED],
        )?;
        let households = self.households(&view)?;
        let total_kids: f64 = households.iter().map(|h| h.kids).sum();
        let Some(median) = quantile(households.iter().map(|h| h.income), 0.5) else {
            return Ok(());
        };
        if total_kids <= 0.0 {
            info!(year = ctx.year(), "no children in the population, nothing to sustain");
            return Ok(());
        }
        let line = median * self.config.poverty_fraction;
        let poor = |h: &&Household| h.kids > 0.0 && h.income < line;

        let mut lifted: Vec<&Household> = households.iter().filter(poor).filter(|h| h.supported).collect();
        let candidates: HashMap<RowIndex, &Household> = households
            .iter()
            .filter(poor)
            .filter(|h| !h.supported)
            .map(|h| (h.representative, h))
            .collect();

        let in_poverty: f64 = candidates.values().map(|h| h.kids).sum();
        let needed = self.children_needed(total_kids, in_poverty, ctx.year()) as f64;
        if needed > 0.0 {
            let representatives: Vec<RowIndex> = {
                let mut reps: Vec<RowIndex> = candidates.keys().copied().collect();
                reps.sort_unstable();
                reps
            };
            let mut covered = 0.0;
            for rep in ctx.stream().shuffle(&representatives)? {
                let household = candidates[&rep];
                if covered + household.kids <= needed {
                    covered += household.kids;
                    lifted.push(household);
                }
                if covered >= needed {
                    break;
                }
            }
        }

        let times = view.column(TIMES_BOOSTED)?;
        let mut rows = Vec::new();
        let mut incomes = Vec::new();
        let mut amounts = Vec::new();
        let mut counts = Vec::new();
        for household in &lifted {
            for &member in &household.members {
                let Some(value) = view.column(income)?[member].as_f64() else {
                    continue;
                };
                rows.push(view.index()[member]);
                incomes.push(value);
                amounts.push(line - value + 1.0);
                counts.push(Value::Int(times[member].as_i64().unwrap_or(0) + 1));
            }
        }
        let counted = Table::new(rows.clone()).with_column(TIMES_BOOSTED, counts)?;

        info!(
            year = ctx.year(),
            poverty_line = line,
            children_needed = needed,
            households = lifted.len(),
            "child poverty support"
        );
        log_boosts(Self::NAME, ctx.year(), rows.len(), &amounts);
        apply_boosts(ctx, income, rows, &incomes, amounts)?;
        ctx.update(&counted)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::simulation::Ageing;
    use crate::testing::{floats, ints, people, simulation};

    fn households() -> Table {
        people(vec![
            ("pidp", ints(&[1, 2, 3, 4, 5, 6])),
            ("hidp", ints(&[1, 1, 2, 3, 4, 5])),
            ("age", floats(&[35.0, 33.0, 29.0, 60.0, 41.0, 38.0])),
            ("hh_income", floats(&[100.0, 100.0, 150.0, 1000.0, 1200.0, 900.0])),
            ("nkids", ints(&[2, 2, 1, 0, 2, 1])),
        ])
    }

    fn incomes(sim: &crate::simulation::Simulation) -> Vec<f64> {
        sim.view(&["hh_income"], None).unwrap().floats("hh_income").unwrap()
    }

    #[test]
    fn test_household_income_boost_bottom_percentile() {
        let config = HouseholdIncomeBoostConfig {
            priority: None,
            income_column: "hh_income".into(),
            percentile: 20.0,
            amount: 50.0,
        };
        config.validate().unwrap();
        let mut sim = simulation(households(), vec![Box::new(HouseholdIncomeBoost::new(config))]);
        sim.step().unwrap();

        let flags = sim.view(&[INCOME_BOOSTED], None).unwrap().flags(INCOME_BOOSTED).unwrap();
        assert_eq!(flags, vec![true, true, false, false, false, false]);
        assert_eq!(incomes(&sim)[..3], [150.0, 150.0, 150.0]);

        // Reset before recomputing: the boost is never stacked.
        sim.step().unwrap();
        assert_eq!(incomes(&sim)[..3], [150.0, 150.0, 150.0]);
    }

    #[test]
    fn test_household_income_boost_counts_households_once() {
        // Household 1 has three members; by rows the median would be 100.
        let population = people(vec![
            ("pidp", ints(&[1, 2, 3, 4, 5])),
            ("hidp", ints(&[1, 1, 1, 2, 3])),
            ("age", floats(&[40.0, 38.0, 17.0, 50.0, 45.0])),
            ("hh_income", floats(&[100.0, 100.0, 100.0, 200.0, 300.0])),
        ]);
        let config = HouseholdIncomeBoostConfig {
            priority: None,
            income_column: "hh_income".into(),
            percentile: 50.0,
            amount: 10.0,
        };
        let mut sim = simulation(population, vec![Box::new(HouseholdIncomeBoost::new(config))]);
        sim.step().unwrap();

        let flags = sim.view(&[INCOME_BOOSTED], None).unwrap().flags(INCOME_BOOSTED).unwrap();
        assert_eq!(flags, vec![true, true, true, true, false]);
        assert_eq!(incomes(&sim), vec![110.0, 110.0, 110.0, 210.0, 300.0]);
    }

    #[test]
    fn test_child_uplift_resets_when_no_longer_eligible() {
        let config = ChildUpliftConfig {
            filter: Some("age < 31".parse().unwrap()),
            ..Default::default()
        };
        let mut sim = simulation(
            households(),
            vec![Box::new(Ageing::new()), Box::new(ChildUplift::new(config))],
        );

        // Ageing runs first: only pidp 3 (now 30) passes the filter.
        sim.step().unwrap();
        let view = sim.view(&[BOOST_AMOUNT, INCOME_BOOSTED], None).unwrap();
        let boost = monthly_child_uplift(25.0, 1.0);
        assert_eq!(view.flags(INCOME_BOOSTED).unwrap(), vec![false, false, true, false, false, false]);
        assert!((view.floats(BOOST_AMOUNT).unwrap()[2] - boost).abs() < 1e-9);
        assert!((incomes(&sim)[2] - (150.0 + boost)).abs() < 1e-9);

        // Aged past the filter: no one is eligible and the boost is gone.
        sim.step().unwrap();
        let view = sim.view(&[BOOST_AMOUNT, INCOME_BOOSTED], None).unwrap();
        assert!(view.floats(BOOST_AMOUNT).unwrap().iter().all(|&b| b == 0.0));
        assert!(view.flags(INCOME_BOOSTED).unwrap().iter().all(|&f| !f));
        assert!((incomes(&sim)[2] - 150.0).abs() < 1e-9);
    }

    #[test]
    fn test_poverty_line_child_uplift() {
        let mut sim = simulation(
            households(),
            vec![Box::new(PovertyLineChildUplift::new(PovertyLineChildUpliftConfig::default()))],
        );
        sim.step().unwrap();
        // Median of row incomes is 525, the line 315.
        let flags = sim.view(&[INCOME_BOOSTED], None).unwrap().flags(INCOME_BOOSTED).unwrap();
        assert_eq!(flags, vec![true, true, true, false, false, false]);
    }

    #[test]
    fn test_child_poverty_sustain_selects_and_keeps_households() {
        let mut sim = simulation(
            households(),
            vec![Box::new(ChildPovertySustain::new(ChildPovertySustainConfig::default()))],
        );

        // 2021: 3 of 6 children are poor; one child is needed this year,
        // which only household 2 fits.
        sim.step().unwrap();
        let view = sim
            .view(&[INCOME_BOOSTED, BOOST_AMOUNT, TIMES_BOOSTED], None)
            .unwrap();
        assert_eq!(view.flags(INCOME_BOOSTED).unwrap(), vec![false, false, true, false, false, false]);
        assert_eq!(view.floats(BOOST_AMOUNT).unwrap()[2], 540.0 - 150.0 + 1.0);
        assert_eq!(incomes(&sim)[2], 541.0);

        // 2022: household 2 is supported again; household 1 still does not fit.
        sim.step().unwrap();
        let view = sim.view(&[TIMES_BOOSTED, BOOST_AMOUNT], None).unwrap();
        assert_eq!(view.ints(TIMES_BOOSTED).unwrap(), vec![0, 0, 2, 0, 0, 0]);
        assert_eq!(incomes(&sim)[2], 541.0);
        assert_eq!(incomes(&sim)[0], 100.0);
    }

    #[test]
    fn test_child_poverty_sustain_end_year_lifts_all_needed() {
        let config = ChildPovertySustainConfig {
            end_year: 2021,
            ..Default::default()
        };
        let mut sim = simulation(households(), vec![Box::new(ChildPovertySustain::new(config))]);
        sim.step().unwrap();
        let flags = sim.view(&[INCOME_BOOSTED], None).unwrap().flags(INCOME_BOOSTED).unwrap();
        assert_eq!(flags, vec![true, true, true, false, false, false]);
        assert_eq!(incomes(&sim)[..3], [541.0, 541.0, 541.0]);
    }

    #[test]
    fn test_children_needed() {
        let module = ChildPovertySustain::new(ChildPovertySustainConfig::default());
        assert_eq!(module.children_needed(6.0, 3.0, 2021), 1);
        assert_eq!(module.children_needed(6.0, 0.6, 2021), 0);
        assert_eq!(module.children_needed(6.0, 3.0, 2030), 3);
        assert_eq!(module.children_needed(6.0, 3.0, 2035), 3);
    }

    #[test]
    fn test_interventions_cannot_share_boost_columns() {
        let err = crate::simulation::SimulationBuilder::new()
            .start_year(2020)
            .years(1)
            .cohorts(crate::source::MemoryCohortSource::new().with_year(2020, households()))
            .module(ChildUplift::new(ChildUpliftConfig::default()))
            .module(PovertyLineChildUplift::new(PovertyLineChildUpliftConfig::default()))
            .build()
            .unwrap_err();
        assert!(err.to_string().contains(INCOME_BOOSTED) || err.to_string().contains(BOOST_AMOUNT));
    }
}
