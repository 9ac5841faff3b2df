//! Column-major tables exchanged between modules and the population store.
//!
//! A [`Table`] always carries an explicit `index`: the store row each entry
//! belongs to. Writes go back through that index, never through row
//! position, so a module cannot silently misalign its results.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::errors::PopulationError;

/// Position of a simulant in the population store. Never reused.
pub type RowIndex = usize;

/// A set of store rows, in store order.
pub type IndexSet = Vec<RowIndex>;

/// A single dynamically typed cell.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Value {
    #[default]
    Null,
    Bool(bool),
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    /// Numeric view of the value. Booleans count as 0/1.
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(v) => Some(*v as f64),
            Value::Float(v) => Some(*v),
            Value::Bool(v) => Some(f64::from(u8::from(*v))),
            _ => None,
        }
    }

    /// Integer view of the value. Floats are accepted when integral.
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(v) => Some(*v),
            Value::Float(v) if v.fract() == 0.0 && v.is_finite() => Some(*v as i64),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Value::Bool(v) => Some(*v),
            _ => None,
        }
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(v) => Some(v),
            _ => None,
        }
    }

    /// Infer a value from a raw text cell (CSV, command line).
    ///
    /// Empty cells and the usual missing markers become `Null`.
    pub fn infer(raw: &str) -> Value {
        let raw = raw.trim();
        match raw {
            "" | "NA" | "NaN" | "nan" | "null" | "None" => return Value::Null,
            "true" | "True" | "TRUE" => return Value::Bool(true),
            "false" | "False" | "FALSE" => return Value::Bool(false),
            _ => {}
        }
        if let Ok(v) = raw.parse::<i64>() {
            return Value::Int(v);
        }
        if let Ok(v) = raw.parse::<f64>() {
            return Value::Float(v);
        }
        Value::Text(raw.to_string())
    }

    /// Ordering between two values, if they are comparable.
    ///
    /// `Null` is never comparable; integers and floats compare numerically.
    pub fn partial_compare(&self, other: &Value) -> Option<Ordering> {
        match (self, other) {
            (Value::Null, _) | (_, Value::Null) => None,
            (Value::Text(a), Value::Text(b)) => Some(a.cmp(b)),
            (Value::Bool(a), Value::Bool(b)) => Some(a.cmp(b)),
            (Value::Text(_), _) | (_, Value::Text(_)) => None,
            (Value::Bool(_), _) | (_, Value::Bool(_)) => None,
            (a, b) => a.as_f64()?.partial_cmp(&b.as_f64()?),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Bool(v) => write!(f, "{v}"),
            Value::Int(v) => write!(f, "{v}"),
            Value::Float(v) => write!(f, "{v}"),
            Value::Text(v) => write!(f, "{v}"),
        }
    }
}

impl From<f64> for Value {
    fn from(v: f64) -> Self {
        Value::Float(v)
    }
}

impl From<i64> for Value {
    fn from(v: i64) -> Self {
        Value::Int(v)
    }
}

impl From<i32> for Value {
    fn from(v: i32) -> Self {
        Value::Int(i64::from(v))
    }
}

impl From<bool> for Value {
    fn from(v: bool) -> Self {
        Value::Bool(v)
    }
}

impl From<&str> for Value {
    fn from(v: &str) -> Self {
        Value::Text(v.to_string())
    }
}

impl From<String> for Value {
    fn from(v: String) -> Self {
        Value::Text(v)
    }
}

impl<T: Into<Value>> From<Option<T>> for Value {
    fn from(v: Option<T>) -> Self {
        v.map_or(Value::Null, Into::into)
    }
}

/// A named column of values.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    name: String,
    values: Vec<Value>,
}

impl Column {
    pub fn new(name: impl Into<String>, values: Vec<Value>) -> Self {
        Self {
            name: name.into(),
            values,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }
}

/// A projection of the population: explicit row index plus named columns.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Table {
    index: Vec<RowIndex>,
    columns: Vec<Column>,
}

impl Table {
    /// Create an empty table over the given rows.
    pub fn new(index: Vec<RowIndex>) -> Self {
        Self {
            index,
            columns: Vec::new(),
        }
    }

    /// Table for rows that do not exist yet (cohort input).
    ///
    /// The index is positional until the store assigns real indices.
    pub fn with_len(len: usize) -> Self {
        Self::new((0..len).collect())
    }

    /// Builder-style column insertion.
    pub fn with_column(
        mut self,
        name: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<Self, PopulationError> {
        self.insert_column(name, values)?;
        Ok(self)
    }

    /// Fill a column with one value for every row.
    pub fn with_constant(self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        let value = value.into();
        let values = vec![value; self.len()];
        let mut table = self;
        table.replace_column(name.into(), values);
        table
    }

    pub fn index(&self) -> &[RowIndex] {
        &self.index
    }

    pub fn len(&self) -> usize {
        self.index.len()
    }

    pub fn is_empty(&self) -> bool {
        self.index.is_empty()
    }

    pub fn columns(&self) -> &[Column] {
        &self.columns
    }

    pub fn column_names(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|c| c.name.as_str())
    }

    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// Values of one column, aligned with `index()`.
    pub fn column(&self, name: &str) -> Result<&[Value], PopulationError> {
        self.columns
            .iter()
            .find(|c| c.name == name)
            .map(|c| c.values.as_slice())
            .ok_or_else(|| PopulationError::UnknownColumn(name.to_string()))
    }

    pub fn column_mut(&mut self, name: &str) -> Result<&mut Vec<Value>, PopulationError> {
        self.columns
            .iter_mut()
            .find(|c| c.name == name)
            .map(|c| &mut c.values)
            .ok_or_else(|| PopulationError::UnknownColumn(name.to_string()))
    }

    /// Insert or replace a column. The length must match the index.
    pub fn insert_column(
        &mut self,
        name: impl Into<String>,
        values: Vec<Value>,
    ) -> Result<(), PopulationError> {
        let name = name.into();
        if values.len() != self.len() {
            return Err(PopulationError::LengthMismatch {
                column: name,
                expected: self.len(),
                actual: values.len(),
            });
        }
        self.replace_column(name, values);
        Ok(())
    }

    fn replace_column(&mut self, name: String, values: Vec<Value>) {
        match self.columns.iter_mut().find(|c| c.name == name) {
            Some(existing) => existing.values = values,
            None => self.columns.push(Column { name, values }),
        }
    }

    /// Remove a column, returning its values.
    pub fn remove_column(&mut self, name: &str) -> Option<Vec<Value>> {
        let pos = self.columns.iter().position(|c| c.name == name)?;
        Some(self.columns.remove(pos).values)
    }

    /// Value at a row position (not a store index).
    pub fn value(&self, position: usize, name: &str) -> Result<&Value, PopulationError> {
        self.column(name)?
            .get(position)
            .ok_or(PopulationError::UnknownRow(position))
    }

    /// Numeric column. `Null` and non-numeric cells are errors.
    pub fn floats(&self, name: &str) -> Result<Vec<f64>, PopulationError> {
        let values = self.column(name)?;
        values
            .iter()
            .zip(&self.index)
            .map(|(v, &index)| {
                v.as_f64().ok_or_else(|| PopulationError::TypeMismatch {
                    column: name.to_string(),
                    index,
                    expected: "number",
                })
            })
            .collect()
    }

    /// Integer column. `Null` and non-integral cells are errors.
    pub fn ints(&self, name: &str) -> Result<Vec<i64>, PopulationError> {
        let values = self.column(name)?;
        values
            .iter()
            .zip(&self.index)
            .map(|(v, &index)| {
                v.as_i64().ok_or_else(|| PopulationError::TypeMismatch {
                    column: name.to_string(),
                    index,
                    expected: "integer",
                })
            })
            .collect()
    }

    /// Boolean column with `Null` read as `false`.
    pub fn flags(&self, name: &str) -> Result<Vec<bool>, PopulationError> {
        Ok(self
            .column(name)?
            .iter()
            .map(|v| v.as_bool().unwrap_or(false))
            .collect())
    }

    /// Keep only the named columns, in the given order.
    pub fn select(&self, names: &[&str]) -> Result<Table, PopulationError> {
        let mut out = Table::new(self.index.clone());
        for name in names {
            out.columns.push(Column::new(*name, self.column(name)?.to_vec()));
        }
        Ok(out)
    }

    /// Keep rows whose mask entry is true.
    pub fn retain(&self, mask: &[bool]) -> Table {
        let keep: Vec<usize> = mask
            .iter()
            .enumerate()
            .filter_map(|(pos, &keep)| keep.then_some(pos))
            .collect();
        self.take(&keep)
    }

    /// Rows at the given positions, in that order.
    pub fn take(&self, positions: &[usize]) -> Table {
        Table {
            index: positions.iter().map(|&p| self.index[p]).collect(),
            columns: self
                .columns
                .iter()
                .map(|c| Column {
                    name: c.name.clone(),
                    values: positions.iter().map(|&p| c.values[p].clone()).collect(),
                })
                .collect(),
        }
    }

    /// Rows for a subset of store indices. Unknown indices are skipped.
    pub fn subset(&self, rows: &[RowIndex]) -> Table {
        let lookup = self.positions();
        let positions: Vec<usize> = rows.iter().filter_map(|r| lookup.get(r).copied()).collect();
        self.take(&positions)
    }

    /// Map from store index to row position.
    pub fn positions(&self) -> HashMap<RowIndex, usize> {
        self.index.iter().enumerate().map(|(p, &i)| (i, p)).collect()
    }

    /// Group row positions by an integer key column (e.g. household id).
    pub fn group_by_int(&self, name: &str) -> Result<BTreeMap<i64, Vec<usize>>, PopulationError> {
        let mut groups: BTreeMap<i64, Vec<usize>> = BTreeMap::new();
        for (pos, key) in self.ints(name)?.into_iter().enumerate() {
            groups.entry(key).or_default().push(pos);
        }
        Ok(groups)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> Table {
        Table::new(vec![4, 7, 9])
            .with_column("age", vec![10.0.into(), 20.0.into(), Value::Null])
            .unwrap()
            .with_column("hidp", vec![1.into(), 1.into(), 2.into()])
            .unwrap()
    }

    #[test]
    fn test_value_infer() {
        assert_eq!(Value::infer("12"), Value::Int(12));
        assert_eq!(Value::infer("1.5"), Value::Float(1.5));
        assert_eq!(Value::infer("True"), Value::Bool(true));
        assert_eq!(Value::infer(""), Value::Null);
        assert_eq!(Value::infer("Female"), Value::Text("Female".into()));
    }

    #[test]
    fn test_value_compare_mixed_numeric() {
        assert_eq!(
            Value::Int(3).partial_compare(&Value::Float(2.5)),
            Some(Ordering::Greater)
        );
        assert_eq!(Value::Null.partial_compare(&Value::Null), None);
        assert_eq!(Value::from("a").partial_compare(&Value::Int(1)), None);
    }

    #[test]
    fn test_insert_column_length_checked() {
        let mut table = Table::new(vec![0, 1]);
        let err = table.insert_column("x", vec![Value::Null]).unwrap_err();
        assert!(matches!(err, PopulationError::LengthMismatch { .. }));
    }

    #[test]
    fn test_floats_reports_null_row() {
        let err = sample().floats("age").unwrap_err();
        assert_eq!(
            err,
            PopulationError::TypeMismatch {
                column: "age".into(),
                index: 9,
                expected: "number"
            }
        );
    }

    #[test]
    fn test_subset_follows_store_index() {
        let sub = sample().subset(&[9, 4]);
        assert_eq!(sub.index(), &[9, 4]);
        assert_eq!(sub.column("hidp").unwrap(), &[Value::Int(2), Value::Int(1)]);
    }

    #[test]
    fn test_group_by_int() {
        let groups = sample().group_by_int("hidp").unwrap();
        assert_eq!(groups[&1], vec![0, 1]);
        assert_eq!(groups[&2], vec![2]);
    }

    #[test]
    fn test_with_constant_replaces() {
        let table = sample().with_constant("hidp", 5);
        assert!(table.column("hidp").unwrap().iter().all(|v| *v == Value::Int(5)));
        assert_eq!(table.columns().len(), 2);
    }
}
