//! In-memory rectangular tables extracted from feed archives.
//!
//! A [`Table`] is a named list of columns plus rows of [`Value`]s. It carries
//! just enough relational machinery (filter, dedup, join, concat) for the
//! cleaning and metric stages.

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;
use crate::season::{Period, Season};

/// Columns that keep their raw text; they are parsed explicitly downstream.
pub const TIME_AND_DATE_COLUMNS: &[&str] = &[
    "arrival_time",
    "departure_time",
    "start_date",
    "end_date",
    "date",
    "feed_start_date",
    "feed_end_date",
];

/// Trimmed, uppercased form used to compare keys across tables.
pub fn normalize_key(raw: &str) -> String {
    raw.trim().to_uppercase()
}

/// Identifier columns (`route_id`, `trip_id`, ...) are never type-inferred:
/// `0123` and `123` are different ids.
pub fn keeps_text(column: &str) -> bool {
    TIME_AND_DATE_COLUMNS.contains(&column) || column.ends_with("_id")
}

/// The archive members the pipeline knows how to request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TableName {
    Trips,
    StopTimes,
    Calendar,
    Routes,
    Stops,
    FareProducts,
    FareLegRules,
    Lines,
}

impl TableName {
    pub const ALL: [TableName; 8] = [
        TableName::Trips,
        TableName::StopTimes,
        TableName::Calendar,
        TableName::Routes,
        TableName::Stops,
        TableName::FareProducts,
        TableName::FareLegRules,
        TableName::Lines,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            TableName::Trips => "trips",
            TableName::StopTimes => "stop_times",
            TableName::Calendar => "calendar",
            TableName::Routes => "routes",
            TableName::Stops => "stops",
            TableName::FareProducts => "fare_products",
            TableName::FareLegRules => "fare_leg_rules",
            TableName::Lines => "lines",
        }
    }
}

impl fmt::Display for TableName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TableName {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        TableName::ALL
            .into_iter()
            .find(|t| t.as_str() == s.trim())
            .ok_or_else(|| PipelineError::InvalidInput(format!("unknown table name '{s}'")))
    }
}

/// Identifies one extracted table snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct TableKey {
    pub table: TableName,
    pub year: i32,
    pub season: Season,
}

impl TableKey {
    pub fn new(table: TableName, period: Period) -> Self {
        Self {
            table,
            year: period.year,
            season: period.season,
        }
    }

    pub fn period(&self) -> Period {
        Period::new(self.year, self.season)
    }
}

impl fmt::Display for TableKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({} {})", self.table, self.season, self.year)
    }
}

/// A single cell.
#[derive(Debug, Clone, PartialEq)]
pub enum Value {
    Null,
    Int(i64),
    Float(f64),
    Text(String),
}

impl Value {
    pub fn text(s: impl Into<String>) -> Self {
        Value::Text(s.into())
    }

    pub fn is_null(&self) -> bool {
        matches!(self, Value::Null)
    }

    pub fn as_str(&self) -> Option<&str> {
        match self {
            Value::Text(s) => Some(s),
            _ => None,
        }
    }

    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Value::Int(i) => Some(*i),
            Value::Float(f) if f.fract() == 0.0 => Some(*f as i64),
            Value::Text(s) => s.trim().parse().ok(),
            _ => None,
        }
    }

    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Value::Int(i) => Some(*i as f64),
            Value::Float(f) => Some(*f),
            Value::Text(s) => s.trim().parse().ok(),
            Value::Null => None,
        }
    }

    /// Matching form of a key cell: trimmed and uppercased. Nulls have no key.
    pub fn key(&self) -> Option<String> {
        match self {
            Value::Null => None,
            other => Some(normalize_key(&other.to_string())),
        }
    }

    /// Day-of-week style flag: true when the cell holds 1.
    pub fn is_set(&self) -> bool {
        self.as_i64() == Some(1)
    }

    /// Total order used for sorting: nulls first, then numbers, then text.
    pub fn compare(&self, other: &Value) -> Ordering {
        fn rank(v: &Value) -> u8 {
            match v {
                Value::Null => 0,
                Value::Int(_) | Value::Float(_) => 1,
                Value::Text(_) => 2,
            }
        }
        match (self, other) {
            (Value::Text(a), Value::Text(b)) => a.cmp(b),
            (a, b) if rank(a) == 1 && rank(b) == 1 => {
                let (a, b) = (a.as_f64().unwrap_or(0.0), b.as_f64().unwrap_or(0.0));
                a.total_cmp(&b)
            }
            (a, b) => rank(a).cmp(&rank(b)),
        }
    }
}

impl fmt::Display for Value {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Value::Null => Ok(()),
            Value::Int(i) => write!(f, "{i}"),
            Value::Float(x) => write!(f, "{x}"),
            Value::Text(s) => f.write_str(s),
        }
    }
}

impl From<&str> for Value {
    fn from(s: &str) -> Self {
        Value::Text(s.to_string())
    }
}

impl From<String> for Value {
    fn from(s: String) -> Self {
        Value::Text(s)
    }
}

impl From<i64> for Value {
    fn from(i: i64) -> Self {
        Value::Int(i)
    }
}

impl From<f64> for Value {
    fn from(x: f64) -> Self {
        Value::Float(x)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JoinKind {
    Inner,
    Left,
}

/// Which row survives when de-duplicating on a column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Keep {
    First,
    Last,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Table {
    name: String,
    columns: Vec<String>,
    rows: Vec<Vec<Value>>,
}

impl Table {
    pub fn new(name: impl Into<String>, columns: Vec<String>) -> Self {
        Self {
            name: name.into(),
            columns,
            rows: Vec::new(),
        }
    }

    pub fn with_columns(name: impl Into<String>, columns: &[&str]) -> Self {
        Self::new(name, columns.iter().map(|c| c.to_string()).collect())
    }

    /// Builds a table from raw text cells, inferring a type per column.
    ///
    /// Empty cells become [`Value::Null`]. A column whose non-null cells all
    /// parse as integers becomes `Int`, else all floats becomes `Float`, else
    /// `Text`. Columns matching [`keeps_text`] always stay `Text`.
    pub fn from_text(name: impl Into<String>, columns: Vec<String>, raw: Vec<Vec<String>>) -> Self {
        let kinds: Vec<ColumnKind> = (0..columns.len())
            .map(|i| {
                if keeps_text(&columns[i]) {
                    ColumnKind::Text
                } else {
                    infer_kind(raw.iter().filter_map(|r| r.get(i).map(String::as_str)))
                }
            })
            .collect();

        let rows = raw
            .into_iter()
            .map(|record| {
                (0..columns.len())
                    .map(|i| {
                        let cell = record.get(i).map(|s| s.trim()).unwrap_or("");
                        kinds[i].parse(cell)
                    })
                    .collect()
            })
            .collect();

        Self {
            name: name.into(),
            columns,
            rows,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn renamed(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn columns(&self) -> &[String] {
        &self.columns
    }

    pub fn rows(&self) -> &[Vec<Value>] {
        &self.rows
    }

    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    pub fn has_column(&self, column: &str) -> bool {
        self.column_index(column).is_some()
    }

    pub fn column_index(&self, column: &str) -> Option<usize> {
        self.columns.iter().position(|c| c == column)
    }

    /// Index of a column the caller cannot do without.
    pub fn require(&self, column: &str) -> Result<usize, PipelineError> {
        self.column_index(column)
            .ok_or_else(|| PipelineError::missing_column(&self.name, column))
    }

    pub fn require_all(&self, columns: &[&str]) -> Result<Vec<usize>, PipelineError> {
        columns.iter().map(|c| self.require(c)).collect()
    }

    pub fn push_row(&mut self, row: Vec<Value>) {
        debug_assert_eq!(row.len(), self.columns.len(), "row width mismatch in {}", self.name);
        self.rows.push(row);
    }

    pub fn filter(&self, mut predicate: impl FnMut(&[Value]) -> bool) -> Table {
        Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: self.rows.iter().filter(|r| predicate(r)).cloned().collect(),
        }
    }

    pub fn retain(&mut self, mut predicate: impl FnMut(&[Value]) -> bool) {
        self.rows.retain(|r| predicate(r));
    }

    /// Drops exact duplicate rows, keeping the first occurrence.
    pub fn distinct(&self) -> Table {
        let mut seen = HashSet::new();
        self.filter(|row| seen.insert(row_fingerprint(row)))
    }

    /// Keeps one row per distinct value of `column`.
    pub fn distinct_by(&self, column: &str, keep: Keep) -> Result<Table, PipelineError> {
        let idx = self.require(column)?;
        let mut chosen: HashMap<String, usize> = HashMap::new();
        let mut order = Vec::new();
        for (i, row) in self.rows.iter().enumerate() {
            let key = row_fingerprint(std::slice::from_ref(&row[idx]));
            match chosen.get_mut(&key) {
                None => {
                    chosen.insert(key.clone(), i);
                    order.push(key);
                }
                Some(existing) if keep == Keep::Last => *existing = i,
                Some(_) => {}
            }
        }
        let mut picked: Vec<usize> = order.iter().map(|k| chosen[k]).collect();
        picked.sort_unstable();
        Ok(Table {
            name: self.name.clone(),
            columns: self.columns.clone(),
            rows: picked.into_iter().map(|i| self.rows[i].clone()).collect(),
        })
    }

    /// Drops rows with a null in any of `columns`.
    pub fn drop_nulls(&self, columns: &[&str]) -> Result<Table, PipelineError> {
        let idx = self.require_all(columns)?;
        Ok(self.filter(|row| idx.iter().all(|&i| !row[i].is_null())))
    }

    /// Replaces nulls in `column` with `value`. Absent columns are left alone.
    pub fn fill_nulls(&mut self, column: &str, value: Value) {
        if let Some(idx) = self.column_index(column) {
            for row in &mut self.rows {
                if row[idx].is_null() {
                    row[idx] = value.clone();
                }
            }
        }
    }

    /// Trims and uppercases the given key columns, turning them into text.
    /// Columns the table does not have are skipped.
    pub fn normalize_keys(&mut self, columns: &[&str]) {
        for column in columns {
            let Some(idx) = self.column_index(column) else {
                continue;
            };
            for row in &mut self.rows {
                if let Some(key) = row[idx].key() {
                    row[idx] = Value::Text(key);
                }
            }
        }
    }

    pub fn map_column(
        &mut self,
        column: &str,
        f: impl Fn(&Value) -> Value,
    ) -> Result<(), PipelineError> {
        let idx = self.require(column)?;
        for row in &mut self.rows {
            row[idx] = f(&row[idx]);
        }
        Ok(())
    }

    /// Adds (or replaces) a column computed from each row.
    pub fn add_column(&mut self, column: &str, f: impl Fn(&[Value]) -> Value) {
        match self.column_index(column) {
            Some(idx) => {
                for row in &mut self.rows {
                    row[idx] = f(row);
                }
            }
            None => {
                for row in &mut self.rows {
                    let value = f(row);
                    row.push(value);
                }
                self.columns.push(column.to_string());
            }
        }
    }

    pub fn select(&self, columns: &[&str]) -> Result<Table, PipelineError> {
        let idx = self.require_all(columns)?;
        Ok(Table {
            name: self.name.clone(),
            columns: columns.iter().map(|c| c.to_string()).collect(),
            rows: self
                .rows
                .iter()
                .map(|row| idx.iter().map(|&i| row[i].clone()).collect())
                .collect(),
        })
    }

    pub fn drop_columns(&mut self, columns: &[&str]) {
        let keep: Vec<usize> = (0..self.columns.len())
            .filter(|&i| !columns.contains(&self.columns[i].as_str()))
            .collect();
        if keep.len() == self.columns.len() {
            return;
        }
        self.columns = keep.iter().map(|&i| self.columns[i].clone()).collect();
        for row in &mut self.rows {
            *row = keep.iter().map(|&i| row[i].clone()).collect();
        }
    }

    pub fn sort_by(&mut self, mut compare: impl FnMut(&[Value], &[Value]) -> Ordering) {
        self.rows.sort_by(|a, b| compare(a, b));
    }

    /// Stacks tables on top of each other. The result has the union of all
    /// columns in first-seen order; cells a table lacks are null.
    pub fn concat<'a>(name: impl Into<String>, tables: impl IntoIterator<Item = &'a Table>) -> Table {
        let tables: Vec<&Table> = tables.into_iter().collect();
        let mut columns: Vec<String> = Vec::new();
        for table in &tables {
            for c in &table.columns {
                if !columns.contains(c) {
                    columns.push(c.clone());
                }
            }
        }

        let mut out = Table::new(name, columns);
        for table in tables {
            let mapping: Vec<Option<usize>> =
                out.columns.iter().map(|c| table.column_index(c)).collect();
            for row in &table.rows {
                out.rows.push(
                    mapping
                        .iter()
                        .map(|m| m.map(|i| row[i].clone()).unwrap_or(Value::Null))
                        .collect(),
                );
            }
        }
        out
    }

    /// Deserializes every row into `T`, matching struct fields to columns by
    /// name. Nulls are handed to serde as empty fields.
    pub fn records<T: DeserializeOwned>(&self) -> Result<Vec<T>, PipelineError> {
        let headers = csv::StringRecord::from(self.columns.clone());
        self.rows
            .iter()
            .map(|row| {
                let record: csv::StringRecord = row.iter().map(|v| v.to_string()).collect();
                Ok(record.deserialize(Some(&headers))?)
            })
            .collect()
    }

    /// Joins `self` with `other` on a shared key column.
    ///
    /// Keys are compared in their normalized form (see [`Value::key`]) and
    /// nulls never match. The right side's key column is dropped; any other
    /// right column whose name clashes gets a `_right` suffix.
    pub fn join(&self, other: &Table, on: &str, kind: JoinKind) -> Result<Table, PipelineError> {
        let left_key = self.require(on)?;
        let right_key = other.require(on)?;

        let mut index: HashMap<String, Vec<usize>> = HashMap::new();
        for (i, row) in other.rows.iter().enumerate() {
            if let Some(key) = row[right_key].key() {
                index.entry(key).or_default().push(i);
            }
        }

        let right_cols: Vec<usize> = (0..other.columns.len()).filter(|&i| i != right_key).collect();
        let mut columns = self.columns.clone();
        for &i in &right_cols {
            let name = &other.columns[i];
            if columns.contains(name) {
                columns.push(format!("{name}_right"));
            } else {
                columns.push(name.clone());
            }
        }

        let mut out = Table::new(format!("{}+{}", self.name, other.name), columns);
        for row in &self.rows {
            let matches = row[left_key].key().and_then(|k| index.get(&k));
            match matches {
                Some(hits) => {
                    for &j in hits {
                        let mut combined = row.clone();
                        combined.extend(right_cols.iter().map(|&c| other.rows[j][c].clone()));
                        out.rows.push(combined);
                    }
                }
                None if kind == JoinKind::Left => {
                    let mut combined = row.clone();
                    combined.extend(right_cols.iter().map(|_| Value::Null));
                    out.rows.push(combined);
                }
                None => {}
            }
        }
        Ok(out)
    }
}

#[derive(Debug, Clone, Copy)]
enum ColumnKind {
    Int,
    Float,
    Text,
}

impl ColumnKind {
    fn parse(&self, cell: &str) -> Value {
        if cell.is_empty() {
            return Value::Null;
        }
        match self {
            ColumnKind::Int => cell.parse().map(Value::Int).unwrap_or_else(|_| Value::text(cell)),
            ColumnKind::Float => cell
                .parse()
                .map(Value::Float)
                .unwrap_or_else(|_| Value::text(cell)),
            ColumnKind::Text => Value::text(cell),
        }
    }
}

fn infer_kind<'a>(cells: impl Iterator<Item = &'a str>) -> ColumnKind {
    let mut kind = ColumnKind::Int;
    let mut any = false;
    for cell in cells.map(str::trim).filter(|c| !c.is_empty()) {
        any = true;
        kind = match kind {
            ColumnKind::Int if cell.parse::<i64>().is_ok() => ColumnKind::Int,
            ColumnKind::Int | ColumnKind::Float if cell.parse::<f64>().is_ok() => ColumnKind::Float,
            _ => return ColumnKind::Text,
        };
    }
    if any { kind } else { ColumnKind::Text }
}

fn row_fingerprint(row: &[Value]) -> String {
    format!("{row:?}")
}
