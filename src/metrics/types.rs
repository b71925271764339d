//! Data types produced by the metric stage.

use serde::Serialize;

use crate::table::{Table, Value};

/// Result of one metric: a table keyed by `key_columns` with (usually) one
/// numeric measure column.
#[derive(Debug, Clone, PartialEq)]
pub struct MetricTable {
    pub title: String,
    pub key_columns: Vec<String>,
    /// `None` for purely categorical results such as zone changes.
    pub measure_column: Option<String>,
    pub table: Table,
}

impl MetricTable {
    /// Builds an empty metric table whose columns are `keys` followed by
    /// `measure`.
    pub fn new(title: &str, name: &str, keys: &[&str], measure: Option<&str>) -> Self {
        let mut columns: Vec<&str> = keys.to_vec();
        columns.extend(measure);
        Self {
            title: title.to_string(),
            key_columns: keys.iter().map(|k| k.to_string()).collect(),
            measure_column: measure.map(str::to_string),
            table: Table::with_columns(name, &columns),
        }
    }

    pub fn push(&mut self, keys: Vec<Value>, measure: Option<Value>) {
        let mut row = keys;
        row.extend(measure);
        self.table.push_row(row);
    }

    pub fn len(&self) -> usize {
        self.table.len()
    }

    pub fn is_empty(&self) -> bool {
        self.table.is_empty()
    }

    /// Label for one row: its key cells joined by ` / `.
    pub fn label(&self, row: &[Value]) -> String {
        self.key_columns
            .iter()
            .filter_map(|k| self.table.column_index(k))
            .map(|i| row[i].to_string())
            .collect::<Vec<_>>()
            .join(" / ")
    }

    pub fn measure(&self, row: &[Value]) -> Option<f64> {
        let idx = self.table.column_index(self.measure_column.as_deref()?)?;
        row[idx].as_f64()
    }
}

/// A metric table plus the intermediate tables worth persisting.
#[derive(Debug, Clone)]
pub struct MetricOutput {
    pub metric: MetricTable,
    pub artifacts: Vec<Table>,
}

impl From<MetricTable> for MetricOutput {
    fn from(metric: MetricTable) -> Self {
        Self {
            metric,
            artifacts: Vec::new(),
        }
    }
}

/// Summary line logged for every computed metric.
#[derive(Debug, Serialize)]
pub struct MetricSummary {
    pub title: String,
    pub rows: usize,
    pub slices: usize,
    pub artifacts: Vec<String>,
}

impl MetricOutput {
    pub fn summary(&self, slices: usize) -> MetricSummary {
        MetricSummary {
            title: self.metric.title.clone(),
            rows: self.metric.len(),
            slices,
            artifacts: self.artifacts.iter().map(|a| a.name().to_string()).collect(),
        }
    }
}
