//! Output formatting and persistence for tables, metrics and run reports.
//!
//! Supports pretty-printing, JSON serialization, and CSV write/read.

use anyhow::Result;
use serde::Serialize;
use std::fmt::Debug;
use std::fs::{self, File};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::metrics::{MetricOutput, MetricTable};
use crate::parser::parse_table;
use crate::table::Table;
use csv::WriterBuilder;

/// Logs a value using Rust's debug pretty-print format.
pub fn print_pretty<T: Debug>(value: &T) {
    debug!("{:#?}", value);
}

/// Logs a value as pretty-printed JSON.
pub fn print_json<T: Serialize>(value: &T) -> Result<()> {
    info!("{}", serde_json::to_string_pretty(value)?);
    Ok(())
}

/// Writes a table to `path` as CSV with a header row, replacing any
/// existing file. Nulls are written as empty cells.
pub fn write_table(path: &Path, table: &Table) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let file = File::create(path)?;
    let mut writer = WriterBuilder::new().has_headers(true).from_writer(file);

    writer.write_record(table.columns())?;
    for row in table.rows() {
        writer.write_record(row.iter().map(|v| v.to_string()))?;
    }
    writer.flush()?;

    debug!(path = %path.display(), rows = table.len(), "Table written");
    Ok(())
}

/// Reads a CSV written by [`write_table`]. The table is named after the
/// file stem.
pub fn read_table(path: &Path) -> Result<Table> {
    let data = fs::read(path)?;
    let name = path
        .file_stem()
        .and_then(|s| s.to_str())
        .unwrap_or("table");
    Ok(parse_table(name, &data)?)
}

/// Writes `<dir>/<name>.csv` for a metric and returns the path.
pub fn write_metric(dir: &Path, metric: &MetricTable) -> Result<PathBuf> {
    let path = dir.join(format!("{}.csv", metric.table.name()));
    write_table(&path, &metric.table)?;
    info!(path = %path.display(), title = %metric.title, rows = metric.len(), "Metric written");
    Ok(path)
}

/// Writes every intermediate table of `output` as `<dir>/<artifact>.csv`.
pub fn write_artifacts(dir: &Path, output: &MetricOutput) -> Result<Vec<PathBuf>> {
    let mut paths = Vec::with_capacity(output.artifacts.len());
    for artifact in &output.artifacts {
        let path = dir.join(format!("{}.csv", artifact.name()));
        write_table(&path, artifact)?;
        paths.push(path);
    }
    Ok(paths)
}
