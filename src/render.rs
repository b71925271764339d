//! Deterministic text bar charts for metric tables.
//!
//! One line per metric row, in table order: the row label (key cells
//! joined by ` / `), a bar scaled against the largest measure, then the
//! measure itself. The same table always renders to the same bytes.

use std::fmt::Write;

use crate::metrics::MetricTable;

/// Width of the bar for the largest measure.
pub const BAR_WIDTH: usize = 40;
const BAR: char = '#';

pub fn render_bar_chart(metric: &MetricTable) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", metric.title);
    let _ = writeln!(out, "{}", "=".repeat(metric.title.chars().count()));

    let rows = metric.table.rows();
    let labels: Vec<String> = rows.iter().map(|r| metric.label(r)).collect();
    let width = labels.iter().map(|l| l.chars().count()).max().unwrap_or(0);

    let Some(measure_column) = metric.measure_column.as_deref() else {
        for label in labels {
            let _ = writeln!(out, "{label}");
        }
        return out;
    };

    let measures: Vec<Option<f64>> = rows.iter().map(|r| metric.measure(r)).collect();
    let max = measures.iter().flatten().copied().fold(0.0_f64, f64::max);
    let measure_idx = metric.table.column_index(measure_column);

    for ((label, measure), row) in labels.iter().zip(&measures).zip(rows) {
        let len = match measure {
            Some(m) if max > 0.0 && *m > 0.0 => ((m / max) * BAR_WIDTH as f64).round() as usize,
            _ => 0,
        };
        let value = measure_idx.map(|i| row[i].to_string()).unwrap_or_default();
        let _ = writeln!(
            out,
            "{label:<width$} | {bar:<bar_width$} {value}",
            bar = BAR.to_string().repeat(len),
            bar_width = BAR_WIDTH,
        );
    }
    out
}
