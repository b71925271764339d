//! Metric computation over loaded feed snapshots.
//!
//! Each metric turns one [`Snapshot`] into a small per-period slice
//! (`prepare`) and then folds all slices into a [`MetricTable`]
//! (`compute`). Preparation failures only drop the affected period. A
//! recoverable failure in `compute` drops every period and leaves an empty
//! table with the metric's columns.

pub mod express;
pub mod fares;
pub mod net_trains;
pub mod schedule;
pub mod time_of_day;
pub mod types;
pub mod utility;
pub mod zone_change;

use tracing::info;

use crate::clean::CleaningReport;
use crate::error::PipelineError;
use crate::pipeline::Snapshot;
use crate::report::RunReport;
use crate::season::Period;
use crate::table::TableName;

pub use types::{MetricOutput, MetricTable};

pub trait Metric {
    /// What `prepare` extracts from one snapshot.
    type Slice;

    /// Tables every snapshot must provide.
    const TABLES: &'static [TableName];

    fn prepare(
        &self,
        snapshot: &Snapshot,
        cleaning: &mut CleaningReport,
    ) -> Result<Self::Slice, PipelineError>;

    /// Folds the prepared slices into the final table. With no slices this
    /// must succeed and return an empty table.
    fn compute(
        &self,
        slices: Vec<(Period, Self::Slice)>,
        cleaning: &mut CleaningReport,
    ) -> Result<MetricOutput, PipelineError>;
}

/// Prepares every snapshot, skipping the ones that fail recoverably, and
/// computes the metric from what is left.
pub fn evaluate<M: Metric>(
    metric: &M,
    snapshots: &[Snapshot],
    report: &mut RunReport,
) -> Result<MetricOutput, PipelineError> {
    let mut slices = Vec::with_capacity(snapshots.len());
    for snapshot in snapshots {
        match metric.prepare(snapshot, &mut report.cleaning) {
            Ok(slice) => {
                report.succeed(snapshot.period);
                slices.push((snapshot.period, slice));
            }
            Err(e) if e.is_recoverable() => report.skip(snapshot.period, "prepare", &e),
            Err(e) => return Err(e),
        }
    }

    let periods: Vec<Period> = slices.iter().map(|(p, _)| *p).collect();
    let (output, count) = match metric.compute(slices, &mut report.cleaning) {
        Ok(output) => (output, periods.len()),
        Err(e) if e.is_recoverable() => {
            for &period in &periods {
                report.skip(period, "compute", &e);
            }
            (metric.compute(Vec::new(), &mut report.cleaning)?, 0)
        }
        Err(e) => return Err(e),
    };
    info!(summary = ?output.summary(count), "Metric computed");
    Ok(output)
}
