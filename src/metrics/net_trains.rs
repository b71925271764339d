//! Net number of trains per commuter rail line.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use crate::clean::{CleaningReport, stage_trips};
use crate::error::PipelineError;
use crate::metrics::utility::key_of;
use crate::metrics::{Metric, MetricOutput, MetricTable};
use crate::pipeline::Snapshot;
use crate::season::Period;
use crate::table::{Table, TableName, Value};

pub struct NetTrains;

impl Metric for NetTrains {
    type Slice = Arc<Table>;

    const TABLES: &'static [TableName] = &[TableName::Trips];

    fn prepare(&self, snapshot: &Snapshot, _: &mut CleaningReport) -> Result<Arc<Table>, PipelineError> {
        snapshot.shared(TableName::Trips)
    }

    fn compute(
        &self,
        slices: Vec<(Period, Arc<Table>)>,
        cleaning: &mut CleaningReport,
    ) -> Result<MetricOutput, PipelineError> {
        let stages = stage_trips(slices.iter().map(|(p, t)| (*p, t.as_ref())), cleaning)?;
        let metric = net_trains_per_line(&stages.cleaned)?;
        Ok(MetricOutput {
            metric,
            artifacts: vec![stages.merged, stages.filtered, stages.cleaned],
        })
    }
}

/// Distinct trip_id count per route_id, largest first. Ties are ordered
/// by route_id.
pub fn net_trains_per_line(trips: &Table) -> Result<MetricTable, PipelineError> {
    let mut metric = MetricTable::new(
        "Net number of trains per line",
        "q6",
        &["route_id"],
        Some("net_trains"),
    );
    if trips.is_empty() {
        return Ok(metric);
    }

    let route = trips.require("route_id")?;
    let trip = trips.require("trip_id")?;

    let mut per_route: BTreeMap<String, HashSet<String>> = BTreeMap::new();
    for row in trips.rows() {
        if row[route].is_null() || row[trip].is_null() {
            continue;
        }
        per_route
            .entry(key_of(&row[route]))
            .or_default()
            .insert(key_of(&row[trip]));
    }

    let mut counts: Vec<(String, usize)> = per_route
        .into_iter()
        .map(|(route, trips)| (route, trips.len()))
        .collect();
    counts.sort_by(|a, b| b.1.cmp(&a.1).then_with(|| a.0.cmp(&b.0)));

    for (route, count) in counts {
        metric.push(vec![Value::text(route)], Some(Value::Int(count as i64)));
    }
    Ok(metric)
}
