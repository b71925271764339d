//! Express trains per line per year.
//!
//! A trip is express when it serves fewer stops than the longest trip on
//! its route in the same snapshot, or when its stop_sequence skips a
//! position anywhere.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::clean::{CleaningReport, checked_join, clean_table, commuter_rail_trips};
use crate::error::PipelineError;
use crate::metrics::utility::{key_of, mean, round2};
use crate::metrics::{Metric, MetricOutput, MetricTable};
use crate::pipeline::Snapshot;
use crate::season::Period;
use crate::table::{JoinKind, Table, TableName, Value};

/// Stop pattern of one trip.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TripPattern {
    pub route_id: String,
    pub trip_id: String,
    pub sequence: Vec<i64>,
    /// Distinct stops served.
    pub stops: usize,
}

/// True when `sequence` (in any order) has a gap greater than one between
/// consecutive values.
pub fn has_sequence_gap(sequence: &[i64]) -> bool {
    let mut sorted = sequence.to_vec();
    sorted.sort_unstable();
    sorted.windows(2).any(|w| w[1] - w[0] > 1)
}

pub fn is_express(pattern: &TripPattern, route_max_stops: usize) -> bool {
    pattern.stops < route_max_stops || has_sequence_gap(&pattern.sequence)
}

/// Express trip count per route. Every route present in `patterns` gets an
/// entry, zero when none of its trips qualify.
pub fn express_counts(patterns: &[TripPattern]) -> BTreeMap<String, usize> {
    let mut max_stops: HashMap<&str, usize> = HashMap::new();
    for p in patterns {
        let max = max_stops.entry(p.route_id.as_str()).or_insert(0);
        *max = (*max).max(p.stops);
    }

    let mut express: BTreeMap<String, HashSet<&str>> = BTreeMap::new();
    for p in patterns {
        let set = express.entry(p.route_id.clone()).or_default();
        if is_express(p, max_stops[p.route_id.as_str()]) {
            set.insert(p.trip_id.as_str());
        }
    }
    express.into_iter().map(|(route, trips)| (route, trips.len())).collect()
}

/// Groups stop_times joined with trips into one pattern per trip.
pub fn trip_patterns(joined: &Table) -> Result<Vec<TripPattern>, PipelineError> {
    let trip = joined.require("trip_id")?;
    let route = joined.require("route_id")?;
    let seq = joined.require("stop_sequence")?;
    let stop = joined.column_index("stop_id");

    let mut order: Vec<String> = Vec::new();
    let mut grouped: HashMap<String, (String, Vec<i64>, HashSet<String>)> = HashMap::new();
    for row in joined.rows() {
        let Some(sequence) = row[seq].as_i64() else {
            continue;
        };
        let trip_id = key_of(&row[trip]);
        let entry = grouped.entry(trip_id.clone()).or_insert_with(|| {
            order.push(trip_id);
            (key_of(&row[route]), Vec::new(), HashSet::new())
        });
        entry.1.push(sequence);
        match stop {
            Some(s) => entry.2.insert(key_of(&row[s])),
            None => entry.2.insert(sequence.to_string()),
        };
    }

    Ok(order
        .into_iter()
        .filter_map(|trip_id| {
            let (route_id, sequence, stops) = grouped.remove(&trip_id)?;
            Some(TripPattern {
                route_id,
                trip_id,
                sequence,
                stops: stops.len(),
            })
        })
        .collect())
}

pub struct ExpressTrains;

impl Metric for ExpressTrains {
    type Slice = BTreeMap<String, usize>;

    const TABLES: &'static [TableName] = &[TableName::Trips, TableName::StopTimes];

    fn prepare(
        &self,
        snapshot: &Snapshot,
        cleaning: &mut CleaningReport,
    ) -> Result<BTreeMap<String, usize>, PipelineError> {
        let trips = commuter_rail_trips(snapshot.table(TableName::Trips)?, cleaning)?;
        let trips = trips.select(&["trip_id", "route_id"])?;
        let stop_times = clean_table(
            snapshot.table(TableName::StopTimes)?,
            &["trip_id", "stop_sequence"],
            cleaning,
        )?;
        let joined = checked_join(&stop_times, &trips, "trip_id", JoinKind::Inner)?;
        Ok(express_counts(&trip_patterns(&joined)?))
    }

    /// Per year, the mean of the per-season counts. Only seasons in which
    /// the route ran at least one express trip enter the mean; a route with
    /// no express trips all year gets no row.
    fn compute(
        &self,
        slices: Vec<(Period, BTreeMap<String, usize>)>,
        _: &mut CleaningReport,
    ) -> Result<MetricOutput, PipelineError> {
        let mut per_year: BTreeMap<(i32, String), Vec<f64>> = BTreeMap::new();
        for (period, counts) in slices {
            for (route, count) in counts.into_iter().filter(|&(_, n)| n > 0) {
                per_year
                    .entry((period.year, route))
                    .or_default()
                    .push(count as f64);
            }
        }

        let mut metric = MetricTable::new(
            "Express trains per line per year",
            "q2",
            &["route_id", "year"],
            Some("express_trains"),
        );
        for ((year, route), counts) in per_year {
            metric.push(
                vec![Value::text(route), Value::Int(year as i64)],
                Some(Value::Float(round2(mean(&counts)))),
            );
        }
        Ok(metric.into())
    }
}
