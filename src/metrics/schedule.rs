//! Schedule shape metrics: average trip duration per route and trip
//! frequency per season.

use std::collections::{BTreeMap, HashMap, HashSet};

use crate::clean::{
    CleaningReport, TRIP_ESSENTIALS, checked_join, clean_table, commuter_rail_trips, drop_incomplete,
    service_seconds,
};
use crate::error::PipelineError;
use crate::metrics::utility::{key_of, mean, round2};
use crate::metrics::{Metric, MetricOutput, MetricTable};
use crate::pipeline::Snapshot;
use crate::records::{StopTimeRecord, TripRecord};
use crate::season::Period;
use crate::table::{JoinKind, TableName, Value, normalize_key};

/// First and last stop of a trip, by stop_sequence.
#[derive(Debug, Clone, Copy, Default)]
struct TripSpan {
    first: Option<(i64, Option<u32>)>,
    last: Option<(i64, Option<u32>)>,
}

impl TripSpan {
    fn observe(&mut self, sequence: i64, arrival: Option<u32>, departure: Option<u32>) {
        if self.first.is_none_or(|(s, _)| sequence < s) {
            self.first = Some((sequence, arrival));
        }
        if self.last.is_none_or(|(s, _)| sequence > s) {
            self.last = Some((sequence, departure));
        }
    }

    /// Seconds from the first arrival to the last departure, in service
    /// time so trips crossing midnight keep their true length.
    fn duration(&self) -> Option<u32> {
        let (_, start) = self.first?;
        let (_, end) = self.last?;
        end?.checked_sub(start?)
    }
}

pub struct TripDuration;

impl Metric for TripDuration {
    /// Average minutes per route.
    type Slice = BTreeMap<String, f64>;

    const TABLES: &'static [TableName] = &[TableName::Trips, TableName::StopTimes, TableName::Calendar];

    fn prepare(&self, snapshot: &Snapshot, cleaning: &mut CleaningReport) -> Result<BTreeMap<String, f64>, PipelineError> {
        let trips = commuter_rail_trips(snapshot.table(TableName::Trips)?, cleaning)?;
        let trips = drop_incomplete(&trips, TRIP_ESSENTIALS, cleaning)?.select(&[
            "trip_id",
            "route_id",
            "service_id",
        ])?;
        let services = clean_table(snapshot.table(TableName::Calendar)?, &["service_id"], cleaning)?
            .select(&["service_id"])?
            .distinct();
        let scheduled = checked_join(&trips, &services, "service_id", JoinKind::Inner)?;

        let stop_times = clean_table(
            snapshot.table(TableName::StopTimes)?,
            &["trip_id", "stop_sequence"],
            cleaning,
        )?
        .select(&["trip_id", "arrival_time", "departure_time", "stop_sequence"])?;
        let joined = checked_join(&stop_times, &scheduled, "trip_id", JoinKind::Inner)?;

        let routes: HashMap<String, String> = scheduled
            .records::<TripRecord>()?
            .into_iter()
            .map(|t| (normalize_key(&t.trip_id), normalize_key(&t.route_id)))
            .collect();

        let mut spans: HashMap<(String, String), TripSpan> = HashMap::new();
        for stop in joined.records::<StopTimeRecord>()? {
            let Some(sequence) = stop.stop_sequence else {
                continue;
            };
            let trip = normalize_key(&stop.trip_id);
            let Some(route) = routes.get(&trip) else {
                continue;
            };
            let time = |t: &Option<String>| t.as_deref().and_then(service_seconds);
            spans
                .entry((route.clone(), trip))
                .or_default()
                .observe(sequence, time(&stop.arrival_time), time(&stop.departure_time));
        }

        let mut per_route: BTreeMap<String, Vec<f64>> = BTreeMap::new();
        for ((route, _), span) in spans {
            if let Some(secs) = span.duration() {
                per_route.entry(route).or_default().push(secs as f64);
            }
        }
        Ok(per_route
            .into_iter()
            .map(|(route, secs)| (route, mean(&secs) / 60.0))
            .collect())
    }

    fn compute(
        &self,
        slices: Vec<(Period, BTreeMap<String, f64>)>,
        _: &mut CleaningReport,
    ) -> Result<MetricOutput, PipelineError> {
        let mut rows: BTreeMap<(String, Period), f64> = BTreeMap::new();
        for (period, minutes) in slices {
            for (route, m) in minutes {
                rows.insert((route, period), m);
            }
        }

        let mut metric = MetricTable::new(
            "Average trip duration per route",
            "q5",
            &["route_id", "year", "season"],
            Some("average_trip_duration_minutes"),
        );
        for ((route, period), minutes) in rows {
            metric.push(
                vec![
                    Value::text(route),
                    Value::Int(period.year as i64),
                    Value::text(period.season.as_str()),
                ],
                Some(Value::Float(round2(minutes))),
            );
        }
        Ok(metric.into())
    }
}

pub struct TripFrequency;

impl Metric for TripFrequency {
    type Slice = usize;

    const TABLES: &'static [TableName] = &[TableName::Trips];

    fn prepare(&self, snapshot: &Snapshot, cleaning: &mut CleaningReport) -> Result<usize, PipelineError> {
        let trips = commuter_rail_trips(snapshot.table(TableName::Trips)?, cleaning)?;
        let trip = trips.require("trip_id")?;
        let unique: HashSet<String> = trips.rows().iter().map(|r| key_of(&r[trip])).collect();
        Ok(unique.len())
    }

    fn compute(&self, mut slices: Vec<(Period, usize)>, _: &mut CleaningReport) -> Result<MetricOutput, PipelineError> {
        slices.sort_by_key(|(p, _)| *p);
        let mut metric = MetricTable::new(
            "Commuter rail trips per season",
            "q7",
            &["year", "season"],
            Some("trip_count"),
        );
        for (period, count) in slices {
            metric.push(
                vec![Value::Int(period.year as i64), Value::text(period.season.as_str())],
                Some(Value::Int(count as i64)),
            );
        }
        Ok(metric.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::parse_table;
    use crate::season::Season;

    fn snapshot() -> Snapshot {
        let trips = parse_table(
            "trips",
            b"route_id,service_id,trip_id\n\
              CR-Lowell,wkdy,T1\nCR-Lowell,wkdy,T2\nCR-Lowell,gone,T3\nRed,wkdy,T4\n",
        )
        .unwrap();
        let stop_times = parse_table(
            "stop_times",
            b"trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
              T1,23:30:00,23:31:00,a,1\nT1,24:20:00,24:20:00,b,2\n\
              T2,08:10:00,08:10:00,b,2\nT2,08:00:00,08:01:00,a,1\nT2,08:30:00,08:30:00,c,3\n\
              T3,10:00:00,10:00:00,a,1\nT3,12:00:00,12:00:00,b,2\n",
        )
        .unwrap();
        let calendar = parse_table(
            "calendar",
            b"service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
              wkdy,1,1,1,1,1,0,0,20230901,20231130\n",
        )
        .unwrap();
        let mut s = Snapshot::new(Period::new(2023, Season::Fall));
        s.insert(TableName::Trips, trips.into());
        s.insert(TableName::StopTimes, stop_times.into());
        s.insert(TableName::Calendar, calendar.into());
        s
    }

    #[test]
    fn test_duration_uses_service_time_and_sequence_order() {
        let minutes = TripDuration.prepare(&snapshot(), &mut CleaningReport::default()).unwrap();
        // T1: 23:30 -> 24:20 is 50 minutes, T2: 08:00 -> 08:30 is 30; T3 has no calendar entry
        assert_eq!(minutes.len(), 1);
        assert_eq!(minutes["CR-LOWELL"], 40.0);
    }

    #[test]
    fn test_trip_span_ignores_unparsable_ends() {
        let mut span = TripSpan::default();
        span.observe(1, None, None);
        span.observe(2, Some(100), Some(200));
        assert_eq!(span.duration(), None);
    }

    #[test]
    fn test_frequency_counts_distinct_trips() {
        let count = TripFrequency.prepare(&snapshot(), &mut CleaningReport::default()).unwrap();
        assert_eq!(count, 3);

        let out = TripFrequency
            .compute(
                vec![
                    (Period::new(2024, Season::Spring), 5),
                    (Period::new(2023, Season::Fall), count),
                ],
                &mut CleaningReport::default(),
            )
            .unwrap();
        let rows = out.metric.table.rows();
        assert_eq!(rows[0], vec![Value::Int(2023), Value::text("Fall"), Value::Int(3)]);
        assert_eq!(rows[1], vec![Value::Int(2024), Value::text("Spring"), Value::Int(5)]);
    }
}
