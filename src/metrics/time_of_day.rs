//! Trip counts by time-of-day bucket, per line, day of week and year.

use serde::Serialize;
use std::collections::{BTreeMap, HashMap};
use std::fmt;
use tracing::debug;

use crate::clean::{
    CleaningReport, DAY_COLUMNS, TRIP_ESSENTIALS, WeekdayRule, checked_join, clean_calendar,
    clean_table, commuter_rail_trips, drop_incomplete, wall_clock_seconds, weekday_services,
};
use crate::error::PipelineError;
use crate::metrics::utility::{bump, key_of};
use crate::metrics::{Metric, MetricOutput, MetricTable};
use crate::pipeline::Snapshot;
use crate::season::Period;
use crate::table::{JoinKind, TableName, Value};

const DAY_NAMES: [&str; 7] = [
    "Monday",
    "Tuesday",
    "Wednesday",
    "Thursday",
    "Friday",
    "Saturday",
    "Sunday",
];

/// The nine fixed clock ranges, in order through the service day.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum TimePeriod {
    Sunrise,
    EarlyAm,
    AmPeak,
    MiddayBase,
    MiddaySchool,
    PmPeak,
    Evening,
    LateEvening,
    Night,
}

impl TimePeriod {
    /// Bucket for a wall-clock hour in `[0, 24)`, fractional hours allowed.
    pub fn from_hours(hours: f64) -> TimePeriod {
        match hours {
            h if (3.0..6.0).contains(&h) => TimePeriod::Sunrise,
            h if (6.0..7.0).contains(&h) => TimePeriod::EarlyAm,
            h if (7.0..9.0).contains(&h) => TimePeriod::AmPeak,
            h if (9.0..13.5).contains(&h) => TimePeriod::MiddayBase,
            h if (13.5..16.0).contains(&h) => TimePeriod::MiddaySchool,
            h if (16.0..18.5).contains(&h) => TimePeriod::PmPeak,
            h if (18.5..22.0).contains(&h) => TimePeriod::Evening,
            h if (22.0..24.0).contains(&h) => TimePeriod::LateEvening,
            _ => TimePeriod::Night,
        }
    }

    /// Bucket for a service time such as `25:10:00`; post-midnight hours
    /// wrap to the wall clock first.
    pub fn from_service_time(time: &str) -> Option<TimePeriod> {
        let secs = wall_clock_seconds(time)?;
        Some(TimePeriod::from_hours(secs as f64 / 3600.0))
    }

    pub fn label(&self) -> &'static str {
        match self {
            TimePeriod::Sunrise => "Sunrise",
            TimePeriod::EarlyAm => "Early AM",
            TimePeriod::AmPeak => "AM Peak",
            TimePeriod::MiddayBase => "Midday Base",
            TimePeriod::MiddaySchool => "Midday School",
            TimePeriod::PmPeak => "PM Peak",
            TimePeriod::Evening => "Evening",
            TimePeriod::LateEvening => "Late Evening",
            TimePeriod::Night => "Night",
        }
    }
}

impl fmt::Display for TimePeriod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// (route_id, day index 0 = Monday, bucket) -> stop events.
pub type DayBucketCounts = HashMap<(String, usize, TimePeriod), usize>;

pub struct TimeOfDay {
    pub rule: WeekdayRule,
}

impl Metric for TimeOfDay {
    type Slice = DayBucketCounts;

    const TABLES: &'static [TableName] = &[TableName::Trips, TableName::StopTimes, TableName::Calendar];

    fn prepare(&self, snapshot: &Snapshot, cleaning: &mut CleaningReport) -> Result<DayBucketCounts, PipelineError> {
        let trips = commuter_rail_trips(snapshot.table(TableName::Trips)?, cleaning)?;
        let trips = drop_incomplete(&trips, TRIP_ESSENTIALS, cleaning)?.select(&[
            "trip_id",
            "route_id",
            "service_id",
        ])?
        .distinct();

        let calendar = clean_calendar(snapshot.table(TableName::Calendar)?, cleaning)?;
        let services = weekday_services(&calendar, self.rule)?;
        let mut day_columns = vec!["service_id"];
        day_columns.extend(DAY_COLUMNS);
        let calendar = calendar.select(&day_columns)?;

        let stop_times = clean_table(
            snapshot.table(TableName::StopTimes)?,
            &["trip_id", "arrival_time"],
            cleaning,
        )?
        .select(&["trip_id", "arrival_time"])?;

        let joined = checked_join(&stop_times, &trips, "trip_id", JoinKind::Inner)?;
        let service = joined.require("service_id")?;
        let before = joined.len();
        let weekday = joined.filter(|row| row[service].key().is_some_and(|s| services.contains(&s)));
        cleaning.record("stop_times", "keep weekday services", before, weekday.len());

        let with_days = checked_join(&weekday, &calendar, "service_id", JoinKind::Inner)?;
        let route = with_days.require("route_id")?;
        let arrival = with_days.require("arrival_time")?;
        let days = with_days.require_all(&DAY_COLUMNS)?;

        let mut counts = DayBucketCounts::new();
        let mut unparsable = 0usize;
        for row in with_days.rows() {
            let Some(bucket) = row[arrival].as_str().and_then(TimePeriod::from_service_time) else {
                unparsable += 1;
                continue;
            };
            for (day, &col) in days.iter().enumerate() {
                if row[col].is_set() {
                    bump(&mut counts, (key_of(&row[route]), day, bucket), 1);
                }
            }
        }
        if unparsable > 0 {
            debug!(unparsable, period = %snapshot.period, "Skipped stop times with unreadable arrival_time");
        }
        Ok(counts)
    }

    fn compute(
        &self,
        slices: Vec<(Period, DayBucketCounts)>,
        _: &mut CleaningReport,
    ) -> Result<MetricOutput, PipelineError> {
        let mut totals: BTreeMap<(String, i32, usize, TimePeriod), usize> = BTreeMap::new();
        for (period, counts) in slices {
            for ((route, day, bucket), n) in counts {
                *totals.entry((route, period.year, day, bucket)).or_insert(0) += n;
            }
        }

        let mut metric = MetricTable::new(
            "Trip count by time of day",
            "q1",
            &["route_id", "year", "day", "time_period"],
            Some("trip_count"),
        );
        for ((route, year, day, bucket), n) in totals {
            metric.push(
                vec![
                    Value::text(route),
                    Value::Int(year as i64),
                    Value::text(DAY_NAMES[day]),
                    Value::text(bucket.label()),
                ],
                Some(Value::Int(n as i64)),
            );
        }
        Ok(metric.into())
    }
}
