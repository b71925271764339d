//! Cleaning and merge helpers shared by every metric.
//!
//! Every step that can drop rows records its before/after counts in a
//! [`CleaningReport`] so no row disappears unaccounted for.

use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::str::FromStr;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::records::CalendarRecord;
use crate::season::Period;
use crate::table::{JoinKind, Table, Value, normalize_key};

/// Key columns compared across tables; trimmed and uppercased before use.
pub const KEY_COLUMNS: &[&str] = &["route_id", "trip_id", "service_id", "shape_id"];

pub const TRIP_ESSENTIALS: &[&str] = &["route_id", "trip_id", "service_id"];

pub const DAY_COLUMNS: [&str; 7] = [
    "monday",
    "tuesday",
    "wednesday",
    "thursday",
    "friday",
    "saturday",
    "sunday",
];

const SECONDS_PER_DAY: u32 = 24 * 3600;

#[derive(Debug, Clone, Serialize, PartialEq, Eq)]
pub struct CleaningStep {
    pub table: String,
    pub step: String,
    pub before: usize,
    pub after: usize,
}

#[derive(Debug, Clone, Default, Serialize)]
pub struct CleaningReport {
    pub steps: Vec<CleaningStep>,
}

impl CleaningReport {
    pub fn record(&mut self, table: &str, step: &str, before: usize, after: usize) {
        info!(
            table,
            step,
            before,
            after,
            dropped = before.saturating_sub(after),
            "Cleaning step"
        );
        self.steps.push(CleaningStep {
            table: table.to_string(),
            step: step.to_string(),
            before,
            after,
        });
    }

    pub fn dropped(&self) -> usize {
        self.steps.iter().map(|s| s.before.saturating_sub(s.after)).sum()
    }
}

/// Which calendar entries count as weekday service.
///
/// `Corrected` requires at least one Monday-Friday flag. `AnyDay` accepts
/// any of the seven flags, which lets Saturday- or Sunday-only services
/// through; it exists to reproduce historical outputs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum WeekdayRule {
    #[default]
    Corrected,
    AnyDay,
}

impl WeekdayRule {
    fn day_columns(&self) -> &'static [&'static str] {
        match self {
            WeekdayRule::Corrected => &DAY_COLUMNS[..5],
            WeekdayRule::AnyDay => &DAY_COLUMNS[..],
        }
    }
}

impl FromStr for WeekdayRule {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "corrected" => Ok(WeekdayRule::Corrected),
            "any-day" => Ok(WeekdayRule::AnyDay),
            other => Err(PipelineError::InvalidInput(format!(
                "unknown weekday rule '{other}' (expected corrected or any-day)"
            ))),
        }
    }
}

impl fmt::Display for WeekdayRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            WeekdayRule::Corrected => "corrected",
            WeekdayRule::AnyDay => "any-day",
        })
    }
}

/// Commuter rail: route_id starts with `CR-` (any case) or route_desc is
/// exactly `Commuter Rail`.
pub fn is_commuter_rail(route_id: &Value, route_desc: Option<&Value>) -> bool {
    let by_id = route_id
        .key()
        .is_some_and(|id| id.starts_with("CR-"));
    let by_desc = route_desc.and_then(Value::as_str) == Some("Commuter Rail");
    by_id || by_desc
}

/// Seconds since the start of the service day. Hours may exceed 23 for
/// trips that run past midnight.
pub fn service_seconds(time: &str) -> Option<u32> {
    let mut parts = time.trim().split(':');
    let h: u32 = parts.next()?.trim().parse().ok()?;
    let m: u32 = parts.next()?.parse().ok()?;
    let s: u32 = parts.next()?.parse().ok()?;
    if parts.next().is_some() || m >= 60 || s >= 60 {
        return None;
    }
    h.checked_mul(3600)?.checked_add(m * 60 + s)
}

/// Wall-clock seconds: service times at or past 24:00:00 have 24 hours
/// subtracted. Only for time-of-day bucketing; durations use
/// [`service_seconds`].
pub fn wall_clock_seconds(time: &str) -> Option<u32> {
    let secs = service_seconds(time)?;
    Some(if secs >= SECONDS_PER_DAY { secs - SECONDS_PER_DAY } else { secs })
}

/// Drops rows missing any essential column and records the step.
pub fn drop_incomplete(
    table: &Table,
    essential: &[&str],
    report: &mut CleaningReport,
) -> Result<Table, PipelineError> {
    let cleaned = table.drop_nulls(essential)?;
    report.record(table.name(), "drop rows missing essential columns", table.len(), cleaned.len());
    Ok(cleaned)
}

/// Drops incomplete rows and normalizes key columns.
pub fn clean_table(
    table: &Table,
    essential: &[&str],
    report: &mut CleaningReport,
) -> Result<Table, PipelineError> {
    let mut cleaned = drop_incomplete(table, essential, report)?;
    cleaned.normalize_keys(KEY_COLUMNS);
    Ok(cleaned)
}

/// Full trip cleaning: dedup, essential columns, defaults, key
/// normalization, commuter-rail filter and the derived `is_weekend` flag.
///
/// Running it on its own output changes nothing.
pub fn clean_trips(trips: &Table, report: &mut CleaningReport) -> Result<Table, PipelineError> {
    let name = trips.name().to_string();
    trips.require_all(TRIP_ESSENTIALS)?;

    let deduped = trips.distinct();
    report.record(&name, "remove duplicate rows", trips.len(), deduped.len());

    let mut df = drop_incomplete(&deduped, TRIP_ESSENTIALS, report)?;

    df.fill_nulls("direction_id", Value::Int(0));
    df.fill_nulls("shape_id", Value::text("UNKNOWN"));
    df.normalize_keys(KEY_COLUMNS);
    if df.has_column("direction_id") {
        df.map_column("direction_id", |v| Value::Int(v.as_i64().unwrap_or(0)))?;
    }

    let route_idx = df.require("route_id")?;
    let before = df.len();
    df.retain(|row| is_commuter_rail(&row[route_idx], None));
    report.record(&name, "keep commuter rail routes", before, df.len());

    let service_idx = df.require("service_id")?;
    df.add_column("is_weekend", |row| {
        let service = row[service_idx].key().unwrap_or_default();
        Value::text(if service.contains("SAT") || service.contains("SUN") {
            "True"
        } else {
            "False"
        })
    });

    Ok(df)
}

/// Trips on commuter rail routes with route_id and trip_id present and key
/// columns normalized. Lighter than [`clean_trips`]; used per snapshot.
pub fn commuter_rail_trips(trips: &Table, report: &mut CleaningReport) -> Result<Table, PipelineError> {
    let mut trips = clean_table(trips, &["route_id", "trip_id"], report)?;
    let route = trips.require("route_id")?;
    let before = trips.len();
    trips.retain(|row| is_commuter_rail(&row[route], None));
    report.record("trips", "keep commuter rail routes", before, trips.len());
    Ok(trips)
}

/// Routes that are commuter rail, keys normalized.
pub fn commuter_rail_routes(routes: &Table, report: &mut CleaningReport) -> Result<Table, PipelineError> {
    let mut routes = clean_table(routes, &["route_id"], report)?;
    let id = routes.require("route_id")?;
    let desc = routes.column_index("route_desc");
    let before = routes.len();
    routes.retain(|row| is_commuter_rail(&row[id], desc.map(|d| &row[d])));
    report.record("routes", "keep commuter rail routes", before, routes.len());
    Ok(routes)
}

/// Calendar rows with a service id and all seven day flags present.
pub fn clean_calendar(calendar: &Table, report: &mut CleaningReport) -> Result<Table, PipelineError> {
    let mut essential = vec!["service_id"];
    essential.extend(DAY_COLUMNS);
    clean_table(calendar, &essential, report)
}

/// Normalized service ids that run on at least one day the rule accepts.
/// Entries with every flag clear never qualify.
pub fn weekday_services(calendar: &Table, rule: WeekdayRule) -> Result<HashSet<String>, PipelineError> {
    calendar.require("service_id")?;
    let days = calendar.require_all(rule.day_columns())?.len();
    Ok(calendar
        .records::<CalendarRecord>()?
        .into_iter()
        .filter(|record| record.day_flags()[..days].iter().any(|&set| set))
        .map(|record| normalize_key(&record.service_id))
        .filter(|service| !service.is_empty())
        .collect())
}

/// Joins two tables and treats "both sides had rows, nothing matched" as
/// an error, since it almost always means mismatched key formats.
pub fn checked_join(left: &Table, right: &Table, on: &str, kind: JoinKind) -> Result<Table, PipelineError> {
    let joined = left.join(right, on, kind)?;
    if joined.is_empty() && !left.is_empty() && !right.is_empty() {
        return Err(PipelineError::JoinProducedEmptyResult {
            left: left.name().to_string(),
            right: right.name().to_string(),
            on: on.to_string(),
        });
    }
    Ok(joined)
}

/// Intermediate trip tables, one per cleaning stage.
#[derive(Debug, Clone)]
pub struct TripStages {
    /// All trips with `year` and `season` columns.
    pub merged: Table,
    /// Rows whose route_id contains `CR` anywhere.
    pub filtered: Table,
    /// Output of [`clean_trips`].
    pub cleaned: Table,
}

/// Merges per-period trips and runs them through the cleaning stages.
pub fn stage_trips<'a>(
    trips: impl IntoIterator<Item = (Period, &'a Table)>,
    report: &mut CleaningReport,
) -> Result<TripStages, PipelineError> {
    let tagged: Vec<Table> = trips
        .into_iter()
        .map(|(period, table)| {
            let mut t = table.clone();
            t.add_column("year", |_| Value::Int(period.year as i64));
            t.add_column("season", |_| Value::text(period.season.as_str()));
            t
        })
        .collect();
    let merged = Table::concat("merged_trips", &tagged);
    if merged.is_empty() {
        warn!("No trips to merge");
    }

    let filtered = match merged.column_index("route_id") {
        Some(idx) => merged.filter(|row| {
            row[idx]
                .key()
                .is_some_and(|id| id.contains("CR"))
        }),
        None => Table::new("merged_trips", merged.columns().to_vec()),
    }
    .renamed("filtered_commuter_rail_trips");
    report.record("merged_trips", "route_id contains CR", merged.len(), filtered.len());

    let cleaned = if filtered.is_empty() {
        filtered.clone()
    } else {
        clean_trips(&filtered, report)?
    }
    .renamed("cleaned_commuter_rail_trips");

    Ok(TripStages {
        merged,
        filtered,
        cleaned,
    })
}
