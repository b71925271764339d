//! Typed views of GTFS rows, read out of a [`Table`](crate::table::Table)
//! with [`Table::records`](crate::table::Table::records).

use serde::{Deserialize, Deserializer};

use crate::clean::DAY_COLUMNS;

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct TripRecord {
    pub route_id: String,
    pub service_id: String,
    pub trip_id: String,
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub direction_id: Option<i64>,
    #[serde(default)]
    pub block_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct StopTimeRecord {
    pub trip_id: String,
    #[serde(default)]
    pub arrival_time: Option<String>,
    #[serde(default)]
    pub departure_time: Option<String>,
    #[serde(default)]
    pub stop_id: Option<String>,
    /// Rows with an unreadable sequence come back as `None` rather than
    /// failing the whole table.
    #[serde(default, deserialize_with = "csv::invalid_option")]
    pub stop_sequence: Option<i64>,
}

#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct CalendarRecord {
    pub service_id: String,
    #[serde(default, deserialize_with = "parse_flag")]
    pub monday: bool,
    #[serde(default, deserialize_with = "parse_flag")]
    pub tuesday: bool,
    #[serde(default, deserialize_with = "parse_flag")]
    pub wednesday: bool,
    #[serde(default, deserialize_with = "parse_flag")]
    pub thursday: bool,
    #[serde(default, deserialize_with = "parse_flag")]
    pub friday: bool,
    #[serde(default, deserialize_with = "parse_flag")]
    pub saturday: bool,
    #[serde(default, deserialize_with = "parse_flag")]
    pub sunday: bool,
    #[serde(default)]
    pub start_date: Option<String>,
    #[serde(default)]
    pub end_date: Option<String>,
}

impl CalendarRecord {
    /// Flags in [`DAY_COLUMNS`] order, Monday first.
    pub fn day_flags(&self) -> [bool; DAY_COLUMNS.len()] {
        [
            self.monday,
            self.tuesday,
            self.wednesday,
            self.thursday,
            self.friday,
            self.saturday,
            self.sunday,
        ]
    }
}

/// A day is set only when the cell reads exactly `1`. Blanks and anything
/// else count as not running, matching how the raw tables are filtered.
fn parse_flag<'de, D: Deserializer<'de>>(d: D) -> Result<bool, D::Error> {
    let raw = <Option<String>>::deserialize(d)?;
    Ok(raw.is_some_and(|s| s.trim().parse::<i64>() == Ok(1)))
}
