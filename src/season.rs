//! Seasons and the (year, season) periods feeds are published for.

use chrono::{Datelike, NaiveDate};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::PipelineError;

/// Schedule season, derived from the month a feed starts in.
///
/// Declaration order is calendar order within a year, which is also the
/// sort order used for reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Season {
    Winter,
    Spring,
    Summer,
    Fall,
}

impl Season {
    pub const ALL: [Season; 4] = [Season::Winter, Season::Spring, Season::Summer, Season::Fall];

    /// Maps a month (1-12) onto its season.
    ///
    /// | Months      | Season |
    /// |-------------|--------|
    /// | Dec, Jan, Feb | Winter |
    /// | Mar - May   | Spring |
    /// | Jun - Aug   | Summer |
    /// | Sep - Nov   | Fall   |
    ///
    /// Returns `None` outside 1-12.
    pub fn from_month(month: u32) -> Option<Season> {
        match month {
            12 | 1 | 2 => Some(Season::Winter),
            3..=5 => Some(Season::Spring),
            6..=8 => Some(Season::Summer),
            9..=11 => Some(Season::Fall),
            _ => None,
        }
    }

    pub fn from_date(date: NaiveDate) -> Season {
        // chrono months are always 1-12
        Season::from_month(date.month()).unwrap_or(Season::Winter)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Season::Winter => "Winter",
            Season::Spring => "Spring",
            Season::Summer => "Summer",
            Season::Fall => "Fall",
        }
    }
}

impl fmt::Display for Season {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Season {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "winter" => Ok(Season::Winter),
            "spring" => Ok(Season::Spring),
            "summer" => Ok(Season::Summer),
            "fall" | "autumn" => Ok(Season::Fall),
            other => Err(PipelineError::InvalidInput(format!("unknown season '{other}'"))),
        }
    }
}

/// One published schedule period.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Period {
    pub year: i32,
    pub season: Season,
}

impl Period {
    pub fn new(year: i32, season: Season) -> Self {
        Self { year, season }
    }

    /// Every combination of the given years and seasons, sorted.
    pub fn cross(years: &[i32], seasons: &[Season]) -> Vec<Period> {
        let mut periods: Vec<Period> = years
            .iter()
            .flat_map(|&year| seasons.iter().map(move |&season| Period::new(year, season)))
            .collect();
        periods.sort();
        periods.dedup();
        periods
    }
}

impl fmt::Display for Period {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {}", self.season, self.year)
    }
}
