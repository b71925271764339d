//! Resolution of the archived feed index into dated, seasonal records.
//!
//! The index is a CSV document with (at least) an `archive_url` and a
//! `feed_start_date` column. Each usable row becomes a [`FeedRecord`]; the
//! newest record per (year, season) is what the rest of the pipeline loads.

use chrono::{Datelike, NaiveDate};
use serde::Serialize;
use tracing::{info, warn};

use crate::error::PipelineError;
use crate::fetch::Source;
use crate::parser::parse_table;
use crate::season::{Period, Season};

/// One archived feed snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FeedRecord {
    pub url: String,
    /// `feed_start_date` as published, `YYYYMMDD`.
    pub raw_date: String,
    pub season: Season,
    pub year: i32,
}

impl FeedRecord {
    /// Builds a record, deriving season and year from the start date.
    ///
    /// # Errors
    ///
    /// [`PipelineError::MalformedFeedRecord`] if `raw_date` is not a valid
    /// `YYYYMMDD` date.
    pub fn parse(url: &str, raw_date: &str) -> Result<Self, PipelineError> {
        let raw_date = raw_date.trim();
        let malformed = || PipelineError::MalformedFeedRecord {
            raw_date: raw_date.to_string(),
        };
        if raw_date.len() != 8 || !raw_date.bytes().all(|b| b.is_ascii_digit()) {
            return Err(malformed());
        }
        let date = NaiveDate::parse_from_str(raw_date, "%Y%m%d").map_err(|_| malformed())?;

        Ok(Self {
            url: url.trim().to_string(),
            raw_date: raw_date.to_string(),
            season: Season::from_date(date),
            year: date.year(),
        })
    }

    pub fn period(&self) -> Period {
        Period::new(self.year, self.season)
    }
}

/// All usable records of one index document, in document order.
#[derive(Debug, Clone, Default, Serialize)]
pub struct FeedIndex {
    pub records: Vec<FeedRecord>,
    /// Rows dropped because their start date did not parse.
    pub malformed: usize,
}

impl FeedIndex {
    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// See [`select_latest`].
    pub fn latest(&self, year: i32, season: Season) -> Option<&FeedRecord> {
        select_latest(self, year, season)
    }
}

/// Parses an index document.
///
/// Rows without a URL are dropped silently; rows with an unparsable start
/// date are dropped with a warning and counted in [`FeedIndex::malformed`].
///
/// # Errors
///
/// Fails only when the document is not CSV or lacks `archive_url` /
/// `feed_start_date` entirely.
pub fn resolve_index(document: &[u8]) -> Result<FeedIndex, PipelineError> {
    let table = parse_table("feed_index", document)?;
    let url_idx = table.require("archive_url")?;
    let date_idx = table.require("feed_start_date")?;

    let mut index = FeedIndex::default();
    for row in table.rows() {
        let url = row[url_idx].to_string();
        if url.trim().is_empty() {
            continue;
        }
        match FeedRecord::parse(&url, &row[date_idx].to_string()) {
            Ok(record) => index.records.push(record),
            Err(e) => {
                warn!(url = %url, error = %e, "Dropping feed index row");
                index.malformed += 1;
            }
        }
    }

    info!(
        records = index.records.len(),
        malformed = index.malformed,
        "Feed index resolved"
    );
    Ok(index)
}

/// Downloads and resolves the index at `location`.
#[tracing::instrument(skip(source))]
pub async fn fetch_index<S: Source + ?Sized>(
    source: &S,
    location: &str,
) -> Result<FeedIndex, PipelineError> {
    let bytes = source.fetch(location).await?;
    resolve_index(&bytes)
}

/// The record for (year, season) with the greatest `raw_date`, if any.
///
/// When several records share the greatest date the last one in document
/// order wins. `None` means no data was published for that period.
pub fn select_latest(index: &FeedIndex, year: i32, season: Season) -> Option<&FeedRecord> {
    index
        .records
        .iter()
        .filter(|r| r.year == year && r.season == season)
        .max_by(|a, b| a.raw_date.cmp(&b.raw_date))
}
