//! Loading of per-period snapshots and dispatch of the metric questions.
//!
//! A [`FeedLoader`] resolves each requested (year, season) to the newest
//! feed in the index, downloads its archive once and extracts the tables a
//! question needs through the shared [`TableCache`]. Combinations that fail
//! are recorded in the [`RunReport`] and left out; only fatal errors stop
//! a run.

use serde::Serialize;
use std::collections::HashMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{Instrument, debug, info, warn};

use crate::cache::TableCache;
use crate::clean::WeekdayRule;
use crate::error::PipelineError;
use crate::fetch::Source;
use crate::index::{FeedIndex, FeedRecord};
use crate::metrics::express::ExpressTrains;
use crate::metrics::fares::{Fares, ZoneMapping};
use crate::metrics::net_trains::NetTrains;
use crate::metrics::schedule::{TripDuration, TripFrequency};
use crate::metrics::time_of_day::TimeOfDay;
use crate::metrics::zone_change::ZoneChange;
use crate::metrics::{Metric, MetricOutput, evaluate};
use crate::parser::{extract_table, member_names, read_member};
use crate::report::RunReport;
use crate::season::Period;
use crate::table::{Table, TableKey, TableName};

/// The tables loaded for one (year, season).
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub period: Period,
    tables: HashMap<TableName, Arc<Table>>,
}

impl Snapshot {
    pub fn new(period: Period) -> Self {
        Self {
            period,
            tables: HashMap::new(),
        }
    }

    pub fn insert(&mut self, name: TableName, table: Arc<Table>) {
        self.tables.insert(name, table);
    }

    pub fn table(&self, name: TableName) -> Result<&Table, PipelineError> {
        self.tables
            .get(&name)
            .map(Arc::as_ref)
            .ok_or(PipelineError::TableNotFound { table: name })
    }

    pub fn shared(&self, name: TableName) -> Result<Arc<Table>, PipelineError> {
        self.tables
            .get(&name)
            .cloned()
            .ok_or(PipelineError::TableNotFound { table: name })
    }
}

/// Question identifiers, one per metric.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Question {
    Q1,
    Q2,
    Q3,
    Q4,
    Q5,
    Q6,
    Q7,
}

impl Question {
    pub const ALL: [Question; 7] = [
        Question::Q1,
        Question::Q2,
        Question::Q3,
        Question::Q4,
        Question::Q5,
        Question::Q6,
        Question::Q7,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Question::Q1 => "q1",
            Question::Q2 => "q2",
            Question::Q3 => "q3",
            Question::Q4 => "q4",
            Question::Q5 => "q5",
            Question::Q6 => "q6",
            Question::Q7 => "q7",
        }
    }

    /// Tables every period must provide for this question.
    pub fn tables(&self) -> &'static [TableName] {
        match self {
            Question::Q1 => TimeOfDay::TABLES,
            Question::Q2 => ExpressTrains::TABLES,
            Question::Q3 => ZoneChange::TABLES,
            Question::Q4 => Fares::TABLES,
            Question::Q5 => TripDuration::TABLES,
            Question::Q6 => NetTrains::TABLES,
            Question::Q7 => TripFrequency::TABLES,
        }
    }

    /// Computes this question's metric over loaded snapshots.
    pub fn evaluate(
        &self,
        snapshots: &[Snapshot],
        options: &RunOptions,
        report: &mut RunReport,
    ) -> Result<MetricOutput, PipelineError> {
        match self {
            Question::Q1 => evaluate(
                &TimeOfDay {
                    rule: options.weekday_rule,
                },
                snapshots,
                report,
            ),
            Question::Q2 => evaluate(&ExpressTrains, snapshots, report),
            Question::Q3 => evaluate(&ZoneChange, snapshots, report),
            Question::Q4 => evaluate(
                &Fares {
                    zones: options.zones.clone(),
                },
                snapshots,
                report,
            ),
            Question::Q5 => evaluate(&TripDuration, snapshots, report),
            Question::Q6 => evaluate(&NetTrains, snapshots, report),
            Question::Q7 => evaluate(&TripFrequency, snapshots, report),
        }
    }
}

impl fmt::Display for Question {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Question {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim().to_ascii_lowercase();
        Question::ALL
            .into_iter()
            .find(|q| q.as_str() == wanted)
            .ok_or_else(|| PipelineError::InvalidInput(format!("unknown question '{s}' (expected q1..q7)")))
    }
}

/// Knobs shared by every question.
#[derive(Debug, Clone)]
pub struct RunOptions {
    pub weekday_rule: WeekdayRule,
    pub zones: ZoneMapping,
    /// Periods loaded at once; 1 keeps loading sequential.
    pub concurrency: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            weekday_rule: WeekdayRule::default(),
            zones: ZoneMapping::default(),
            concurrency: 1,
        }
    }
}

/// Downloads the archive at `url` and extracts one table, uncached.
pub async fn fetch_table<S: Source + ?Sized>(
    source: &S,
    url: &str,
    table: TableName,
) -> Result<Table, PipelineError> {
    let archive = source.fetch(url).await?;
    extract_table(&archive, table)
}

pub struct FeedLoader {
    source: Arc<dyn Source>,
    cache: Arc<TableCache>,
    index: Arc<FeedIndex>,
}

impl FeedLoader {
    pub fn new(source: Arc<dyn Source>, index: FeedIndex) -> Self {
        Self {
            source,
            cache: Arc::new(TableCache::new()),
            index: Arc::new(index),
        }
    }

    pub fn index(&self) -> &FeedIndex {
        &self.index
    }

    pub fn cache(&self) -> &TableCache {
        &self.cache
    }

    /// The newest record for `period`, or [`PipelineError::NoFeedForPeriod`].
    pub fn record(&self, period: Period) -> Result<&FeedRecord, PipelineError> {
        self.index
            .latest(period.year, period.season)
            .ok_or(PipelineError::NoFeedForPeriod(period))
    }

    async fn archive(&self, record: &FeedRecord) -> Result<bytes::Bytes, PipelineError> {
        self.cache
            .archive(&record.url, || self.source.fetch(&record.url))
            .await
    }

    /// Extracts `table` for `period`, downloading the archive at most once
    /// per run.
    #[tracing::instrument(skip(self))]
    pub async fn table(&self, period: Period, table: TableName) -> Result<Arc<Table>, PipelineError> {
        let record = self.record(period)?;
        self.cache
            .get_or_fetch(TableKey::new(table, period), || async move {
                let archive = self.archive(record).await?;
                let parsed = extract_table(&archive, table)?;
                debug!(rows = parsed.len(), columns = parsed.columns().len(), "Table extracted");
                Ok(parsed)
            })
            .await
    }

    /// Loads every table in `tables` for `period`. Any failure fails the
    /// whole snapshot.
    pub async fn snapshot(&self, period: Period, tables: &[TableName]) -> Result<Snapshot, PipelineError> {
        let mut snapshot = Snapshot::new(period);
        for &table in tables {
            snapshot.insert(table, self.table(period, table).await?);
        }
        Ok(snapshot)
    }

    /// Loads snapshots for all `periods`, at most `concurrency` at a time.
    ///
    /// The result keeps the order of `periods` and leaves out the ones
    /// that failed recoverably; those are recorded in `report`.
    pub async fn load_all(
        self: &Arc<Self>,
        periods: &[Period],
        tables: &'static [TableName],
        concurrency: usize,
        report: &mut RunReport,
    ) -> Result<Vec<Snapshot>, PipelineError> {
        let semaphore = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut tasks = Vec::with_capacity(periods.len());

        for &period in periods {
            let loader = Arc::clone(self);
            let sem = semaphore.clone();
            let span = tracing::info_span!("load_snapshot", period = %period);
            tasks.push((
                period,
                tokio::spawn(
                    async move {
                        let _permit = sem
                            .acquire_owned()
                            .await
                            .map_err(|e| PipelineError::Io(std::io::Error::other(e)))?;
                        loader.snapshot(period, tables).await
                    }
                    .instrument(span),
                ),
            ));
        }

        let mut snapshots = Vec::new();
        for (period, task) in tasks {
            let outcome = task
                .await
                .map_err(|e| PipelineError::Io(std::io::Error::other(e)))
                .and_then(|r| r);
            match outcome {
                Ok(snapshot) => snapshots.push(snapshot),
                Err(e) if e.is_recoverable() => report.skip(period, "load", &e),
                Err(e) => return Err(e),
            }
        }

        info!(
            requested = periods.len(),
            loaded = snapshots.len(),
            archives = self.cache.archive_loads(),
            tables = self.cache.table_loads(),
            "Snapshots loaded"
        );
        Ok(snapshots)
    }

    /// Writes the raw members for every (period, table) to
    /// `<output_dir>/<Season>_<year>/<table>.txt` and returns the files
    /// written. Missing tables are reported and skipped.
    pub async fn download(
        &self,
        periods: &[Period],
        tables: &[TableName],
        output_dir: &Path,
        report: &mut RunReport,
    ) -> Result<Vec<PathBuf>, PipelineError> {
        let mut written = Vec::new();
        for &period in periods {
            let record = match self.record(period) {
                Ok(record) => record,
                Err(e) => {
                    report.skip(period, "download", &e);
                    continue;
                }
            };
            let archive = match self.archive(record).await {
                Ok(archive) => archive,
                Err(e) if e.is_recoverable() => {
                    report.skip(period, "download", &e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            let dir = output_dir.join(format!("{}_{}", period.season, period.year));
            tokio::fs::create_dir_all(&dir).await?;
            let mut complete = true;
            for &table in tables {
                match read_member(&archive, table) {
                    Ok(data) => {
                        let path = dir.join(format!("{table}.txt"));
                        tokio::fs::write(&path, &data).await?;
                        debug!(path = %path.display(), bytes = data.len(), "Table written");
                        written.push(path);
                    }
                    Err(e) => {
                        let available = member_names(&archive).unwrap_or_default();
                        warn!(%period, %table, ?available, error = %e, "Table missing from archive");
                        report.skip(period, "download", &e);
                        complete = false;
                    }
                }
            }
            if complete {
                report.succeed(period);
            }
        }
        info!(files = written.len(), dir = %output_dir.display(), "Download finished");
        Ok(written)
    }
}

/// Loads what `question` needs for `periods` and computes it.
pub async fn run_question(
    loader: &Arc<FeedLoader>,
    question: Question,
    periods: &[Period],
    options: &RunOptions,
) -> Result<(MetricOutput, RunReport), PipelineError> {
    let mut report = RunReport::new();
    info!(%question, periods = periods.len(), concurrency = options.concurrency, "Running question");

    let snapshots = loader
        .load_all(periods, question.tables(), options.concurrency, &mut report)
        .await?;
    let output = question.evaluate(&snapshots, options, &mut report)?;

    report.log_summary();
    Ok((output, report))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::season::Season;
    use async_trait::async_trait;
    use bytes::Bytes;
    use std::io::{Cursor, Write};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use zip::write::SimpleFileOptions;

    fn build_zip(members: &[(&str, &str)]) -> Bytes {
        let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
        for (name, body) in members {
            writer.start_file(*name, SimpleFileOptions::default()).unwrap();
            writer.write_all(body.as_bytes()).unwrap();
        }
        Bytes::from(writer.finish().unwrap().into_inner())
    }

    /// Serves fixed archives by URL and counts fetches.
    struct StaticSource {
        archives: HashMap<String, Bytes>,
        fetches: AtomicUsize,
    }

    #[async_trait]
    impl Source for StaticSource {
        async fn fetch(&self, location: &str) -> Result<Bytes, PipelineError> {
            self.fetches.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
            self.archives
                .get(location)
                .cloned()
                .ok_or_else(|| PipelineError::network(location, "404 Not Found"))
        }
    }

    fn loader() -> (Arc<FeedLoader>, Arc<StaticSource>) {
        let full = build_zip(&[
            ("trips.txt", "route_id,service_id,trip_id\nCR-Lowell,w,1\nCR-Lowell,w,2\n"),
            ("stop_times.txt", "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n1,08:00:00,08:00:00,a,1\n"),
        ]);
        let trips_only = build_zip(&[("trips.txt", "route_id,service_id,trip_id\nCR-Needham,w,9\n")]);

        let source = Arc::new(StaticSource {
            archives: HashMap::from([
                ("https://feeds/fall.zip".to_string(), full),
                ("https://feeds/spring.zip".to_string(), trips_only),
            ]),
            fetches: AtomicUsize::new(0),
        });
        let index = FeedIndex {
            records: vec![
                FeedRecord::parse("https://feeds/fall.zip", "20230915").unwrap(),
                FeedRecord::parse("https://feeds/spring.zip", "20240315").unwrap(),
                FeedRecord::parse("https://feeds/gone.zip", "20240615").unwrap(),
            ],
            malformed: 0,
        };
        let loader = Arc::new(FeedLoader::new(source.clone(), index));
        (loader, source)
    }

    #[test]
    fn test_question_parse_and_tables() {
        assert_eq!("Q6".parse::<Question>().unwrap(), Question::Q6);
        assert!("q9".parse::<Question>().is_err());
        assert_eq!(Question::Q1.tables(), &[TableName::Trips, TableName::StopTimes, TableName::Calendar]);
        assert_eq!(Question::Q3.tables(), &[TableName::Stops]);
    }

    #[test]
    fn test_snapshot_missing_table() {
        let s = Snapshot::new(Period::new(2023, Season::Fall));
        assert!(matches!(
            s.table(TableName::Trips),
            Err(PipelineError::TableNotFound { table: TableName::Trips })
        ));
    }

    #[tokio::test]
    async fn test_archive_fetched_once_for_many_tables() {
        let (loader, source) = loader();
        let fall = Period::new(2023, Season::Fall);
        let snapshot = loader
            .snapshot(fall, &[TableName::Trips, TableName::StopTimes])
            .await
            .unwrap();
        assert_eq!(snapshot.table(TableName::Trips).unwrap().len(), 2);
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);

        loader.table(fall, TableName::Trips).await.unwrap();
        assert_eq!(loader.cache().table_loads(), 2);
    }

    #[tokio::test]
    async fn test_load_all_skips_and_keeps_order() {
        let (loader, _) = loader();
        let periods = vec![
            Period::new(2023, Season::Fall),
            Period::new(2023, Season::Winter),
            Period::new(2024, Season::Spring),
            Period::new(2024, Season::Summer),
        ];
        let mut report = RunReport::new();
        let snapshots = loader
            .load_all(&periods, Question::Q2.tables(), 3, &mut report)
            .await
            .unwrap();

        assert_eq!(snapshots.len(), 1);
        assert_eq!(snapshots[0].period, periods[0]);
        let kinds: Vec<&str> = report.skipped.iter().map(|s| s.kind.as_str()).collect();
        assert_eq!(kinds, vec!["no_feed_for_period", "table_not_found", "network_error"]);
    }

    #[tokio::test]
    async fn test_concurrent_loads_share_archive() {
        let (loader, source) = loader();
        let fall = Period::new(2023, Season::Fall);
        let mut report = RunReport::new();
        loader
            .load_all(&[fall, fall, fall], Question::Q2.tables(), 3, &mut report)
            .await
            .unwrap();
        assert_eq!(source.fetches.load(Ordering::SeqCst), 1);
        assert_eq!(loader.cache().table_loads(), 2);
    }

    #[tokio::test]
    async fn test_run_question_partial_results() {
        let (loader, _) = loader();
        let periods = Period::cross(&[2023, 2024], &[Season::Fall, Season::Spring]);
        let (output, report) = run_question(&loader, Question::Q7, &periods, &RunOptions::default())
            .await
            .unwrap();
        assert_eq!(output.metric.len(), 2);
        assert_eq!(report.succeeded.len(), 2);
        assert_eq!(report.skipped.len(), 2);
    }

    #[tokio::test]
    async fn test_fetch_table_uncached() {
        let (_, source) = loader();
        let table = fetch_table(source.as_ref(), "https://feeds/spring.zip", TableName::Trips)
            .await
            .unwrap();
        assert_eq!(table.len(), 1);
        let err = fetch_table(source.as_ref(), "https://feeds/spring.zip", TableName::StopTimes)
            .await
            .unwrap_err();
        assert!(matches!(err, PipelineError::TableNotFound { .. }));
    }

    #[tokio::test]
    async fn test_download_writes_season_directories() {
        let (loader, _) = loader();
        let dir = std::env::temp_dir().join("cr_feed_metrics_download_test");
        let _ = std::fs::remove_dir_all(&dir);

        let mut report = RunReport::new();
        let written = loader
            .download(
                &[Period::new(2023, Season::Fall), Period::new(2024, Season::Spring)],
                &[TableName::Trips, TableName::StopTimes],
                &dir,
                &mut report,
            )
            .await
            .unwrap();

        assert_eq!(written.len(), 3);
        assert!(dir.join("Fall_2023").join("stop_times.txt").exists());
        assert!(dir.join("Spring_2024").join("trips.txt").exists());
        assert_eq!(report.succeeded, vec![Period::new(2023, Season::Fall)]);
        assert_eq!(report.skipped.len(), 1);

        std::fs::remove_dir_all(&dir).unwrap();
    }
}
