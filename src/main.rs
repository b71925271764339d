//! CLI entry point for the commuter rail feed metrics tool.
//!
//! Provides subcommands for listing the archived feeds picked per season,
//! downloading raw tables, and computing one metric question over a range
//! of years and seasons.

use anyhow::Result;
use clap::{Parser, Subcommand};
use cr_feed_metrics::clean::WeekdayRule;
use cr_feed_metrics::config::Settings;
use cr_feed_metrics::fetch::{BasicClient, HttpSource, Source};
use cr_feed_metrics::index::{FeedIndex, fetch_index};
use cr_feed_metrics::metrics::fares::ZoneMapping;
use cr_feed_metrics::output::{print_json, print_pretty, write_artifacts, write_metric};
use cr_feed_metrics::pipeline::{FeedLoader, Question, RunOptions, run_question};
use cr_feed_metrics::render::render_bar_chart;
use cr_feed_metrics::report::RunReport;
use cr_feed_metrics::season::{Period, Season};
use cr_feed_metrics::table::TableName;
use std::collections::BTreeSet;
use std::ffi::OsStr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{info, warn};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_subscriber::{
    EnvFilter, Layer,
    fmt::{self, format::FmtSpan},
    layer::SubscriberExt,
    util::SubscriberInitExt,
};

#[derive(Parser)]
#[command(name = "cr_feed_metrics")]
#[command(about = "Seasonal commuter rail schedule metrics from archived GTFS feeds", long_about = None)]
struct Cli {
    /// Feed index location (URL or local file); overrides FEED_INDEX_URL
    #[arg(long, global = true)]
    index_url: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Show the newest archived feed per (year, season)
    ListFeeds {
        /// Years to show, e.g. 2023,2024 (default: every year in the index)
        #[arg(short, long, value_delimiter = ',')]
        years: Vec<i32>,

        /// Seasons to show
        #[arg(short, long, value_delimiter = ',', default_values_t = Season::ALL)]
        seasons: Vec<Season>,
    },
    /// Extract raw tables to <output-dir>/<Season>_<year>/<table>.txt
    Download {
        #[arg(short, long, value_delimiter = ',', required = true)]
        years: Vec<i32>,

        #[arg(short, long, value_delimiter = ',', default_values_t = Season::ALL)]
        seasons: Vec<Season>,

        /// Tables to extract, e.g. trips,stop_times
        #[arg(short, long, value_delimiter = ',', required = true)]
        tables: Vec<TableName>,

        #[arg(short, long, default_value = "datasets")]
        output_dir: String,

        /// Print the run report as JSON
        #[arg(long, default_value_t = false)]
        report: bool,
    },
    /// Compute one metric question and write <output-dir>/<question>.csv
    Run {
        /// Question identifier, q1..q7
        #[arg(short, long)]
        question: Question,

        #[arg(short, long, value_delimiter = ',', required = true)]
        years: Vec<i32>,

        #[arg(short, long, value_delimiter = ',', default_values_t = Season::ALL)]
        seasons: Vec<Season>,

        #[arg(short, long, default_value = "out")]
        output_dir: String,

        /// Maximum number of (year, season) combinations loaded at once
        #[arg(short, long, default_value_t = 1)]
        concurrency: usize,

        /// Which calendar entries count as weekday service: corrected or any-day
        #[arg(long, default_value_t = WeekdayRule::Corrected)]
        weekday_rule: WeekdayRule,

        /// Also write intermediate tables as CSV
        #[arg(long, default_value_t = false)]
        artifacts: bool,

        /// Also write a text bar chart to <output-dir>/<question>.txt
        #[arg(long, default_value_t = false)]
        chart: bool,

        /// Print the run report as JSON
        #[arg(long, default_value_t = false)]
        report: bool,

        /// JSON file mapping line ids to fare areas; overrides ZONE_MAPPING_PATH
        #[arg(long)]
        zone_mapping: Option<String>,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok(); // Load .env file

    let settings = Settings::from_env()?;
    let _file_guard = init_logging(&settings.log_file_path)?;

    let cli = Cli::parse();
    let index_url = cli
        .index_url
        .clone()
        .unwrap_or_else(|| settings.feed_index_url.clone());

    let client = BasicClient::with_timeout(settings.http_timeout)?;
    let source: Arc<dyn Source> = Arc::new(HttpSource::new(client));
    let index = fetch_index(source.as_ref(), &index_url).await?;

    match cli.command {
        Commands::ListFeeds { years, seasons } => {
            list_feeds(&index, &years, &seasons);
        }
        Commands::Download {
            years,
            seasons,
            tables,
            output_dir,
            report,
        } => {
            let loader = FeedLoader::new(source, index);
            let periods = Period::cross(&years, &seasons);
            let mut run_report = RunReport::new();
            loader
                .download(&periods, &tables, Path::new(&output_dir), &mut run_report)
                .await?;
            run_report.log_summary();
            if report {
                print_json(&run_report)?;
            }
        }
        Commands::Run {
            question,
            years,
            seasons,
            output_dir,
            concurrency,
            weekday_rule,
            artifacts,
            chart,
            report,
            zone_mapping,
        } => {
            let zones = match zone_mapping.or(settings.zone_mapping_path) {
                Some(path) => {
                    info!(path = %path, "Loading zone mapping");
                    ZoneMapping::load(&path)?
                }
                None => ZoneMapping::default(),
            };
            let options = RunOptions {
                weekday_rule,
                zones,
                concurrency,
            };

            let loader = Arc::new(FeedLoader::new(source, index));
            let periods = Period::cross(&years, &seasons);
            let (output, run_report) = run_question(&loader, question, &periods, &options).await?;

            let dir = PathBuf::from(&output_dir);
            write_metric(&dir, &output.metric)?;
            print_pretty(&output.metric);

            if artifacts {
                let written = write_artifacts(&dir, &output)?;
                info!(count = written.len(), "Artifacts written");
            }
            if chart {
                let path = dir.join(format!("{question}.txt"));
                std::fs::write(&path, render_bar_chart(&output.metric))?;
                info!(path = %path.display(), "Chart written");
            }
            if report {
                print_json(&run_report)?;
            }
            if output.metric.is_empty() {
                warn!(%question, "Metric has no rows; every combination may have been skipped");
            }
        }
    }

    Ok(())
}

/// Logging setup: colored stderr + JSON rolling log file. The returned
/// guard flushes the file writer when dropped.
fn init_logging(log_file_path: &str) -> Result<WorkerGuard> {
    let log_dir = Path::new(log_file_path)
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .unwrap_or(Path::new("logs"));
    let log_file_name = Path::new(log_file_path)
        .file_name()
        .unwrap_or(OsStr::new("cr_feed_metrics.log"));

    let file_appender = tracing_appender::rolling::daily(log_dir, log_file_name);
    let (non_blocking_file, file_guard) = tracing_appender::non_blocking(file_appender);

    let stderr_layer = fmt::layer()
        .with_target(true)
        .with_span_events(FmtSpan::CLOSE)
        .with_ansi(true)
        .with_writer(std::io::stderr)
        .with_filter(EnvFilter::from_env("RUST_LOG").add_directive("info".parse()?));

    let json_layer = fmt::layer()
        .json()
        .with_current_span(true)
        .with_span_list(true)
        .with_writer(non_blocking_file)
        .with_filter(EnvFilter::from_env("RUST_LOG_JSON").add_directive("debug".parse()?));

    tracing_subscriber::registry()
        .with(stderr_layer)
        .with(json_layer)
        .init();

    Ok(file_guard)
}

/// Logs the record chosen for every requested (year, season).
fn list_feeds(index: &FeedIndex, years: &[i32], seasons: &[Season]) {
    let years: Vec<i32> = if years.is_empty() {
        let all: BTreeSet<i32> = index.records.iter().map(|r| r.year).collect();
        all.into_iter().collect()
    } else {
        years.to_vec()
    };

    info!(
        total = index.len(),
        malformed = index.malformed,
        "Feed index summary"
    );

    let mut missing = 0;
    for period in Period::cross(&years, seasons) {
        match index.latest(period.year, period.season) {
            Some(record) => info!(
                %period,
                feed_start_date = %record.raw_date,
                url = %record.url,
                "Feed"
            ),
            None => {
                missing += 1;
                warn!(%period, "No feed published");
            }
        }
    }
    info!(missing, "Feed list complete");
}
