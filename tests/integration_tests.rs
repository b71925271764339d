use cr_feed_metrics::clean::WeekdayRule;
use cr_feed_metrics::fetch::{BasicClient, HttpSource, Source};
use cr_feed_metrics::index::fetch_index;
use cr_feed_metrics::output::{read_table, write_metric};
use cr_feed_metrics::pipeline::{FeedLoader, Question, RunOptions, run_question};
use cr_feed_metrics::render::render_bar_chart;
use cr_feed_metrics::season::{Period, Season};
use cr_feed_metrics::table::Value;
use std::fs;
use std::io::{Cursor, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use zip::write::SimpleFileOptions;

const FALL_TRIPS: &str = "route_id,service_id,trip_id,direction_id\n\
CR-Worcester,WKDY,1,0\n\
CR-Worcester,WKDY,1,0\n\
CR-Worcester,WKDY,2,1\n\
CR-Lowell,SAT,3,0\n\
Red,WKDY,9,0\n";

const FALL_STOP_TIMES: &str = "trip_id,arrival_time,departure_time,stop_id,stop_sequence\n\
1,08:00:00,08:00:00,place-wor,1\n\
1,08:40:00,08:40:00,place-sstat,2\n\
2,17:00:00,17:00:00,place-sstat,1\n\
2,17:45:00,17:45:00,place-wor,2\n\
3,08:10:00,08:10:00,place-low,1\n\
3,08:55:00,08:55:00,place-north,2\n";

const CALENDAR: &str = "service_id,monday,tuesday,wednesday,thursday,friday,saturday,sunday,start_date,end_date\n\
WKDY,1,1,1,1,1,0,0,20230901,20231130\n\
SAT,0,0,0,0,0,1,0,20230901,20231130\n";

const SPRING_TRIPS: &str = "route_id,service_id,trip_id,direction_id\n\
CR-Needham,WKDY,20,0\n";

fn build_zip(members: &[(&str, &str)]) -> Vec<u8> {
    let mut writer = zip::ZipWriter::new(Cursor::new(Vec::new()));
    for (name, body) in members {
        writer.start_file(*name, SimpleFileOptions::default()).unwrap();
        writer.write_all(body.as_bytes()).unwrap();
    }
    writer.finish().unwrap().into_inner()
}

/// Lays out an index plus archives on disk:
/// Fall 2023 (two feeds, the later one complete) and Spring 2024 (no
/// stop_times). Returns the index path.
fn mirror(name: &str) -> (PathBuf, PathBuf) {
    let dir = std::env::temp_dir().join(name);
    let _ = fs::remove_dir_all(&dir); // clean up any prior run
    fs::create_dir_all(&dir).unwrap();

    let early = dir.join("early_fall.zip");
    let late = dir.join("late_fall.zip");
    let spring = dir.join("spring.zip");
    fs::write(&early, build_zip(&[("trips.txt", SPRING_TRIPS)])).unwrap();
    fs::write(
        &late,
        build_zip(&[
            ("trips.txt", FALL_TRIPS),
            ("stop_times.txt", FALL_STOP_TIMES),
            ("calendar.txt", CALENDAR),
        ]),
    )
    .unwrap();
    fs::write(
        &spring,
        build_zip(&[("trips.txt", SPRING_TRIPS), ("calendar.txt", CALENDAR)]),
    )
    .unwrap();

    let index = dir.join("archived_feeds.txt");
    let doc = format!(
        "feed_start_date,feed_end_date,feed_version,archive_url\n\
         20230901,20230914,early,{}\n\
         20230915,20231130,late,{}\n\
         20240301,20240531,spring,{}\n\
         notadate,20240531,broken,{}\n",
        early.display(),
        late.display(),
        spring.display(),
        spring.display(),
    );
    fs::write(&index, doc).unwrap();
    (dir, index)
}

async fn loader(index: &Path) -> Arc<FeedLoader> {
    let source: Arc<dyn Source> = Arc::new(HttpSource::new(BasicClient::new().unwrap()));
    let index = fetch_index(source.as_ref(), &index.display().to_string())
        .await
        .unwrap();
    Arc::new(FeedLoader::new(source, index))
}

fn routes_of(table: &cr_feed_metrics::table::Table) -> Vec<String> {
    let idx = table.column_index("route_id").unwrap();
    table.rows().iter().map(|r| r[idx].to_string()).collect()
}

#[tokio::test]
async fn test_index_resolves_newest_feed_per_season() {
    let (dir, index_path) = mirror("cr_feed_metrics_it_index");
    let loader = loader(&index_path).await;

    let index = loader.index();
    assert_eq!(index.len(), 3);
    assert_eq!(index.malformed, 1);

    let fall = index.latest(2023, Season::Fall).unwrap();
    assert_eq!(fall.raw_date, "20230915");
    assert!(fall.url.ends_with("late_fall.zip"));
    assert!(index.latest(2023, Season::Summer).is_none());

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_net_trains_collapses_duplicate_trips() {
    let (dir, index_path) = mirror("cr_feed_metrics_it_net_trains");
    let loader = loader(&index_path).await;

    let periods = vec![Period::new(2023, Season::Fall)];
    let (output, report) = run_question(&loader, Question::Q6, &periods, &RunOptions::default())
        .await
        .unwrap();

    assert_eq!(report.succeeded, periods);
    let metric = &output.metric;
    assert_eq!(routes_of(&metric.table), vec!["CR-WORCESTER", "CR-LOWELL"]);
    assert_eq!(metric.measure(&metric.table.rows()[0]), Some(2.0));
    assert_eq!(metric.measure(&metric.table.rows()[1]), Some(1.0));

    let artifact_names: Vec<&str> = output.artifacts.iter().map(|t| t.name()).collect();
    assert_eq!(
        artifact_names,
        vec!["merged_trips", "filtered_commuter_rail_trips", "cleaned_commuter_rail_trips"]
    );

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_missing_stop_times_skips_only_that_combination() {
    let (dir, index_path) = mirror("cr_feed_metrics_it_partial");
    let loader = loader(&index_path).await;
    let periods = vec![Period::new(2023, Season::Fall), Period::new(2024, Season::Spring)];

    let (output, report) = run_question(&loader, Question::Q1, &periods, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.succeeded, vec![periods[0]]);
    assert_eq!(report.skipped.len(), 1);
    assert_eq!(report.skipped[0].period, periods[1]);
    assert_eq!(report.skipped[0].kind, "table_not_found");

    let year = output.metric.table.column_index("year").unwrap();
    assert!(!output.metric.is_empty());
    assert!(
        output
            .metric
            .table
            .rows()
            .iter()
            .all(|r| r[year].as_i64() == Some(2023))
    );

    // Questions that only need trips still see both seasons.
    let (output, report) = run_question(&loader, Question::Q7, &periods, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert!(report.skipped.is_empty());
    assert_eq!(output.metric.len(), 2);

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_weekday_rule_controls_saturday_only_service() {
    let (dir, index_path) = mirror("cr_feed_metrics_it_weekday");
    let loader = loader(&index_path).await;
    let periods = vec![Period::new(2023, Season::Fall)];

    let corrected = RunOptions::default();
    assert_eq!(corrected.weekday_rule, WeekdayRule::Corrected);
    let (output, _) = run_question(&loader, Question::Q1, &periods, &corrected)
        .await
        .unwrap();
    let routes = routes_of(&output.metric.table);
    assert!(routes.iter().any(|r| r == "CR-WORCESTER"));
    assert!(!routes.iter().any(|r| r == "CR-LOWELL"));

    let any_day = RunOptions {
        weekday_rule: WeekdayRule::AnyDay,
        ..RunOptions::default()
    };
    let (output, _) = run_question(&loader, Question::Q1, &periods, &any_day)
        .await
        .unwrap();
    let metric = &output.metric;
    let day = metric.table.column_index("day").unwrap();
    let lowell: Vec<_> = metric
        .table
        .rows()
        .iter()
        .filter(|r| r[0] == Value::text("CR-LOWELL"))
        .collect();
    assert!(!lowell.is_empty());
    assert!(lowell.iter().all(|r| r[day] == Value::text("Saturday")));

    fs::remove_dir_all(&dir).unwrap();
}

#[tokio::test]
async fn test_metric_csv_and_chart_are_reproducible() {
    let (dir, index_path) = mirror("cr_feed_metrics_it_output");
    let loader = loader(&index_path).await;
    let periods = Period::cross(&[2023, 2024], &Season::ALL);

    let (first, report) = run_question(&loader, Question::Q6, &periods, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(report.succeeded.len(), 2);
    assert_eq!(report.skipped.len(), 6);
    assert!(routes_of(&first.metric.table).contains(&"CR-NEEDHAM".to_string()));

    let (second, _) = run_question(&loader, Question::Q6, &periods, &RunOptions::default())
        .await
        .unwrap();
    assert_eq!(render_bar_chart(&first.metric), render_bar_chart(&second.metric));

    let out = dir.join("out");
    let path = write_metric(&out, &first.metric).unwrap();
    assert_eq!(path, out.join("q6.csv"));
    let back = read_table(&path).unwrap();
    assert_eq!(back.columns(), first.metric.table.columns());
    assert_eq!(back.rows(), first.metric.table.rows());

    fs::remove_dir_all(&dir).unwrap();
}

#[test]
fn test_invalid_question_is_rejected() {
    let err = "q8".parse::<Question>().unwrap_err();
    assert!(!err.is_recoverable());
}
