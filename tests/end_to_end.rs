//! Full runs against a file-backed warehouse and local source mirrors.

use std::fs;
use std::path::Path;

use chrono::NaiveDate;
use songplay_dwh::config::Config;
use songplay_dwh::db::ddl::{STAGING_EVENTS, STAGING_SONGS};
use songplay_dwh::db::{Warehouse, repository};
use songplay_dwh::pipeline::{Pipeline, PipelineError, Stage};
use songplay_dwh::staging::LoadError;

// 2018-11-01 21:01:46.796 UTC
const T1_MILLIS: i64 = 1_541_106_106_796;

const JSONPATHS: &str = r#"{
    "jsonpaths": [
        "$['artist']", "$['auth']", "$['firstName']", "$['gender']",
        "$['itemInSession']", "$['lastName']", "$['length']", "$['level']",
        "$['location']", "$['method']", "$['page']", "$['registration']",
        "$['sessionId']", "$['song']", "$['status']", "$['ts']",
        "$['userAgent']", "$['userId']"
    ]
}"#;

fn event(user_id: &str, page: &str, level: &str, ts: i64) -> String {
    format!(
        r#"{{"artist":"A","auth":"Logged In","firstName":"Ann","gender":"F","itemInSession":0,"lastName":"Lee","length":200.0,"level":"{level}","location":"Austin, TX","method":"PUT","page":"{page}","registration":1540919166796.0,"sessionId":38,"song":"S","status":200,"ts":{ts},"userAgent":"Mozilla/5.0","userId":"{user_id}"}}"#
    )
}

const CATALOG_SONG: &str = r#"{"num_songs": 1, "artist_id": "ART1", "artist_latitude": 30.26715, "artist_longitude": -97.74306, "artist_location": "Austin, TX", "artist_name": "A", "song_id": "SNG1", "title": "S", "duration": 200.0, "year": 2000}"#;

/// Lay out an object-store mirror: `<root>/bucket/{log_data,song_data,log_json_path.json}`.
fn write_sources(root: &Path, log_lines: &[String]) {
    let bucket = root.join("bucket");
    fs::create_dir_all(bucket.join("log_data/2018/11")).unwrap();
    fs::create_dir_all(bucket.join("song_data/A/R/T")).unwrap();
    fs::write(
        bucket.join("log_data/2018/11/2018-11-01-events.json"),
        log_lines.join("\n"),
    )
    .unwrap();
    fs::write(bucket.join("song_data/A/R/T/TRART1.json"), CATALOG_SONG).unwrap();
    fs::write(bucket.join("log_json_path.json"), JSONPATHS).unwrap();
}

fn config(root: &Path, max_errors: usize) -> Config {
    let content = format!(
        r#"
[warehouse]
database_url = "{db}"

[iam_role]
arn = "arn:aws:iam::123456789012:role/dwhRole"

[s3]
log_data = "s3://bucket/log_data"
log_jsonpath = "s3://bucket/log_json_path.json"
song_data = "s3://bucket/song_data"

[load]
max_errors = {max_errors}
object_store_root = "{root}"
"#,
        db = root.join("sparkify.db").display(),
        root = root.display(),
    );
    let config = Config::from_toml_str(&content).unwrap();
    config.validate().unwrap();
    config
}

#[test]
fn test_single_event_single_song() {
    let root = tempfile::tempdir().unwrap();
    write_sources(root.path(), &[event("7", "NextSong", "free", T1_MILLIS)]);
    let config = config(root.path(), 0);

    let pipeline = Pipeline::new(&config).unwrap();
    let mut warehouse = Warehouse::connect(&config.warehouse.database_url).unwrap();
    let report = pipeline.run(&mut warehouse).unwrap();

    assert_eq!(report.copies.len(), 2);
    assert_eq!(report.rejected_rows(), 0);
    assert_eq!(report.rows_for(Stage::Songplays), 1);

    let conn = warehouse.conn();
    let plays = repository::find_songplays(conn).unwrap();
    assert_eq!(plays.len(), 1);
    assert_eq!(plays[0].songplay_id, 0);
    assert_eq!(plays[0].user_id, 7);
    assert_eq!(plays[0].song_id, "SNG1");
    assert_eq!(plays[0].artist_id, "ART1");

    let users = repository::find_users(conn).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!((users[0].user_id, users[0].level.as_str()), (7, "free"));

    let times = repository::find_time(conn).unwrap();
    let t1 = NaiveDate::from_ymd_opt(2018, 11, 1)
        .unwrap()
        .and_hms_opt(21, 1, 46)
        .unwrap();
    assert_eq!(times.len(), 1);
    assert_eq!(times[0].timestamp, t1);
    assert_eq!(plays[0].start_timestamp, t1);

    let artists = repository::find_artists(conn).unwrap();
    assert_eq!(artists[0].latitude, Some("30.26715".parse().unwrap()));
    assert_eq!(repository::find_songs(conn).unwrap().len(), 1);
}

#[test]
fn test_non_play_events_are_staged_but_not_facts() {
    let root = tempfile::tempdir().unwrap();
    write_sources(
        root.path(),
        &[
            event("7", "Home", "free", T1_MILLIS - 60_000),
            event("7", "NextSong", "free", T1_MILLIS),
            event("7", "Logout", "paid", T1_MILLIS + 60_000),
            event("", "Home", "free", T1_MILLIS),
        ],
    );
    let config = config(root.path(), 0);

    let pipeline = Pipeline::new(&config).unwrap();
    let mut warehouse = Warehouse::connect(&config.warehouse.database_url).unwrap();
    let report = pipeline.run(&mut warehouse).unwrap();

    assert_eq!(warehouse.row_count(&STAGING_EVENTS).unwrap(), 4);
    assert_eq!(warehouse.row_count(&STAGING_SONGS).unwrap(), 1);
    assert_eq!(report.rows_for(Stage::Songplays), 1);
    assert_eq!(report.rows_for(Stage::Time), 1);

    // Level follows the most recent event of any page.
    let users = repository::find_users(warehouse.conn()).unwrap();
    assert_eq!(users.len(), 1);
    assert_eq!(users[0].level, "paid");
}

#[test]
fn test_no_matches_leaves_facts_and_time_empty() {
    let root = tempfile::tempdir().unwrap();
    let mut unmatched = event("7", "NextSong", "free", T1_MILLIS);
    unmatched = unmatched.replace("\"length\":200.0", "\"length\":201.0");
    write_sources(root.path(), &[unmatched]);
    let config = config(root.path(), 0);

    let pipeline = Pipeline::new(&config).unwrap();
    let mut warehouse = Warehouse::connect(&config.warehouse.database_url).unwrap();
    let report = pipeline.run(&mut warehouse).unwrap();

    assert_eq!(report.rows_for(Stage::Songplays), 0);
    assert_eq!(report.rows_for(Stage::Time), 0);
    assert_eq!(report.rows_for(Stage::Users), 1);
    assert_eq!(report.unmatched, 1);
}

#[test]
fn test_bad_row_fails_fast_by_default() {
    let root = tempfile::tempdir().unwrap();
    write_sources(
        root.path(),
        &[
            event("7", "NextSong", "free", T1_MILLIS),
            event("seven", "NextSong", "free", T1_MILLIS),
        ],
    );

    let config = config(root.path(), 0);
    let pipeline = Pipeline::new(&config).unwrap();
    let mut warehouse = Warehouse::connect(&config.warehouse.database_url).unwrap();
    let err = pipeline.run(&mut warehouse).unwrap_err();
    assert!(matches!(err, PipelineError::Load(LoadError::Row { line: 2, .. })));

    let config = self::config(root.path(), 5);
    let pipeline = Pipeline::new(&config).unwrap();
    let report = pipeline.run(&mut warehouse).unwrap();
    assert_eq!(report.rejected_rows(), 1);
    assert_eq!(report.rows_for(Stage::Songplays), 1);
}

#[test]
fn test_rerun_rebuilds_from_scratch() {
    let root = tempfile::tempdir().unwrap();
    write_sources(root.path(), &[event("7", "NextSong", "free", T1_MILLIS)]);
    let config = config(root.path(), 0);
    let pipeline = Pipeline::new(&config).unwrap();

    let mut warehouse = Warehouse::connect(&config.warehouse.database_url).unwrap();
    pipeline.run(&mut warehouse).unwrap();
    drop(warehouse);

    let mut warehouse = Warehouse::connect(&config.warehouse.database_url).unwrap();
    let before = warehouse.schema_objects().unwrap();
    let report = pipeline.run(&mut warehouse).unwrap();
    assert_eq!(warehouse.schema_objects().unwrap(), before);
    assert_eq!(report.rows_for(Stage::Songplays), 1);
    assert_eq!(warehouse.row_count(&STAGING_EVENTS).unwrap(), 1);
}
