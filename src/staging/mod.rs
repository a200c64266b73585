//! Bulk loading of raw JSON objects into the staging tables.
//!
//! One source record becomes one staging row. Values are coerced to the
//! column type and nothing else; filtering and deduplication happen later in
//! the transform stage.

pub mod layout;
pub mod record;
pub mod source;

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::{Path, PathBuf};

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use serde_json::Value;
use thiserror::Error;

use crate::db::ddl::{self, TableDef};
use crate::db::repository;
use crate::models::{NewStagingEvent, NewStagingSong};

pub use layout::{FieldLayout, JsonPath, LayoutError};
pub use record::{RecordError, RecordFields, TimeFormat};
pub use source::{SourceError, SourceLocation};

/// Errors that abort a staging copy. The table's transaction is rolled back.
#[derive(Debug, Error)]
pub enum LoadError {
    #[error("Source error: {0}")]
    Source(#[from] SourceError),

    #[error("Layout error: {0}")]
    Layout(#[from] LayoutError),

    #[error("Cannot read object {object}: {source}")]
    Io {
        object: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Load into {table} failed at {object}:{line}: {reason}")]
    Row {
        table: &'static str,
        object: String,
        line: usize,
        reason: RecordError,
    },

    #[error("Load into {table} rejected {rejected} rows (max_errors = {max_errors})")]
    TooManyErrors {
        table: &'static str,
        rejected: usize,
        max_errors: usize,
    },

    #[error("Database error: {0}")]
    Database(#[from] diesel::result::Error),
}

/// The two staging targets of a bulk copy.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StagingTable {
    Events,
    Songs,
}

impl StagingTable {
    pub fn def(self) -> &'static TableDef {
        match self {
            StagingTable::Events => &ddl::STAGING_EVENTS,
            StagingTable::Songs => &ddl::STAGING_SONGS,
        }
    }

    pub fn name(self) -> &'static str {
        self.def().name
    }
}

/// Access role used to read the source objects.
#[derive(Clone, PartialEq, Eq)]
pub struct Credentials {
    pub iam_role: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Only the account id is printed.
        let account = self.iam_role.split(':').nth(4).unwrap_or("?");
        write!(f, "Credentials {{ iam_role: arn:…:{account}:… }}")
    }
}

/// How many rejected rows a copy tolerates before failing.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ErrorTolerance {
    /// `0` fails on the first bad row.
    pub max_errors: usize,
}

impl ErrorTolerance {
    pub fn fail_fast() -> Self {
        Self { max_errors: 0 }
    }

    pub fn best_effort(max_errors: usize) -> Self {
        Self { max_errors }
    }
}

/// A fully described bulk copy into one staging table.
#[derive(Debug, Clone)]
pub struct CopyRequest {
    pub table: StagingTable,
    pub source: SourceLocation,
    pub layout: FieldLayout,
    pub credentials: Credentials,
    pub region: String,
    pub time_format: TimeFormat,
    pub tolerance: ErrorTolerance,
}

/// A source record that did not become a staging row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RejectedRow {
    pub table: &'static str,
    pub object: String,
    pub line: usize,
    pub reason: RecordError,
}

/// Result of one staging copy.
#[derive(Debug, Clone)]
pub struct CopyOutcome {
    pub table: &'static str,
    pub objects: usize,
    pub rows_loaded: usize,
    pub rejected: Vec<RejectedRow>,
}

/// Copies JSON objects from a source location into a staging table.
#[derive(Debug, Clone, Default)]
pub struct StagingLoader {
    object_store_root: Option<PathBuf>,
}

impl StagingLoader {
    pub fn new(object_store_root: Option<PathBuf>) -> Self {
        Self { object_store_root }
    }

    /// Load the layout descriptor named by `location`, or `auto` when there is none.
    pub fn resolve_layout(
        &self,
        location: Option<&SourceLocation>,
    ) -> Result<FieldLayout, LoadError> {
        match location {
            None => Ok(FieldLayout::Auto),
            Some(location) => {
                let object = location.resolve_object(self.object_store_root.as_deref())?;
                Ok(FieldLayout::from_file(&object)?)
            }
        }
    }

    /// Run one bulk copy inside a single transaction.
    pub fn copy(
        &self,
        conn: &mut SqliteConnection,
        request: &CopyRequest,
    ) -> Result<CopyOutcome, LoadError> {
        let table = request.table.def();
        request
            .layout
            .check_columns(table.name, table.loaded_columns().count())?;

        let objects = request
            .source
            .list_objects(self.object_store_root.as_deref())?;

        tracing::info!(
            "Copying {} objects from {} into {}",
            objects.len(),
            request.source,
            table.name
        );
        tracing::debug!(
            "Copy into {} uses {:?} in region {}",
            table.name,
            request.credentials,
            request.region
        );

        let outcome = conn.transaction::<_, LoadError, _>(|conn| {
            let mut outcome = CopyOutcome {
                table: table.name,
                objects: objects.len(),
                rows_loaded: 0,
                rejected: Vec::new(),
            };
            for object in &objects {
                copy_object(conn, request, object, &mut outcome)?;
            }
            Ok(outcome)
        })?;

        tracing::info!(
            "Loaded {} rows into {} ({} rejected)",
            outcome.rows_loaded,
            outcome.table,
            outcome.rejected.len()
        );
        Ok(outcome)
    }
}

fn copy_object(
    conn: &mut SqliteConnection,
    request: &CopyRequest,
    object: &Path,
    outcome: &mut CopyOutcome,
) -> Result<(), LoadError> {
    let object_name = object.display().to_string();
    let io_error = |source| LoadError::Io {
        object: object_name.clone(),
        source,
    };
    let mut reader = BufReader::new(File::open(object).map_err(io_error)?);
    let mut buf = Vec::new();
    let mut line_no = 0;

    loop {
        buf.clear();
        if reader.read_until(b'\n', &mut buf).map_err(io_error)? == 0 {
            break;
        }
        line_no += 1;

        let parsed = match std::str::from_utf8(&buf) {
            Ok(line) if line.trim().is_empty() => continue,
            Ok(line) => parse_line(request, line),
            Err(e) => Err(RecordError::Malformed(format!("invalid UTF-8: {e}"))),
        };

        match parsed {
            Ok(row) => {
                row.insert(conn)?;
                outcome.rows_loaded += 1;
            }
            Err(reason) => {
                reject(request, outcome, &object_name, line_no, reason)?;
            }
        }
    }
    Ok(())
}

fn reject(
    request: &CopyRequest,
    outcome: &mut CopyOutcome,
    object: &str,
    line: usize,
    reason: RecordError,
) -> Result<(), LoadError> {
    let table = request.table.name();
    let max_errors = request.tolerance.max_errors;

    if max_errors == 0 {
        return Err(LoadError::Row {
            table,
            object: object.to_string(),
            line,
            reason,
        });
    }

    tracing::warn!("Rejected {}:{} for {}: {}", object, line, table, reason);
    outcome.rejected.push(RejectedRow {
        table,
        object: object.to_string(),
        line,
        reason,
    });

    if outcome.rejected.len() > max_errors {
        return Err(LoadError::TooManyErrors {
            table,
            rejected: outcome.rejected.len(),
            max_errors,
        });
    }
    Ok(())
}

enum StagingRow {
    Event(NewStagingEvent),
    Song(NewStagingSong),
}

impl StagingRow {
    fn insert(&self, conn: &mut SqliteConnection) -> QueryResult<usize> {
        match self {
            StagingRow::Event(event) => repository::insert_staging_event(conn, event),
            StagingRow::Song(song) => repository::insert_staging_song(conn, song),
        }
    }
}

fn parse_line(request: &CopyRequest, line: &str) -> Result<StagingRow, RecordError> {
    let record: Value =
        serde_json::from_str(line).map_err(|e| RecordError::Malformed(e.to_string()))?;
    let fields = RecordFields::extract(
        request.table.def(),
        &record,
        &request.layout,
        request.time_format,
    )?;
    match request.table {
        StagingTable::Events => NewStagingEvent::from_fields(&fields).map(StagingRow::Event),
        StagingTable::Songs => NewStagingSong::from_fields(&fields).map(StagingRow::Song),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Warehouse;
    use std::fs;

    const EVENT_OK: &str = r#"{"artist":"Artist A","firstName":"Ann","page":"NextSong","ts":1541106106796,"userId":"7","length":200.5}"#;
    const EVENT_HOME: &str = r#"{"artist":null,"firstName":"Bob","page":"Home","ts":1541106107000,"userId":"8"}"#;
    const EVENT_BAD: &str = r#"{"page":"NextSong","userId":"seven"}"#;

    fn setup() -> Warehouse {
        let mut warehouse = Warehouse::connect(":memory:").unwrap();
        warehouse.reset_schema().unwrap();
        warehouse
    }

    fn request(table: StagingTable, dir: &Path, max_errors: usize) -> CopyRequest {
        CopyRequest {
            table,
            source: SourceLocation::Local(dir.to_path_buf()),
            layout: FieldLayout::Auto,
            credentials: Credentials {
                iam_role: "arn:aws:iam::123456789012:role/dwhRole".to_string(),
            },
            region: "us-west-2".to_string(),
            time_format: TimeFormat::EpochMillis,
            tolerance: ErrorTolerance::best_effort(max_errors),
        }
    }

    #[test]
    fn test_copy_loads_every_record_unfiltered() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("2018-11-01-events.json"),
            format!("{EVENT_OK}\n\n{EVENT_HOME}\n"),
        )
        .unwrap();

        let mut warehouse = setup();
        let outcome = StagingLoader::default()
            .copy(warehouse.conn(), &request(StagingTable::Events, dir.path(), 0))
            .unwrap();

        assert_eq!(outcome.objects, 1);
        assert_eq!(outcome.rows_loaded, 2);
        assert!(outcome.rejected.is_empty());
        assert_eq!(warehouse.row_count(&ddl::STAGING_EVENTS).unwrap(), 2);
    }

    #[test]
    fn test_fail_fast_rolls_back_table() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("events.json"),
            format!("{EVENT_OK}\n{EVENT_BAD}\n"),
        )
        .unwrap();

        let mut warehouse = setup();
        let err = StagingLoader::default()
            .copy(warehouse.conn(), &request(StagingTable::Events, dir.path(), 0))
            .unwrap_err();

        assert!(matches!(err, LoadError::Row { line: 2, .. }));
        assert_eq!(warehouse.row_count(&ddl::STAGING_EVENTS).unwrap(), 0);
    }

    #[test]
    fn test_best_effort_skips_bad_rows() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("events.json"),
            format!("{EVENT_OK}\n{EVENT_BAD}\nnot json\n{EVENT_HOME}\n"),
        )
        .unwrap();

        let mut warehouse = setup();
        let outcome = StagingLoader::default()
            .copy(warehouse.conn(), &request(StagingTable::Events, dir.path(), 5))
            .unwrap();

        assert_eq!(outcome.rows_loaded, 2);
        let lines: Vec<usize> = outcome.rejected.iter().map(|r| r.line).collect();
        assert_eq!(lines, vec![2, 3]);
        assert!(matches!(outcome.rejected[1].reason, RecordError::Malformed(_)));
    }

    #[test]
    fn test_invalid_utf8_line_is_a_row_error() {
        let dir = tempfile::tempdir().unwrap();
        let mut content = format!("{EVENT_OK}\n").into_bytes();
        content.extend_from_slice(b"{\"artist\":\"\xff\xfe\"}\n");
        content.extend_from_slice(format!("{EVENT_HOME}\n").as_bytes());
        fs::write(dir.path().join("events.json"), content).unwrap();

        let mut warehouse = setup();
        let outcome = StagingLoader::default()
            .copy(warehouse.conn(), &request(StagingTable::Events, dir.path(), 5))
            .unwrap();

        assert_eq!(outcome.rows_loaded, 2);
        assert_eq!(outcome.rejected.len(), 1);
        assert_eq!(outcome.rejected[0].line, 2);
        assert!(matches!(outcome.rejected[0].reason, RecordError::Malformed(_)));

        let err = StagingLoader::default()
            .copy(warehouse.conn(), &request(StagingTable::Events, dir.path(), 0))
            .unwrap_err();
        assert!(matches!(err, LoadError::Row { line: 2, .. }));
    }

    #[test]
    fn test_too_many_errors() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(
            dir.path().join("events.json"),
            format!("{EVENT_BAD}\n{EVENT_BAD}\n{EVENT_OK}\n"),
        )
        .unwrap();

        let mut warehouse = setup();
        let err = StagingLoader::default()
            .copy(warehouse.conn(), &request(StagingTable::Events, dir.path(), 1))
            .unwrap_err();

        assert!(matches!(
            err,
            LoadError::TooManyErrors {
                rejected: 2,
                max_errors: 1,
                ..
            }
        ));
        assert_eq!(warehouse.row_count(&ddl::STAGING_EVENTS).unwrap(), 0);
    }

    #[test]
    fn test_copy_songs_from_object_store_mirror() {
        let root = tempfile::tempdir().unwrap();
        let song_dir = root.path().join("udacity-dend/song_data/A/B/C");
        fs::create_dir_all(&song_dir).unwrap();
        fs::write(
            song_dir.join("TRABCEI128F424C983.json"),
            r#"{"num_songs": 1, "artist_id": "ARJIE2Y1187B994AB7", "artist_latitude": null, "artist_longitude": null, "artist_location": "", "artist_name": "Line Renaud", "song_id": "SOUPIRU12A6D4FA1E1", "title": "Der Kleine Dompfaff", "duration": 152.92036, "year": 0}"#,
        )
        .unwrap();

        let mut warehouse = setup();
        let loader = StagingLoader::new(Some(root.path().to_path_buf()));
        let mut req = request(StagingTable::Songs, root.path(), 0);
        req.source = SourceLocation::parse("s3://udacity-dend/song_data").unwrap();
        let outcome = loader.copy(warehouse.conn(), &req).unwrap();

        assert_eq!(outcome.rows_loaded, 1);
        let songs = repository::load_staging_songs(warehouse.conn()).unwrap();
        assert_eq!(songs[0].artist_name.as_deref(), Some("Line Renaud"));
        assert_eq!(songs[0].duration, Some("152.92036".parse().unwrap()));
    }

    #[test]
    fn test_layout_column_count_is_checked() {
        let dir = tempfile::tempdir().unwrap();
        fs::write(dir.path().join("events.json"), format!("{EVENT_OK}\n")).unwrap();
        fs::write(
            dir.path().join("paths.json"),
            r#"{"jsonpaths": ["$['artist']"]}"#,
        )
        .unwrap();

        let loader = StagingLoader::default();
        let layout = loader
            .resolve_layout(Some(&SourceLocation::Local(dir.path().join("paths.json"))))
            .unwrap();
        let mut req = request(StagingTable::Events, &dir.path().join("events.json"), 0);
        req.layout = layout;

        let mut warehouse = setup();
        assert!(matches!(
            loader.copy(warehouse.conn(), &req),
            Err(LoadError::Layout(LayoutError::ColumnCount { paths: 1, .. }))
        ));
        assert_eq!(loader.resolve_layout(None).unwrap(), FieldLayout::Auto);
    }

    #[test]
    fn test_credentials_are_redacted_in_debug_output() {
        let credentials = Credentials {
            iam_role: "arn:aws:iam::123456789012:role/dwhRole".to_string(),
        };
        let rendered = format!("{credentials:?}");
        assert!(rendered.contains("123456789012"));
        assert!(!rendered.contains("dwhRole"));
    }
}
