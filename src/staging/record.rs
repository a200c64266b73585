//! Coercion of JSON record fields into typed staging rows.

use std::collections::HashMap;

use chrono::{DateTime, NaiveDateTime};
use serde_json::Value;
use thiserror::Error;

use crate::db::ddl::{SqlType, TableDef};
use crate::models::{Decimal, NewStagingEvent, NewStagingSong};
use crate::staging::layout::FieldLayout;

/// Why a single source record could not become a staging row.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RecordError {
    #[error("Malformed JSON: {0}")]
    Malformed(String),

    #[error("Record is not a JSON object")]
    NotAnObject,

    #[error("Column {column}: cannot load {value} as {expected}")]
    TypeMismatch {
        column: &'static str,
        expected: &'static str,
        value: String,
    },

    #[error("Column {column}: value {value} exceeds NUMERIC({precision},5)")]
    Overflow {
        column: &'static str,
        precision: u8,
        value: String,
    },
}

/// How epoch-based time fields are interpreted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum TimeFormat {
    #[default]
    EpochMillis,
}

/// Field values of one record, keyed by staging column name.
pub struct RecordFields<'a> {
    table: &'static TableDef,
    values: HashMap<&'static str, &'a Value>,
    time_format: TimeFormat,
}

impl<'a> RecordFields<'a> {
    /// Extract the loaded columns of `table` from `record` according to `layout`.
    pub fn extract(
        table: &'static TableDef,
        record: &'a Value,
        layout: &FieldLayout,
        time_format: TimeFormat,
    ) -> Result<Self, RecordError> {
        if !record.is_object() {
            return Err(RecordError::NotAnObject);
        }

        let values = match layout {
            FieldLayout::Auto => table
                .loaded_columns()
                .filter_map(|column| record.get(column.json_key()).map(|v| (column.name, v)))
                .collect(),
            FieldLayout::JsonPaths(paths) => table
                .loaded_columns()
                .zip(paths)
                .filter_map(|(column, path)| path.select(record).map(|v| (column.name, v)))
                .collect(),
        };

        Ok(Self {
            table,
            values,
            time_format,
        })
    }

    fn get(&self, column: &str) -> Option<&'a Value> {
        self.values.get(column).copied().filter(|v| !v.is_null())
    }

    fn mismatch(column: &'static str, expected: &'static str, value: &Value) -> RecordError {
        RecordError::TypeMismatch {
            column,
            expected,
            value: value.to_string(),
        }
    }

    pub fn text(&self, column: &'static str) -> Option<String> {
        self.get(column).map(|value| match value {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        })
    }

    pub fn bigint(&self, column: &'static str) -> Result<Option<i64>, RecordError> {
        let Some(value) = self.get(column) else {
            return Ok(None);
        };
        match value {
            Value::Number(n) => {
                if let Some(i) = n.as_i64() {
                    Ok(Some(i))
                } else {
                    n.as_f64()
                        .filter(|f| f.fract() == 0.0 && f.abs() < i64::MAX as f64)
                        .map(|f| Some(f as i64))
                        .ok_or_else(|| Self::mismatch(column, "BIGINT", value))
                }
            }
            Value::String(s) if s.trim().is_empty() => Ok(None),
            Value::String(s) => s
                .trim()
                .parse::<i64>()
                .map(Some)
                .map_err(|_| Self::mismatch(column, "BIGINT", value)),
            _ => Err(Self::mismatch(column, "BIGINT", value)),
        }
    }

    pub fn integer(&self, column: &'static str) -> Result<Option<i32>, RecordError> {
        match self.bigint(column)? {
            None => Ok(None),
            Some(v) => i32::try_from(v)
                .map(Some)
                .map_err(|_| Self::mismatch(column, "INT", &Value::from(v))),
        }
    }

    pub fn decimal(&self, column: &'static str) -> Result<Option<Decimal>, RecordError> {
        let Some(value) = self.get(column) else {
            return Ok(None);
        };
        let literal = match value {
            Value::Number(n) => n.to_string(),
            Value::String(s) if s.trim().is_empty() => return Ok(None),
            Value::String(s) => s.clone(),
            _ => return Err(Self::mismatch(column, "NUMERIC", value)),
        };
        let decimal: Decimal = literal
            .parse()
            .map_err(|_| Self::mismatch(column, "NUMERIC", value))?;

        let precision = match self.table.column(column).map(|c| c.sql_type) {
            Some(SqlType::Numeric { precision, .. }) => precision,
            _ => return Ok(Some(decimal)),
        };
        if !decimal.fits_precision(precision as u32) {
            return Err(RecordError::Overflow {
                column,
                precision,
                value: literal,
            });
        }
        Ok(Some(decimal))
    }

    pub fn timestamp(&self, column: &'static str) -> Result<Option<NaiveDateTime>, RecordError> {
        let Some(epoch) = self.bigint(column)? else {
            return Ok(None);
        };
        let parsed = match self.time_format {
            TimeFormat::EpochMillis => DateTime::from_timestamp_millis(epoch),
        };
        parsed
            .map(|dt| Some(dt.naive_utc()))
            .ok_or_else(|| Self::mismatch(column, "TIMESTAMP", &Value::from(epoch)))
    }
}

impl NewStagingEvent {
    pub fn from_fields(fields: &RecordFields<'_>) -> Result<Self, RecordError> {
        Ok(Self {
            artist: fields.text("artist"),
            auth: fields.text("auth"),
            first_name: fields.text("first_name"),
            gender: fields.text("gender"),
            item_in_session: fields.bigint("item_in_session")?,
            last_name: fields.text("last_name"),
            length: fields.decimal("length")?,
            level: fields.text("level"),
            location: fields.text("location"),
            method: fields.text("method"),
            page: fields.text("page"),
            registration: fields.bigint("registration")?,
            session_id: fields.bigint("session_id")?,
            song: fields.text("song"),
            status: fields.integer("status")?,
            ts: fields.timestamp("ts")?,
            user_agent: fields.text("user_agent"),
            user_id: fields.bigint("user_id")?,
        })
    }
}

impl NewStagingSong {
    pub fn from_fields(fields: &RecordFields<'_>) -> Result<Self, RecordError> {
        Ok(Self {
            artist_id: fields.text("artist_id"),
            artist_latitude: fields.decimal("artist_latitude")?,
            artist_longitude: fields.decimal("artist_longitude")?,
            artist_location: fields.text("artist_location"),
            artist_name: fields.text("artist_name"),
            song_id: fields.text("song_id"),
            title: fields.text("title"),
            duration: fields.decimal("duration")?,
            year: fields.integer("year")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::ddl::{STAGING_EVENTS, STAGING_SONGS};
    use serde_json::json;

    fn event(record: &Value) -> Result<NewStagingEvent, RecordError> {
        let fields =
            RecordFields::extract(&STAGING_EVENTS, record, &FieldLayout::Auto, TimeFormat::EpochMillis)?;
        NewStagingEvent::from_fields(&fields)
    }

    #[test]
    fn test_log_event_auto_layout() {
        let record = json!({
            "artist": "Des'ree", "auth": "Logged In", "firstName": "Kaylee",
            "gender": "F", "itemInSession": 1, "lastName": "Summers",
            "length": 246.30812, "level": "free", "location": "Phoenix-Mesa-Scottsdale, AZ",
            "method": "PUT", "page": "NextSong", "registration": 1540344794796.0,
            "sessionId": 139, "song": "You Gotta Be", "status": 200,
            "ts": 1541106106796_i64, "userAgent": "Mozilla/5.0", "userId": "8"
        });
        let row = event(&record).unwrap();
        assert_eq!(row.first_name.as_deref(), Some("Kaylee"));
        assert_eq!(row.user_id, Some(8));
        assert_eq!(row.registration, Some(1_540_344_794_796));
        assert_eq!(row.length, Some("246.30812".parse().unwrap()));
        assert_eq!(row.status, Some(200));
        assert_eq!(
            row.ts.unwrap().to_string(),
            "2018-11-01 21:01:46.796"
        );
    }

    #[test]
    fn test_empty_and_missing_values_are_null() {
        let row = event(&json!({"userId": "", "page": "Home", "length": null})).unwrap();
        assert_eq!(row.user_id, None);
        assert_eq!(row.length, None);
        assert_eq!(row.artist, None);
        assert_eq!(row.page.as_deref(), Some("Home"));
    }

    #[test]
    fn test_type_mismatch() {
        let err = event(&json!({"userId": "abc"})).unwrap_err();
        assert!(matches!(
            err,
            RecordError::TypeMismatch { column: "user_id", .. }
        ));
        assert!(event(&json!({"status": 1.5})).is_err());
        assert!(event(&json!({"sessionId": [1]})).is_err());
    }

    #[test]
    fn test_not_an_object() {
        assert_eq!(event(&json!([1, 2])).unwrap_err(), RecordError::NotAnObject);
    }

    #[test]
    fn test_song_record_precision() {
        let layout = FieldLayout::Auto;
        let record = json!({
            "num_songs": 1, "artist_id": "ARJIE2Y1187B994AB7", "artist_latitude": null,
            "artist_longitude": -122.41942, "artist_location": "",
            "artist_name": "Line Renaud", "song_id": "SOUPIRU12A6D4FA1E1",
            "title": "Der Kleine Dompfaff", "duration": 152.92036, "year": 0
        });
        let fields =
            RecordFields::extract(&STAGING_SONGS, &record, &layout, TimeFormat::EpochMillis).unwrap();
        let row = NewStagingSong::from_fields(&fields).unwrap();
        assert_eq!(row.artist_latitude, None);
        assert_eq!(row.artist_longitude, Some("-122.41942".parse().unwrap()));
        assert_eq!(row.artist_location.as_deref(), Some(""));
        assert_eq!(row.year, Some(0));

        let record = json!({"artist_latitude": 1000.0});
        let fields =
            RecordFields::extract(&STAGING_SONGS, &record, &layout, TimeFormat::EpochMillis).unwrap();
        assert!(matches!(
            NewStagingSong::from_fields(&fields),
            Err(RecordError::Overflow { precision: 8, .. })
        ));
    }

    #[test]
    fn test_positional_layout() {
        let mut paths: Vec<String> = STAGING_EVENTS
            .loaded_columns()
            .map(|c| format!("$['{}']", c.json_key()))
            .collect();
        // Read the artist column from a nested field instead.
        paths[0] = "$.meta.artist".to_string();
        let layout =
            FieldLayout::from_json(&json!({ "jsonpaths": paths }).to_string()).unwrap();

        let record = json!({"meta": {"artist": "Nested"}, "artist": "Top", "userId": 3});
        let fields =
            RecordFields::extract(&STAGING_EVENTS, &record, &layout, TimeFormat::EpochMillis).unwrap();
        let row = NewStagingEvent::from_fields(&fields).unwrap();
        assert_eq!(row.artist.as_deref(), Some("Nested"));
        assert_eq!(row.user_id, Some(3));
    }

    #[test]
    fn test_timestamp_out_of_range() {
        let record = json!({"ts": i64::MAX});
        let fields =
            RecordFields::extract(&STAGING_EVENTS, &record, &FieldLayout::Auto, TimeFormat::EpochMillis)
                .unwrap();
        assert!(matches!(
            NewStagingEvent::from_fields(&fields),
            Err(RecordError::TypeMismatch {
                column: "ts",
                expected: "TIMESTAMP",
                ..
            })
        ));
    }
}
