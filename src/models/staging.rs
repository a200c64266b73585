//! Raw staging rows, one per source record.

use chrono::NaiveDateTime;
use diesel::prelude::*;

use crate::db::schema::{staging_events, staging_songs};
use crate::models::decimal::Decimal;

/// Page tag of a "song played" log event.
pub const NEXT_SONG_PAGE: &str = "NextSong";

/// A logged user action as it sits in `staging_events`.
#[derive(Debug, Clone, Default, PartialEq, Queryable, Selectable)]
#[diesel(table_name = staging_events)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StagingEvent {
    pub event_id: i64,
    pub artist: Option<String>,
    pub auth: Option<String>,
    pub first_name: Option<String>,
    pub gender: Option<String>,
    pub item_in_session: Option<i64>,
    pub last_name: Option<String>,
    pub length: Option<Decimal>,
    pub level: Option<String>,
    pub location: Option<String>,
    pub method: Option<String>,
    pub page: Option<String>,
    pub registration: Option<i64>,
    pub session_id: Option<i64>,
    pub song: Option<String>,
    pub status: Option<i32>,
    pub ts: Option<NaiveDateTime>,
    pub user_agent: Option<String>,
    pub user_id: Option<i64>,
}

impl StagingEvent {
    pub fn is_song_play(&self) -> bool {
        self.page.as_deref() == Some(NEXT_SONG_PAGE)
    }
}

/// Data for inserting a staging event; the row id is assigned by the database.
#[derive(Debug, Clone, Default, PartialEq, Insertable)]
#[diesel(table_name = staging_events)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewStagingEvent {
    pub artist: Option<String>,
    pub auth: Option<String>,
    pub first_name: Option<String>,
    pub gender: Option<String>,
    pub item_in_session: Option<i64>,
    pub last_name: Option<String>,
    pub length: Option<Decimal>,
    pub level: Option<String>,
    pub location: Option<String>,
    pub method: Option<String>,
    pub page: Option<String>,
    pub registration: Option<i64>,
    pub session_id: Option<i64>,
    pub song: Option<String>,
    pub status: Option<i32>,
    pub ts: Option<NaiveDateTime>,
    pub user_agent: Option<String>,
    pub user_id: Option<i64>,
}

/// A catalog song as it sits in `staging_songs`.
#[derive(Debug, Clone, Default, PartialEq, Queryable, Selectable)]
#[diesel(table_name = staging_songs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct StagingSong {
    pub staging_song_id: i64,
    pub artist_id: Option<String>,
    pub artist_latitude: Option<Decimal>,
    pub artist_longitude: Option<Decimal>,
    pub artist_location: Option<String>,
    pub artist_name: Option<String>,
    pub song_id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<Decimal>,
    pub year: Option<i32>,
}

/// Data for inserting a staging song; the row id is assigned by the database.
#[derive(Debug, Clone, Default, PartialEq, Insertable)]
#[diesel(table_name = staging_songs)]
#[diesel(treat_none_as_default_value = false)]
pub struct NewStagingSong {
    pub artist_id: Option<String>,
    pub artist_latitude: Option<Decimal>,
    pub artist_longitude: Option<Decimal>,
    pub artist_location: Option<String>,
    pub artist_name: Option<String>,
    pub song_id: Option<String>,
    pub title: Option<String>,
    pub duration: Option<Decimal>,
    pub year: Option<i32>,
}
