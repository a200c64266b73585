//! Star-schema rows: four dimensions and the songplay fact.

use chrono::{NaiveDateTime, NaiveTime};
use diesel::prelude::*;

use crate::db::schema::{artists, songplays, songs, time, users};
use crate::models::decimal::Decimal;

/// A listener, with the subscription level of their latest event.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = users)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct User {
    pub user_id: i64,
    pub first_name: String,
    pub last_name: String,
    pub gender: String,
    pub level: String,
}

/// A catalog artist.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = artists)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
#[diesel(treat_none_as_default_value = false)]
pub struct Artist {
    pub artist_id: String,
    pub name: String,
    pub location: Option<String>,
    pub latitude: Option<Decimal>,
    pub longitude: Option<Decimal>,
}

/// A catalog song.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Queryable, Selectable, Insertable)]
#[diesel(table_name = songs)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Song {
    pub song_id: String,
    pub title: String,
    pub artist_id: String,
    pub year: i32,
    pub duration: Decimal,
}

/// Calendar breakdown of one songplay start timestamp.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = time)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct TimeRow {
    pub timestamp: NaiveDateTime,
    pub start_time: NaiveTime,
    pub hour: i32,
    pub day: i32,
    /// ISO 8601 week number.
    pub week: i32,
    pub month: i32,
    pub year: i32,
    /// ISO day of week, Monday = 1 through Sunday = 7.
    pub weekday: i32,
}

/// One "song played" event matched to the catalog.
#[derive(Debug, Clone, PartialEq, Eq, Queryable, Selectable, Insertable)]
#[diesel(table_name = songplays)]
#[diesel(check_for_backend(diesel::sqlite::Sqlite))]
pub struct Songplay {
    pub songplay_id: i64,
    pub start_timestamp: NaiveDateTime,
    pub user_id: i64,
    pub level: String,
    pub song_id: String,
    pub artist_id: String,
    pub session_id: i64,
    pub location: String,
    pub user_agent: String,
}
