//! Dimension builders: artists, songs, users and time.

use std::cmp::Reverse;
use std::collections::{BTreeMap, BTreeSet};

use chrono::{Datelike, NaiveDateTime, Timelike};

use crate::db::ddl::{ARTISTS, SONGS, USERS};
use crate::models::{Artist, Decimal, Song, StagingEvent, StagingSong, TimeRow, User};
use crate::transform::{TransformError, required};

/// Keep the smaller of two optional values, ignoring `None`.
fn min_present<T: Ord>(current: Option<T>, candidate: Option<T>) -> Option<T> {
    match (current, candidate) {
        (Some(a), Some(b)) => Some(a.min(b)),
        (a, b) => a.or(b),
    }
}

#[derive(Default)]
struct ArtistAttributes<'a> {
    name: Option<&'a str>,
    location: Option<&'a str>,
    latitude: Option<Decimal>,
    longitude: Option<Decimal>,
}

/// One artist per distinct `artist_id`, each attribute the smallest non-null value seen.
///
/// Attributes are reduced independently, so the result may combine values from
/// different catalog rows.
pub fn build_artists(songs: &[StagingSong]) -> Result<Vec<Artist>, TransformError> {
    let mut groups: BTreeMap<&str, ArtistAttributes<'_>> = BTreeMap::new();

    for song in songs {
        let Some(artist_id) = song.artist_id.as_deref() else {
            continue;
        };
        let attrs = groups.entry(artist_id).or_default();
        attrs.name = min_present(attrs.name, song.artist_name.as_deref());
        attrs.location = min_present(attrs.location, song.artist_location.as_deref());
        attrs.latitude = min_present(attrs.latitude, song.artist_latitude);
        attrs.longitude = min_present(attrs.longitude, song.artist_longitude);
    }

    groups
        .into_iter()
        .map(|(artist_id, attrs)| {
            Ok(Artist {
                artist_id: artist_id.to_string(),
                name: required(attrs.name, ARTISTS.name, "name", || artist_id.to_string())?
                    .to_string(),
                location: attrs.location.map(str::to_string),
                latitude: attrs.latitude,
                longitude: attrs.longitude,
            })
        })
        .collect()
}

type SongTuple<'a> = (Option<&'a str>, Option<&'a str>, Option<i32>, Option<Decimal>);

/// Distinct `(song_id, title, artist_id, year, duration)` tuples with a `song_id`.
///
/// Two different tuples sharing a `song_id` cannot both become rows and are
/// reported as [`TransformError::DuplicateKey`].
pub fn build_songs(songs: &[StagingSong]) -> Result<Vec<Song>, TransformError> {
    let mut distinct: BTreeMap<&str, SongTuple<'_>> = BTreeMap::new();

    for song in songs {
        let Some(song_id) = song.song_id.as_deref() else {
            continue;
        };
        let tuple = (
            song.title.as_deref(),
            song.artist_id.as_deref(),
            song.year,
            song.duration,
        );
        match distinct.get(song_id) {
            Some(existing) if *existing != tuple => {
                return Err(TransformError::DuplicateKey {
                    table: SONGS.name,
                    key: song_id.to_string(),
                });
            }
            Some(_) => {}
            None => {
                distinct.insert(song_id, tuple);
            }
        }
    }

    distinct
        .into_iter()
        .map(|(song_id, (title, artist_id, year, duration))| {
            let key = || song_id.to_string();
            Ok(Song {
                song_id: song_id.to_string(),
                title: required(title, SONGS.name, "title", key)?.to_string(),
                artist_id: required(artist_id, SONGS.name, "artist_id", key)?.to_string(),
                year: required(year, SONGS.name, "year", key)?,
                duration: required(duration, SONGS.name, "duration", key)?,
            })
        })
        .collect()
}

/// One user per distinct `user_id`, taken from that user's most recent event.
///
/// Events without a timestamp rank below any timestamped event. Equal
/// timestamps resolve to the event loaded first.
pub fn build_users(events: &[StagingEvent]) -> Result<Vec<User>, TransformError> {
    let mut latest: BTreeMap<i64, &StagingEvent> = BTreeMap::new();

    for event in events {
        let Some(user_id) = event.user_id else {
            continue;
        };
        let rank = |e: &StagingEvent| (e.ts, Reverse(e.event_id));
        latest
            .entry(user_id)
            .and_modify(|current| {
                if rank(event) > rank(*current) {
                    *current = event;
                }
            })
            .or_insert(event);
    }

    latest
        .into_iter()
        .map(|(user_id, event)| {
            let key = || format!("user_id {user_id}");
            Ok(User {
                user_id,
                first_name: required(event.first_name.clone(), USERS.name, "first_name", key)?,
                last_name: required(event.last_name.clone(), USERS.name, "last_name", key)?,
                gender: required(event.gender.clone(), USERS.name, "gender", key)?,
                level: required(event.level.clone(), USERS.name, "level", key)?,
            })
        })
        .collect()
}

/// One calendar row per distinct timestamp, ascending.
pub fn build_time(timestamps: &[NaiveDateTime]) -> Vec<TimeRow> {
    timestamps
        .iter()
        .collect::<BTreeSet<_>>()
        .into_iter()
        .map(|&timestamp| TimeRow {
            timestamp,
            start_time: timestamp.time(),
            hour: timestamp.hour() as i32,
            day: timestamp.day() as i32,
            week: timestamp.iso_week().week() as i32,
            month: timestamp.month() as i32,
            year: timestamp.year(),
            weekday: timestamp.weekday().number_from_monday() as i32,
        })
        .collect()
}
