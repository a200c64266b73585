//! The songplay fact: log events matched against the song catalog.

use std::collections::{BTreeSet, HashMap};

use chrono::{NaiveDateTime, SubsecRound};

use crate::db::ddl::SONGPLAYS;
use crate::models::{Decimal, Songplay, StagingEvent, StagingSong};
use crate::transform::{TransformError, required};

/// Width of `songplays.user_agent`, in bytes.
pub const MAX_USER_AGENT_LEN: usize = 100;

/// Songplays ready for insert, plus what was left out.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FactBuild {
    pub rows: Vec<Songplay>,
    /// Song plays with no catalog match.
    pub unmatched: usize,
    /// Song plays matching more than one catalog song.
    pub ambiguous: usize,
}

type MatchKey<'a> = (&'a str, &'a str, Decimal);

/// Catalog `(song_id, artist_id)` pairs keyed by artist name, title and duration.
fn index_catalog(catalog: &[StagingSong]) -> HashMap<MatchKey<'_>, BTreeSet<(&str, &str)>> {
    let mut index: HashMap<MatchKey<'_>, BTreeSet<(&str, &str)>> = HashMap::new();
    for song in catalog {
        let (Some(name), Some(title), Some(duration), Some(song_id), Some(artist_id)) = (
            song.artist_name.as_deref(),
            song.title.as_deref(),
            song.duration,
            song.song_id.as_deref(),
            song.artist_id.as_deref(),
        ) else {
            continue;
        };
        index
            .entry((name, title, duration))
            .or_default()
            .insert((song_id, artist_id));
    }
    index
}

/// Build the songplay fact from staged events and the song catalog.
///
/// Only `NextSong` events are considered. An event becomes a songplay when its
/// artist, song and length match exactly one catalog song. Ids are assigned
/// densely from zero in start time order, equal start times keeping load order.
pub fn build_songplays(
    events: &[StagingEvent],
    catalog: &[StagingSong],
) -> Result<FactBuild, TransformError> {
    let index = index_catalog(catalog);
    let mut build = FactBuild::default();
    let mut matched: Vec<(NaiveDateTime, i64, Songplay)> = Vec::new();

    for event in events.iter().filter(|e| e.is_song_play()) {
        let key = match (event.artist.as_deref(), event.song.as_deref(), event.length) {
            (Some(artist), Some(song), Some(length)) => (artist, song, length),
            _ => {
                build.unmatched += 1;
                continue;
            }
        };

        let (song_id, artist_id) = match index.get(&key) {
            None => {
                build.unmatched += 1;
                continue;
            }
            Some(candidates) if candidates.len() > 1 => {
                tracing::warn!(
                    "Event {} matches {} catalog songs for {:?} by {:?}; skipped",
                    event.event_id,
                    candidates.len(),
                    key.1,
                    key.0
                );
                build.ambiguous += 1;
                continue;
            }
            Some(candidates) => match candidates.first() {
                Some(&pair) => pair,
                None => {
                    build.unmatched += 1;
                    continue;
                }
            },
        };

        let row = songplay(event, song_id, artist_id)?;
        matched.push((row.start_timestamp, event.event_id, row));
    }

    matched.sort_by_key(|(start, event_id, _)| (*start, *event_id));
    build.rows = matched
        .into_iter()
        .enumerate()
        .map(|(idx, (_, _, mut row))| {
            row.songplay_id = idx as i64;
            row
        })
        .collect();
    Ok(build)
}

fn songplay(event: &StagingEvent, song_id: &str, artist_id: &str) -> Result<Songplay, TransformError> {
    let table = SONGPLAYS.name;
    let key = || format!("event {}", event.event_id);

    let start = required(event.ts, table, "start_timestamp", key)?;
    let user_agent = required(event.user_agent.as_deref(), table, "user_agent", key)?;

    Ok(Songplay {
        songplay_id: 0,
        start_timestamp: start.trunc_subsecs(0),
        user_id: required(event.user_id, table, "user_id", key)?,
        level: required(event.level.clone(), table, "level", key)?,
        song_id: song_id.to_string(),
        artist_id: artist_id.to_string(),
        session_id: required(event.session_id, table, "session_id", key)?,
        location: required(event.location.clone(), table, "location", key)?,
        user_agent: truncate_bytes(user_agent, MAX_USER_AGENT_LEN).to_string(),
    })
}

/// Longest prefix of `value` no wider than `max` bytes that ends on a character boundary.
fn truncate_bytes(value: &str, max: usize) -> &str {
    if value.len() <= max {
        return value;
    }
    let mut end = max;
    while !value.is_char_boundary(end) {
        end -= 1;
    }
    &value[..end]
}
