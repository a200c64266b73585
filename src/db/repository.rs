//! Typed reads from staging tables and writes to warehouse tables.
//!
//! Every value is bound as a parameter through the diesel query builder.

use chrono::NaiveDateTime;
use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;

use crate::db::connection::CountResult;
use crate::db::schema::{artists, songplays, songs, staging_events, staging_songs, time, users};
use crate::models::{
    Artist, NEXT_SONG_PAGE, NewStagingEvent, NewStagingSong, Song, Songplay, StagingEvent,
    StagingSong, TimeRow, User,
};

// ============================================================================
// Staging
// ============================================================================

pub fn insert_staging_event(
    conn: &mut SqliteConnection,
    event: &NewStagingEvent,
) -> QueryResult<usize> {
    diesel::insert_into(staging_events::table)
        .values(event)
        .execute(conn)
}

pub fn insert_staging_song(
    conn: &mut SqliteConnection,
    song: &NewStagingSong,
) -> QueryResult<usize> {
    diesel::insert_into(staging_songs::table)
        .values(song)
        .execute(conn)
}

/// All staging events in load order.
pub fn load_staging_events(conn: &mut SqliteConnection) -> QueryResult<Vec<StagingEvent>> {
    staging_events::table
        .select(StagingEvent::as_select())
        .order(staging_events::event_id.asc())
        .load(conn)
}

/// Only the "song played" events, in load order.
pub fn load_song_play_events(conn: &mut SqliteConnection) -> QueryResult<Vec<StagingEvent>> {
    staging_events::table
        .filter(staging_events::page.eq(NEXT_SONG_PAGE))
        .select(StagingEvent::as_select())
        .order(staging_events::event_id.asc())
        .load(conn)
}

/// All staging songs in load order.
pub fn load_staging_songs(conn: &mut SqliteConnection) -> QueryResult<Vec<StagingSong>> {
    staging_songs::table
        .select(StagingSong::as_select())
        .order(staging_songs::staging_song_id.asc())
        .load(conn)
}

// ============================================================================
// Warehouse
// ============================================================================

pub fn insert_users(conn: &mut SqliteConnection, rows: &[User]) -> QueryResult<usize> {
    let mut inserted = 0;
    for row in rows {
        inserted += diesel::insert_into(users::table).values(row).execute(conn)?;
    }
    Ok(inserted)
}

pub fn insert_artists(conn: &mut SqliteConnection, rows: &[Artist]) -> QueryResult<usize> {
    let mut inserted = 0;
    for row in rows {
        inserted += diesel::insert_into(artists::table).values(row).execute(conn)?;
    }
    Ok(inserted)
}

pub fn insert_songs(conn: &mut SqliteConnection, rows: &[Song]) -> QueryResult<usize> {
    let mut inserted = 0;
    for row in rows {
        inserted += diesel::insert_into(songs::table).values(row).execute(conn)?;
    }
    Ok(inserted)
}

pub fn insert_songplays(conn: &mut SqliteConnection, rows: &[Songplay]) -> QueryResult<usize> {
    let mut inserted = 0;
    for row in rows {
        inserted += diesel::insert_into(songplays::table)
            .values(row)
            .execute(conn)?;
    }
    Ok(inserted)
}

pub fn insert_time(conn: &mut SqliteConnection, rows: &[TimeRow]) -> QueryResult<usize> {
    let mut inserted = 0;
    for row in rows {
        inserted += diesel::insert_into(time::table).values(row).execute(conn)?;
    }
    Ok(inserted)
}

/// Distinct songplay start timestamps, ascending.
pub fn songplay_timestamps(conn: &mut SqliteConnection) -> QueryResult<Vec<NaiveDateTime>> {
    songplays::table
        .select(songplays::start_timestamp)
        .distinct()
        .order(songplays::start_timestamp.asc())
        .load(conn)
}

pub fn find_users(conn: &mut SqliteConnection) -> QueryResult<Vec<User>> {
    users::table
        .select(User::as_select())
        .order(users::user_id.asc())
        .load(conn)
}

pub fn find_artists(conn: &mut SqliteConnection) -> QueryResult<Vec<Artist>> {
    artists::table
        .select(Artist::as_select())
        .order(artists::artist_id.asc())
        .load(conn)
}

pub fn find_songs(conn: &mut SqliteConnection) -> QueryResult<Vec<Song>> {
    songs::table
        .select(Song::as_select())
        .order(songs::song_id.asc())
        .load(conn)
}

pub fn find_songplays(conn: &mut SqliteConnection) -> QueryResult<Vec<Songplay>> {
    songplays::table
        .select(Songplay::as_select())
        .order(songplays::songplay_id.asc())
        .load(conn)
}

pub fn find_time(conn: &mut SqliteConnection) -> QueryResult<Vec<TimeRow>> {
    time::table
        .select(TimeRow::as_select())
        .order(time::timestamp.asc())
        .load(conn)
}

// ============================================================================
// Integrity
// ============================================================================

/// A fact foreign key with no matching dimension row.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IntegrityViolation {
    pub column: &'static str,
    pub referenced_table: &'static str,
    pub orphaned_rows: i64,
}

/// Anti-join for each songplay foreign key: (column, referenced table, query).
const FACT_REFERENCES: &[(&str, &str, &str)] = &[
    (
        "start_timestamp",
        "time",
        "SELECT COUNT(*) AS cnt FROM songplays f \
         LEFT JOIN \"time\" d ON f.start_timestamp = d.\"timestamp\" \
         WHERE d.\"timestamp\" IS NULL",
    ),
    (
        "user_id",
        "users",
        "SELECT COUNT(*) AS cnt FROM songplays f \
         LEFT JOIN users d ON f.user_id = d.user_id \
         WHERE d.user_id IS NULL",
    ),
    (
        "song_id",
        "songs",
        "SELECT COUNT(*) AS cnt FROM songplays f \
         LEFT JOIN songs d ON f.song_id = d.song_id \
         WHERE d.song_id IS NULL",
    ),
    (
        "artist_id",
        "artists",
        "SELECT COUNT(*) AS cnt FROM songplays f \
         LEFT JOIN artists d ON f.artist_id = d.artist_id \
         WHERE d.artist_id IS NULL",
    ),
];

/// Check that every songplay resolves to its time, user, song and artist rows.
pub fn find_integrity_violations(
    conn: &mut SqliteConnection,
) -> QueryResult<Vec<IntegrityViolation>> {
    let mut violations = Vec::new();
    for &(column, referenced_table, query) in FACT_REFERENCES {
        let orphaned = diesel::sql_query(query).get_result::<CountResult>(conn)?.cnt;
        if orphaned > 0 {
            violations.push(IntegrityViolation {
                column,
                referenced_table,
                orphaned_rows: orphaned,
            });
        }
    }
    Ok(violations)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::Warehouse;
    use crate::models::Decimal;
    use chrono::NaiveDate;

    fn setup() -> Warehouse {
        let mut warehouse = Warehouse::connect(":memory:").unwrap();
        warehouse.reset_schema().unwrap();
        warehouse
    }

    fn at(h: u32, m: u32, s: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2018, 11, 1)
            .unwrap()
            .and_hms_opt(h, m, s)
            .unwrap()
    }

    #[test]
    fn test_staging_round_trip_keeps_load_order() {
        let mut warehouse = setup();
        let conn = warehouse.conn();
        for page in ["Home", "NextSong", "NextSong"] {
            insert_staging_event(
                conn,
                &NewStagingEvent {
                    page: Some(page.to_string()),
                    length: Some("200.5".parse().unwrap()),
                    ..Default::default()
                },
            )
            .unwrap();
        }

        let all = load_staging_events(conn).unwrap();
        assert_eq!(all.len(), 3);
        assert!(all.windows(2).all(|w| w[0].event_id < w[1].event_id));
        assert_eq!(all[0].length, Some(Decimal::from_units(20_050_000)));

        let plays = load_song_play_events(conn).unwrap();
        assert_eq!(plays.len(), 2);
        assert!(plays.iter().all(StagingEvent::is_song_play));
    }

    #[test]
    fn test_staging_song_decimals_survive_storage() {
        let mut warehouse = setup();
        let conn = warehouse.conn();
        insert_staging_song(
            conn,
            &NewStagingSong {
                song_id: Some("SNG1".to_string()),
                duration: Some("218.93179".parse().unwrap()),
                artist_latitude: Some("-41.28054".parse().unwrap()),
                ..Default::default()
            },
        )
        .unwrap();

        let songs = load_staging_songs(conn).unwrap();
        assert_eq!(songs[0].duration, Some("218.93179".parse().unwrap()));
        assert_eq!(songs[0].artist_latitude, Some("-41.28054".parse().unwrap()));
        assert_eq!(songs[0].artist_longitude, None);
    }

    #[test]
    fn test_integrity_violations_detected() {
        let mut warehouse = setup();
        let conn = warehouse.conn();
        insert_songplays(
            conn,
            &[Songplay {
                songplay_id: 0,
                start_timestamp: at(21, 1, 46),
                user_id: 7,
                level: "free".to_string(),
                song_id: "SNG1".to_string(),
                artist_id: "ART1".to_string(),
                session_id: 1,
                location: "Somewhere".to_string(),
                user_agent: "Agent".to_string(),
            }],
        )
        .unwrap();

        let violations = find_integrity_violations(conn).unwrap();
        assert_eq!(violations.len(), 4);
        assert!(violations.iter().all(|v| v.orphaned_rows == 1));

        insert_time(conn, &crate::transform::build_time(&[at(21, 1, 46)])).unwrap();
        let violations = find_integrity_violations(conn).unwrap();
        assert_eq!(violations.len(), 3);
        assert!(violations.iter().all(|v| v.column != "start_timestamp"));
    }

    #[test]
    fn test_songplay_timestamps_are_distinct() {
        let mut warehouse = setup();
        let conn = warehouse.conn();
        let play = |id: i64, ts: NaiveDateTime| Songplay {
            songplay_id: id,
            start_timestamp: ts,
            user_id: 1,
            level: "paid".to_string(),
            song_id: "S".to_string(),
            artist_id: "A".to_string(),
            session_id: 1,
            location: "L".to_string(),
            user_agent: "U".to_string(),
        };
        insert_songplays(
            conn,
            &[play(0, at(1, 0, 0)), play(1, at(1, 0, 0)), play(2, at(2, 0, 0))],
        )
        .unwrap();
        assert_eq!(
            songplay_timestamps(conn).unwrap(),
            vec![at(1, 0, 0), at(2, 0, 0)]
        );
    }
}
