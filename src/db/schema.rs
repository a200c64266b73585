//! Database schema definitions for Diesel.
//!
//! Column names and order must match the catalog in [`crate::db::ddl`].

diesel::table! {
    staging_events (event_id) {
        event_id -> BigInt,
        artist -> Nullable<Text>,
        auth -> Nullable<Text>,
        first_name -> Nullable<Text>,
        gender -> Nullable<Text>,
        item_in_session -> Nullable<BigInt>,
        last_name -> Nullable<Text>,
        length -> Nullable<Double>,
        level -> Nullable<Text>,
        location -> Nullable<Text>,
        method -> Nullable<Text>,
        page -> Nullable<Text>,
        registration -> Nullable<BigInt>,
        session_id -> Nullable<BigInt>,
        song -> Nullable<Text>,
        status -> Nullable<Integer>,
        ts -> Nullable<Timestamp>,
        user_agent -> Nullable<Text>,
        user_id -> Nullable<BigInt>,
    }
}

diesel::table! {
    staging_songs (staging_song_id) {
        staging_song_id -> BigInt,
        artist_id -> Nullable<Text>,
        artist_latitude -> Nullable<Double>,
        artist_longitude -> Nullable<Double>,
        artist_location -> Nullable<Text>,
        artist_name -> Nullable<Text>,
        song_id -> Nullable<Text>,
        title -> Nullable<Text>,
        duration -> Nullable<Double>,
        year -> Nullable<Integer>,
    }
}

diesel::table! {
    users (user_id) {
        user_id -> BigInt,
        first_name -> Text,
        last_name -> Text,
        gender -> Text,
        level -> Text,
    }
}

diesel::table! {
    artists (artist_id) {
        artist_id -> Text,
        name -> Text,
        location -> Nullable<Text>,
        latitude -> Nullable<Double>,
        longitude -> Nullable<Double>,
    }
}

diesel::table! {
    songs (song_id) {
        song_id -> Text,
        title -> Text,
        artist_id -> Text,
        year -> Integer,
        duration -> Double,
    }
}

diesel::table! {
    time (timestamp) {
        timestamp -> Timestamp,
        start_time -> Time,
        hour -> Integer,
        day -> Integer,
        week -> Integer,
        month -> Integer,
        year -> Integer,
        weekday -> Integer,
    }
}

diesel::table! {
    songplays (songplay_id) {
        songplay_id -> BigInt,
        start_timestamp -> Timestamp,
        user_id -> BigInt,
        level -> Text,
        song_id -> Text,
        artist_id -> Text,
        session_id -> BigInt,
        location -> Text,
        user_agent -> Text,
    }
}

// Define foreign key relationships
diesel::joinable!(songs -> artists (artist_id));
diesel::joinable!(songplays -> users (user_id));
diesel::joinable!(songplays -> songs (song_id));
diesel::joinable!(songplays -> time (start_timestamp));

diesel::allow_tables_to_appear_in_same_query!(
    users,
    artists,
    songs,
    time,
    songplays,
);
