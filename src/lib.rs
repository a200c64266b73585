//! Star-schema warehouse loader for song play analytics.
//!
//! Event logs and a song catalog are bulk-copied into staging tables, then
//! reshaped into `users`, `songs`, `artists`, `time` and the `songplays` fact.

pub mod config;
pub mod db;
pub mod models;
pub mod pipeline;
pub mod staging;
pub mod transform;
