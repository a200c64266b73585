//! Derivation of the star schema from the staging tables.
//!
//! Every builder is a pure function over staging rows; the pipeline loads the
//! inputs and writes the outputs.

pub mod dimensions;
pub mod facts;

use thiserror::Error;

pub use dimensions::{build_artists, build_songs, build_time, build_users};
pub use facts::{FactBuild, MAX_USER_AGENT_LEN, build_songplays};

/// Errors raised while deriving a warehouse table. Nothing of that table is committed.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransformError {
    #[error("{table}.{column} is required but missing for {key}")]
    MissingValue {
        table: &'static str,
        column: &'static str,
        key: String,
    },

    #[error("{table} has conflicting rows for key {key}")]
    DuplicateKey { table: &'static str, key: String },
}

/// Unwrap a value bound for a `NOT NULL` column.
pub(crate) fn required<T>(
    value: Option<T>,
    table: &'static str,
    column: &'static str,
    key: impl FnOnce() -> String,
) -> Result<T, TransformError> {
    value.ok_or_else(|| TransformError::MissingValue {
        table,
        column,
        key: key(),
    })
}
