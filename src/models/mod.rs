//! Staging and warehouse row models.

pub mod decimal;
pub mod staging;
pub mod warehouse;

pub use decimal::Decimal;
pub use staging::{NEXT_SONG_PAGE, NewStagingEvent, NewStagingSong, StagingEvent, StagingSong};
pub use warehouse::{Artist, Song, Songplay, TimeRow, User};
