use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};

use super::{ArtistId, TrackId};

/// Display record for a track, as returned to clients after the catalog join
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct TrackRecord {
    pub id: TrackId,
    pub title: String,
    pub artist_id: ArtistId,
    pub artist_name: String,
    pub album_id: i64,
    pub album_name: String,
    /// Length in seconds
    pub duration: i32,
    pub genre: String,
    pub release_date: Option<NaiveDate>,
    pub file_url: String,
    pub cover_url: String,
    pub created_at: DateTime<Utc>,
}

impl TrackRecord {
    pub fn facts(&self) -> TrackFacts {
        TrackFacts {
            id: self.id,
            artist_id: self.artist_id,
            genre: self.genre.clone(),
            duration: self.duration,
        }
    }
}

/// The slice of catalog data the affinity graph needs about a track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackFacts {
    pub id: TrackId,
    pub artist_id: ArtistId,
    pub genre: String,
    pub duration: i32,
}
