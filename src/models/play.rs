use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::{TrackId, UserId};

/// One entry of the append-only listening history
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayRecord {
    pub user_id: UserId,
    pub track_id: TrackId,
    pub played_at: DateTime<Utc>,
    /// Seconds actually listened
    pub duration_played: i32,
    pub completed: bool,
}

/// Optional body of a "track played" call
#[derive(Debug, Default, Deserialize)]
pub struct PlayRequest {
    pub duration_played: Option<i32>,
    pub completed: Option<bool>,
}
