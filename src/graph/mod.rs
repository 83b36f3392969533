//! Affinity graph store
//!
//! The graph holds `User`, `Track`, `Artist` and `Genre` nodes and the weighted
//! edges between them:
//!
//! - `PLAYED(User→Track)` with `count` and `last_played`
//! - `LIKES_ARTIST(User→Artist)` and `LIKES_GENRE(User→Genre)` with `count`
//! - `BY_ARTIST(Track→Artist)` and `HAS_GENRE(Track→Genre)`, written once
//!
//! Nodes and edges are created lazily by [`GraphStore::record_play`]. Reads are
//! small traversal and aggregation primitives that the recommendation engine
//! composes; every primitive returns a typed row.
use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{
    error::AppResult,
    models::{normalize_genre, ArtistId, TrackFacts, TrackId, UserId},
};

pub mod memory;
pub mod postgres;

pub use memory::MemoryGraphStore;
pub use postgres::PgGraphStore;

/// One play, resolved to everything the graph needs to upsert
#[derive(Debug, Clone, PartialEq)]
pub struct GraphPlay {
    pub user_id: UserId,
    pub track_id: TrackId,
    pub artist_id: ArtistId,
    /// `None` skips the genre node and both genre edges
    pub genre: Option<String>,
    pub played_at: DateTime<Utc>,
}

impl GraphPlay {
    pub fn new(user_id: UserId, facts: &TrackFacts, played_at: DateTime<Utc>) -> Self {
        Self {
            user_id,
            track_id: facts.id,
            artist_id: facts.artist_id,
            genre: normalize_genre(&facts.genre),
            played_at,
        }
    }
}

/// `PLAYED` edge
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PlayedEdge {
    pub user_id: UserId,
    pub track_id: TrackId,
    pub count: i64,
    pub last_played: DateTime<Utc>,
}

/// `LIKES_ARTIST` edge seen from the user
#[derive(Debug, Clone, PartialEq)]
pub struct ArtistAffinity {
    pub artist_id: ArtistId,
    pub count: i64,
}

/// `LIKES_GENRE` edge seen from the user
#[derive(Debug, Clone, PartialEq)]
pub struct GenreAffinity {
    pub genre: String,
    pub count: i64,
}

/// Structural edges of a single track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackLinks {
    pub track_id: TrackId,
    pub artist_id: Option<ArtistId>,
    pub genre: Option<String>,
}

/// Sum of `PLAYED.count` for one track
#[derive(Debug, Clone, PartialEq)]
pub struct TrackTotal {
    pub track_id: TrackId,
    pub total: i64,
}

/// Node and edge counts
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct GraphSummary {
    pub users: i64,
    pub tracks: i64,
    pub artists: i64,
    pub genres: i64,
    pub played_edges: i64,
    pub artist_affinity_edges: i64,
    pub genre_affinity_edges: i64,
}

/// Storage backend for the affinity graph
///
/// Only this trait mutates node and edge state. `record_play` must behave as a
/// single transaction: concurrent plays of the same (user, track) never lose an
/// increment and `last_played` never moves backwards.
///
/// Every capped read returns at most `cap` rows in a fixed order, so traversal
/// is deterministic. Track expansions put the most-listened tracks first, so a
/// cap drops the least popular neighbours.
#[cfg_attr(test, mockall::automock)]
#[async_trait::async_trait]
pub trait GraphStore: Send + Sync {
    /// Merge-creates nodes and structural edges, then upserts `PLAYED`,
    /// `LIKES_ARTIST` and `LIKES_GENRE`
    async fn record_play(&self, play: &GraphPlay) -> AppResult<()>;

    /// The user's `LIKES_ARTIST` edges, count desc then artist asc
    async fn artist_affinities(&self, user_id: UserId, cap: usize)
        -> AppResult<Vec<ArtistAffinity>>;

    /// The user's `LIKES_GENRE` edges, count desc then genre asc
    async fn genre_affinities(&self, user_id: UserId, cap: usize)
        -> AppResult<Vec<GenreAffinity>>;

    /// Tracks with `BY_ARTIST` pointing at the artist, distinct listeners desc
    /// then track asc
    async fn tracks_by_artist(&self, artist_id: ArtistId, cap: usize) -> AppResult<Vec<TrackId>>;

    /// Tracks with `HAS_GENRE` pointing at the genre, distinct listeners desc
    /// then track asc
    async fn tracks_in_genre(&self, genre: &str, cap: usize) -> AppResult<Vec<TrackId>>;

    /// `None` when the track node does not exist
    async fn track_links(&self, track_id: TrackId) -> AppResult<Option<TrackLinks>>;

    /// `BY_ARTIST` targets for a set of tracks
    async fn artists_of(&self, track_ids: &[TrackId]) -> AppResult<HashMap<TrackId, ArtistId>>;

    /// The user's `PLAYED.count` for each of the given tracks they have played
    async fn play_counts(
        &self,
        user_id: UserId,
        track_ids: &[TrackId],
    ) -> AppResult<HashMap<TrackId, i64>>;

    async fn played_edge(&self, user_id: UserId, track_id: TrackId)
        -> AppResult<Option<PlayedEdge>>;

    /// Users with a `PLAYED` edge to the track, user asc
    async fn listeners(&self, track_id: TrackId, cap: usize) -> AppResult<Vec<UserId>>;

    /// Distinct tracks played by any of the users, most of those users first
    /// then track asc
    async fn tracks_played_by_any(&self, user_ids: &[UserId], cap: usize)
        -> AppResult<Vec<TrackId>>;

    /// Distinct listener count per track, optionally not counting one user.
    /// Tracks nobody played are absent from the map.
    async fn distinct_listener_counts(
        &self,
        track_ids: &[TrackId],
        excluding: Option<UserId>,
    ) -> AppResult<HashMap<TrackId, i64>>;

    /// Sum of `PLAYED.count` per track over edges with `last_played >= since`,
    /// total desc then track asc
    async fn play_totals_since(&self, since: DateTime<Utc>, cap: usize)
        -> AppResult<Vec<TrackTotal>>;

    async fn summary(&self) -> AppResult<GraphSummary>;

    /// Removes every node and edge. Only the reconciliation job calls this.
    async fn reset(&self) -> AppResult<()>;
}
