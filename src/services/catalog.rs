//! Catalog collaborator
//!
//! The catalog owns track, artist and album metadata. This service reads it for
//! three things: resolving a played track to its artist and genre, joining
//! ranked track ids to display records, and the recency ranking used as the
//! popularity fallback.
use std::collections::{BTreeMap, HashMap};

use chrono::{DateTime, NaiveDate, Utc};
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;

use crate::{
    error::AppResult,
    models::{ArtistId, TrackFacts, TrackId, TrackRecord},
};

#[async_trait::async_trait]
pub trait CatalogStore: Send + Sync {
    /// Artist, genre and duration of a track, `None` if the catalog has no such track
    async fn track_facts(&self, track_id: TrackId) -> AppResult<Option<TrackFacts>>;

    /// Display records in the order of `track_ids`. Unknown ids are left out.
    async fn lookup_tracks_by_id(&self, track_ids: &[TrackId]) -> AppResult<Vec<TrackRecord>>;

    /// Newest tracks first (`created_at` desc, then id desc)
    async fn recent_track_ids(&self, limit: usize) -> AppResult<Vec<TrackId>>;
}

/// Re-orders fetched records to follow `track_ids`, dropping ids with no record
pub fn order_by_ids(track_ids: &[TrackId], records: Vec<TrackRecord>) -> Vec<TrackRecord> {
    let mut by_id: HashMap<TrackId, TrackRecord> =
        records.into_iter().map(|r| (r.id, r)).collect();

    track_ids
        .iter()
        .filter_map(|id| by_id.remove(id))
        .collect()
}

#[derive(FromRow)]
struct TrackRow {
    id: i64,
    title: String,
    artist_id: i64,
    artist_name: String,
    album_id: i64,
    album_name: String,
    duration: i32,
    genre: String,
    release_date: Option<NaiveDate>,
    file_url: String,
    cover_url: String,
    created_at: DateTime<Utc>,
}

impl From<TrackRow> for TrackRecord {
    fn from(row: TrackRow) -> Self {
        Self {
            id: TrackId(row.id),
            title: row.title,
            artist_id: ArtistId(row.artist_id),
            artist_name: row.artist_name,
            album_id: row.album_id,
            album_name: row.album_name,
            duration: row.duration,
            genre: row.genre,
            release_date: row.release_date,
            file_url: row.file_url,
            cover_url: row.cover_url,
            created_at: row.created_at,
        }
    }
}

#[derive(FromRow)]
struct TrackFactsRow {
    id: i64,
    artist_id: i64,
    genre: String,
    duration: i32,
}

/// Catalog backed by the `tracks`, `artists` and `albums` tables
#[derive(Clone)]
pub struct PgCatalogStore {
    pool: PgPool,
}

impl PgCatalogStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl CatalogStore for PgCatalogStore {
    async fn track_facts(&self, track_id: TrackId) -> AppResult<Option<TrackFacts>> {
        let row = sqlx::query_as::<_, TrackFactsRow>(
            "SELECT id, artist_id, COALESCE(genre, '') AS genre, duration FROM tracks WHERE id = $1",
        )
        .bind(track_id.get())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|row| TrackFacts {
            id: TrackId(row.id),
            artist_id: ArtistId(row.artist_id),
            genre: row.genre,
            duration: row.duration,
        }))
    }

    async fn lookup_tracks_by_id(&self, track_ids: &[TrackId]) -> AppResult<Vec<TrackRecord>> {
        if track_ids.is_empty() {
            return Ok(Vec::new());
        }

        let ids: Vec<i64> = track_ids.iter().map(|id| id.get()).collect();
        let rows = sqlx::query_as::<_, TrackRow>(
            r#"
            SELECT t.id, t.title, t.artist_id, a.name AS artist_name,
                   t.album_id, al.title AS album_name, t.duration,
                   COALESCE(t.genre, '') AS genre, t.release_date,
                   COALESCE(t.file_url, '') AS file_url,
                   COALESCE(t.cover_url, '') AS cover_url, t.created_at
            FROM tracks t
            JOIN artists a ON t.artist_id = a.id
            JOIN albums al ON t.album_id = al.id
            WHERE t.id = ANY($1)
            "#,
        )
        .bind(ids)
        .fetch_all(&self.pool)
        .await?;

        let records = rows.into_iter().map(TrackRecord::from).collect();
        Ok(order_by_ids(track_ids, records))
    }

    async fn recent_track_ids(&self, limit: usize) -> AppResult<Vec<TrackId>> {
        let rows: Vec<(i64,)> =
            sqlx::query_as("SELECT id FROM tracks ORDER BY created_at DESC, id DESC LIMIT $1")
                .bind(i64::try_from(limit).unwrap_or(i64::MAX))
                .fetch_all(&self.pool)
                .await?;

        Ok(rows.into_iter().map(|(id,)| TrackId(id)).collect())
    }
}

/// In-process catalog for local runs and tests
#[derive(Default)]
pub struct MemoryCatalogStore {
    tracks: RwLock<BTreeMap<TrackId, TrackRecord>>,
}

impl MemoryCatalogStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn insert(&self, record: TrackRecord) {
        self.tracks.write().await.insert(record.id, record);
    }

    /// Builds a catalog from a JSON array of track records
    pub async fn from_json_file(path: &str) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path).await?;
        let records: Vec<TrackRecord> = serde_json::from_str(&raw)
            .map_err(|e| anyhow::anyhow!("Invalid catalog seed {}: {}", path, e))?;

        let tracks = records.into_iter().map(|r| (r.id, r)).collect();
        tracing::info!(path = %path, "Loaded catalog seed");

        Ok(Self {
            tracks: RwLock::new(tracks),
        })
    }
}

#[async_trait::async_trait]
impl CatalogStore for MemoryCatalogStore {
    async fn track_facts(&self, track_id: TrackId) -> AppResult<Option<TrackFacts>> {
        Ok(self.tracks.read().await.get(&track_id).map(TrackRecord::facts))
    }

    async fn lookup_tracks_by_id(&self, track_ids: &[TrackId]) -> AppResult<Vec<TrackRecord>> {
        let tracks = self.tracks.read().await;
        let records = track_ids
            .iter()
            .filter_map(|id| tracks.get(id).cloned())
            .collect();
        Ok(order_by_ids(track_ids, records))
    }

    async fn recent_track_ids(&self, limit: usize) -> AppResult<Vec<TrackId>> {
        let tracks = self.tracks.read().await;
        let mut records: Vec<&TrackRecord> = tracks.values().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at).then(b.id.cmp(&a.id)));

        Ok(records.into_iter().take(limit).map(|r| r.id).collect())
    }
}
