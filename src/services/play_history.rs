//! Play-history collaborator
//!
//! The listening history is the authoritative record of plays. Per-track and
//! per-album counters are maintained from it by the catalog database, and the
//! affinity graph can always be rebuilt from it.
use std::sync::Arc;

use chrono::{DateTime, Utc};
use sqlx::{FromRow, PgPool};
use tokio::sync::RwLock;

use super::catalog::CatalogStore;
use crate::{
    error::{AppError, AppResult},
    models::{PlayRecord, TrackId, UserId},
};

#[async_trait::async_trait]
pub trait PlayHistoryStore: Send + Sync {
    /// Appends one play. Fails with `NotFound` when the track is unknown.
    async fn append_play(&self, record: &PlayRecord) -> AppResult<()>;

    /// Plays in insertion order, for replaying the log
    async fn plays_page(&self, offset: usize, limit: usize) -> AppResult<Vec<PlayRecord>>;
}

#[derive(FromRow)]
struct PlayRow {
    user_id: i64,
    track_id: i64,
    played_at: DateTime<Utc>,
    duration_played: i32,
    completed: bool,
}

impl From<PlayRow> for PlayRecord {
    fn from(row: PlayRow) -> Self {
        Self {
            user_id: UserId(row.user_id),
            track_id: TrackId(row.track_id),
            played_at: row.played_at,
            duration_played: row.duration_played,
            completed: row.completed,
        }
    }
}

/// History stored in the `listening_history` table
#[derive(Clone)]
pub struct PgPlayHistoryStore {
    pool: PgPool,
}

impl PgPlayHistoryStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait::async_trait]
impl PlayHistoryStore for PgPlayHistoryStore {
    async fn append_play(&self, record: &PlayRecord) -> AppResult<()> {
        let result = sqlx::query(
            r#"
            INSERT INTO listening_history (user_id, track_id, played_at, duration_played, completed)
            VALUES ($1, $2, $3, $4, $5)
            "#,
        )
        .bind(record.user_id.get())
        .bind(record.track_id.get())
        .bind(record.played_at)
        .bind(record.duration_played)
        .bind(record.completed)
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db)) if db.is_foreign_key_violation() => Err(
                AppError::NotFound(format!("Track {} not found", record.track_id)),
            ),
            Err(e) => Err(AppError::from(e)),
        }
    }

    async fn plays_page(&self, offset: usize, limit: usize) -> AppResult<Vec<PlayRecord>> {
        let rows = sqlx::query_as::<_, PlayRow>(
            r#"
            SELECT user_id, track_id, played_at, duration_played, completed
            FROM listening_history
            ORDER BY id
            LIMIT $1 OFFSET $2
            "#,
        )
        .bind(i64::try_from(limit).unwrap_or(i64::MAX))
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(PlayRecord::from).collect())
    }
}

/// In-process history for local runs and tests
///
/// Checks the catalog before appending, the way the database foreign key
/// rejects plays of unknown tracks.
pub struct MemoryPlayHistoryStore {
    catalog: Arc<dyn CatalogStore>,
    plays: RwLock<Vec<PlayRecord>>,
}

impl MemoryPlayHistoryStore {
    pub fn new(catalog: Arc<dyn CatalogStore>) -> Self {
        Self {
            catalog,
            plays: RwLock::new(Vec::new()),
        }
    }

    pub async fn len(&self) -> usize {
        self.plays.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.plays.read().await.is_empty()
    }
}

#[async_trait::async_trait]
impl PlayHistoryStore for MemoryPlayHistoryStore {
    async fn append_play(&self, record: &PlayRecord) -> AppResult<()> {
        if self.catalog.track_facts(record.track_id).await?.is_none() {
            return Err(AppError::NotFound(format!(
                "Track {} not found",
                record.track_id
            )));
        }

        self.plays.write().await.push(record.clone());
        Ok(())
    }

    async fn plays_page(&self, offset: usize, limit: usize) -> AppResult<Vec<PlayRecord>> {
        let plays = self.plays.read().await;
        Ok(plays.iter().skip(offset).take(limit).cloned().collect())
    }
}
