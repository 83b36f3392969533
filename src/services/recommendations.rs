use std::{
    collections::{HashMap, HashSet},
    future::Future,
    sync::Arc,
    time::Duration,
};

use chrono::{DateTime, Utc};

use super::catalog::CatalogStore;
use crate::{
    cached,
    config::Config,
    db::{Cache, CacheKey},
    error::{AppError, AppResult},
    graph::GraphStore,
    models::{Ranked, RankingSource, TrackId, UserId},
};

/// Tracks a user has played this many times are left out of personalized and
/// per-genre candidates
pub const SATURATION_THRESHOLD: i64 = 3;

/// Trailing window for trending plays
pub const TRENDING_WINDOW_DAYS: i64 = 7;

const TRENDING_CACHE_TTL: u64 = 60;
const SIMILAR_CACHE_TTL: u64 = 300;

const PERSONALIZED_REASON: &str = "Based on your listening history and preferences";
const SIMILAR_REASON: &str = "Tracks similar to what you're listening to";
const TRENDING_REASON: &str = "Trending this week";

/// Bounds applied to every query
#[derive(Debug, Clone)]
pub struct QueryLimits {
    pub max_fanout: usize,
    pub max_candidates: usize,
    pub max_limit: usize,
    pub timeout: Duration,
}

impl Default for QueryLimits {
    fn default() -> Self {
        Self {
            max_fanout: 500,
            max_candidates: 2000,
            max_limit: 100,
            timeout: Duration::from_secs(2),
        }
    }
}

impl From<&Config> for QueryLimits {
    fn from(config: &Config) -> Self {
        Self {
            max_fanout: config.max_fanout,
            max_candidates: config.max_candidates,
            max_limit: config.max_limit,
            timeout: Duration::from_millis(config.query_timeout_ms),
        }
    }
}

/// Ranked retrieval over the affinity graph
///
/// All four modes are read-only. Personalized and trending fall back to the
/// catalog's recency ranking when the graph has nothing for them or cannot be
/// read; similar and by-genre report the store error instead.
pub struct RecommendationService {
    graph: Arc<dyn GraphStore>,
    catalog: Arc<dyn CatalogStore>,
    cache: Option<Cache>,
    limits: QueryLimits,
}

impl RecommendationService {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        catalog: Arc<dyn CatalogStore>,
        cache: Option<Cache>,
        limits: QueryLimits,
    ) -> Self {
        Self {
            graph,
            catalog,
            cache,
            limits,
        }
    }

    /// Tracks by artists and genres the user listens to, excluding saturated ones
    #[tracing::instrument(skip(self))]
    pub async fn personalized(&self, user_id: i64, limit: usize) -> AppResult<Ranked> {
        let user_id = UserId::new(user_id)?;
        let limit = self.check_limit(limit)?;

        match self
            .bounded(self.score_personalized(user_id, limit))
            .await
        {
            Ok(ids) if !ids.is_empty() => Ok(Ranked::graph(ids, PERSONALIZED_REASON)),
            Ok(_) => {
                tracing::debug!(user_id = %user_id, "No graph signal for user, using fallback");
                self.fallback(limit, PERSONALIZED_REASON).await
            }
            Err(e) => {
                tracing::warn!(error = %e, user_id = %user_id, "Personalized query failed, using fallback");
                self.fallback(limit, PERSONALIZED_REASON).await
            }
        }
    }

    /// Tracks sharing the artist, the genre or listeners with `track_id`
    #[tracing::instrument(skip(self))]
    pub async fn similar(&self, track_id: i64, limit: usize) -> AppResult<Ranked> {
        let track_id = TrackId::new(track_id)?;
        let limit = self.check_limit(limit)?;

        cached!(
            self.cache,
            CacheKey::Similar { track_id, limit },
            SIMILAR_CACHE_TTL,
            async {
                self.bounded(self.score_similar(track_id, limit))
                    .await
                    .map(|ids| Ranked::graph(ids, SIMILAR_REASON))
            }
        )
    }

    /// Tracks with the most plays inside the trailing window
    #[tracing::instrument(skip(self))]
    pub async fn trending(&self, limit: usize) -> AppResult<Ranked> {
        let limit = self.check_limit(limit)?;

        cached!(
            self.cache,
            CacheKey::Trending { limit },
            TRENDING_CACHE_TTL,
            self.trending_at(Utc::now(), limit),
            if is_graph_ranking
        )
    }

    /// Trending as seen at `now`
    pub async fn trending_at(&self, now: DateTime<Utc>, limit: usize) -> AppResult<Ranked> {
        let since = now - chrono::Duration::days(TRENDING_WINDOW_DAYS);

        match self
            .bounded(self.graph.play_totals_since(since, limit))
            .await
        {
            Ok(totals) if !totals.is_empty() => Ok(Ranked::graph(
                totals.into_iter().map(|t| t.track_id).collect(),
                TRENDING_REASON,
            )),
            Ok(_) => {
                tracing::debug!("No plays in trending window, using fallback");
                self.fallback(limit, TRENDING_REASON).await
            }
            Err(e) => {
                tracing::warn!(error = %e, "Trending query failed, using fallback");
                self.fallback(limit, TRENDING_REASON).await
            }
        }
    }

    /// Most-listened tracks of a genre, optionally without the user's saturated tracks
    #[tracing::instrument(skip(self))]
    pub async fn by_genre(
        &self,
        genre: &str,
        limit: usize,
        user_id: Option<i64>,
    ) -> AppResult<Ranked> {
        let genre = genre.trim();
        if genre.is_empty() {
            return Err(AppError::InvalidInput("Genre cannot be empty".to_string()));
        }
        let user_id = user_id.map(UserId::new).transpose()?;
        let limit = self.check_limit(limit)?;

        let ids = self
            .bounded(self.score_by_genre(genre, user_id, limit))
            .await?;

        Ok(Ranked::graph(ids, format!("Popular tracks in {}", genre)))
    }

    async fn score_personalized(&self, user_id: UserId, limit: usize) -> AppResult<Vec<TrackId>> {
        let fanout = self.limits.max_fanout;
        let artists = self.graph.artist_affinities(user_id, fanout).await?;
        let genres = self.graph.genre_affinities(user_id, fanout).await?;

        let mut candidates = Candidates::new(self.limits.max_candidates);

        for affinity in &artists {
            if candidates.is_full() {
                break;
            }
            let tracks = self.graph.tracks_by_artist(affinity.artist_id, fanout).await?;
            candidates.extend(tracks);
        }

        for affinity in &genres {
            if candidates.is_full() {
                break;
            }
            let tracks = self.graph.tracks_in_genre(&affinity.genre, fanout).await?;
            candidates.extend(tracks);
        }

        let mut candidates = candidates.into_vec();
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let play_counts = self.graph.play_counts(user_id, &candidates).await?;
        candidates.retain(|track| {
            play_counts.get(track).copied().unwrap_or(0) < SATURATION_THRESHOLD
        });
        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let affinity_by_artist: HashMap<_, _> =
            artists.iter().map(|a| (a.artist_id, a.count)).collect();
        let track_artists = self.graph.artists_of(&candidates).await?;
        let popularity = self
            .graph
            .distinct_listener_counts(&candidates, Some(user_id))
            .await?;

        let scored = candidates
            .into_iter()
            .map(|track| {
                let popularity = popularity.get(&track).copied().unwrap_or(0);
                let affinity = track_artists
                    .get(&track)
                    .and_then(|artist| affinity_by_artist.get(artist))
                    .copied()
                    .unwrap_or(0);
                (track, 0.5 * popularity as f64 + 0.5 * affinity as f64)
            })
            .collect();

        Ok(rank(scored, limit))
    }

    async fn score_similar(&self, track_id: TrackId, limit: usize) -> AppResult<Vec<TrackId>> {
        let fanout = self.limits.max_fanout;
        let links = self.graph.track_links(track_id).await?;

        let mut signals: Vec<Vec<TrackId>> = Vec::with_capacity(3);

        if let Some(links) = &links {
            if let Some(artist_id) = links.artist_id {
                signals.push(self.graph.tracks_by_artist(artist_id, fanout).await?);
            }
            if let Some(genre) = &links.genre {
                signals.push(self.graph.tracks_in_genre(genre, fanout).await?);
            }
        }

        let listeners = self.graph.listeners(track_id, fanout).await?;
        signals.push(self.graph.tracks_played_by_any(&listeners, fanout).await?);

        // Each signal nominates a track at most once
        let mut order: Vec<TrackId> = Vec::new();
        let mut votes: HashMap<TrackId, u32> = HashMap::new();
        for signal in signals {
            let mut seen = HashSet::new();
            for track in signal {
                if track == track_id || !seen.insert(track) {
                    continue;
                }
                let count = votes.entry(track).or_insert(0);
                if *count == 0 {
                    order.push(track);
                }
                *count += 1;
            }
        }

        let scored = order
            .into_iter()
            .map(|track| (track, votes[&track] as f64))
            .collect();

        Ok(rank(scored, limit))
    }

    async fn score_by_genre(
        &self,
        genre: &str,
        user_id: Option<UserId>,
        limit: usize,
    ) -> AppResult<Vec<TrackId>> {
        let mut candidates = self
            .graph
            .tracks_in_genre(genre, self.limits.max_fanout)
            .await?;

        if let Some(user_id) = user_id {
            let play_counts = self.graph.play_counts(user_id, &candidates).await?;
            candidates.retain(|track| {
                play_counts.get(track).copied().unwrap_or(0) < SATURATION_THRESHOLD
            });
        }

        if candidates.is_empty() {
            return Ok(Vec::new());
        }

        let popularity = self
            .graph
            .distinct_listener_counts(&candidates, None)
            .await?;

        let scored = candidates
            .into_iter()
            .map(|track| (track, popularity.get(&track).copied().unwrap_or(0) as f64))
            .collect();

        Ok(rank(scored, limit))
    }

    /// Global popularity ranking, approximated by catalog recency
    async fn fallback(&self, limit: usize, reason: &str) -> AppResult<Ranked> {
        let ids = self.catalog.recent_track_ids(limit).await?;
        Ok(Ranked::fallback(ids, reason))
    }

    async fn bounded<T>(&self, query: impl Future<Output = AppResult<T>>) -> AppResult<T> {
        tokio::time::timeout(self.limits.timeout, query)
            .await
            .map_err(|_| {
                AppError::unavailable(format!(
                    "query exceeded {}ms",
                    self.limits.timeout.as_millis()
                ))
            })?
    }

    fn check_limit(&self, limit: usize) -> AppResult<usize> {
        if limit == 0 {
            return Err(AppError::InvalidInput(
                "limit must be at least 1".to_string(),
            ));
        }
        Ok(limit.min(self.limits.max_limit))
    }
}

/// Fallback rankings stay out of the cache so a recovered graph is used at once
fn is_graph_ranking(ranked: &Ranked) -> bool {
    ranked.source == RankingSource::Graph
}

/// Ordered, de-duplicated candidate set with a size cap
struct Candidates {
    order: Vec<TrackId>,
    seen: HashSet<TrackId>,
    cap: usize,
}

impl Candidates {
    fn new(cap: usize) -> Self {
        Self {
            order: Vec::new(),
            seen: HashSet::new(),
            cap,
        }
    }

    fn is_full(&self) -> bool {
        self.order.len() >= self.cap
    }

    fn extend(&mut self, tracks: Vec<TrackId>) {
        for track in tracks {
            if self.is_full() {
                return;
            }
            if self.seen.insert(track) {
                self.order.push(track);
            }
        }
    }

    fn into_vec(self) -> Vec<TrackId> {
        self.order
    }
}

/// Sorts by score descending, keeping traversal order for ties, and truncates
fn rank(mut scored: Vec<(TrackId, f64)>, limit: usize) -> Vec<TrackId> {
    scored.sort_by(|a, b| b.1.total_cmp(&a.1));
    scored.truncate(limit);
    scored.into_iter().map(|(track, _)| track).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        graph::{GraphPlay, MemoryGraphStore, MockGraphStore},
        models::ArtistId,
        services::catalog::{tests::track, MemoryCatalogStore},
    };
    use chrono::Duration as ChronoDuration;

    fn play(user: i64, track: i64, artist: i64, genre: &str, at: DateTime<Utc>) -> GraphPlay {
        GraphPlay {
            user_id: UserId(user),
            track_id: TrackId(track),
            artist_id: ArtistId(artist),
            genre: crate::models::normalize_genre(genre),
            played_at: at,
        }
    }

    async fn record(store: &MemoryGraphStore, plays: &[(i64, i64, i64, &str)]) {
        let now = Utc::now();
        for (user, track, artist, genre) in plays {
            store
                .record_play(&play(*user, *track, *artist, genre, now))
                .await
                .unwrap();
        }
    }

    async fn catalog(ids: &[i64]) -> Arc<MemoryCatalogStore> {
        let catalog = Arc::new(MemoryCatalogStore::new());
        for id in ids {
            catalog.insert(track(*id, 1, "rock")).await;
        }
        catalog
    }

    fn service(graph: Arc<dyn GraphStore>, catalog: Arc<MemoryCatalogStore>) -> RecommendationService {
        RecommendationService::new(graph, catalog, None, QueryLimits::default())
    }

    fn ids(ranked: &Ranked) -> Vec<i64> {
        ranked.track_ids.iter().map(|t| t.get()).collect()
    }

    #[test]
    fn test_rank_is_stable_for_ties() {
        let scored = vec![
            (TrackId(3), 1.0),
            (TrackId(1), 2.0),
            (TrackId(2), 1.0),
            (TrackId(4), 2.0),
        ];
        assert_eq!(
            rank(scored, 3),
            vec![TrackId(1), TrackId(4), TrackId(3)]
        );
    }

    #[test]
    fn test_only_graph_rankings_are_cached() {
        assert!(is_graph_ranking(&Ranked::graph(vec![TrackId(1)], TRENDING_REASON)));
        assert!(!is_graph_ranking(&Ranked::fallback(
            vec![TrackId(1)],
            TRENDING_REASON
        )));
    }

    /// Needs a Redis server (`REDIS_URL`, default localhost)
    #[tokio::test]
    #[ignore]
    async fn test_trending_fallback_is_not_cached() {
        let redis_url =
            std::env::var("REDIS_URL").unwrap_or_else(|_| "redis://localhost:6379".to_string());
        let client = crate::db::create_redis_client(&redis_url).unwrap();
        let (cache, writer) = Cache::new(client.clone()).await;

        let key = CacheKey::Trending { limit: 97 };
        let mut conn = client.get_multiplexed_async_connection().await.unwrap();
        let _: () = redis::AsyncCommands::del(&mut conn, format!("{}", key))
            .await
            .unwrap();

        let graph = Arc::new(MemoryGraphStore::new());
        let service = RecommendationService::new(
            graph.clone(),
            catalog(&[1, 2]).await,
            Some(cache.clone()),
            QueryLimits::default(),
        );

        let ranked = service.trending(97).await.unwrap();
        assert_eq!(ranked.source, RankingSource::Fallback);
        writer.shutdown().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stored: Option<Ranked> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(stored, None);

        // Once the graph has plays, the next miss is cached
        graph
            .record_play(&play(1, 2, 1, "rock", Utc::now()))
            .await
            .unwrap();
        let (cache, writer) = Cache::new(client).await;
        let service = RecommendationService::new(
            graph,
            catalog(&[1, 2]).await,
            Some(cache.clone()),
            QueryLimits::default(),
        );

        let ranked = service.trending(97).await.unwrap();
        assert_eq!(ranked.source, RankingSource::Graph);
        writer.shutdown().await;
        tokio::time::sleep(Duration::from_millis(50)).await;
        let stored: Option<Ranked> = cache.get_from_cache(&key).await.unwrap();
        assert_eq!(stored, Some(ranked));

        let _: () = redis::AsyncCommands::del(&mut conn, format!("{}", key))
            .await
            .unwrap();
    }

    #[test]
    fn test_candidates_dedupe_and_cap() {
        let mut candidates = Candidates::new(3);
        candidates.extend(vec![TrackId(5), TrackId(2), TrackId(5)]);
        candidates.extend(vec![TrackId(2), TrackId(9), TrackId(1)]);

        assert!(candidates.is_full());
        assert_eq!(
            candidates.into_vec(),
            vec![TrackId(5), TrackId(2), TrackId(9)]
        );
    }

    #[tokio::test]
    async fn test_similar_counts_signals() {
        let graph = Arc::new(MemoryGraphStore::new());
        // 7 shares artist 1 with {3, 8} and genre "rock" with {8, 11};
        // user 100 played 7, 3, 8 and 15
        record(
            &graph,
            &[
                (100, 7, 1, "rock"),
                (100, 3, 1, "jazz"),
                (100, 8, 1, "rock"),
                (100, 15, 2, "pop"),
                (200, 11, 3, "rock"),
            ],
        )
        .await;

        let service = service(graph, catalog(&[]).await);
        let ranked = service.similar(7, 10).await.unwrap();

        assert_eq!(ids(&ranked), vec![8, 3, 11, 15]);
        assert_eq!(ranked.source, RankingSource::Graph);
        assert_eq!(ranked.reason, SIMILAR_REASON);
    }

    #[tokio::test]
    async fn test_similar_unknown_track_is_empty() {
        let graph = Arc::new(MemoryGraphStore::new());
        let service = service(graph, catalog(&[1, 2]).await);

        let ranked = service.similar(42, 10).await.unwrap();
        assert!(ranked.track_ids.is_empty());
    }

    #[tokio::test]
    async fn test_similar_truncates_to_limit() {
        let graph = Arc::new(MemoryGraphStore::new());
        record(
            &graph,
            &[
                (1, 7, 1, "rock"),
                (1, 3, 1, "rock"),
                (1, 8, 1, "rock"),
                (2, 9, 1, "rock"),
            ],
        )
        .await;

        let service = service(graph, catalog(&[]).await);
        let ranked = service.similar(7, 2).await.unwrap();
        assert_eq!(ids(&ranked), vec![3, 8]);
    }

    #[tokio::test]
    async fn test_personalized_excludes_saturated_tracks() {
        let graph = Arc::new(MemoryGraphStore::new());
        record(
            &graph,
            &[
                (1, 10, 1, "rock"),
                (1, 10, 1, "rock"),
                (1, 10, 1, "rock"),
                (1, 12, 1, "rock"),
                (1, 12, 1, "rock"),
                (2, 11, 1, "rock"),
            ],
        )
        .await;

        let service = service(graph, catalog(&[10, 11, 12]).await);
        let ranked = service.personalized(1, 10).await.unwrap();

        assert_eq!(ranked.source, RankingSource::Graph);
        assert!(!ranked.track_ids.contains(&TrackId(10)));
        assert!(ranked.track_ids.contains(&TrackId(12)));
        assert!(ranked.track_ids.contains(&TrackId(11)));
    }

    #[tokio::test]
    async fn test_personalized_scores_popularity_and_artist_affinity() {
        let graph = Arc::new(MemoryGraphStore::new());
        record(
            &graph,
            &[
                // user 1: artist 1 x2, artist 2 x1, all rock
                (1, 10, 1, "rock"),
                (1, 10, 1, "rock"),
                (1, 20, 2, "rock"),
                // other listeners
                (2, 11, 1, "rock"),
                (2, 21, 2, "rock"),
                (3, 21, 2, "rock"),
                (4, 21, 2, "rock"),
                (5, 30, 3, "rock"),
            ],
        )
        .await;

        let service = service(graph, catalog(&[]).await);
        let ranked = service.personalized(1, 10).await.unwrap();

        // 21: 0.5*3 + 0.5*1 = 2.0
        // 11: 0.5*1 + 0.5*2 = 1.5
        // 10: 0.5*0 + 0.5*2 = 1.0
        // 20: 0.5*0 + 0.5*1 = 0.5
        // 30: 0.5*1 + 0.5*0 = 0.5 (genre path only, after 20)
        assert_eq!(ids(&ranked), vec![21, 11, 10, 20, 30]);
    }

    #[tokio::test]
    async fn test_personalized_all_saturated_uses_fallback() {
        let graph = Arc::new(MemoryGraphStore::new());
        record(
            &graph,
            &[(1, 10, 1, "rock"), (1, 10, 1, "rock"), (1, 10, 1, "rock")],
        )
        .await;

        let service = service(graph, catalog(&[10, 11, 12]).await);
        let ranked = service.personalized(1, 2).await.unwrap();

        assert_eq!(ranked.source, RankingSource::Fallback);
        assert_eq!(ids(&ranked), vec![12, 11]);
    }

    #[tokio::test]
    async fn test_fallbacks_match_for_empty_graph() {
        let graph = Arc::new(MemoryGraphStore::new());
        let service = service(graph, catalog(&[4, 8, 15, 16]).await);

        let personalized = service.personalized(1, 3).await.unwrap();
        let trending = service.trending(3).await.unwrap();

        assert_eq!(personalized.source, RankingSource::Fallback);
        assert_eq!(trending.source, RankingSource::Fallback);
        assert_eq!(personalized.track_ids, trending.track_ids);
        assert_eq!(ids(&personalized), vec![16, 15, 8]);
    }

    #[tokio::test]
    async fn test_fallback_on_empty_catalog_is_empty() {
        let graph = Arc::new(MemoryGraphStore::new());
        let service = service(graph, catalog(&[]).await);

        let ranked = service.personalized(1, 5).await.unwrap();
        assert!(ranked.track_ids.is_empty());
        assert_eq!(ranked.source, RankingSource::Fallback);
    }

    #[tokio::test]
    async fn test_trending_sums_recent_plays() {
        let graph = Arc::new(MemoryGraphStore::new());
        let now = Utc::now();
        let plays = [
            play(1, 10, 1, "rock", now),
            play(2, 10, 1, "rock", now),
            play(1, 11, 1, "rock", now),
            play(1, 11, 1, "rock", now),
            play(3, 11, 1, "rock", now),
            play(4, 12, 1, "rock", now - ChronoDuration::days(8)),
            play(4, 12, 1, "rock", now - ChronoDuration::days(8)),
            play(4, 12, 1, "rock", now - ChronoDuration::days(8)),
            play(4, 12, 1, "rock", now - ChronoDuration::days(8)),
        ];
        for p in &plays {
            graph.record_play(p).await.unwrap();
        }

        let service = service(graph, catalog(&[]).await);
        let ranked = service.trending_at(now, 10).await.unwrap();

        assert_eq!(ranked.source, RankingSource::Graph);
        assert_eq!(ranked.reason, TRENDING_REASON);
        assert_eq!(ids(&ranked), vec![11, 10]);
    }

    #[tokio::test]
    async fn test_trending_stale_window_uses_fallback() {
        let graph = Arc::new(MemoryGraphStore::new());
        let now = Utc::now();
        graph
            .record_play(&play(1, 10, 1, "rock", now - ChronoDuration::days(30)))
            .await
            .unwrap();

        let service = service(graph, catalog(&[1, 2]).await);
        let ranked = service.trending_at(now, 10).await.unwrap();

        assert_eq!(ranked.source, RankingSource::Fallback);
        assert_eq!(ids(&ranked), vec![2, 1]);
    }

    #[tokio::test]
    async fn test_by_genre_ranks_by_listeners() {
        let graph = Arc::new(MemoryGraphStore::new());
        record(
            &graph,
            &[
                (1, 10, 1, "rock"),
                (2, 11, 1, "rock"),
                (3, 11, 1, "rock"),
                (1, 12, 2, "rock"),
                (1, 12, 2, "rock"),
                (1, 12, 2, "rock"),
                (2, 12, 2, "rock"),
                (3, 12, 2, "rock"),
                (1, 20, 3, "jazz"),
            ],
        )
        .await;

        let service = service(graph, catalog(&[]).await);

        let anonymous = service.by_genre("rock", 10, None).await.unwrap();
        assert_eq!(ids(&anonymous), vec![12, 11, 10]);
        assert_eq!(anonymous.reason, "Popular tracks in rock");

        // user 1 played 12 three times
        let personal = service.by_genre("rock", 10, Some(1)).await.unwrap();
        assert_eq!(ids(&personal), vec![11, 10]);
    }

    #[tokio::test]
    async fn test_by_genre_fanout_keeps_most_listened() {
        let graph = Arc::new(MemoryGraphStore::new());
        for track in 1..=5 {
            record(&graph, &[(1, track, 1, "rock")]).await;
        }
        for user in 1..=9 {
            record(&graph, &[(user, 9, 2, "rock")]).await;
        }

        let limits = QueryLimits {
            max_fanout: 3,
            ..QueryLimits::default()
        };
        let service = RecommendationService::new(graph, catalog(&[]).await, None, limits);

        let ranked = service.by_genre("rock", 1, None).await.unwrap();
        assert_eq!(ranked.track_ids, vec![TrackId(9)]);
    }

    #[tokio::test]
    async fn test_personalized_fanout_keeps_most_listened() {
        let graph = Arc::new(MemoryGraphStore::new());
        record(&graph, &[(100, 1, 1, "")]).await;
        for track in 2..=5 {
            record(&graph, &[(50, track, 1, "")]).await;
        }
        for user in 1..=9 {
            record(&graph, &[(user, 9, 1, "")]).await;
        }

        let limits = QueryLimits {
            max_fanout: 3,
            ..QueryLimits::default()
        };
        let service = RecommendationService::new(graph, catalog(&[]).await, None, limits);

        let ranked = service.personalized(100, 10).await.unwrap();
        assert_eq!(ranked.source, RankingSource::Graph);
        assert_eq!(ranked.track_ids[0], TrackId(9));
    }

    #[tokio::test]
    async fn test_by_genre_two_plays_remain_eligible() {
        let graph = Arc::new(MemoryGraphStore::new());
        record(&graph, &[(1, 10, 1, "rock"), (1, 10, 1, "rock")]).await;

        let service = service(graph, catalog(&[]).await);
        let ranked = service.by_genre("rock", 10, Some(1)).await.unwrap();
        assert_eq!(ids(&ranked), vec![10]);
    }

    #[tokio::test]
    async fn test_by_genre_unknown_genre_is_empty() {
        let graph = Arc::new(MemoryGraphStore::new());
        record(&graph, &[(1, 10, 1, "rock")]).await;

        let service = service(graph, catalog(&[10]).await);
        let ranked = service.by_genre("polka", 10, None).await.unwrap();
        assert!(ranked.track_ids.is_empty());
    }

    #[tokio::test]
    async fn test_validation_happens_before_store_access() {
        // An unconfigured mock panics on any call
        let graph = Arc::new(MockGraphStore::new());
        let service = service(graph, catalog(&[]).await);

        assert!(matches!(
            service.personalized(0, 10).await,
            Err(AppError::InvalidReference(_))
        ));
        assert!(matches!(
            service.similar(-1, 10).await,
            Err(AppError::InvalidReference(_))
        ));
        assert!(matches!(
            service.by_genre("  ", 10, None).await,
            Err(AppError::InvalidInput(_))
        ));
        assert!(matches!(
            service.by_genre("rock", 10, Some(0)).await,
            Err(AppError::InvalidReference(_))
        ));
        assert!(matches!(
            service.trending(0).await,
            Err(AppError::InvalidInput(_))
        ));
    }

    #[tokio::test]
    async fn test_store_failure_falls_back_for_personalized_and_trending() {
        let mut graph = MockGraphStore::new();
        graph
            .expect_artist_affinities()
            .returning(|_, _| Err(AppError::unavailable("connection refused")));
        graph
            .expect_play_totals_since()
            .returning(|_, _| Err(AppError::unavailable("connection refused")));

        let service = service(Arc::new(graph), catalog(&[1, 2, 3]).await);

        let personalized = service.personalized(1, 2).await.unwrap();
        assert_eq!(personalized.source, RankingSource::Fallback);
        assert_eq!(ids(&personalized), vec![3, 2]);

        let trending = service.trending(2).await.unwrap();
        assert_eq!(trending.source, RankingSource::Fallback);
        assert_eq!(trending.track_ids, personalized.track_ids);
    }

    #[tokio::test]
    async fn test_store_failure_surfaces_for_similar_and_by_genre() {
        let mut graph = MockGraphStore::new();
        graph
            .expect_track_links()
            .returning(|_| Err(AppError::unavailable("connection refused")));
        graph
            .expect_tracks_in_genre()
            .returning(|_, _| Err(AppError::unavailable("connection refused")));

        let service = service(Arc::new(graph), catalog(&[1, 2, 3]).await);

        assert!(matches!(
            service.similar(7, 10).await,
            Err(AppError::StoreUnavailable(_))
        ));
        assert!(matches!(
            service.by_genre("rock", 10, None).await,
            Err(AppError::StoreUnavailable(_))
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_store_times_out() {
        struct SlowGraph(MemoryGraphStore);

        #[async_trait::async_trait]
        impl GraphStore for SlowGraph {
            async fn record_play(&self, play: &GraphPlay) -> AppResult<()> {
                self.0.record_play(play).await
            }
            async fn artist_affinities(
                &self,
                user_id: UserId,
                cap: usize,
            ) -> AppResult<Vec<crate::graph::ArtistAffinity>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                self.0.artist_affinities(user_id, cap).await
            }
            async fn genre_affinities(
                &self,
                user_id: UserId,
                cap: usize,
            ) -> AppResult<Vec<crate::graph::GenreAffinity>> {
                self.0.genre_affinities(user_id, cap).await
            }
            async fn tracks_by_artist(&self, artist_id: ArtistId, cap: usize) -> AppResult<Vec<TrackId>> {
                self.0.tracks_by_artist(artist_id, cap).await
            }
            async fn tracks_in_genre(&self, genre: &str, cap: usize) -> AppResult<Vec<TrackId>> {
                tokio::time::sleep(Duration::from_secs(60)).await;
                self.0.tracks_in_genre(genre, cap).await
            }
            async fn track_links(
                &self,
                track_id: TrackId,
            ) -> AppResult<Option<crate::graph::TrackLinks>> {
                self.0.track_links(track_id).await
            }
            async fn artists_of(
                &self,
                track_ids: &[TrackId],
            ) -> AppResult<HashMap<TrackId, ArtistId>> {
                self.0.artists_of(track_ids).await
            }
            async fn play_counts(
                &self,
                user_id: UserId,
                track_ids: &[TrackId],
            ) -> AppResult<HashMap<TrackId, i64>> {
                self.0.play_counts(user_id, track_ids).await
            }
            async fn played_edge(
                &self,
                user_id: UserId,
                track_id: TrackId,
            ) -> AppResult<Option<crate::graph::PlayedEdge>> {
                self.0.played_edge(user_id, track_id).await
            }
            async fn listeners(&self, track_id: TrackId, cap: usize) -> AppResult<Vec<UserId>> {
                self.0.listeners(track_id, cap).await
            }
            async fn tracks_played_by_any(
                &self,
                user_ids: &[UserId],
                cap: usize,
            ) -> AppResult<Vec<TrackId>> {
                self.0.tracks_played_by_any(user_ids, cap).await
            }
            async fn distinct_listener_counts(
                &self,
                track_ids: &[TrackId],
                excluding: Option<UserId>,
            ) -> AppResult<HashMap<TrackId, i64>> {
                self.0.distinct_listener_counts(track_ids, excluding).await
            }
            async fn play_totals_since(
                &self,
                since: DateTime<Utc>,
                cap: usize,
            ) -> AppResult<Vec<crate::graph::TrackTotal>> {
                self.0.play_totals_since(since, cap).await
            }
            async fn summary(&self) -> AppResult<crate::graph::GraphSummary> {
                self.0.summary().await
            }
            async fn reset(&self) -> AppResult<()> {
                self.0.reset().await
            }
        }

        let service = service(
            Arc::new(SlowGraph(MemoryGraphStore::new())),
            catalog(&[5, 6]).await,
        );

        let personalized = service.personalized(1, 10).await.unwrap();
        assert_eq!(personalized.source, RankingSource::Fallback);
        assert_eq!(ids(&personalized), vec![6, 5]);

        assert!(matches!(
            service.by_genre("rock", 10, None).await,
            Err(AppError::StoreUnavailable(_))
        ));
    }

    #[tokio::test]
    async fn test_limit_is_clamped() {
        let graph = Arc::new(MemoryGraphStore::new());
        let limits = QueryLimits {
            max_limit: 2,
            ..QueryLimits::default()
        };
        let service =
            RecommendationService::new(graph, catalog(&[1, 2, 3, 4]).await, None, limits);

        let ranked = service.trending(50).await.unwrap();
        assert_eq!(ranked.track_ids.len(), 2);
    }
}
