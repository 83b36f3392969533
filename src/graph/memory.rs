use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};

use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use super::{
    ArtistAffinity, GenreAffinity, GraphPlay, GraphStore, GraphSummary, PlayedEdge, TrackLinks,
    TrackTotal,
};
use crate::{
    error::AppResult,
    models::{ArtistId, TrackId, UserId},
};

#[derive(Default)]
struct GraphState {
    users: BTreeSet<UserId>,
    tracks: BTreeSet<TrackId>,
    artists: BTreeSet<ArtistId>,
    genres: BTreeSet<String>,
    by_artist: BTreeMap<TrackId, ArtistId>,
    has_genre: BTreeMap<TrackId, String>,
    played: BTreeMap<(UserId, TrackId), PlayedEdge>,
    likes_artist: BTreeMap<(UserId, ArtistId), i64>,
    likes_genre: BTreeMap<(UserId, String), i64>,
}

/// Affinity graph held in process memory
///
/// Each `record_play` holds the write lock for the whole upsert, which makes it
/// a single transaction with respect to every other call.
#[derive(Default)]
pub struct MemoryGraphStore {
    state: RwLock<GraphState>,
}

impl MemoryGraphStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl GraphState {
    /// Orders `tracks` (ascending) by how many of the counted `PLAYED` edges
    /// point at each, most first, and keeps `cap` of them
    fn most_played(
        &self,
        tracks: Vec<TrackId>,
        counts_user: impl Fn(UserId) -> bool,
        cap: usize,
    ) -> Vec<TrackId> {
        let mut listeners: HashMap<TrackId, i64> = tracks.iter().map(|t| (*t, 0)).collect();
        for (user, track) in self.played.keys() {
            if let Some(count) = listeners.get_mut(track) {
                if counts_user(*user) {
                    *count += 1;
                }
            }
        }

        let mut ranked = tracks;
        ranked.sort_by(|a, b| listeners[b].cmp(&listeners[a]));
        ranked.truncate(cap);
        ranked
    }
}

#[async_trait::async_trait]
impl GraphStore for MemoryGraphStore {
    async fn record_play(&self, play: &GraphPlay) -> AppResult<()> {
        let mut state = self.state.write().await;

        state.users.insert(play.user_id);
        state.tracks.insert(play.track_id);
        state.artists.insert(play.artist_id);
        state.by_artist.entry(play.track_id).or_insert(play.artist_id);

        state
            .played
            .entry((play.user_id, play.track_id))
            .and_modify(|edge| {
                edge.count += 1;
                edge.last_played = edge.last_played.max(play.played_at);
            })
            .or_insert_with(|| PlayedEdge {
                user_id: play.user_id,
                track_id: play.track_id,
                count: 1,
                last_played: play.played_at,
            });

        *state
            .likes_artist
            .entry((play.user_id, play.artist_id))
            .or_insert(0) += 1;

        if let Some(genre) = &play.genre {
            state.genres.insert(genre.clone());
            state
                .has_genre
                .entry(play.track_id)
                .or_insert_with(|| genre.clone());
            *state
                .likes_genre
                .entry((play.user_id, genre.clone()))
                .or_insert(0) += 1;
        }

        Ok(())
    }

    async fn artist_affinities(
        &self,
        user_id: UserId,
        cap: usize,
    ) -> AppResult<Vec<ArtistAffinity>> {
        let state = self.state.read().await;
        let mut rows: Vec<ArtistAffinity> = state
            .likes_artist
            .range((user_id, ArtistId(i64::MIN))..=(user_id, ArtistId(i64::MAX)))
            .map(|(&(_, artist_id), &count)| ArtistAffinity { artist_id, count })
            .collect();

        // Range order is artist asc; a stable sort keeps it for equal counts
        rows.sort_by(|a, b| b.count.cmp(&a.count));
        rows.truncate(cap);
        Ok(rows)
    }

    async fn genre_affinities(&self, user_id: UserId, cap: usize) -> AppResult<Vec<GenreAffinity>> {
        let state = self.state.read().await;
        let mut rows: Vec<GenreAffinity> = state
            .likes_genre
            .iter()
            .filter(|((user, _), _)| *user == user_id)
            .map(|((_, genre), &count)| GenreAffinity {
                genre: genre.clone(),
                count,
            })
            .collect();

        rows.sort_by(|a, b| b.count.cmp(&a.count));
        rows.truncate(cap);
        Ok(rows)
    }

    async fn tracks_by_artist(&self, artist_id: ArtistId, cap: usize) -> AppResult<Vec<TrackId>> {
        let state = self.state.read().await;
        let tracks = state
            .by_artist
            .iter()
            .filter(|(_, artist)| **artist == artist_id)
            .map(|(track, _)| *track)
            .collect();
        Ok(state.most_played(tracks, |_| true, cap))
    }

    async fn tracks_in_genre(&self, genre: &str, cap: usize) -> AppResult<Vec<TrackId>> {
        let state = self.state.read().await;
        let tracks = state
            .has_genre
            .iter()
            .filter(|(_, name)| name.as_str() == genre)
            .map(|(track, _)| *track)
            .collect();
        Ok(state.most_played(tracks, |_| true, cap))
    }

    async fn track_links(&self, track_id: TrackId) -> AppResult<Option<TrackLinks>> {
        let state = self.state.read().await;
        if !state.tracks.contains(&track_id) {
            return Ok(None);
        }

        Ok(Some(TrackLinks {
            track_id,
            artist_id: state.by_artist.get(&track_id).copied(),
            genre: state.has_genre.get(&track_id).cloned(),
        }))
    }

    async fn artists_of(&self, track_ids: &[TrackId]) -> AppResult<HashMap<TrackId, ArtistId>> {
        let state = self.state.read().await;
        Ok(track_ids
            .iter()
            .filter_map(|track| state.by_artist.get(track).map(|artist| (*track, *artist)))
            .collect())
    }

    async fn play_counts(
        &self,
        user_id: UserId,
        track_ids: &[TrackId],
    ) -> AppResult<HashMap<TrackId, i64>> {
        let state = self.state.read().await;
        Ok(track_ids
            .iter()
            .filter_map(|track| {
                state
                    .played
                    .get(&(user_id, *track))
                    .map(|edge| (*track, edge.count))
            })
            .collect())
    }

    async fn played_edge(
        &self,
        user_id: UserId,
        track_id: TrackId,
    ) -> AppResult<Option<PlayedEdge>> {
        let state = self.state.read().await;
        Ok(state.played.get(&(user_id, track_id)).cloned())
    }

    async fn listeners(&self, track_id: TrackId, cap: usize) -> AppResult<Vec<UserId>> {
        let state = self.state.read().await;
        Ok(state
            .played
            .keys()
            .filter(|(_, track)| *track == track_id)
            .map(|(user, _)| *user)
            .take(cap)
            .collect())
    }

    async fn tracks_played_by_any(
        &self,
        user_ids: &[UserId],
        cap: usize,
    ) -> AppResult<Vec<TrackId>> {
        let state = self.state.read().await;
        let users: HashSet<UserId> = user_ids.iter().copied().collect();
        let tracks: BTreeSet<TrackId> = state
            .played
            .keys()
            .filter(|(user, _)| users.contains(user))
            .map(|(_, track)| *track)
            .collect();

        let tracks = tracks.into_iter().collect();
        Ok(state.most_played(tracks, |user| users.contains(&user), cap))
    }

    async fn distinct_listener_counts(
        &self,
        track_ids: &[TrackId],
        excluding: Option<UserId>,
    ) -> AppResult<HashMap<TrackId, i64>> {
        let state = self.state.read().await;
        let wanted: HashSet<TrackId> = track_ids.iter().copied().collect();
        let mut counts: HashMap<TrackId, i64> = HashMap::new();

        // (user, track) keys are unique, so each key is one distinct listener
        for (user, track) in state.played.keys() {
            if wanted.contains(track) && Some(*user) != excluding {
                *counts.entry(*track).or_insert(0) += 1;
            }
        }

        Ok(counts)
    }

    async fn play_totals_since(
        &self,
        since: DateTime<Utc>,
        cap: usize,
    ) -> AppResult<Vec<TrackTotal>> {
        let state = self.state.read().await;
        let mut totals: BTreeMap<TrackId, i64> = BTreeMap::new();

        for edge in state.played.values() {
            if edge.last_played >= since {
                *totals.entry(edge.track_id).or_insert(0) += edge.count;
            }
        }

        let mut rows: Vec<TrackTotal> = totals
            .into_iter()
            .map(|(track_id, total)| TrackTotal { track_id, total })
            .collect();
        rows.sort_by(|a, b| b.total.cmp(&a.total));
        rows.truncate(cap);
        Ok(rows)
    }

    async fn summary(&self) -> AppResult<GraphSummary> {
        let state = self.state.read().await;
        Ok(GraphSummary {
            users: state.users.len() as i64,
            tracks: state.tracks.len() as i64,
            artists: state.artists.len() as i64,
            genres: state.genres.len() as i64,
            played_edges: state.played.len() as i64,
            artist_affinity_edges: state.likes_artist.len() as i64,
            genre_affinity_edges: state.likes_genre.len() as i64,
        })
    }

    async fn reset(&self) -> AppResult<()> {
        *self.state.write().await = GraphState::default();
        Ok(())
    }
}
