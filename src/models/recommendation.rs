use serde::{Deserialize, Serialize};

use super::{TrackId, TrackRecord};

/// Where a ranking came from
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum RankingSource {
    /// Scored from the affinity graph
    Graph,
    /// Global popularity ranking from the catalog
    Fallback,
}

/// Ordered track ids produced by one query mode
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Ranked {
    pub track_ids: Vec<TrackId>,
    pub reason: String,
    pub source: RankingSource,
}

impl Ranked {
    pub fn graph(track_ids: Vec<TrackId>, reason: impl Into<String>) -> Self {
        Self {
            track_ids,
            reason: reason.into(),
            source: RankingSource::Graph,
        }
    }

    pub fn fallback(track_ids: Vec<TrackId>, reason: impl Into<String>) -> Self {
        Self {
            track_ids,
            reason: reason.into(),
            source: RankingSource::Fallback,
        }
    }
}

/// Response body for every recommendation endpoint
#[derive(Debug, Serialize, Deserialize)]
pub struct RecommendationResponse {
    pub tracks: Vec<TrackRecord>,
    pub reason: String,
    pub source: RankingSource,
}
