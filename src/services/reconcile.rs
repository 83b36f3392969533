use std::{collections::HashMap, sync::Arc, time::Instant};

use serde::Serialize;

use super::{catalog::CatalogStore, play_history::PlayHistoryStore};
use crate::{
    error::AppResult,
    graph::{GraphPlay, GraphStore},
    models::{TrackFacts, TrackId},
};

const PAGE_SIZE: usize = 500;

#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct ReconcileReport {
    /// Plays applied to the rebuilt graph
    pub replayed: u64,
    /// Plays of tracks the catalog no longer has
    pub skipped: u64,
    pub elapsed_ms: u64,
}

/// Rebuilds the affinity graph from the listening history
///
/// Run manually. Graph updates applied by ingestion workers while a rebuild is
/// in progress can be wiped by the reset or applied twice.
pub struct Reconciler {
    graph: Arc<dyn GraphStore>,
    history: Arc<dyn PlayHistoryStore>,
    catalog: Arc<dyn CatalogStore>,
}

impl Reconciler {
    pub fn new(
        graph: Arc<dyn GraphStore>,
        history: Arc<dyn PlayHistoryStore>,
        catalog: Arc<dyn CatalogStore>,
    ) -> Self {
        Self {
            graph,
            history,
            catalog,
        }
    }

    #[tracing::instrument(skip(self))]
    pub async fn rebuild(&self) -> AppResult<ReconcileReport> {
        let started = Instant::now();
        tracing::info!("Graph rebuild started");

        self.graph.reset().await?;

        let mut facts_cache: HashMap<TrackId, Option<TrackFacts>> = HashMap::new();
        let mut replayed = 0u64;
        let mut skipped = 0u64;
        let mut offset = 0;

        loop {
            let page = self.history.plays_page(offset, PAGE_SIZE).await?;
            if page.is_empty() {
                break;
            }
            offset += page.len();

            for play in &page {
                let facts = match facts_cache.get(&play.track_id) {
                    Some(facts) => facts.clone(),
                    None => {
                        let facts = self.catalog.track_facts(play.track_id).await?;
                        facts_cache.insert(play.track_id, facts.clone());
                        facts
                    }
                };

                match facts {
                    Some(facts) => {
                        self.graph
                            .record_play(&GraphPlay::new(play.user_id, &facts, play.played_at))
                            .await?;
                        replayed += 1;
                    }
                    None => {
                        tracing::debug!(track_id = %play.track_id, "Skipping play of unknown track");
                        skipped += 1;
                    }
                }
            }

            tracing::debug!(offset, replayed, skipped, "Replayed history page");

            if page.len() < PAGE_SIZE {
                break;
            }
        }

        let report = ReconcileReport {
            replayed,
            skipped,
            elapsed_ms: started.elapsed().as_millis() as u64,
        };

        tracing::info!(
            replayed = report.replayed,
            skipped = report.skipped,
            elapsed_ms = report.elapsed_ms,
            "Graph rebuild finished"
        );

        Ok(report)
    }
}
