//! Play-event ingestion
//!
//! A play is written to the listening history synchronously; that write alone
//! decides whether the caller sees success. The graph update is then handed to
//! a bounded queue drained by a fixed pool of workers.
//!
//! Graph updates are best effort. When the queue is full the update is dropped,
//! and when a worker fails to apply one the failure is logged. Neither is
//! retried. The counters in [`IngestionStats`] make the gap between the history
//! and the graph visible; `POST /api/v1/admin/reconcile` closes it.

use std::sync::{
    atomic::{AtomicU64, AtomicUsize, Ordering},
    Arc,
};

use chrono::Utc;
use serde::Serialize;
use tokio::{
    sync::{mpsc, watch, Mutex},
    task::JoinHandle,
};

use super::{catalog::CatalogStore, play_history::PlayHistoryStore};
use crate::{
    error::{AppError, AppResult},
    graph::{GraphPlay, GraphStore},
    models::{PlayRecord, PlayRequest, TrackId, UserId},
};

#[derive(Default)]
struct Counters {
    workers: AtomicUsize,
    enqueued: AtomicU64,
    applied: AtomicU64,
    failed: AtomicU64,
    dropped: AtomicU64,
}

/// Snapshot of the graph-update pipeline
#[derive(Debug, Clone, Serialize, PartialEq)]
pub struct IngestionStats {
    pub capacity: usize,
    pub workers: usize,
    /// Updates waiting in the queue
    pub pending: usize,
    pub enqueued: u64,
    pub applied: u64,
    pub failed: u64,
    pub dropped: u64,
}

/// Producer side of the graph-update queue
#[derive(Clone)]
pub struct GraphUpdateQueue {
    tx: mpsc::Sender<GraphPlay>,
    capacity: usize,
    counters: Arc<Counters>,
}

/// Consumer side, handed to [`GraphUpdateQueue::spawn_workers`]
pub struct GraphUpdateReceiver {
    rx: mpsc::Receiver<GraphPlay>,
    counters: Arc<Counters>,
}

impl GraphUpdateQueue {
    /// Creates a queue holding at most `capacity` pending updates
    pub fn bounded(capacity: usize) -> (Self, GraphUpdateReceiver) {
        let (tx, rx) = mpsc::channel(capacity);
        let counters = Arc::new(Counters::default());

        let queue = Self {
            tx,
            capacity,
            counters: counters.clone(),
        };

        (queue, GraphUpdateReceiver { rx, counters })
    }

    /// Starts `workers` tasks applying queued updates to `store`
    pub fn spawn_workers(
        &self,
        receiver: GraphUpdateReceiver,
        store: Arc<dyn GraphStore>,
        workers: usize,
    ) -> IngestionHandle {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let counters = receiver.counters;
        let rx = Arc::new(Mutex::new(receiver.rx));
        counters.workers.fetch_add(workers, Ordering::Relaxed);

        let tasks = (0..workers)
            .map(|worker| {
                let rx = rx.clone();
                let store = store.clone();
                let counters = counters.clone();
                let shutdown_rx = shutdown_rx.clone();
                tokio::spawn(async move {
                    graph_worker(worker, rx, store, counters, shutdown_rx).await;
                })
            })
            .collect();

        tracing::info!(workers, capacity = self.capacity, "Graph update workers started");

        IngestionHandle { shutdown_tx, tasks }
    }

    /// Queues an update without waiting. Drops it when the queue is full.
    pub fn submit(&self, play: GraphPlay) -> bool {
        match self.tx.try_send(play) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(mpsc::error::TrySendError::Full(play)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::warn!(
                    user_id = %play.user_id,
                    track_id = %play.track_id,
                    capacity = self.capacity,
                    "Graph update queue full, dropping update"
                );
                false
            }
            Err(mpsc::error::TrySendError::Closed(play)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::error!(
                    user_id = %play.user_id,
                    track_id = %play.track_id,
                    "Graph update queue closed, dropping update"
                );
                false
            }
        }
    }

    pub fn stats(&self) -> IngestionStats {
        IngestionStats {
            capacity: self.capacity,
            workers: self.counters.workers.load(Ordering::Relaxed),
            pending: self.capacity.saturating_sub(self.tx.capacity()),
            enqueued: self.counters.enqueued.load(Ordering::Relaxed),
            applied: self.counters.applied.load(Ordering::Relaxed),
            failed: self.counters.failed.load(Ordering::Relaxed),
            dropped: self.counters.dropped.load(Ordering::Relaxed),
        }
    }
}

/// Handle for gracefully shutting down the graph workers
pub struct IngestionHandle {
    shutdown_tx: watch::Sender<bool>,
    tasks: Vec<JoinHandle<()>>,
}

impl IngestionHandle {
    /// Signals the workers and waits until they have drained the queue
    pub async fn shutdown(self) {
        let _ = self.shutdown_tx.send(true);
        tracing::info!("Graph worker shutdown signal sent");

        for task in self.tasks {
            if let Err(e) = task.await {
                tracing::error!(error = %e, "Graph worker panicked");
            }
        }
    }
}

enum Next {
    Job(GraphPlay),
    Shutdown,
    Closed,
}

async fn graph_worker(
    worker: usize,
    rx: Arc<Mutex<mpsc::Receiver<GraphPlay>>>,
    store: Arc<dyn GraphStore>,
    counters: Arc<Counters>,
    mut shutdown_rx: watch::Receiver<bool>,
) {
    tracing::debug!(worker, "Graph worker started");

    loop {
        let next = {
            let mut rx = rx.lock().await;
            tokio::select! {
                biased;
                // A dropped handle is not a shutdown request
                Ok(()) = shutdown_rx.changed() => Next::Shutdown,
                job = rx.recv() => job.map(Next::Job).unwrap_or(Next::Closed),
            }
        };

        match next {
            Next::Job(play) => apply(worker, store.as_ref(), &counters, play).await,
            Next::Closed => break,
            Next::Shutdown => {
                // Apply whatever was queued before the signal
                loop {
                    let job = rx.lock().await.try_recv();
                    match job {
                        Ok(play) => apply(worker, store.as_ref(), &counters, play).await,
                        Err(_) => break,
                    }
                }
                break;
            }
        }
    }

    counters.workers.fetch_sub(1, Ordering::Relaxed);
    tracing::debug!(worker, "Graph worker stopped");
}

async fn apply(worker: usize, store: &dyn GraphStore, counters: &Counters, play: GraphPlay) {
    match store.record_play(&play).await {
        Ok(()) => {
            counters.applied.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                worker,
                user_id = %play.user_id,
                track_id = %play.track_id,
                lag_ms = (Utc::now() - play.played_at).num_milliseconds(),
                "Graph updated"
            );
        }
        Err(e) => {
            counters.failed.fetch_add(1, Ordering::Relaxed);
            tracing::error!(
                worker,
                error = %e,
                user_id = %play.user_id,
                track_id = %play.track_id,
                "Failed to apply graph update, discarding"
            );
        }
    }
}

/// Records "track played" events
pub struct IngestionService {
    catalog: Arc<dyn CatalogStore>,
    history: Arc<dyn PlayHistoryStore>,
    queue: GraphUpdateQueue,
}

impl IngestionService {
    pub fn new(
        catalog: Arc<dyn CatalogStore>,
        history: Arc<dyn PlayHistoryStore>,
        queue: GraphUpdateQueue,
    ) -> Self {
        Self {
            catalog,
            history,
            queue,
        }
    }

    /// Writes the play to the listening history, then queues the graph update.
    ///
    /// The result reflects the history write only. Whether the graph update is
    /// queued, dropped or fails later is never reported to the caller.
    #[tracing::instrument(skip(self, request))]
    pub async fn record_play(
        &self,
        user_id: i64,
        track_id: i64,
        request: PlayRequest,
    ) -> AppResult<PlayRecord> {
        let user_id = UserId::new(user_id)?;
        let track_id = TrackId::new(track_id)?;

        if let Some(duration) = request.duration_played {
            if duration < 0 {
                return Err(AppError::InvalidInput(
                    "duration_played cannot be negative".to_string(),
                ));
            }
        }

        let facts = self
            .catalog
            .track_facts(track_id)
            .await?
            .ok_or_else(|| AppError::NotFound(format!("Track {} not found", track_id)))?;

        let record = PlayRecord {
            user_id,
            track_id,
            played_at: Utc::now(),
            duration_played: request.duration_played.unwrap_or(facts.duration),
            completed: request.completed.unwrap_or(true),
        };

        self.history.append_play(&record).await?;

        self.queue
            .submit(GraphPlay::new(user_id, &facts, record.played_at));

        tracing::info!(user_id = %user_id, track_id = %track_id, "Play recorded");

        Ok(record)
    }

    pub fn stats(&self) -> IngestionStats {
        self.queue.stats()
    }
}
