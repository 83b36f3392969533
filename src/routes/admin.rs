use std::sync::Arc;

use axum::{extract::State, Json};
use serde_json::{json, Value};

use super::AppState;
use crate::{error::AppResult, services::reconcile::ReconcileReport};

/// Queue counters plus graph size
pub async fn ingestion_stats(State(state): State<Arc<AppState>>) -> AppResult<Json<Value>> {
    let summary = state.graph.summary().await?;

    Ok(Json(json!({
        "queue": state.ingestion.stats(),
        "graph": summary,
    })))
}

/// Rebuilds the graph from the listening history
pub async fn reconcile(State(state): State<Arc<AppState>>) -> AppResult<Json<ReconcileReport>> {
    let report = state.reconciler.rebuild().await?;
    Ok(Json(report))
}
