use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};
use serde_json::{json, Value};

use super::{join_catalog, AppState, LimitQuery};
use crate::{
    error::AppResult,
    middleware::CurrentUser,
    models::{PlayRequest, RecommendationResponse},
};

const DEFAULT_SIMILAR_LIMIT: usize = 10;

/// Records that the caller played a track
pub async fn record_play(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Path(track_id): Path<i64>,
    body: Option<Json<PlayRequest>>,
) -> AppResult<Json<Value>> {
    let request = body.map(|Json(request)| request).unwrap_or_default();
    let play = state
        .ingestion
        .record_play(user_id, track_id, request)
        .await?;

    Ok(Json(json!({
        "message": "Play recorded successfully",
        "play": play,
    })))
}

pub async fn similar(
    State(state): State<Arc<AppState>>,
    Path(track_id): Path<i64>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<RecommendationResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_SIMILAR_LIMIT);
    let ranked = state.recommendations.similar(track_id, limit).await?;
    join_catalog(state.catalog.as_ref(), ranked).await
}
