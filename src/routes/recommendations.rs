use std::sync::Arc;

use axum::{
    extract::{Path, Query, State},
    Json,
};

use super::{join_catalog, AppState, LimitQuery};
use crate::{
    error::AppResult,
    middleware::{CurrentUser, MaybeUser},
    models::RecommendationResponse,
};

const DEFAULT_LIMIT: usize = 20;

/// Recommendations for the calling user
pub async fn personalized(
    State(state): State<Arc<AppState>>,
    CurrentUser(user_id): CurrentUser,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<RecommendationResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let ranked = state.recommendations.personalized(user_id, limit).await?;
    join_catalog(state.catalog.as_ref(), ranked).await
}

pub async fn trending(
    State(state): State<Arc<AppState>>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<RecommendationResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let ranked = state.recommendations.trending(limit).await?;
    join_catalog(state.catalog.as_ref(), ranked).await
}

/// Popular tracks in a genre; leaves out tracks the caller has worn out
pub async fn by_genre(
    State(state): State<Arc<AppState>>,
    MaybeUser(user_id): MaybeUser,
    Path(genre): Path<String>,
    Query(params): Query<LimitQuery>,
) -> AppResult<Json<RecommendationResponse>> {
    let limit = params.limit.unwrap_or(DEFAULT_LIMIT);
    let ranked = state
        .recommendations
        .by_genre(&genre, limit, user_id)
        .await?;
    join_catalog(state.catalog.as_ref(), ranked).await
}
