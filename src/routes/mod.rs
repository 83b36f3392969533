use std::sync::Arc;

use axum::{
    http::StatusCode,
    middleware,
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use tower_http::{cors::CorsLayer, trace::TraceLayer};

use crate::{
    error::AppResult,
    graph::GraphStore,
    middleware::{make_span_with_request_id, request_id_middleware},
    models::{Ranked, RecommendationResponse},
    services::{
        catalog::CatalogStore, ingestion::IngestionService,
        recommendations::RecommendationService, reconcile::Reconciler,
    },
};

pub mod admin;
pub mod recommendations;
pub mod tracks;

/// Shared handles for every handler
pub struct AppState {
    pub catalog: Arc<dyn CatalogStore>,
    pub graph: Arc<dyn GraphStore>,
    pub ingestion: IngestionService,
    pub recommendations: RecommendationService,
    pub reconciler: Reconciler,
}

/// `?limit=` on the recommendation endpoints
#[derive(Debug, Deserialize)]
pub struct LimitQuery {
    pub limit: Option<usize>,
}

/// Creates the application router with all routes
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health_check))
        .nest("/api/v1", api_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http().make_span_with(make_span_with_request_id))
        .layer(middleware::from_fn(request_id_middleware))
        .layer(CorsLayer::permissive())
}

/// API routes under /api/v1
fn api_routes() -> Router<Arc<AppState>> {
    Router::new()
        .route("/tracks/:id/play", post(tracks::record_play))
        .route("/tracks/:id/similar", get(tracks::similar))
        .route("/recommendations", get(recommendations::personalized))
        .route("/recommendations/trending", get(recommendations::trending))
        .route("/recommendations/genre/:genre", get(recommendations::by_genre))
        .route("/admin/ingestion", get(admin::ingestion_stats))
        .route("/admin/reconcile", post(admin::reconcile))
}

/// Health check endpoint
async fn health_check() -> (StatusCode, Json<Value>) {
    (StatusCode::OK, Json(json!({ "status": "healthy" })))
}

/// Catalog join: swaps ranked ids for display records, keeping rank order
pub(crate) async fn join_catalog(
    catalog: &dyn CatalogStore,
    ranked: Ranked,
) -> AppResult<Json<RecommendationResponse>> {
    let tracks = catalog.lookup_tracks_by_id(&ranked.track_ids).await?;

    Ok(Json(RecommendationResponse {
        tracks,
        reason: ranked.reason,
        source: ranked.source,
    }))
}
