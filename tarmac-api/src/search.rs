use axum::{
    extract::{Query, State},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use tarmac_core::search::FlightSearchRequest;
use tarmac_offer::{cache::CacheStats, SearchOutcome};

use crate::error::AppError;
use crate::state::AppState;

#[derive(Debug, Default, Deserialize)]
pub struct SearchParams {
    #[serde(default)]
    pub allow_stale: bool,
}

pub fn routes() -> Router<AppState> {
    Router::new()
        .route("/v1/search", post(search))
        .route("/v1/search/stats", get(stats))
}

async fn search(
    State(state): State<AppState>,
    Query(params): Query<SearchParams>,
    Json(req): Json<FlightSearchRequest>,
) -> Result<Json<SearchOutcome>, AppError> {
    let outcome = state.search.search(&req, params.allow_stale).await?;
    tracing::debug!(key = %outcome.cache_key, freshness = ?outcome.freshness, "search served");
    Ok(Json(outcome))
}

async fn stats(State(state): State<AppState>) -> Json<CacheStats> {
    Json(state.cache.stats())
}
