use axum::extract::State;
use axum::Json;
use std::time::Instant;

use crate::api::ApiError;
use crate::models::{ChunkFilter, SearchRequest, SearchResponse, SearchResultItem};
use crate::state::AppState;

#[derive(Debug, Clone, Copy)]
enum Mode {
    Hybrid,
    Semantic,
    Keyword,
}

/// POST /api/v1/search/hybrid - semantic + keyword retrieval, weighted
/// fusion, then cross-encoder reranking.
pub async fn hybrid_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    run(&state, req, Mode::Hybrid).await
}

/// POST /api/v1/search/semantic - vector similarity only
pub async fn semantic_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    run(&state, req, Mode::Semantic).await
}

/// POST /api/v1/search/keyword - lexical similarity only
pub async fn keyword_search(
    State(state): State<AppState>,
    Json(req): Json<SearchRequest>,
) -> Result<Json<SearchResponse>, ApiError> {
    run(&state, req, Mode::Keyword).await
}

async fn run(
    state: &AppState,
    req: SearchRequest,
    mode: Mode,
) -> Result<Json<SearchResponse>, ApiError> {
    let started = Instant::now();
    tracing::info!(
        query = %req.query,
        user_id = ?req.user_id,
        top_k = ?req.top_k,
        mode = ?mode,
        "search request"
    );

    let filter = ChunkFilter::new(req.user_id.clone(), req.filters.clone());
    let search = &state.search;
    let results = match mode {
        Mode::Hybrid => search.search(&req.query, req.top_k, &filter).await,
        Mode::Semantic => search.semantic_only(&req.query, req.top_k, &filter).await,
        Mode::Keyword => search.keyword_only(&req.query, req.top_k, &filter).await,
    }?;

    let results: Vec<SearchResultItem> = results
        .iter()
        .map(|r| SearchResultItem::from_scored(r, req.include_metadata))
        .collect();

    Ok(Json(SearchResponse {
        total_results: results.len(),
        results,
        query: req.query,
        search_time_ms: started.elapsed().as_secs_f64() * 1000.0,
    }))
}
