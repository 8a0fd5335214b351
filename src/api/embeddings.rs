use axum::extract::State;
use axum::Json;

use crate::api::ApiError;
use crate::models::{EmbeddingRequest, EmbeddingResponse};
use crate::state::AppState;

/// POST /api/v1/embeddings/generate
pub async fn generate(
    State(state): State<AppState>,
    Json(req): Json<EmbeddingRequest>,
) -> Result<Json<EmbeddingResponse>, ApiError> {
    tracing::info!(text_count = req.texts.len(), "embedding generation requested");

    let batch = state.embeddings.embed(&req.texts).await?;

    Ok(Json(EmbeddingResponse {
        dimension: batch.dimension(),
        embeddings: batch.vectors,
        model: batch.model,
    }))
}
