use axum::extract::{Path, Query, State};
use axum::Json;
use chrono::Utc;
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::api::ApiError;
use crate::error::SearchError;
use crate::models::{
    AddDocumentRequest, Chunk, DeleteDocumentResponse, DocumentList, DocumentResponse,
    ListDocumentsQuery,
};
use crate::state::AppState;

/// POST /api/v1/documents - store a pre-chunked document
///
/// Every chunk is embedded before anything is written, so a document is
/// either fully searchable or not stored at all.
pub async fn add_document(
    State(state): State<AppState>,
    Json(req): Json<AddDocumentRequest>,
) -> Result<Json<DocumentResponse>, ApiError> {
    let title = req.title.trim().to_string();
    if title.is_empty() {
        return Err(SearchError::InvalidInput("Title is required".to_string()).into());
    }
    let artifact_type = req.artifact_type.trim().to_string();
    if artifact_type.is_empty() {
        return Err(SearchError::InvalidInput("artifact_type is required".to_string()).into());
    }

    let texts: Vec<String> = req
        .chunks
        .into_iter()
        .map(|c| c.trim().to_string())
        .filter(|c| !c.is_empty())
        .collect();
    if texts.is_empty() {
        return Err(SearchError::InvalidInput(
            "At least one non-empty chunk is required".to_string(),
        )
        .into());
    }

    let document_id = Uuid::new_v4();
    tracing::info!(
        %document_id,
        title = %title,
        chunks = texts.len(),
        "document ingestion started"
    );

    let batch = state.embeddings.embed(&texts).await?;

    let created_at = Utc::now();
    let chunks: Vec<Chunk> = texts
        .into_iter()
        .enumerate()
        .map(|(i, content)| {
            let mut metadata: Map<String, Value> = req.metadata.clone().unwrap_or_default();
            metadata.insert("title".to_string(), Value::from(title.clone()));
            metadata.insert("chunk_index".to_string(), Value::from(i));
            Chunk {
                id: Uuid::new_v4(),
                document_id,
                owner_id: req.user_id.clone(),
                artifact_type: Some(artifact_type.clone()),
                content,
                metadata: Some(metadata),
                source: req.source.clone(),
                created_at,
            }
        })
        .collect();
    let chunks_created = chunks.len();

    // Vectors of another size can never match a query from the primary
    // model; such chunks stay keyword-searchable only.
    let dimension = batch.dimension();
    let embeddings: Vec<Option<Vec<f32>>> = match state.embeddings.dimension() {
        Some(expected) if expected != dimension => {
            tracing::warn!(
                %document_id,
                expected,
                got = dimension,
                model = %batch.model,
                "embedding dimension mismatch, storing chunks without vectors"
            );
            vec![None; chunks_created]
        }
        _ => batch.vectors.into_iter().map(Some).collect(),
    };

    let store = state.store.clone();
    let bm25 = state.bm25.clone();
    tokio::task::spawn_blocking(move || -> anyhow::Result<()> {
        if let Some(index) = bm25 {
            index.index_chunks(&chunks)?;
        }
        store.insert(chunks, embeddings)
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::internal)?;

    tracing::info!(
        %document_id,
        chunks_created,
        model = %batch.model,
        "document ingestion completed"
    );

    Ok(Json(DocumentResponse {
        id: document_id,
        title,
        chunks_created,
        processing_status: "completed".to_string(),
    }))
}

/// GET /api/v1/documents - list stored documents, optionally for one user
pub async fn list_documents(
    State(state): State<AppState>,
    Query(query): Query<ListDocumentsQuery>,
) -> Json<DocumentList> {
    let documents = state.store.documents(query.user_id.as_deref());
    Json(DocumentList {
        total: documents.len(),
        documents,
    })
}

/// DELETE /api/v1/documents/{id} - remove a document and all of its chunks
pub async fn delete_document(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> Result<Json<DeleteDocumentResponse>, ApiError> {
    tracing::info!(document_id = %id, "document deletion started");

    let store = state.store.clone();
    let bm25 = state.bm25.clone();
    let chunks_deleted = tokio::task::spawn_blocking(move || -> anyhow::Result<usize> {
        let removed = store.delete_document(&id)?;
        if removed > 0 {
            if let Some(index) = bm25 {
                index.delete_document(&id)?;
            }
        }
        Ok(removed)
    })
    .await
    .map_err(ApiError::internal)?
    .map_err(ApiError::internal)?;

    if chunks_deleted == 0 {
        return Err(ApiError::not_found(format!("Document {id} not found")));
    }

    Ok(Json(DeleteDocumentResponse {
        message: "Document deleted successfully".to_string(),
        chunks_deleted,
    }))
}
