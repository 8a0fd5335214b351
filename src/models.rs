use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::collections::BTreeMap;
use std::sync::Arc;
use uuid::Uuid;

pub type ChunkId = Uuid;

/// Smallest retrievable unit of document content.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Chunk {
    pub id: ChunkId,
    pub document_id: Uuid,
    /// User that owns the source document
    pub owner_id: Option<String>,
    /// Content type of the source document, e.g. "resume"
    pub artifact_type: Option<String>,
    pub content: String,
    pub metadata: Option<Map<String, Value>>,
    /// Human-readable label of the source document
    pub source: Option<String>,
    pub created_at: DateTime<Utc>,
}

/// Which retrieval path(s) produced a result.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "snake_case")]
pub enum Provenance {
    Semantic,
    Keyword,
    Hybrid,
}

/// A chunk scored for one query. Never persisted.
///
/// `score` is whatever the current stage ranks by: the retrieval score
/// coming out of a retriever, the fused score after fusion, the blended
/// score after reranking.
#[derive(Debug, Clone)]
pub struct ScoredResult {
    pub chunk: Arc<Chunk>,
    pub semantic_score: f32,
    pub keyword_score: f32,
    pub fused_score: f32,
    pub rerank_score: Option<f32>,
    pub score: f32,
    pub provenance: Provenance,
}

impl ScoredResult {
    pub fn semantic(chunk: Arc<Chunk>, score: f32) -> Self {
        Self {
            chunk,
            semantic_score: score,
            keyword_score: 0.0,
            fused_score: 0.0,
            rerank_score: None,
            score,
            provenance: Provenance::Semantic,
        }
    }

    pub fn keyword(chunk: Arc<Chunk>, score: f32) -> Self {
        Self {
            chunk,
            semantic_score: 0.0,
            keyword_score: score,
            fused_score: 0.0,
            rerank_score: None,
            score,
            provenance: Provenance::Keyword,
        }
    }

    pub fn id(&self) -> ChunkId {
        self.chunk.id
    }
}

/// Sort descending by `score`. Stable, so equal scores keep their input order.
pub fn sort_by_score_desc(results: &mut [ScoredResult]) {
    results.sort_by(|a, b| {
        b.score
            .partial_cmp(&a.score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
}

/// Owner scope plus named predicates, all combined with AND.
///
/// Known predicate names are `artifact_type` (or `type`), `document_id` and
/// `source`. Any other name is compared against the chunk metadata key of
/// the same name. An array value matches when any element matches.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ChunkFilter {
    pub owner_id: Option<String>,
    pub predicates: BTreeMap<String, Value>,
}

impl ChunkFilter {
    pub fn new(owner_id: Option<String>, predicates: Option<Map<String, Value>>) -> Self {
        Self {
            owner_id,
            predicates: predicates.unwrap_or_default().into_iter().collect(),
        }
    }

    pub fn with_predicate(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.predicates.insert(key.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.owner_id.is_none() && self.predicates.is_empty()
    }

    pub fn matches(&self, chunk: &Chunk) -> bool {
        if let Some(owner) = &self.owner_id {
            if chunk.owner_id.as_deref() != Some(owner.as_str()) {
                return false;
            }
        }
        self.predicates
            .iter()
            .all(|(key, expected)| predicate_matches(chunk, key, expected))
    }
}

fn predicate_matches(chunk: &Chunk, key: &str, expected: &Value) -> bool {
    if let Value::Array(options) = expected {
        return options.iter().any(|v| predicate_matches(chunk, key, v));
    }
    match key {
        "artifact_type" | "type" => str_eq(chunk.artifact_type.as_deref(), expected),
        "document_id" => str_eq(Some(&chunk.document_id.to_string()), expected),
        "source" => str_eq(chunk.source.as_deref(), expected),
        other => chunk
            .metadata
            .as_ref()
            .and_then(|m| m.get(other))
            .is_some_and(|actual| actual == expected),
    }
}

fn str_eq(actual: Option<&str>, expected: &Value) -> bool {
    matches!((actual, expected.as_str()), (Some(a), Some(e)) if a == e)
}

// ─── HTTP request / response types ─────────────────────

/// Search request
#[derive(Debug, Clone, Deserialize)]
pub struct SearchRequest {
    pub query: String,
    pub user_id: Option<String>,
    pub top_k: Option<usize>,
    #[serde(default = "default_true")]
    pub include_metadata: bool,
    pub filters: Option<Map<String, Value>>,
}

fn default_true() -> bool {
    true
}

/// One entry of a search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResultItem {
    pub id: ChunkId,
    pub content: String,
    pub score: f32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub metadata: Option<Map<String, Value>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    pub search_type: Provenance,
}

impl SearchResultItem {
    pub fn from_scored(result: &ScoredResult, include_metadata: bool) -> Self {
        Self {
            id: result.chunk.id,
            content: result.chunk.content.clone(),
            score: result.score,
            metadata: if include_metadata {
                result.chunk.metadata.clone()
            } else {
                None
            },
            source: result.chunk.source.clone(),
            search_type: result.provenance,
        }
    }
}

/// Search response
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchResponse {
    pub results: Vec<SearchResultItem>,
    pub query: String,
    pub total_results: usize,
    pub search_time_ms: f64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct EmbeddingRequest {
    pub texts: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingResponse {
    pub embeddings: Vec<Vec<f32>>,
    pub model: String,
    pub dimension: usize,
}

/// Register a document whose text has already been split into chunks.
#[derive(Debug, Clone, Deserialize)]
pub struct AddDocumentRequest {
    pub title: String,
    pub artifact_type: String,
    pub source: Option<String>,
    pub user_id: Option<String>,
    pub metadata: Option<Map<String, Value>>,
    pub chunks: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentResponse {
    pub id: Uuid,
    pub title: String,
    pub chunks_created: usize,
    pub processing_status: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DocumentSummary {
    pub id: Uuid,
    pub title: Option<String>,
    pub artifact_type: Option<String>,
    pub owner_id: Option<String>,
    pub chunk_count: usize,
    pub embedded_chunks: usize,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListDocumentsQuery {
    pub user_id: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DocumentList {
    pub documents: Vec<DocumentSummary>,
    pub total: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteDocumentResponse {
    pub message: String,
    pub chunks_deleted: usize,
}
