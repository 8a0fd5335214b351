use async_trait::async_trait;
use std::sync::Arc;

use crate::error::{Result, SearchError};
use crate::llm::embeddings::EmbeddingProvider;
use crate::models::{ChunkFilter, ScoredResult};
use crate::search::store::ChunkStore;
use crate::search::Retriever;

/// Nearest-neighbour search by cosine similarity over stored embeddings.
pub struct SemanticRetriever {
    embeddings: Arc<EmbeddingProvider>,
    store: Arc<ChunkStore>,
    /// Matches must score strictly above this
    threshold: f32,
}

impl SemanticRetriever {
    pub fn new(embeddings: Arc<EmbeddingProvider>, store: Arc<ChunkStore>, threshold: f32) -> Self {
        Self {
            embeddings,
            store,
            threshold,
        }
    }
}

#[async_trait]
impl Retriever for SemanticRetriever {
    fn name(&self) -> &'static str {
        "semantic"
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let query_embedding = self.embeddings.embed_one(query).await?;

        let store = self.store.clone();
        let filter = filter.clone();
        let threshold = self.threshold;
        let hits = tokio::task::spawn_blocking(move || {
            store.nearest(&query_embedding, &filter, threshold, top_k)
        })
        .await
        .map_err(SearchError::retrieval)?;

        tracing::info!(query, results_count = hits.len(), "semantic search completed");

        Ok(hits
            .into_iter()
            .map(|(chunk, score)| ScoredResult::semantic(chunk, score))
            .collect())
    }
}
