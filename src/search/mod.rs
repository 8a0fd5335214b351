//! Retrieval: chunk storage, the two retrievers, and hybrid fusion.

pub mod bm25;
pub mod hybrid;
pub mod store;
pub mod trigram;
pub mod vector;

use async_trait::async_trait;

use crate::error::Result;
use crate::models::{ChunkFilter, ScoredResult};

/// One retrieval signal over the chunk corpus.
///
/// Results come back ordered by descending score, hold at most `top_k`
/// entries, and only include chunks that pass `filter`.
#[async_trait]
pub trait Retriever: Send + Sync {
    fn name(&self) -> &'static str;

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredResult>>;
}
