use anyhow::{Context, Result};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::config::RerankerConfig;
use crate::error::SearchError;
use crate::llm::cross_encoder::{LocalCrossEncoder, RelevanceModel, RemoteCrossEncoder};
use crate::models::{sort_by_score_desc, ScoredResult};

/// Share of the relevance-model score in the blended final score.
/// The fused retrieval score makes up the rest.
pub const RERANK_WEIGHT: f32 = 0.7;

/// Builds the relevance model. Runs on the blocking thread pool.
pub type ModelLoader = Arc<dyn Fn() -> Result<Arc<dyn RelevanceModel>> + Send + Sync>;

/// Second-pass rescoring of fused candidates with a pairwise model.
///
/// The model is loaded on first use and shared by every later call.
/// Concurrent first calls wait on the same initialization. A failed load
/// leaves the cell empty so the next query tries again.
pub struct Reranker {
    loader: ModelLoader,
    model: OnceCell<Arc<dyn RelevanceModel>>,
}

impl Reranker {
    pub fn new(loader: ModelLoader) -> Self {
        Self {
            loader,
            model: OnceCell::new(),
        }
    }

    /// Remote `/v1/rerank` endpoint when one is configured, otherwise the
    /// local fastembed cross-encoder.
    pub fn from_config(client: reqwest::Client, config: RerankerConfig) -> Self {
        let loader: ModelLoader = if config.base_url.is_some() {
            Arc::new(move || -> Result<Arc<dyn RelevanceModel>> {
                Ok(Arc::new(RemoteCrossEncoder::new(client.clone(), config.clone()))
                    as Arc<dyn RelevanceModel>)
            })
        } else {
            Arc::new(move || -> Result<Arc<dyn RelevanceModel>> {
                tracing::info!(model = %config.local_model, "loading local cross-encoder");
                Ok(Arc::new(LocalCrossEncoder::load(&config.local_model)?)
                    as Arc<dyn RelevanceModel>)
            })
        };
        Self::new(loader)
    }

    pub fn is_loaded(&self) -> bool {
        self.model.initialized()
    }

    async fn model(&self) -> Result<Arc<dyn RelevanceModel>> {
        self.model
            .get_or_try_init(|| async {
                let loader = self.loader.clone();
                tokio::task::spawn_blocking(move || (*loader)())
                    .await
                    .context("reranker model loader panicked")?
            })
            .await
            .cloned()
    }

    /// Rescore `candidates` against `query` and keep the best `top_k`.
    ///
    /// With one candidate or none the input comes back untouched. Any
    /// failure is logged and answered with the original order truncated
    /// to `top_k`.
    pub async fn rerank(
        &self,
        query: &str,
        mut candidates: Vec<ScoredResult>,
        top_k: usize,
    ) -> Vec<ScoredResult> {
        if candidates.len() <= 1 {
            return candidates;
        }

        match self.score(query, &candidates).await {
            Ok(scores) => {
                let original_count = candidates.len();
                let reranked = blend_rerank_scores(candidates, &scores, top_k);
                tracing::info!(
                    original_count,
                    reranked_count = reranked.len(),
                    "reranking completed"
                );
                reranked
            }
            Err(e) => {
                tracing::warn!(error = %e, "reranking failed, returning original results");
                candidates.truncate(top_k);
                candidates
            }
        }
    }

    async fn score(
        &self,
        query: &str,
        candidates: &[ScoredResult],
    ) -> Result<Vec<f32>, SearchError> {
        let model = self
            .model()
            .await
            .map_err(|e| SearchError::Rerank(format!("{e:#}")))?;

        let documents: Vec<String> = candidates.iter().map(|c| c.chunk.content.clone()).collect();
        let scores = model
            .score(query, &documents)
            .await
            .map_err(|e| SearchError::Rerank(format!("{e:#}")))?;

        if scores.len() != candidates.len() {
            return Err(SearchError::Rerank(format!(
                "model returned {} scores for {} candidates",
                scores.len(),
                candidates.len()
            )));
        }
        if let Some(bad) = scores.iter().find(|s| !s.is_finite()) {
            return Err(SearchError::Rerank(format!("model returned non-finite score {bad}")));
        }
        Ok(scores)
    }
}

/// Attach rerank scores, blend with the fused score, re-sort, truncate.
///
/// `scores` is parallel with `candidates`. Ties keep the incoming order.
pub fn blend_rerank_scores(
    mut candidates: Vec<ScoredResult>,
    scores: &[f32],
    top_k: usize,
) -> Vec<ScoredResult> {
    for (candidate, &rerank) in candidates.iter_mut().zip(scores) {
        candidate.rerank_score = Some(rerank);
        candidate.score = RERANK_WEIGHT * rerank + (1.0 - RERANK_WEIGHT) * candidate.fused_score;
    }
    sort_by_score_desc(&mut candidates);
    candidates.truncate(top_k);
    candidates
}
