use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use crate::config::SearchConfig;
use crate::error::{Result, SearchError};
use crate::llm::rerank::Reranker;
use crate::models::{sort_by_score_desc, ChunkFilter, ChunkId, Provenance, ScoredResult};
use crate::search::Retriever;

/// Linear weights of the two retrieval signals.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FusionWeights {
    pub semantic: f32,
    pub keyword: f32,
}

impl Default for FusionWeights {
    fn default() -> Self {
        Self {
            semantic: 0.7,
            keyword: 0.3,
        }
    }
}

impl From<&SearchConfig> for FusionWeights {
    fn from(config: &SearchConfig) -> Self {
        Self {
            semantic: config.semantic_weight,
            keyword: config.keyword_weight,
        }
    }
}

/// Weighted linear fusion of semantic and keyword results.
///
/// Each chunk appears once, carrying both component scores (0 for the signal
/// that missed it) and `fused = w_sem * semantic + w_kw * keyword`. Output is
/// sorted by fused score. Equal scores keep first-seen order: semantic
/// results in their order, then keyword-only results in theirs.
pub fn fuse(
    semantic: Vec<ScoredResult>,
    keyword: Vec<ScoredResult>,
    weights: FusionWeights,
) -> Vec<ScoredResult> {
    let mut fused: Vec<ScoredResult> = Vec::with_capacity(semantic.len() + keyword.len());
    let mut positions: HashMap<ChunkId, usize> = HashMap::new();

    for hit in semantic {
        if positions.contains_key(&hit.id()) {
            continue;
        }
        positions.insert(hit.id(), fused.len());
        fused.push(ScoredResult::semantic(hit.chunk, hit.semantic_score));
    }

    for hit in keyword {
        match positions.get(&hit.id()) {
            Some(&i) => {
                let entry = &mut fused[i];
                if entry.provenance == Provenance::Semantic {
                    entry.keyword_score = hit.keyword_score;
                    entry.provenance = Provenance::Hybrid;
                }
            }
            None => {
                positions.insert(hit.id(), fused.len());
                fused.push(ScoredResult::keyword(hit.chunk, hit.keyword_score));
            }
        }
    }

    for entry in &mut fused {
        entry.fused_score =
            weights.semantic * entry.semantic_score + weights.keyword * entry.keyword_score;
        entry.score = entry.fused_score;
    }

    sort_by_score_desc(&mut fused);
    fused
}

/// Query-time orchestration: validate, retrieve both signals concurrently,
/// fuse, rerank.
pub struct HybridSearch {
    semantic: Arc<dyn Retriever>,
    keyword: Arc<dyn Retriever>,
    reranker: Arc<Reranker>,
    config: SearchConfig,
}

impl HybridSearch {
    pub fn new(
        semantic: Arc<dyn Retriever>,
        keyword: Arc<dyn Retriever>,
        reranker: Arc<Reranker>,
        config: SearchConfig,
    ) -> Self {
        Self {
            semantic,
            keyword,
            reranker,
            config,
        }
    }

    pub fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Check the query and resolve the effective `top_k`.
    ///
    /// Blank queries and `top_k == 0` are rejected. `None` means the
    /// configured default, and anything above the maximum is clamped.
    pub fn validate(&self, query: &str, top_k: Option<usize>) -> Result<usize> {
        if query.trim().is_empty() {
            return Err(SearchError::InvalidInput("Query is required".to_string()));
        }
        match top_k.unwrap_or(self.config.default_top_k) {
            0 => Err(SearchError::InvalidInput(
                "top_k must be at least 1".to_string(),
            )),
            k => Ok(k.min(self.config.max_top_k)),
        }
    }

    /// Full hybrid search.
    ///
    /// Either retriever failing fails the whole query. A reranker failure
    /// never does: the fused order is returned instead.
    pub async fn search(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredResult>> {
        let top_k = self.validate(query, top_k)?;
        let candidates = top_k.saturating_mul(2);

        let retrieval = async {
            tokio::try_join!(
                self.semantic.search(query, candidates, filter),
                self.keyword.search(query, candidates, filter),
            )
        };
        let (semantic, keyword) =
            tokio::time::timeout(Duration::from_secs(self.config.timeout_secs), retrieval)
                .await
                .map_err(|_| {
                    SearchError::Retrieval(format!(
                        "retrieval timed out after {}s",
                        self.config.timeout_secs
                    ))
                })??;

        let semantic_count = semantic.len();
        let keyword_count = keyword.len();

        let mut fused = fuse(semantic, keyword, FusionWeights::from(&self.config));
        fused.truncate(top_k);

        let rerank_k = top_k.min(self.config.rerank_top_k);
        let results = self.reranker.rerank(query, fused, rerank_k).await;

        tracing::info!(
            query,
            semantic_count,
            keyword_count,
            final_count = results.len(),
            "hybrid search completed"
        );

        Ok(results)
    }

    /// Semantic signal only, after the same validation as `search`.
    pub async fn semantic_only(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredResult>> {
        let top_k = self.validate(query, top_k)?;
        self.semantic.search(query, top_k, filter).await
    }

    /// Keyword signal only, after the same validation as `search`.
    pub async fn keyword_only(
        &self,
        query: &str,
        top_k: Option<usize>,
        filter: &ChunkFilter,
    ) -> Result<Vec<ScoredResult>> {
        let top_k = self.validate(query, top_k)?;
        self.keyword.search(query, top_k, filter).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::cross_encoder::RelevanceModel;
    use crate::llm::embeddings::{Embedder, EmbeddingProvider};
    use crate::llm::rerank::ModelLoader;
    use crate::models::Chunk;
    use async_trait::async_trait;
    use chrono::Utc;
    use parking_lot::Mutex;
    use uuid::Uuid;

    fn chunk(n: u128) -> Arc<Chunk> {
        Arc::new(Chunk {
            id: Uuid::from_u128(n),
            document_id: Uuid::from_u128(1000),
            owner_id: None,
            artifact_type: None,
            content: format!("chunk {n}"),
            metadata: None,
            source: None,
            created_at: Utc::now(),
        })
    }

    fn sem(n: u128, score: f32) -> ScoredResult {
        ScoredResult::semantic(chunk(n), score)
    }

    fn kw(n: u128, score: f32) -> ScoredResult {
        ScoredResult::keyword(chunk(n), score)
    }

    fn ids(results: &[ScoredResult]) -> Vec<u128> {
        results.iter().map(|r| r.id().as_u128()).collect()
    }

    #[test]
    fn test_fuse_weighted_scores_and_order() {
        let out = fuse(
            vec![sem(1, 0.9), sem(2, 0.6)],
            vec![kw(2, 0.8), kw(3, 0.5)],
            FusionWeights::default(),
        );

        assert_eq!(ids(&out), vec![2, 1, 3]);
        assert!((out[0].fused_score - 0.66).abs() < 1e-5);
        assert!((out[1].fused_score - 0.63).abs() < 1e-5);
        assert!((out[2].fused_score - 0.15).abs() < 1e-5);

        assert_eq!(out[0].provenance, Provenance::Hybrid);
        assert_eq!(out[0].semantic_score, 0.6);
        assert_eq!(out[0].keyword_score, 0.8);
        assert_eq!(out[1].provenance, Provenance::Semantic);
        assert_eq!(out[1].keyword_score, 0.0);
        assert_eq!(out[2].provenance, Provenance::Keyword);
        assert_eq!(out[2].semantic_score, 0.0);
    }

    #[test]
    fn test_fuse_deduplicates_by_chunk_id() {
        let out = fuse(
            vec![sem(1, 0.9), sem(1, 0.8)],
            vec![kw(1, 0.4), kw(1, 0.2)],
            FusionWeights::default(),
        );
        assert_eq!(out.len(), 1);
        assert_eq!(out[0].semantic_score, 0.9);
        assert_eq!(out[0].keyword_score, 0.4);
    }

    #[test]
    fn test_fuse_ties_keep_first_seen_order() {
        let weights = FusionWeights {
            semantic: 0.5,
            keyword: 0.5,
        };
        let out = fuse(vec![sem(7, 0.4), sem(3, 0.4)], vec![kw(9, 0.4)], weights);
        assert!(out.iter().all(|r| (r.fused_score - 0.2).abs() < 1e-6));
        assert_eq!(ids(&out), vec![7, 3, 9]);
    }

    #[test]
    fn test_fuse_equal_scores_put_semantic_before_keyword_only() {
        // 0.7 * 0.3 and 0.3 * 0.7 are the same f32
        let out = fuse(vec![sem(4, 0.3)], vec![kw(8, 0.7)], FusionWeights::default());
        assert_eq!(out[0].fused_score, out[1].fused_score);
        assert_eq!(ids(&out), vec![4, 8]);
        assert_eq!(out[0].provenance, Provenance::Semantic);
        assert_eq!(out[1].provenance, Provenance::Keyword);
    }

    #[test]
    fn test_fuse_is_monotonic_in_each_signal() {
        let base = fuse(vec![sem(1, 0.6)], vec![kw(1, 0.3)], FusionWeights::default());
        let more_sem = fuse(vec![sem(1, 0.7)], vec![kw(1, 0.3)], FusionWeights::default());
        let more_kw = fuse(vec![sem(1, 0.6)], vec![kw(1, 0.4)], FusionWeights::default());
        assert!(more_sem[0].fused_score >= base[0].fused_score);
        assert!(more_kw[0].fused_score >= base[0].fused_score);
    }

    #[test]
    fn test_fuse_empty_inputs() {
        assert!(fuse(vec![], vec![], FusionWeights::default()).is_empty());
    }

    // ─── Orchestration ─────────────────────────────────

    /// Replays a fixed result list and records the requested limits.
    struct Canned {
        results: Vec<ScoredResult>,
        fail: bool,
        delay: Option<Duration>,
        requested: Mutex<Vec<usize>>,
    }

    impl Canned {
        fn new(results: Vec<ScoredResult>) -> Arc<Self> {
            Arc::new(Self {
                results,
                fail: false,
                delay: None,
                requested: Mutex::new(Vec::new()),
            })
        }

        fn failing() -> Arc<Self> {
            Arc::new(Self {
                results: Vec::new(),
                fail: true,
                delay: None,
                requested: Mutex::new(Vec::new()),
            })
        }

        fn slow(delay: Duration) -> Arc<Self> {
            Arc::new(Self {
                results: Vec::new(),
                fail: false,
                delay: Some(delay),
                requested: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait]
    impl Retriever for Canned {
        fn name(&self) -> &'static str {
            "canned"
        }

        async fn search(
            &self,
            _query: &str,
            top_k: usize,
            _filter: &ChunkFilter,
        ) -> Result<Vec<ScoredResult>> {
            self.requested.lock().push(top_k);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            if self.fail {
                return Err(SearchError::Retrieval("index unavailable".into()));
            }
            Ok(self.results.iter().take(top_k).cloned().collect())
        }
    }

    /// Gives every candidate the same relevance.
    struct Flat;

    #[async_trait]
    impl RelevanceModel for Flat {
        async fn score(&self, _query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>> {
            Ok(vec![0.5; documents.len()])
        }
    }

    fn reranker(model: Option<Arc<dyn RelevanceModel>>) -> Arc<Reranker> {
        let loader: ModelLoader = Arc::new(move || -> anyhow::Result<Arc<dyn RelevanceModel>> {
            match &model {
                Some(m) => Ok(m.clone()),
                None => anyhow::bail!("no model available"),
            }
        });
        Arc::new(Reranker::new(loader))
    }

    fn engine(
        semantic: Arc<Canned>,
        keyword: Arc<Canned>,
        model: Option<Arc<dyn RelevanceModel>>,
    ) -> HybridSearch {
        HybridSearch::new(semantic, keyword, reranker(model), SearchConfig::default())
    }

    #[tokio::test]
    async fn test_search_fuses_then_reranks() {
        let semantic = Canned::new(vec![sem(1, 0.9), sem(2, 0.6)]);
        let keyword = Canned::new(vec![kw(2, 0.8), kw(3, 0.5)]);
        let search = engine(semantic.clone(), keyword.clone(), Some(Arc::new(Flat)));

        let out = search
            .search("distributed systems", Some(5), &ChunkFilter::default())
            .await
            .unwrap();

        // constant rerank scores keep the fused order
        assert_eq!(ids(&out), vec![2, 1, 3]);
        assert!(out.iter().all(|r| r.rerank_score == Some(0.5)));
        assert!((out[0].score - (0.7 * 0.5 + 0.3 * 0.66)).abs() < 1e-5);

        assert_eq!(*semantic.requested.lock(), vec![10]);
        assert_eq!(*keyword.requested.lock(), vec![10]);
    }

    #[tokio::test]
    async fn test_search_bounded_by_top_k() {
        let semantic = Canned::new((1..=8).map(|n| sem(n, 0.9 - n as f32 * 0.01)).collect());
        let keyword = Canned::new((20..=28).map(|n| kw(n, 0.5)).collect());
        let search = engine(semantic, keyword, Some(Arc::new(Flat)));

        let out = search
            .search("q", Some(3), &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(out.len(), 3);
    }

    #[tokio::test]
    async fn test_rerank_capped_at_rerank_top_k() {
        let semantic = Canned::new((1..=40).map(|n| sem(n, 0.99 - n as f32 * 0.01)).collect());
        let keyword = Canned::new(vec![]);
        let search = engine(semantic, keyword, Some(Arc::new(Flat)));

        let out = search
            .search("q", Some(20), &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(out.len(), 10);
    }

    #[tokio::test]
    async fn test_reranker_failure_returns_fused_order() {
        let semantic = Canned::new(vec![sem(1, 0.9), sem(2, 0.6)]);
        let keyword = Canned::new(vec![kw(2, 0.8), kw(3, 0.5)]);
        let search = engine(semantic, keyword, None);

        let out = search
            .search("q", Some(2), &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![2, 1]);
        assert!(out.iter().all(|r| r.rerank_score.is_none()));
        assert!((out[0].score - 0.66).abs() < 1e-5);
    }

    #[tokio::test]
    async fn test_retriever_failure_fails_query() {
        let search = engine(
            Canned::new(vec![sem(1, 0.9)]),
            Canned::failing(),
            Some(Arc::new(Flat)),
        );
        let err = search
            .search("q", Some(5), &ChunkFilter::default())
            .await
            .unwrap_err();
        assert!(matches!(err, SearchError::Retrieval(_)));
    }

    #[tokio::test]
    async fn test_invalid_input_rejected_before_retrieval() {
        let semantic = Canned::new(vec![sem(1, 0.9)]);
        let search = engine(semantic.clone(), Canned::new(vec![]), None);

        let blank = search.search("   ", Some(5), &ChunkFilter::default()).await;
        assert!(matches!(blank, Err(SearchError::InvalidInput(_))));

        let zero = search.search("q", Some(0), &ChunkFilter::default()).await;
        assert!(matches!(zero, Err(SearchError::InvalidInput(_))));

        assert!(semantic.requested.lock().is_empty());
    }

    #[tokio::test]
    async fn test_top_k_defaults_and_clamps() {
        let search = engine(Canned::new(vec![]), Canned::new(vec![]), None);
        assert_eq!(search.validate("q", None).unwrap(), 10);
        assert_eq!(search.validate("q", Some(5000)).unwrap(), 100);
    }

    #[tokio::test(start_paused = true)]
    async fn test_retrieval_timeout() {
        let config = SearchConfig {
            timeout_secs: 1,
            ..SearchConfig::default()
        };
        let search = HybridSearch::new(
            Canned::slow(Duration::from_secs(5)),
            Canned::new(vec![]),
            reranker(None),
            config,
        );
        let err = search
            .search("q", Some(5), &ChunkFilter::default())
            .await
            .unwrap_err();
        assert!(err.to_string().contains("timed out"));
    }

    /// Remote embedding API that hangs longer than the retrieval deadline.
    struct Stalled;

    #[async_trait]
    impl Embedder for Stalled {
        fn model(&self) -> &str {
            "stalled"
        }

        async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            tokio::time::sleep(Duration::from_secs(60)).await;
            anyhow::bail!("upstream timeout")
        }
    }

    struct Local;

    #[async_trait]
    impl Embedder for Local {
        fn model(&self) -> &str {
            "local"
        }

        async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
            Ok(texts.iter().map(|_| vec![1.0, 0.0]).collect())
        }
    }

    /// Embeds the query first, then replays fixed results.
    struct EmbeddingFirst {
        embeddings: EmbeddingProvider,
        results: Vec<ScoredResult>,
    }

    #[async_trait]
    impl Retriever for EmbeddingFirst {
        fn name(&self) -> &'static str {
            "embedding-first"
        }

        async fn search(
            &self,
            query: &str,
            top_k: usize,
            _filter: &ChunkFilter,
        ) -> Result<Vec<ScoredResult>> {
            self.embeddings.embed_one(query).await?;
            Ok(self.results.iter().take(top_k).cloned().collect())
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_stalled_embedding_api_falls_back_within_deadline() {
        let config = SearchConfig::default();
        let embeddings = EmbeddingProvider::new(Arc::new(Stalled), Arc::new(Local))
            .with_remote_timeout(Duration::from_secs(config.timeout_secs / 3));
        let semantic = Arc::new(EmbeddingFirst {
            embeddings,
            results: vec![sem(1, 0.9)],
        });
        let search = HybridSearch::new(
            semantic,
            Canned::new(vec![kw(2, 0.5)]),
            reranker(Some(Arc::new(Flat))),
            config,
        );

        let out = search
            .search("q", Some(5), &ChunkFilter::default())
            .await
            .unwrap();
        assert_eq!(ids(&out), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_single_signal_paths() {
        let search = engine(
            Canned::new(vec![sem(1, 0.9), sem(2, 0.8)]),
            Canned::new(vec![kw(3, 0.4)]),
            None,
        );
        let filter = ChunkFilter::default();

        let semantic = search.semantic_only("q", Some(1), &filter).await.unwrap();
        assert_eq!(ids(&semantic), vec![1]);
        assert_eq!(semantic[0].provenance, Provenance::Semantic);

        let keyword = search.keyword_only("q", None, &filter).await.unwrap();
        assert_eq!(ids(&keyword), vec![3]);
        assert!(search.keyword_only("", None, &filter).await.is_err());
    }
}
