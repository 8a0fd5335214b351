use std::sync::Arc;
use std::time::Duration;

use crate::config::{Config, KeywordBackend};
use crate::llm::embeddings::{EmbeddingProvider, RemoteEmbedder};
use crate::llm::local_embed::LocalEmbedder;
use crate::llm::rerank::Reranker;
use crate::search::bm25::{Bm25Index, Bm25Retriever};
use crate::search::hybrid::HybridSearch;
use crate::search::store::ChunkStore;
use crate::search::trigram::TrigramRetriever;
use crate::search::vector::SemanticRetriever;
use crate::search::Retriever;

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub config: Arc<Config>,
    pub store: Arc<ChunkStore>,
    /// Present only when the BM25 keyword backend is selected
    pub bm25: Option<Arc<Bm25Index>>,
    pub embeddings: Arc<EmbeddingProvider>,
    pub search: Arc<HybridSearch>,
}

impl AppState {
    pub fn new(config: Config) -> anyhow::Result<Self> {
        let store = Arc::new(ChunkStore::open_or_create(&config.store_dir())?);
        tracing::info!(chunks = store.len(), "chunk store loaded");

        let http_client = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(10))
            .timeout(Duration::from_secs(120))
            .build()?;

        let embeddings = Arc::new(
            EmbeddingProvider::new(
                Arc::new(RemoteEmbedder::new(
                    http_client.clone(),
                    config.embedding.clone(),
                )),
                Arc::new(LocalEmbedder::new(config.embedding.local_model.clone())),
            )
            .with_remote_timeout(Duration::from_secs(config.embedding.timeout_secs))
            .with_dimension(config.embedding.dimension),
        );
        let reranker = Arc::new(Reranker::from_config(http_client, config.reranker.clone()));

        let bm25 = match config.search.keyword_backend {
            KeywordBackend::Trigram => None,
            KeywordBackend::Bm25 => {
                let index = Bm25Index::open_or_create(&config.index_dir())?;
                // chunks added under the trigram backend, or a failed store write
                index.sync_with(&store)?;
                Some(Arc::new(index))
            }
        };

        Ok(Self::from_parts(config, store, bm25, embeddings, reranker))
    }

    /// Wire the search pipeline from already-built components.
    pub fn from_parts(
        config: Config,
        store: Arc<ChunkStore>,
        bm25: Option<Arc<Bm25Index>>,
        embeddings: Arc<EmbeddingProvider>,
        reranker: Arc<Reranker>,
    ) -> Self {
        let semantic: Arc<dyn Retriever> = Arc::new(SemanticRetriever::new(
            embeddings.clone(),
            store.clone(),
            config.search.semantic_threshold,
        ));
        let keyword: Arc<dyn Retriever> = match &bm25 {
            Some(index) => Arc::new(Bm25Retriever::new(
                index.clone(),
                store.clone(),
                config.search.keyword_threshold,
            )),
            None => Arc::new(TrigramRetriever::new(
                store.clone(),
                config.search.keyword_threshold,
            )),
        };
        tracing::info!(keyword = keyword.name(), "search pipeline ready");

        let search = Arc::new(HybridSearch::new(
            semantic,
            keyword,
            reranker,
            config.search.clone(),
        ));

        Self {
            config: Arc::new(config),
            store,
            bm25,
            embeddings,
            search,
        }
    }
}
