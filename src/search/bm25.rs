use anyhow::{Context, Result};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::path::Path;
use std::sync::Arc;
use tantivy::collector::TopDocs;
use tantivy::query::QueryParser;
use tantivy::schema::*;
use tantivy::{doc, Index, IndexWriter, ReloadPolicy};
use uuid::Uuid;

use crate::error::SearchError;
use crate::models::{Chunk, ChunkFilter, ChunkId, ScoredResult};
use crate::search::store::ChunkStore;
use crate::search::Retriever;

const WRITER_HEAP_BYTES: usize = 50_000_000;

/// BM25 full-text index over chunk content, built on tantivy.
pub struct Bm25Index {
    index: Index,
    f_chunk_id: Field,
    f_document_id: Field,
    f_content: Field,
    /// tantivy allows a single writer per index
    write_lock: Mutex<()>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bm25Hit {
    pub chunk_id: ChunkId,
    pub score: f32,
}

impl Bm25Index {
    /// Create or open a BM25 index at the given directory.
    pub fn open_or_create(index_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(index_dir)?;

        let mut schema_builder = Schema::builder();
        let f_chunk_id = schema_builder.add_text_field("chunk_id", STRING | STORED);
        let f_document_id = schema_builder.add_text_field("document_id", STRING | STORED);
        let f_content = schema_builder.add_text_field("content", TEXT | STORED);
        let schema = schema_builder.build();

        let index = if index_dir.join("meta.json").exists() {
            Index::open_in_dir(index_dir).context("Failed to open existing tantivy index")?
        } else {
            Index::create_in_dir(index_dir, schema).context("Failed to create tantivy index")?
        };

        Ok(Self {
            index,
            f_chunk_id,
            f_document_id,
            f_content,
            write_lock: Mutex::new(()),
        })
    }

    /// Index a batch of chunks. Existing entries with the same chunk id are
    /// replaced.
    pub fn index_chunks(&self, chunks: &[Chunk]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut writer: IndexWriter = self
            .index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")?;

        for chunk in chunks {
            let id = chunk.id.to_string();
            writer.delete_term(tantivy::Term::from_field_text(self.f_chunk_id, &id));
            writer.add_document(doc!(
                self.f_chunk_id => id,
                self.f_document_id => chunk.document_id.to_string(),
                self.f_content => chunk.content.clone(),
            ))?;
        }

        writer.commit().context("Failed to commit index")?;
        Ok(())
    }

    /// Delete all chunks of a document.
    pub fn delete_document(&self, document_id: &Uuid) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut writer: IndexWriter = self
            .index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")?;

        let term = tantivy::Term::from_field_text(self.f_document_id, &document_id.to_string());
        writer.delete_term(term);
        writer.commit().context("Failed to commit delete")?;
        Ok(())
    }

    /// Replace the whole index contents with `chunks`.
    pub fn rebuild(&self, chunks: &[Chunk]) -> Result<()> {
        let _guard = self.write_lock.lock();
        let mut writer: IndexWriter = self
            .index
            .writer(WRITER_HEAP_BYTES)
            .context("Failed to create index writer")?;

        writer.delete_all_documents()?;
        for chunk in chunks {
            writer.add_document(doc!(
                self.f_chunk_id => chunk.id.to_string(),
                self.f_document_id => chunk.document_id.to_string(),
                self.f_content => chunk.content.clone(),
            ))?;
        }

        writer.commit().context("Failed to commit rebuild")?;
        Ok(())
    }

    /// Number of live (non-deleted) entries.
    pub fn num_docs(&self) -> Result<u64> {
        let reader = self.index.reader().context("Failed to create reader")?;
        Ok(reader.searcher().num_docs())
    }

    /// Rebuild from the chunk store when the two disagree on size.
    ///
    /// Returns whether a rebuild happened.
    pub fn sync_with(&self, store: &ChunkStore) -> Result<bool> {
        let indexed = self.num_docs()?;
        let stored = store.len() as u64;
        if indexed == stored {
            return Ok(false);
        }

        let chunks: Vec<Chunk> = store
            .scan(&ChunkFilter::default())
            .iter()
            .map(|c| (**c).clone())
            .collect();
        tracing::info!(indexed, stored, "rebuilding keyword index from chunk store");
        self.rebuild(&chunks)?;
        Ok(true)
    }

    /// Search the index and return raw BM25 scores, best first.
    pub fn search(&self, query_str: &str, limit: usize) -> Result<Vec<Bm25Hit>> {
        if limit == 0 {
            return Ok(Vec::new());
        }

        let reader = self
            .index
            .reader_builder()
            .reload_policy(ReloadPolicy::OnCommitWithDelay)
            .try_into()
            .context("Failed to create reader")?;

        let searcher = reader.searcher();

        // Free-form user text: tolerate stray operators instead of failing.
        let query_parser = QueryParser::for_index(&self.index, vec![self.f_content]);
        let (query, errors) = query_parser.parse_query_lenient(query_str);
        if !errors.is_empty() {
            tracing::debug!(query = query_str, errors = errors.len(), "lenient query parse");
        }

        let top_docs = searcher
            .search(&query, &TopDocs::with_limit(limit))
            .context("Search failed")?;

        let mut hits = Vec::with_capacity(top_docs.len());
        for (score, doc_address) in top_docs {
            let doc: TantivyDocument = searcher
                .doc(doc_address)
                .context("Failed to retrieve document")?;

            let chunk_id = doc
                .get_first(self.f_chunk_id)
                .and_then(|v| v.as_str())
                .unwrap_or_default();

            let chunk_id = match Uuid::parse_str(chunk_id) {
                Ok(id) => id,
                Err(_) => continue,
            };

            hits.push(Bm25Hit { chunk_id, score });
        }

        Ok(hits)
    }
}

/// Keyword retrieval through the BM25 index.
///
/// Raw BM25 scores are unbounded, so each result is divided by the best
/// score of the query. The top hit always scores 1.0.
pub struct Bm25Retriever {
    index: Arc<Bm25Index>,
    store: Arc<ChunkStore>,
    /// Normalized scores must be strictly above this
    threshold: f32,
}

impl Bm25Retriever {
    pub fn new(index: Arc<Bm25Index>, store: Arc<ChunkStore>, threshold: f32) -> Self {
        Self {
            index,
            store,
            threshold,
        }
    }
}

#[async_trait]
impl Retriever for Bm25Retriever {
    fn name(&self) -> &'static str {
        "bm25"
    }

    async fn search(
        &self,
        query: &str,
        top_k: usize,
        filter: &ChunkFilter,
    ) -> crate::error::Result<Vec<ScoredResult>> {
        if top_k == 0 {
            return Ok(Vec::new());
        }

        let index = self.index.clone();
        let store = self.store.clone();
        let filter = filter.clone();
        let threshold = self.threshold;
        let query_owned = query.to_string();

        let results = tokio::task::spawn_blocking(move || -> Result<Vec<ScoredResult>> {
            // Filtering happens after ranking, so look past top_k when scoped.
            let limit = if filter.is_empty() {
                top_k
            } else {
                store.len().max(top_k)
            };
            let hits = index.search(&query_owned, limit)?;

            let ids: Vec<ChunkId> = hits.iter().map(|h| h.chunk_id).collect();
            let chunks = store.get_many(&ids);

            // Index entries can briefly outlive a deleted chunk.
            let visible: Vec<(Arc<Chunk>, f32)> = hits
                .into_iter()
                .filter_map(|hit| {
                    let chunk = chunks.get(&hit.chunk_id)?;
                    filter.matches(chunk).then(|| (chunk.clone(), hit.score))
                })
                .collect();

            let Some(best) = visible.first().map(|(_, raw)| *raw) else {
                return Ok(Vec::new());
            };

            Ok(visible
                .into_iter()
                .filter_map(|(chunk, raw)| {
                    let score = if best > 0.0 { raw / best } else { 0.0 };
                    (score > threshold).then(|| ScoredResult::keyword(chunk, score))
                })
                .take(top_k)
                .collect())
        })
        .await
        .map_err(SearchError::retrieval)?
        .map_err(SearchError::retrieval)?;

        tracing::info!(query, results_count = results.len(), "keyword search completed");
        Ok(results)
    }
}
