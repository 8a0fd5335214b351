//! Trigram similarity in the manner of PostgreSQL's `pg_trgm`.
//!
//! Text is lowercased and split into words on non-alphanumeric characters.
//! Each word is padded with two blanks in front and one behind, and every
//! three-character window of the padded word is a trigram. Similarity is
//! the number of shared distinct trigrams over the size of their union.

use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{Result, SearchError};
use crate::models::{sort_by_score_desc, ChunkFilter, ScoredResult};
use crate::search::store::ChunkStore;
use crate::search::Retriever;

pub type Trigram = [char; 3];

/// Distinct trigrams of `text`.
pub fn trigrams(text: &str) -> HashSet<Trigram> {
    let mut set = HashSet::new();
    let lowered = text.to_lowercase();
    for word in lowered.split(|c: char| !c.is_alphanumeric()).filter(|w| !w.is_empty()) {
        let padded: Vec<char> = [' ', ' ']
            .into_iter()
            .chain(word.chars())
            .chain(std::iter::once(' '))
            .collect();
        for window in padded.windows(3) {
            set.insert([window[0], window[1], window[2]]);
        }
    }
    set
}

/// Similarity of two trigram sets, in `[0, 1]`.
pub fn set_similarity(a: &HashSet<Trigram>, b: &HashSet<Trigram>) -> f32 {
    let shared = a.intersection(b).count();
    let union = a.len() + b.len() - shared;
    if union == 0 {
        0.0
    } else {
        shared as f32 / union as f32
    }
}

pub fn similarity(a: &str, b: &str) -> f32 {
    set_similarity(&trigrams(a), &trigrams(b))
}

/// Keyword retrieval by trigram similarity against every stored chunk.
pub struct TrigramRetriever {
    store: Arc<ChunkStore>,
    /// Matches must score strictly above this
    threshold: f32,
}

impl TrigramRetriever {
    pub fn new(store: Arc<ChunkStore>, threshold: f32) -> Self {
        Self { store, threshold }
    }
}

#[async_trait]
impl Retriever for TrigramRetriever {
    fn name(&self) -> &'static str {
        "trigram"
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

        let store = self.store.clone();
        let filter = filter.clone();
        let threshold = self.threshold;
        let query_set = trigrams(query);

        let results = tokio::task::spawn_blocking(move || {
            let mut results: Vec<ScoredResult> = store
                .scan(&filter)
                .into_iter()
                .filter_map(|chunk| {
                    let score = set_similarity(&query_set, &trigrams(&chunk.content));
                    (score > threshold).then(|| ScoredResult::keyword(chunk, score))
                })
                .collect();
            sort_by_score_desc(&mut results);
            results.truncate(top_k);
            results
        })
        .await
        .map_err(SearchError::retrieval)?;

        tracing::info!(query, results_count = results.len(), "keyword search completed");
        Ok(results)
    }
}
