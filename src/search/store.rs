use anyhow::{Context, Result};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use uuid::Uuid;

use crate::llm::embeddings::cosine_similarity;
use crate::models::{Chunk, ChunkFilter, ChunkId, DocumentSummary};

/// A stored chunk together with its embedding, if one has been generated.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct StoredChunk {
    chunk: Arc<Chunk>,
    embedding: Option<Vec<f32>>,
}

/// In-memory chunk store with disk persistence.
///
/// Entries keep insertion order; scans walk them in that order so equal
/// scores rank by when the chunk was stored.
pub struct ChunkStore {
    entries: RwLock<Vec<StoredChunk>>,
    persist_path: Option<PathBuf>,
}

impl ChunkStore {
    pub fn open_or_create(store_dir: &Path) -> Result<Self> {
        std::fs::create_dir_all(store_dir)?;
        let persist_path = store_dir.join("chunks.json");

        let entries = if persist_path.exists() {
            let data =
                std::fs::read_to_string(&persist_path).context("Failed to read chunk store")?;
            serde_json::from_str(&data).context("Chunk store file is corrupt")?
        } else {
            Vec::new()
        };

        Ok(Self {
            entries: RwLock::new(entries),
            persist_path: Some(persist_path),
        })
    }

    /// A store that never touches disk.
    pub fn in_memory() -> Self {
        Self {
            entries: RwLock::new(Vec::new()),
            persist_path: None,
        }
    }

    /// Add chunks. `embeddings` must be parallel with `chunks`; a chunk whose
    /// id is already stored replaces the old entry in place.
    pub fn insert(&self, chunks: Vec<Chunk>, embeddings: Vec<Option<Vec<f32>>>) -> Result<()> {
        anyhow::ensure!(
            chunks.len() == embeddings.len(),
            "{} chunks but {} embeddings",
            chunks.len(),
            embeddings.len()
        );

        let mut entries = self.entries.write();
        let mut positions: HashMap<ChunkId, usize> = entries
            .iter()
            .enumerate()
            .map(|(i, e)| (e.chunk.id, i))
            .collect();

        for (chunk, embedding) in chunks.into_iter().zip(embeddings) {
            let entry = StoredChunk {
                chunk: Arc::new(chunk),
                embedding,
            };
            match positions.get(&entry.chunk.id) {
                Some(&i) => entries[i] = entry,
                None => {
                    positions.insert(entry.chunk.id, entries.len());
                    entries.push(entry);
                }
            }
        }

        self.persist(&entries)
    }

    /// Delete every chunk of a document. Returns how many were removed.
    pub fn delete_document(&self, document_id: &Uuid) -> Result<usize> {
        let mut entries = self.entries.write();
        let before = entries.len();
        entries.retain(|e| &e.chunk.document_id != document_id);
        let removed = before - entries.len();
        if removed > 0 {
            self.persist(&entries)?;
        }
        Ok(removed)
    }

    pub fn get(&self, id: &ChunkId) -> Option<Arc<Chunk>> {
        self.entries
            .read()
            .iter()
            .find(|e| &e.chunk.id == id)
            .map(|e| e.chunk.clone())
    }

    /// Look up several chunks at once, keyed by id.
    pub fn get_many(&self, ids: &[ChunkId]) -> HashMap<ChunkId, Arc<Chunk>> {
        let wanted: HashSet<&ChunkId> = ids.iter().collect();
        let entries = self.entries.read();
        entries
            .iter()
            .filter(|e| wanted.contains(&e.chunk.id))
            .map(|e| (e.chunk.id, e.chunk.clone()))
            .collect()
    }

    /// All chunks passing `filter`, in insertion order.
    pub fn scan(&self, filter: &ChunkFilter) -> Vec<Arc<Chunk>> {
        self.entries
            .read()
            .iter()
            .filter(|e| filter.matches(&e.chunk))
            .map(|e| e.chunk.clone())
            .collect()
    }

    /// Cosine-similarity scan over embedded chunks that pass `filter`.
    ///
    /// Keeps only similarities strictly above `threshold`, sorted descending
    /// with ties in insertion order, truncated to `limit`.
    pub fn nearest(
        &self,
        query_embedding: &[f32],
        filter: &ChunkFilter,
        threshold: f32,
        limit: usize,
    ) -> Vec<(Arc<Chunk>, f32)> {
        let entries = self.entries.read();

        let mut scored: Vec<(Arc<Chunk>, f32)> = entries
            .iter()
            .filter(|e| filter.matches(&e.chunk))
            .filter_map(|e| {
                let embedding = e.embedding.as_ref()?;
                let score = cosine_similarity(query_embedding, embedding);
                (score > threshold).then(|| (e.chunk.clone(), score))
            })
            .collect();

        scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
        scored.truncate(limit);
        scored
    }

    /// Per-document summaries, optionally restricted to one owner.
    pub fn documents(&self, owner_id: Option<&str>) -> Vec<DocumentSummary> {
        let entries = self.entries.read();
        let mut order: Vec<Uuid> = Vec::new();
        let mut summaries: HashMap<Uuid, DocumentSummary> = HashMap::new();

        for e in entries.iter() {
            let c = &e.chunk;
            if owner_id.is_some() && c.owner_id.as_deref() != owner_id {
                continue;
            }
            let summary = summaries.entry(c.document_id).or_insert_with(|| {
                order.push(c.document_id);
                DocumentSummary {
                    id: c.document_id,
                    title: c
                        .metadata
                        .as_ref()
                        .and_then(|m| m.get("title"))
                        .and_then(|t| t.as_str())
                        .map(str::to_string)
                        .or_else(|| c.source.clone()),
                    artifact_type: c.artifact_type.clone(),
                    owner_id: c.owner_id.clone(),
                    chunk_count: 0,
                    embedded_chunks: 0,
                    created_at: c.created_at,
                }
            });
            summary.chunk_count += 1;
            if e.embedding.is_some() {
                summary.embedded_chunks += 1;
            }
        }

        order
            .into_iter()
            .filter_map(|id| summaries.remove(&id))
            .collect()
    }

    pub fn len(&self) -> usize {
        self.entries.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.read().is_empty()
    }

    /// Atomic write via temp file + rename.
    fn persist(&self, entries: &[StoredChunk]) -> Result<()> {
        let Some(path) = &self.persist_path else {
            return Ok(());
        };
        let data = serde_json::to_string(entries)?;
        let tmp_path = path.with_extension("json.tmp");
        std::fs::write(&tmp_path, data).context("Failed to write chunk store")?;
        std::fs::rename(&tmp_path, path).context("Failed to replace chunk store")?;
        Ok(())
    }
}
