//! Deterministic stand-ins for the embedding and cross-encoder models.

#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use serde_json::{Map, Value};
use std::sync::Arc;
use uuid::Uuid;

use mentorly_rag::llm::cross_encoder::RelevanceModel;
use mentorly_rag::llm::embeddings::{Embedder, EmbeddingProvider};
use mentorly_rag::llm::rerank::{ModelLoader, Reranker};
use mentorly_rag::models::Chunk;

pub const VOCAB: [&str; 7] = [
    "python",
    "rust",
    "sql",
    "react",
    "leadership",
    "kubernetes",
    "marketing",
];

fn words(text: &str) -> Vec<String> {
    text.to_lowercase()
        .split(|c: char| !c.is_alphanumeric())
        .filter(|w| !w.is_empty())
        .map(str::to_string)
        .collect()
}

/// Bag-of-words vector over `VOCAB`.
pub fn vocab_vector(text: &str) -> Vec<f32> {
    let words = words(text);
    VOCAB
        .iter()
        .map(|term| words.iter().filter(|w| w.as_str() == *term).count() as f32)
        .collect()
}

pub struct VocabEmbedder;

#[async_trait]
impl Embedder for VocabEmbedder {
    fn model(&self) -> &str {
        "vocab-test"
    }

    async fn embed(&self, texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        Ok(texts.iter().map(|t| vocab_vector(t)).collect())
    }
}

/// Fails every call, like an unreachable embedding API.
pub struct DownEmbedder;

#[async_trait]
impl Embedder for DownEmbedder {
    fn model(&self) -> &str {
        "down"
    }

    async fn embed(&self, _texts: &[String]) -> anyhow::Result<Vec<Vec<f32>>> {
        anyhow::bail!("connection refused")
    }
}

pub fn provider() -> Arc<EmbeddingProvider> {
    Arc::new(EmbeddingProvider::new(
        Arc::new(VocabEmbedder),
        Arc::new(VocabEmbedder),
    ))
}

/// Scores a document by how many query words it contains.
pub struct WordOverlap;

#[async_trait]
impl RelevanceModel for WordOverlap {
    async fn score(&self, query: &str, documents: &[String]) -> anyhow::Result<Vec<f32>> {
        let query_words = words(query);
        Ok(documents
            .iter()
            .map(|d| {
                let doc_words = words(d);
                query_words.iter().filter(|q| doc_words.contains(q)).count() as f32
            })
            .collect())
    }
}

pub fn overlap_reranker() -> Arc<Reranker> {
    let loader: ModelLoader = Arc::new(|| -> anyhow::Result<Arc<dyn RelevanceModel>> {
        Ok(Arc::new(WordOverlap))
    });
    Arc::new(Reranker::new(loader))
}

pub fn broken_reranker() -> Arc<Reranker> {
    let loader: ModelLoader = Arc::new(|| -> anyhow::Result<Arc<dyn RelevanceModel>> {
        anyhow::bail!("model weights not found")
    });
    Arc::new(Reranker::new(loader))
}

pub fn make_chunk(document_id: Uuid, owner: &str, artifact_type: &str, content: &str) -> Chunk {
    let mut metadata = Map::new();
    metadata.insert("title".to_string(), Value::from(format!("{owner} {artifact_type}")));
    Chunk {
        id: Uuid::new_v4(),
        document_id,
        owner_id: Some(owner.to_string()),
        artifact_type: Some(artifact_type.to_string()),
        content: content.to_string(),
        metadata: Some(metadata),
        source: Some(format!("{artifact_type}.pdf")),
        created_at: Utc::now(),
    }
}

/// A small career corpus: two resumes and a job posting.
pub struct Corpus {
    pub chunks: Vec<Chunk>,
    pub resume_u1: Uuid,
    pub resume_u2: Uuid,
    pub posting_u1: Uuid,
}

impl Corpus {
    pub fn new() -> Self {
        let resume_u1 = Uuid::new_v4();
        let resume_u2 = Uuid::new_v4();
        let posting_u1 = Uuid::new_v4();
        let chunks = vec![
            make_chunk(resume_u1, "u1", "resume", "Python developer with SQL and data pipelines"),
            make_chunk(resume_u1, "u1", "resume", "Rust systems programming and Kubernetes"),
            make_chunk(resume_u1, "u1", "resume", "Led marketing campaigns"),
            make_chunk(resume_u2, "u2", "resume", "Python and SQL analytics"),
            make_chunk(posting_u1, "u1", "job_posting", "Hiring python engineer"),
        ];
        Self {
            chunks,
            resume_u1,
            resume_u2,
            posting_u1,
        }
    }

    pub fn embeddings(&self) -> Vec<Option<Vec<f32>>> {
        self.chunks
            .iter()
            .map(|c| Some(vocab_vector(&c.content)))
            .collect()
    }
}
