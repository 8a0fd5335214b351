use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;

use crate::config::EmbeddingConfig;
use crate::error::SearchError;

/// Maximum characters sent per text to the remote embedding API.
const MAX_EMBED_CHARS: usize = 8_000;

const DEFAULT_REMOTE_TIMEOUT: Duration = Duration::from_secs(10);

/// Truncate `text` to at most `MAX_EMBED_CHARS`, splitting on a UTF-8 char boundary.
fn truncate_for_embedding(text: &str) -> &str {
    if text.len() <= MAX_EMBED_CHARS {
        return text;
    }
    let mut end = MAX_EMBED_CHARS;
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    &text[..end]
}

/// Something that turns texts into vectors, one per input, in input order.
#[async_trait]
pub trait Embedder: Send + Sync {
    /// Model identifier reported to callers.
    fn model(&self) -> &str;

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>>;
}

/// Vectors plus the model that produced them.
#[derive(Debug, Clone)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    pub model: String,
}

impl EmbeddingBatch {
    pub fn dimension(&self) -> usize {
        self.vectors.first().map_or(0, Vec::len)
    }
}

/// Remote embeddings with a local fallback.
///
/// Any failure of the primary embedder (transport, status, body, timeout,
/// a wrong number of vectors or a wrong dimension) reroutes the whole call
/// to the fallback.
pub struct EmbeddingProvider {
    primary: Arc<dyn Embedder>,
    fallback: Arc<dyn Embedder>,
    remote_timeout: Duration,
    dimension: Option<usize>,
}

impl EmbeddingProvider {
    pub fn new(primary: Arc<dyn Embedder>, fallback: Arc<dyn Embedder>) -> Self {
        Self {
            primary,
            fallback,
            remote_timeout: DEFAULT_REMOTE_TIMEOUT,
            dimension: None,
        }
    }

    /// How long the primary may take before the fallback answers instead.
    pub fn with_remote_timeout(mut self, timeout: Duration) -> Self {
        self.remote_timeout = timeout;
        self
    }

    /// Expected vector size of the primary model.
    pub fn with_dimension(mut self, dimension: usize) -> Self {
        self.dimension = Some(dimension);
        self
    }

    pub fn dimension(&self) -> Option<usize> {
        self.dimension
    }

    async fn embed_primary(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let vectors = tokio::time::timeout(self.remote_timeout, self.primary.embed(texts))
            .await
            .map_err(|_| {
                anyhow::anyhow!("no response within {}s", self.remote_timeout.as_secs_f32())
            })??;

        anyhow::ensure!(
            vectors.len() == texts.len(),
            "expected {} embeddings, got {}",
            texts.len(),
            vectors.len()
        );
        if let Some(dim) = self.dimension {
            if let Some(bad) = vectors.iter().find(|v| v.len() != dim) {
                anyhow::bail!("expected dimension {dim}, got {}", bad.len());
            }
        }
        Ok(vectors)
    }

    pub async fn embed(&self, texts: &[String]) -> Result<EmbeddingBatch, SearchError> {
        if texts.is_empty() {
            return Err(SearchError::InvalidInput(
                "at least one text is required".to_string(),
            ));
        }

        let primary_err = match self.embed_primary(texts).await {
            Ok(vectors) => {
                tracing::debug!(
                    batch_size = texts.len(),
                    model = self.primary.model(),
                    "generated remote embeddings"
                );
                return Ok(EmbeddingBatch {
                    vectors,
                    model: self.primary.model().to_string(),
                });
            }
            Err(e) => e,
        };

        tracing::warn!(
            error = %format!("{primary_err:#}"),
            fallback = self.fallback.model(),
            "remote embedding failed, falling back to local model"
        );

        match self.fallback.embed(texts).await {
            Ok(vectors) if vectors.len() == texts.len() => {
                tracing::debug!(
                    batch_size = texts.len(),
                    model = self.fallback.model(),
                    "generated fallback embeddings"
                );
                Ok(EmbeddingBatch {
                    vectors,
                    model: self.fallback.model().to_string(),
                })
            }
            Ok(vectors) => Err(SearchError::Embedding(format!(
                "fallback returned {} embeddings for {} texts",
                vectors.len(),
                texts.len()
            ))),
            Err(e) => {
                tracing::error!(error = %format!("{e:#}"), "fallback embedding failed");
                Err(SearchError::Embedding(format!(
                    "remote: {primary_err:#}; local: {e:#}"
                )))
            }
        }
    }

    /// Embed a single text.
    pub async fn embed_one(&self, text: &str) -> Result<Vec<f32>, SearchError> {
        self.embed(&[text.to_string()])
            .await?
            .vectors
            .into_iter()
            .next()
            .ok_or_else(|| SearchError::Embedding("No embedding returned".to_string()))
    }
}

/// Cosine similarity of two vectors.
///
/// Returns 0.0 when either vector has zero magnitude, when the lengths
/// differ, or when the vectors are empty.
pub fn cosine_similarity(a: &[f32], b: &[f32]) -> f32 {
    if a.len() != b.len() || a.is_empty() {
        return 0.0;
    }

    let mut dot = 0.0f32;
    let mut norm_a = 0.0f32;
    let mut norm_b = 0.0f32;

    for i in 0..a.len() {
        dot += a[i] * b[i];
        norm_a += a[i] * a[i];
        norm_b += b[i] * b[i];
    }

    let denom = norm_a.sqrt() * norm_b.sqrt();
    if denom == 0.0 {
        0.0
    } else {
        dot / denom
    }
}

/// Embeddings from an OpenAI-compatible or Ollama HTTP API.
pub struct RemoteEmbedder {
    client: reqwest::Client,
    config: EmbeddingConfig,
}

impl RemoteEmbedder {
    pub fn new(client: reqwest::Client, config: EmbeddingConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl Embedder for RemoteEmbedder {
    fn model(&self) -> &str {
        &self.config.model
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let truncated: Vec<String> = texts
            .iter()
            .map(|t| truncate_for_embedding(t).to_string())
            .collect();

        let mut all_embeddings = Vec::with_capacity(texts.len());
        for batch in truncated.chunks(self.config.batch_size.max(1)) {
            let mut embeddings = match self.config.provider.as_str() {
                "openai" => embed_openai(&self.client, &self.config, batch).await?,
                "ollama" => embed_ollama(&self.client, &self.config, batch).await?,
                other => anyhow::bail!("Unknown embedding provider: {other}"),
            };
            anyhow::ensure!(
                embeddings.len() == batch.len(),
                "embedding API returned {} vectors for {} texts",
                embeddings.len(),
                batch.len()
            );
            all_embeddings.append(&mut embeddings);
        }

        Ok(all_embeddings)
    }
}

// ─── OpenAI-compatible ───────────────────────────────────

#[derive(Serialize)]
struct OpenAiEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
}

#[derive(Deserialize)]
struct OpenAiEmbedResponse {
    data: Vec<OpenAiEmbedData>,
}

#[derive(Deserialize)]
struct OpenAiEmbedData {
    #[serde(default)]
    index: usize,
    embedding: Vec<f32>,
}

async fn embed_openai(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/v1/embeddings", config.base_url.trim_end_matches('/'));
    let api_key = config
        .api_key
        .as_deref()
        .context("No API key configured for OpenAI embeddings")?;

    let req = OpenAiEmbedRequest {
        model: &config.model,
        input: texts,
    };

    let resp = client
        .post(&url)
        .bearer_auth(api_key)
        .json(&req)
        .send()
        .await
        .context("Failed to call OpenAI embed API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("OpenAI embed API returned {status}: {body}");
    }

    let mut body: OpenAiEmbedResponse = resp
        .json()
        .await
        .context("Failed to parse OpenAI embed response")?;

    body.data.sort_by_key(|d| d.index);
    Ok(body.data.into_iter().map(|d| d.embedding).collect())
}

// ─── Ollama ──────────────────────────────────────────────

#[derive(Serialize)]
struct OllamaEmbedRequest<'a> {
    model: &'a str,
    input: &'a [String],
    truncate: bool,
}

#[derive(Deserialize)]
struct OllamaEmbedResponse {
    embeddings: Vec<Vec<f32>>,
}

async fn embed_ollama(
    client: &reqwest::Client,
    config: &EmbeddingConfig,
    texts: &[String],
) -> Result<Vec<Vec<f32>>> {
    let url = format!("{}/api/embed", config.base_url.trim_end_matches('/'));

    let req = OllamaEmbedRequest {
        model: &config.model,
        input: texts,
        truncate: true,
    };

    let resp = client
        .post(&url)
        .json(&req)
        .send()
        .await
        .context("Failed to call Ollama embed API")?;

    if !resp.status().is_success() {
        let status = resp.status();
        let body = resp.text().await.unwrap_or_default();
        anyhow::bail!("Ollama embed API returned {status}: {body}");
    }

    let body: OllamaEmbedResponse = resp
        .json()
        .await
        .context("Failed to parse Ollama embed response")?;

    Ok(body.embeddings)
}
