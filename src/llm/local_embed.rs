//! Local embedding fallback backed by fastembed (ONNX runtime).
//!
//! The model is loaded on first use, once, on the blocking thread pool.
//! Inference also runs there so it never stalls the async workers.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{EmbeddingModel, InitOptions, TextEmbedding};
use std::sync::Arc;
use tokio::sync::OnceCell;

use crate::llm::embeddings::Embedder;

pub struct LocalEmbedder {
    model_name: String,
    model: OnceCell<Arc<TextEmbedding>>,
}

impl LocalEmbedder {
    pub fn new(model_name: impl Into<String>) -> Self {
        Self {
            model_name: model_name.into(),
            model: OnceCell::new(),
        }
    }

    async fn loaded(&self) -> Result<Arc<TextEmbedding>> {
        self.model
            .get_or_try_init(|| async {
                let kind = embedding_model(&self.model_name)?;
                tracing::info!(model = %self.model_name, "loading local embedding model");
                let model = tokio::task::spawn_blocking(move || {
                    let options = InitOptions::new(kind).with_show_download_progress(false);
                    TextEmbedding::try_new(options)
                        .map_err(|e| anyhow::anyhow!("failed to load local embedding model: {e}"))
                })
                .await
                .context("local embedding loader panicked")??;
                Ok::<_, anyhow::Error>(Arc::new(model))
            })
            .await
            .cloned()
    }
}

#[async_trait]
impl Embedder for LocalEmbedder {
    fn model(&self) -> &str {
        &self.model_name
    }

    async fn embed(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let model = self.loaded().await?;
        let texts = texts.to_vec();
        tokio::task::spawn_blocking(move || {
            model
                .embed(texts, None)
                .map_err(|e| anyhow::anyhow!("local embedding failed: {e}"))
        })
        .await
        .context("local embedding task panicked")?
    }
}

/// Map a configured model name onto a fastembed model.
fn embedding_model(name: &str) -> Result<EmbeddingModel> {
    let short = name.rsplit('/').next().unwrap_or(name).to_lowercase();
    match short.as_str() {
        "all-minilm-l6-v2" => Ok(EmbeddingModel::AllMiniLML6V2),
        "bge-small-en-v1.5" => Ok(EmbeddingModel::BGESmallENV15),
        "bge-base-en-v1.5" => Ok(EmbeddingModel::BGEBaseENV15),
        "nomic-embed-text-v1.5" => Ok(EmbeddingModel::NomicEmbedTextV15),
        _ => anyhow::bail!("unsupported local embedding model: {name}"),
    }
}
