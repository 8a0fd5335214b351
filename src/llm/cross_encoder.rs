//! Pairwise (query, document) relevance models.
//!
//! Two cross-encoders are available: an OpenAI-compatible `/v1/rerank`
//! endpoint that scores the whole batch in one request, and a local
//! fastembed model that runs on the blocking thread pool.

use anyhow::{Context, Result};
use async_trait::async_trait;
use fastembed::{RerankInitOptions, RerankerModel, TextRerank};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::config::RerankerConfig;

/// Scores how relevant each document is to a query.
///
/// Returns exactly one score per document, in the order the documents were
/// given. Higher is more relevant.
#[async_trait]
pub trait RelevanceModel: Send + Sync {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>>;
}

/// Sigmoid normalization: maps raw logits to 0-1 range.
pub fn sigmoid(x: f32) -> f32 {
    1.0 / (1.0 + (-x).exp())
}

/// Put `(index, score)` pairs back into document order.
fn scores_in_order(
    len: usize,
    results: impl IntoIterator<Item = (usize, f32)>,
) -> Result<Vec<f32>> {
    let mut scores: Vec<Option<f32>> = vec![None; len];
    for (index, score) in results {
        let slot = scores
            .get_mut(index)
            .with_context(|| format!("reranker returned out-of-range index {index}"))?;
        *slot = Some(score);
    }
    scores
        .into_iter()
        .enumerate()
        .map(|(i, s)| s.with_context(|| format!("reranker returned no score for document {i}")))
        .collect()
}

// ─── Remote ────────────────────────────────────────────

pub struct RemoteCrossEncoder {
    client: reqwest::Client,
    config: RerankerConfig,
}

impl RemoteCrossEncoder {
    pub fn new(client: reqwest::Client, config: RerankerConfig) -> Self {
        Self { client, config }
    }
}

#[async_trait]
impl RelevanceModel for RemoteCrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let base_url = self
            .config
            .base_url
            .as_deref()
            .context("Reranker base_url not configured")?;

        let model = self.config.model.as_deref().unwrap_or("default");

        let url = format!("{}/v1/rerank", base_url.trim_end_matches('/'));

        let req_body = RerankRequest {
            model,
            query,
            documents,
            top_n: documents.len(),
        };

        let timeout = std::time::Duration::from_secs(self.config.timeout_secs.min(30));

        let resp = self
            .client
            .post(&url)
            .timeout(timeout)
            .json(&req_body)
            .send()
            .await
            .context("Failed to reach reranker endpoint")?;

        if !resp.status().is_success() {
            let status = resp.status();
            let body = resp.text().await.unwrap_or_default();
            anyhow::bail!("Reranker returned {status}: {body}");
        }

        let body: RerankResponse = resp
            .json()
            .await
            .context("Failed to parse reranker response")?;

        scores_in_order(
            documents.len(),
            body.results
                .into_iter()
                .map(|r| (r.index, sigmoid(r.relevance_score))),
        )
    }
}

#[derive(Serialize)]
struct RerankRequest<'a> {
    model: &'a str,
    query: &'a str,
    documents: &'a [String],
    top_n: usize,
}

#[derive(Deserialize)]
struct RerankResponse {
    results: Vec<RerankResultRaw>,
}

#[derive(Deserialize)]
struct RerankResultRaw {
    index: usize,
    relevance_score: f32,
}

// ─── Local ─────────────────────────────────────────────

/// fastembed cross-encoder. Construction loads the model, so build it on
/// the blocking pool.
pub struct LocalCrossEncoder {
    model: Arc<TextRerank>,
}

impl LocalCrossEncoder {
    pub fn load(model_name: &str) -> Result<Self> {
        let kind = reranker_model(model_name)?;
        let options = RerankInitOptions::new(kind).with_show_download_progress(false);
        let model = TextRerank::try_new(options)
            .map_err(|e| anyhow::anyhow!("failed to load cross-encoder {model_name}: {e}"))?;
        Ok(Self {
            model: Arc::new(model),
        })
    }
}

#[async_trait]
impl RelevanceModel for LocalCrossEncoder {
    async fn score(&self, query: &str, documents: &[String]) -> Result<Vec<f32>> {
        let model = self.model.clone();
        let query = query.to_string();
        let documents = documents.to_vec();
        let len = documents.len();

        let results = tokio::task::spawn_blocking(move || {
            let docs: Vec<&str> = documents.iter().map(String::as_str).collect();
            model
                .rerank(query.as_str(), docs, false, None)
                .map_err(|e| anyhow::anyhow!("cross-encoder scoring failed: {e}"))
        })
        .await
        .context("cross-encoder task panicked")??;

        scores_in_order(len, results.into_iter().map(|r| (r.index, sigmoid(r.score))))
    }
}

fn reranker_model(name: &str) -> Result<RerankerModel> {
    match name.to_lowercase().as_str() {
        "baai/bge-reranker-base" | "bge-reranker-base" => Ok(RerankerModel::BGERerankerBase),
        "rozgo/bge-reranker-v2-m3" | "bge-reranker-v2-m3" => Ok(RerankerModel::BGERerankerV2M3),
        "jinaai/jina-reranker-v1-turbo-en" | "jina-reranker-v1-turbo-en" => {
            Ok(RerankerModel::JINARerankerV1TurboEn)
        }
        _ => anyhow::bail!("unsupported local reranker model: {name}"),
    }
}
