//! # mentorly-rag
//!
//! Hybrid retrieval service for career-mentorship content (resumes, job
//! postings, cover letters). Documents arrive already split into chunks;
//! queries are answered by combining a semantic signal with a lexical one
//! and rescoring the survivors with a cross-encoder.
//!
//! ## Architecture
//!
//! ```text
//!                          ┌─────────────┐
//!                          │ User Query  │
//!                          └──────┬──────┘
//!                                 │ validate, clamp top_k
//!                    ┌────────────┴────────────┐
//!                    ▼                         ▼
//!           ┌────────────────┐       ┌─────────────────┐
//!           │ Semantic       │       │ Keyword         │
//!           │ cosine > 0.5   │       │ trigram or BM25 │
//!           │ 2×top_k        │       │ > 0.1, 2×top_k  │
//!           └───────┬────────┘       └────────┬────────┘
//!                   └────────────┬────────────┘
//!                                ▼
//!                  ┌───────────────────────┐
//!                  │ Weighted fusion       │
//!                  │ 0.7·sem + 0.3·kw      │
//!                  │ dedup by chunk id     │
//!                  └───────────┬───────────┘
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │ Cross-encoder rerank  │
//!                  │ 0.7·rerank + 0.3·fused│
//!                  │ falls back on failure │
//!                  └───────────┬───────────┘
//!                              ▼
//!                  ┌───────────────────────┐
//!                  │ Final Results         │
//!                  └───────────────────────┘
//! ```
//!
//! ## Module Overview
//!
//! - [`config`] - Environment-based configuration with validation
//! - [`error`] - `SearchError`, the pipeline's error taxonomy
//! - [`models`] - `Chunk`, `ScoredResult`, `ChunkFilter` and HTTP request/response types
//! - [`search::store`] - In-memory chunk store with embeddings and disk persistence
//! - [`search::vector`] - Semantic retriever (cosine similarity)
//! - [`search::trigram`] - Keyword retriever using trigram similarity
//! - [`search::bm25`] - Keyword retriever backed by a tantivy BM25 index
//! - [`search::hybrid`] - Weighted fusion and the query orchestrator
//! - [`llm::embeddings`] - Remote embeddings (OpenAI or Ollama) with local fallback
//! - [`llm::local_embed`] - fastembed text embedding model
//! - [`llm::cross_encoder`] - Remote and local cross-encoder relevance models
//! - [`llm::rerank`] - Lazily loaded reranker with score blending
//! - [`api`] - Axum HTTP handlers for search, embeddings and documents
//! - [`state`] - Shared application state wiring the pipeline together

pub mod api;
pub mod config;
pub mod error;
pub mod llm;
pub mod models;
pub mod search;
pub mod state;
