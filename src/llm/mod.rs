//! Model-backed stages: embeddings and cross-encoder reranking.

pub mod cross_encoder;
pub mod embeddings;
pub mod local_embed;
pub mod rerank;
