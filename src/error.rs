use axum::http::StatusCode;
use thiserror::Error;

/// Failures surfaced by the retrieval pipeline.
///
/// Only `InvalidInput` is shown to callers verbatim. Everything else is
/// reported as a generic internal error at the HTTP boundary.
#[derive(Debug, Error)]
pub enum SearchError {
    /// Empty or malformed query/text input, rejected before any retrieval work.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The chunk store, vector scan or keyword index failed.
    #[error("retrieval failed: {0}")]
    Retrieval(String),

    /// Both the remote embedding API and the local fallback model failed.
    #[error("embedding failed: {0}")]
    Embedding(String),

    /// The relevance model could not be loaded or could not score.
    /// The reranker recovers from this itself; it never reaches a caller.
    #[error("rerank failed: {0}")]
    Rerank(String),
}

pub type Result<T> = std::result::Result<T, SearchError>;

impl SearchError {
    pub fn retrieval(err: impl std::fmt::Display) -> Self {
        Self::Retrieval(format!("{err:#}"))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            SearchError::InvalidInput(_) => StatusCode::BAD_REQUEST,
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    /// Message safe to return to an HTTP client.
    pub fn public_message(&self) -> String {
        match self {
            SearchError::InvalidInput(msg) => msg.clone(),
            _ => "Internal server error".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invalid_input_maps_to_bad_request() {
        let err = SearchError::InvalidInput("Query is required".into());
        assert_eq!(err.status_code(), StatusCode::BAD_REQUEST);
        assert_eq!(err.public_message(), "Query is required");
    }

    #[test]
    fn test_internal_errors_hide_detail() {
        let err = SearchError::retrieval(anyhow::anyhow!("index at /var/data is corrupt"));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.public_message(), "Internal server error");
        assert!(err.to_string().contains("corrupt"));
    }
}
