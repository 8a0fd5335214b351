use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Where the chunk store and keyword index are kept
    pub data_dir: PathBuf,
    /// Server bind address
    pub bind_addr: String,
    /// Origins allowed by the CORS layer
    pub allowed_origins: Vec<String>,
    /// Logging configuration
    pub log: LogConfig,
    /// Embedding provider configuration
    pub embedding: EmbeddingConfig,
    /// Retrieval, fusion and rerank limits
    pub search: SearchConfig,
    /// Cross-encoder reranker configuration
    pub reranker: RerankerConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Default filter directive when `RUST_LOG` is not set
    pub level: String,
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmbeddingConfig {
    /// "openai" or "ollama"
    pub provider: String,
    /// Base URL for the remote embedding API
    pub base_url: String,
    /// Remote embedding model name
    pub model: String,
    /// Dimension of the remote model; vectors of any other size are not stored
    pub dimension: usize,
    /// API key (only needed for cloud providers)
    pub api_key: Option<String>,
    /// Texts per remote request
    pub batch_size: usize,
    /// Deadline for one remote call before the local model takes over
    pub timeout_secs: u64,
    /// Local fallback model, run through fastembed
    pub local_model: String,
}

/// Which lexical scorer backs keyword search.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum KeywordBackend {
    /// Trigram similarity over the chunk store
    Trigram,
    /// BM25 over a tantivy index
    Bm25,
}

impl FromStr for KeywordBackend {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trigram" | "trgm" => Ok(Self::Trigram),
            "bm25" | "tantivy" => Ok(Self::Bm25),
            other => Err(format!("unknown keyword backend: {other}")),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SearchConfig {
    /// Weight of the semantic score in the fused score
    pub semantic_weight: f32,
    /// Weight of the keyword score in the fused score
    pub keyword_weight: f32,
    /// Semantic matches must score strictly above this
    pub semantic_threshold: f32,
    /// Keyword matches must score strictly above this
    pub keyword_threshold: f32,
    pub keyword_backend: KeywordBackend,
    /// top_k used when a request does not specify one
    pub default_top_k: usize,
    /// Requests asking for more are clamped to this
    pub max_top_k: usize,
    /// Upper bound on results coming out of the reranker
    pub rerank_top_k: usize,
    /// Deadline for the concurrent retrieval fan-out
    pub timeout_secs: u64,
}

/// Configuration for the cross-encoder reranker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RerankerConfig {
    /// Base URL of an OpenAI-compatible `/v1/rerank` endpoint.
    /// If None, the local fastembed cross-encoder is used.
    pub base_url: Option<String>,
    /// Model name to send in the rerank request.
    pub model: Option<String>,
    /// Request timeout in seconds (capped at 30).
    pub timeout_secs: u64,
    /// Local cross-encoder model, run through fastembed
    pub local_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            data_dir: PathBuf::from("./data"),
            bind_addr: "0.0.0.0:8000".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:8080".to_string(),
            ],
            log: LogConfig::default(),
            embedding: EmbeddingConfig::default(),
            search: SearchConfig::default(),
            reranker: RerankerConfig::default(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
        }
    }
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "openai".to_string(),
            base_url: "https://api.openai.com".to_string(),
            model: "text-embedding-3-small".to_string(),
            dimension: 1536,
            api_key: None,
            batch_size: 50,
            timeout_secs: 10,
            local_model: "all-MiniLM-L6-v2".to_string(),
        }
    }
}

impl Default for SearchConfig {
    fn default() -> Self {
        Self {
            semantic_weight: 0.7,
            keyword_weight: 0.3,
            semantic_threshold: 0.5,
            keyword_threshold: 0.1,
            keyword_backend: KeywordBackend::Trigram,
            default_top_k: 10,
            max_top_k: 100,
            rerank_top_k: 10,
            timeout_secs: 30,
        }
    }
}

impl Default for RerankerConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            model: None,
            timeout_secs: 10,
            local_model: "BAAI/bge-reranker-base".to_string(),
        }
    }
}

/// Reads one variable; `std::env::var` in production, a map in tests.
type Lookup<'a> = &'a dyn Fn(&str) -> Option<String>;

fn env_lookup(key: &str) -> Option<String> {
    std::env::var(key).ok()
}

fn parse_var<T>(var: Lookup, key: &str) -> anyhow::Result<Option<T>>
where
    T: FromStr,
    T::Err: std::fmt::Display,
{
    match var(key) {
        None => Ok(None),
        Some(raw) => raw
            .trim()
            .parse()
            .map(Some)
            .map_err(|e| anyhow::anyhow!("invalid {key}={raw:?}: {e}")),
    }
}

impl LogConfig {
    /// Logging settings only, so tracing can start before the rest of the
    /// configuration is read.
    pub fn from_env() -> Self {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(var: Lookup) -> Self {
        let mut log = Self::default();
        if let Some(level) = var("RAG_LOG_LEVEL") {
            log.level = level.to_lowercase();
        }
        if let Some(format) = var("RAG_LOG_FORMAT") {
            log.json = format.eq_ignore_ascii_case("json");
        }
        log
    }
}

impl Config {
    /// Defaults overridden by environment variables. Values that do not
    /// parse are an error rather than silently replaced.
    pub fn from_env() -> anyhow::Result<Self> {
        Self::from_lookup(&env_lookup)
    }

    fn from_lookup(var: Lookup) -> anyhow::Result<Self> {
        let mut config = Self {
            log: LogConfig::from_lookup(var),
            ..Self::default()
        };

        if let Some(dir) = var("RAG_DATA_DIR") {
            config.data_dir = PathBuf::from(dir);
        }
        if let Some(addr) = var("RAG_BIND_ADDR") {
            config.bind_addr = addr;
        }
        if let Some(origins) = var("RAG_ALLOWED_ORIGINS") {
            config.allowed_origins = origins
                .split(',')
                .map(|o| o.trim().to_string())
                .filter(|o| !o.is_empty())
                .collect();
        }

        // Embedding
        if let Some(provider) = var("EMBEDDING_PROVIDER") {
            config.embedding.provider = provider.to_lowercase();
        }
        if let Some(url) = var("EMBEDDING_BASE_URL") {
            config.embedding.base_url = url;
        }
        if let Some(model) = var("EMBEDDING_MODEL") {
            config.embedding.model = model;
        }
        if let Some(dim) = parse_var(var, "EMBEDDING_DIMENSION")? {
            config.embedding.dimension = dim;
        }
        if let Some(key) = var("EMBEDDING_API_KEY").or_else(|| var("OPENAI_API_KEY")) {
            config.embedding.api_key = Some(key);
        }
        if let Some(size) = parse_var(var, "EMBEDDING_BATCH_SIZE")? {
            config.embedding.batch_size = size;
        }
        if let Some(secs) = parse_var(var, "EMBEDDING_TIMEOUT_SECS")? {
            config.embedding.timeout_secs = secs;
        }
        if let Some(model) = var("LOCAL_EMBEDDING_MODEL") {
            config.embedding.local_model = model;
        }

        // Search
        if let Some(w) = parse_var(var, "SEMANTIC_SEARCH_WEIGHT")? {
            config.search.semantic_weight = w;
        }
        if let Some(w) = parse_var(var, "KEYWORD_SEARCH_WEIGHT")? {
            config.search.keyword_weight = w;
        }
        if let Some(t) = parse_var(var, "SEMANTIC_SIMILARITY_THRESHOLD")? {
            config.search.semantic_threshold = t;
        }
        if let Some(t) = parse_var(var, "KEYWORD_SIMILARITY_THRESHOLD")? {
            config.search.keyword_threshold = t;
        }
        if let Some(backend) = parse_var(var, "KEYWORD_BACKEND")? {
            config.search.keyword_backend = backend;
        }
        if let Some(k) = parse_var(var, "TOP_K_RETRIEVAL")? {
            config.search.default_top_k = k;
        }
        if let Some(k) = parse_var(var, "MAX_TOP_K")? {
            config.search.max_top_k = k;
        }
        if let Some(k) = parse_var(var, "RERANK_TOP_K")? {
            config.search.rerank_top_k = k;
        }
        if let Some(secs) = parse_var(var, "SEARCH_TIMEOUT_SECS")? {
            config.search.timeout_secs = secs;
        }

        // Reranker
        if let Some(url) = var("RERANKER_BASE_URL") {
            config.reranker.base_url = Some(url);
        }
        if let Some(model) = var("RERANKER_MODEL") {
            config.reranker.model = Some(model);
        }
        if let Some(v) = parse_var::<u64>(var, "RERANKER_TIMEOUT_SECS")? {
            config.reranker.timeout_secs = v.min(30);
        }
        if let Some(model) = var("LOCAL_RERANKER_MODEL") {
            config.reranker.local_model = model;
        }

        Ok(config)
    }

    /// Reject settings the pipeline cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        let s = &self.search;
        for (name, w) in [
            ("semantic_weight", s.semantic_weight),
            ("keyword_weight", s.keyword_weight),
        ] {
            if !w.is_finite() || w < 0.0 {
                anyhow::bail!("{name} must be a non-negative number, got {w}");
            }
        }
        for (name, t) in [
            ("semantic_threshold", s.semantic_threshold),
            ("keyword_threshold", s.keyword_threshold),
        ] {
            if !(-1.0..=1.0).contains(&t) {
                anyhow::bail!("{name} must be within [-1, 1], got {t}");
            }
        }
        if s.default_top_k == 0 || s.max_top_k == 0 || s.rerank_top_k == 0 {
            anyhow::bail!("top_k limits must be positive");
        }
        if s.default_top_k > s.max_top_k {
            anyhow::bail!(
                "default_top_k ({}) exceeds max_top_k ({})",
                s.default_top_k,
                s.max_top_k
            );
        }
        if s.timeout_secs == 0 {
            anyhow::bail!("search timeout_secs must be positive");
        }
        let e = &self.embedding;
        if e.batch_size == 0 {
            anyhow::bail!("embedding batch_size must be positive");
        }
        if e.dimension == 0 {
            anyhow::bail!("embedding dimension must be positive");
        }
        // the query embedding runs inside the retrieval deadline
        if e.timeout_secs == 0 || e.timeout_secs >= s.timeout_secs {
            anyhow::bail!(
                "embedding timeout_secs ({}) must be positive and below search timeout_secs ({})",
                e.timeout_secs,
                s.timeout_secs
            );
        }
        match self.embedding.provider.as_str() {
            "openai" | "ollama" => {}
            other => anyhow::bail!("Unknown embedding provider: {other}"),
        }
        Ok(())
    }

    pub fn store_dir(&self) -> PathBuf {
        self.data_dir.join("store")
    }

    pub fn index_dir(&self) -> PathBuf {
        self.data_dir.join("index")
    }
}
