use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

use crate::context::{ChunkOrdering, ContextOptions};
use crate::error::RagError;
use crate::retriever::RetrieveOptions;

/// OpenAI accepts at most this many inputs per embeddings request.
pub const OPENAI_MAX_BATCH: usize = 2048;

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub store: StoreConfig,
    #[serde(default)]
    pub chunking: ChunkingConfig,
    #[serde(default)]
    pub embedding: EmbeddingConfig,
    #[serde(default)]
    pub retrieval: RetrievalConfig,
    #[serde(default)]
    pub context: ContextConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct StoreConfig {
    #[serde(default = "default_store_path")]
    pub path: PathBuf,
    #[serde(default = "default_collection")]
    pub collection: String,
    #[serde(default = "default_dims")]
    pub dims: usize,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            path: default_store_path(),
            collection: default_collection(),
            dims: default_dims(),
        }
    }
}

fn default_store_path() -> PathBuf {
    PathBuf::from("./data/ankiai.sqlite")
}
fn default_collection() -> String {
    "ankiai_chunks".to_string()
}
fn default_dims() -> usize {
    1536
}

#[derive(Debug, Deserialize, Clone)]
pub struct ChunkingConfig {
    #[serde(default = "default_target_tokens")]
    pub target_tokens: usize,
    #[serde(default = "default_overlap_tokens")]
    pub overlap_tokens: usize,
    /// Hard cap on a chunk, overlap included. Defaults to 1.5 ×
    /// `target_tokens`, raised to `target_tokens + overlap_tokens` when the
    /// overlap is larger than half the target.
    #[serde(default)]
    pub max_chunk_tokens: Option<usize>,
}

impl Default for ChunkingConfig {
    fn default() -> Self {
        Self {
            target_tokens: default_target_tokens(),
            overlap_tokens: default_overlap_tokens(),
            max_chunk_tokens: None,
        }
    }
}

fn default_target_tokens() -> usize {
    800
}
fn default_overlap_tokens() -> usize {
    100
}

impl ChunkingConfig {
    pub fn new(target_tokens: usize, overlap_tokens: usize) -> Self {
        Self {
            target_tokens,
            overlap_tokens,
            max_chunk_tokens: None,
        }
    }

    pub fn max_chunk_tokens(&self) -> usize {
        self.max_chunk_tokens.unwrap_or(
            (self.target_tokens + self.target_tokens / 2)
                .max(self.target_tokens + self.overlap_tokens),
        )
    }

    /// Largest span of new text a chunk may carry so that the full overlap
    /// still fits under [`max_chunk_tokens`](Self::max_chunk_tokens).
    pub fn content_cap(&self) -> usize {
        self.max_chunk_tokens().saturating_sub(self.overlap_tokens)
    }

    pub fn validate(&self) -> crate::error::Result<()> {
        if self.target_tokens == 0 {
            return Err(RagError::config("chunking.target_tokens must be > 0"));
        }
        if self.overlap_tokens >= self.target_tokens {
            return Err(RagError::config(format!(
                "chunking.overlap_tokens ({}) must be less than target_tokens ({})",
                self.overlap_tokens, self.target_tokens
            )));
        }
        if self.max_chunk_tokens() < self.target_tokens + self.overlap_tokens {
            return Err(RagError::config(format!(
                "chunking.max_chunk_tokens ({}) must be >= target_tokens + overlap_tokens ({})",
                self.max_chunk_tokens(),
                self.target_tokens + self.overlap_tokens
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct EmbeddingConfig {
    #[serde(default = "default_provider")]
    pub provider: String,
    #[serde(default)]
    pub model: Option<String>,
    #[serde(default)]
    pub dims: Option<usize>,
    #[serde(default = "default_batch_size")]
    pub batch_size: usize,
    /// Number of batches allowed in flight at once.
    #[serde(default = "default_batch_concurrency")]
    pub batch_concurrency: usize,
    #[serde(default = "default_max_retries")]
    pub max_retries: u32,
    /// First backoff delay; doubles on every retry.
    #[serde(default = "default_retry_base_ms")]
    pub retry_base_ms: u64,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Base URL override (OpenAI-compatible endpoint or Ollama host).
    #[serde(default)]
    pub url: Option<String>,
    /// API key; falls back to `OPENAI_API_KEY` when unset.
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for EmbeddingConfig {
    fn default() -> Self {
        Self {
            provider: "disabled".to_string(),
            model: None,
            dims: None,
            batch_size: default_batch_size(),
            batch_concurrency: default_batch_concurrency(),
            max_retries: default_max_retries(),
            retry_base_ms: default_retry_base_ms(),
            timeout_secs: default_timeout_secs(),
            url: None,
            api_key: None,
        }
    }
}

fn default_provider() -> String {
    "disabled".to_string()
}
fn default_batch_size() -> usize {
    64
}
fn default_batch_concurrency() -> usize {
    1
}
fn default_max_retries() -> u32 {
    3
}
fn default_retry_base_ms() -> u64 {
    1000
}
fn default_timeout_secs() -> u64 {
    30
}

impl EmbeddingConfig {
    pub fn is_enabled(&self) -> bool {
        self.provider != "disabled"
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct RetrievalConfig {
    #[serde(default = "default_top_k")]
    pub top_k: usize,
    #[serde(default)]
    pub min_score: f64,
}

impl Default for RetrievalConfig {
    fn default() -> Self {
        Self {
            top_k: default_top_k(),
            min_score: 0.0,
        }
    }
}

fn default_top_k() -> usize {
    5
}

impl RetrievalConfig {
    pub fn options(&self) -> RetrieveOptions {
        RetrieveOptions {
            top_k: self.top_k,
            min_score: self.min_score,
            source_filter: None,
        }
    }
}

#[derive(Debug, Deserialize, Clone)]
pub struct ContextConfig {
    #[serde(default)]
    pub ordering: ChunkOrdering,
    #[serde(default)]
    pub include_metadata: bool,
    /// Token budget for the assembled context; `0` means unbounded.
    #[serde(default = "default_context_max_tokens")]
    pub max_tokens: Option<usize>,
    #[serde(default = "default_separator")]
    pub separator: String,
}

impl Default for ContextConfig {
    fn default() -> Self {
        Self {
            ordering: ChunkOrdering::default(),
            include_metadata: false,
            max_tokens: default_context_max_tokens(),
            separator: default_separator(),
        }
    }
}

fn default_context_max_tokens() -> Option<usize> {
    Some(6000)
}
fn default_separator() -> String {
    "\n\n---\n\n".to_string()
}

impl ContextConfig {
    pub fn options(&self) -> ContextOptions {
        ContextOptions {
            include_metadata: self.include_metadata,
            ordering: self.ordering,
            separator: self.separator.clone(),
            max_tokens: self.max_tokens.filter(|&n| n > 0),
        }
    }
}

pub fn load_config(path: &Path) -> Result<Config> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;

    validate(&config)?;
    Ok(config)
}

/// Cross-field checks run after parsing.
pub fn validate(config: &Config) -> Result<()> {
    config.chunking.validate()?;

    if config.store.dims == 0 {
        anyhow::bail!("store.dims must be > 0");
    }
    if config.store.collection.trim().is_empty() {
        anyhow::bail!("store.collection must not be empty");
    }

    if config.retrieval.top_k < 1 {
        anyhow::bail!("retrieval.top_k must be >= 1");
    }
    if !(0.0..=1.0).contains(&config.retrieval.min_score) {
        anyhow::bail!("retrieval.min_score must be in [0.0, 1.0]");
    }


    let embedding = &config.embedding;
    if embedding.batch_size == 0 || embedding.batch_size > OPENAI_MAX_BATCH {
        anyhow::bail!("embedding.batch_size must be in 1..={}", OPENAI_MAX_BATCH);
    }
    if embedding.timeout_secs == 0 {
        anyhow::bail!("embedding.timeout_secs must be > 0");
    }
    if embedding.batch_concurrency == 0 {
        anyhow::bail!("embedding.batch_concurrency must be >= 1");
    }

    if embedding.is_enabled() {
        if embedding.dims.is_none() || embedding.dims == Some(0) {
            anyhow::bail!(
                "embedding.dims must be > 0 when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.model.is_none() && embedding.provider != "local" {
            anyhow::bail!(
                "embedding.model must be specified when provider is '{}'",
                embedding.provider
            );
        }
        if embedding.dims != Some(config.store.dims) {
            anyhow::bail!(
                "embedding.dims ({}) does not match store.dims ({})",
                embedding.dims.unwrap_or(0),
                config.store.dims
            );
        }
    }

    match embedding.provider.as_str() {
        "disabled" | "openai" | "ollama" | "local" => {}
        other => anyhow::bail!(
            "Unknown embedding provider: '{}'. Must be disabled, openai, ollama, or local.",
            other
        ),
    }

    Ok(())
}
