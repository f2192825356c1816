//! Error taxonomy for the retrieval core.
//!
//! Every fallible library operation returns [`RagError`]. The variants map
//! onto how a caller should react:
//!
//! | Variant | Meaning | Retried? |
//! |---------|---------|----------|
//! | [`Configuration`](RagError::Configuration) | bad dimension, overlap ≥ target, model mismatch | never |
//! | [`Validation`](RagError::Validation) | caller bug: empty query, chunk without embedding | never |
//! | [`EmbeddingService`](RagError::EmbeddingService) | provider still failing after retries | already retried |
//! | [`Storage`](RagError::Storage) | SQLite failure | never |
//!
//! Context truncation is *not* an error; see
//! [`TruncationNotice`](crate::context::TruncationNotice).

use thiserror::Error;

use crate::embedding::ProviderError;

#[derive(Debug, Error)]
pub enum RagError {
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("embedding service failed after {attempts} attempt(s): {source}")]
    EmbeddingService {
        attempts: u32,
        #[source]
        source: ProviderError,
    },

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("text extraction failed: {0}")]
    Extraction(String),
}

impl RagError {
    pub(crate) fn config(msg: impl Into<String>) -> Self {
        RagError::Configuration(msg.into())
    }

    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        RagError::Validation(msg.into())
    }

    /// True when an embedding call ultimately failed because the provider
    /// did not answer within the configured timeout.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            RagError::EmbeddingService {
                source: ProviderError::Timeout(_),
                ..
            }
        )
    }
}

pub type Result<T> = std::result::Result<T, RagError>;
