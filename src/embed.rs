//! Batched embedding generation with timeout and retry.
//!
//! [`EmbeddingGenerator`] wraps an [`EmbeddingProvider`] and owns the
//! policy around it:
//!
//! - inputs are split into batches of `min(batch_size, provider.max_batch_size())`
//! - up to `batch_concurrency` batches are in flight; results are reassembled
//!   in input order
//! - every call is bounded by `timeout_secs`
//! - HTTP 429, 5xx, network errors and timeouts are retried with exponential
//!   backoff (`retry_base_ms`, `2×`, `4×`, … capped at `32×`); anything else
//!   fails immediately
//!
//! Vectors are attached to chunks only after every batch has succeeded, so a
//! failed run leaves the input untouched.

use std::sync::Arc;
use std::time::Duration;

use futures_util::stream::{self, StreamExt, TryStreamExt};

use crate::config::EmbeddingConfig;
use crate::embedding::{create_provider, EmbeddingProvider, ProviderError};
use crate::error::{RagError, Result};
use crate::models::Chunk;

pub struct EmbeddingGenerator {
    provider: Arc<dyn EmbeddingProvider>,
    batch_size: usize,
    concurrency: usize,
    max_retries: u32,
    retry_base: Duration,
    timeout: Duration,
}

impl EmbeddingGenerator {
    pub fn new(provider: Arc<dyn EmbeddingProvider>, config: &EmbeddingConfig) -> Self {
        let batch_size = config.batch_size.max(1).min(provider.max_batch_size().max(1));
        Self {
            provider,
            batch_size,
            concurrency: config.batch_concurrency.max(1),
            max_retries: config.max_retries,
            retry_base: Duration::from_millis(config.retry_base_ms),
            timeout: Duration::from_secs(config.timeout_secs),
        }
    }

    /// Build the provider named in `config` and wrap it.
    pub fn from_config(config: &EmbeddingConfig) -> Result<Self> {
        let provider = create_provider(config)?;
        Ok(Self::new(provider, config))
    }

    /// Override the per-call timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn model_name(&self) -> &str {
        self.provider.model_name()
    }

    pub fn dims(&self) -> usize {
        self.provider.dims()
    }

    /// Effective batch size after applying the provider limit.
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Embed every chunk's text and attach the vectors in place.
    pub async fn generate_embeddings(&self, chunks: &mut [Chunk]) -> Result<()> {
        if chunks.is_empty() {
            return Ok(());
        }
        if let Some(blank) = chunks.iter().find(|c| c.text.trim().is_empty()) {
            return Err(RagError::validation(format!(
                "chunk {} has empty text",
                blank.chunk_id
            )));
        }

        let texts: Vec<String> = chunks.iter().map(|c| c.text.clone()).collect();
        let vectors = self.embed_texts(&texts).await?;

        for (chunk, vector) in chunks.iter_mut().zip(vectors) {
            chunk.embedding = Some(vector);
        }

        tracing::info!(
            chunks = chunks.len(),
            model = self.model_name(),
            "generated embeddings"
        );
        Ok(())
    }

    /// Embed a single query string.
    pub async fn embed_query(&self, text: &str) -> Result<Vec<f32>> {
        if text.trim().is_empty() {
            return Err(RagError::validation("query text is empty"));
        }
        let mut vectors = self.embed_batch(0, &[text.to_string()]).await?;
        vectors
            .pop()
            .ok_or_else(|| RagError::validation("empty embedding response"))
    }

    /// Embed `texts` in batches, returning one vector per input in order.
    pub async fn embed_texts(&self, texts: &[String]) -> Result<Vec<Vec<f32>>> {
        let batches: Vec<Vec<Vec<f32>>> = stream::iter(texts.chunks(self.batch_size).enumerate())
            .map(|(index, batch)| self.embed_batch(index, batch))
            .buffered(self.concurrency)
            .try_collect()
            .await?;

        Ok(batches.into_iter().flatten().collect())
    }

    async fn embed_batch(&self, index: usize, batch: &[String]) -> Result<Vec<Vec<f32>>> {
        let mut attempt: u32 = 0;

        loop {
            attempt += 1;

            let outcome = match tokio::time::timeout(self.timeout, self.provider.embed(batch)).await
            {
                Ok(result) => result,
                Err(_) => Err(ProviderError::Timeout(self.timeout)),
            };

            match outcome {
                Ok(vectors) => {
                    tracing::debug!(batch = index, size = batch.len(), attempt, "embedded batch");
                    return self.check_batch(batch.len(), vectors, attempt);
                }
                Err(err) if err.is_retryable() && attempt <= self.max_retries => {
                    let delay = self.backoff(attempt);
                    tracing::warn!(
                        batch = index,
                        attempt,
                        delay_ms = delay.as_millis() as u64,
                        error = %err,
                        "embedding batch failed, retrying"
                    );
                    tokio::time::sleep(delay).await;
                }
                Err(err) => {
                    return Err(RagError::EmbeddingService {
                        attempts: attempt,
                        source: err,
                    })
                }
            }
        }
    }

    fn backoff(&self, attempt: u32) -> Duration {
        self.retry_base * (1u32 << (attempt - 1).min(5))
    }

    fn check_batch(
        &self,
        expected: usize,
        vectors: Vec<Vec<f32>>,
        attempts: u32,
    ) -> Result<Vec<Vec<f32>>> {
        if vectors.len() != expected {
            return Err(RagError::EmbeddingService {
                attempts,
                source: ProviderError::InvalidResponse(format!(
                    "expected {} vectors, got {}",
                    expected,
                    vectors.len()
                )),
            });
        }
        let dims = self.dims();
        if let Some(bad) = vectors.iter().find(|v| v.len() != dims) {
            return Err(RagError::config(format!(
                "provider returned {}-dimensional vector, expected {}",
                bad.len(),
                dims
            )));
        }
        Ok(vectors)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use std::collections::VecDeque;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    /// Replays a script of call outcomes (`Some(err)` fails, `None`
    /// succeeds), then embeds each text as `[len, 1.0]`.
    struct ScriptedProvider {
        script: Mutex<VecDeque<Option<ProviderError>>>,
        calls: AtomicUsize,
        delay: Duration,
        dims: usize,
        output_dims: usize,
    }

    impl ScriptedProvider {
        fn new(script: Vec<Option<ProviderError>>) -> Self {
            Self {
                script: Mutex::new(script.into()),
                calls: AtomicUsize::new(0),
                delay: Duration::ZERO,
                dims: 2,
                output_dims: 2,
            }
        }
    }

    #[async_trait]
    impl EmbeddingProvider for ScriptedProvider {
        fn model_name(&self) -> &str {
            "scripted"
        }
        fn dims(&self) -> usize {
            self.dims
        }
        fn max_batch_size(&self) -> usize {
            4
        }
        async fn embed(
            &self,
            texts: &[String],
        ) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if let Some(Some(err)) = self.script.lock().unwrap().pop_front() {
                return Err(err);
            }
            Ok(texts
                .iter()
                .map(|t| {
                    let mut v = vec![t.len() as f32, 1.0];
                    v.resize(self.output_dims, 0.0);
                    v
                })
                .collect())
        }
    }

    fn fast_config() -> EmbeddingConfig {
        EmbeddingConfig {
            provider: "scripted".to_string(),
            batch_size: 64,
            max_retries: 3,
            retry_base_ms: 1,
            timeout_secs: 5,
            ..EmbeddingConfig::default()
        }
    }

    fn chunk(text: &str) -> Chunk {
        Chunk {
            chunk_id: format!("c_{}", text.len()),
            text: text.to_string(),
            source_document: "doc.txt".to_string(),
            page_numbers: vec![1],
            position: 0,
            token_count: 1,
            char_count: text.len(),
            overlap_len: 0,
            overlap_with_previous: None,
            overlap_with_next: None,
            hash: String::new(),
            embedding: None,
        }
    }

    fn server_error() -> ProviderError {
        ProviderError::Http {
            status: 503,
            body: "overloaded".to_string(),
        }
    }

    #[test]
    fn test_batch_size_clamped_to_provider_limit() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let generator = EmbeddingGenerator::new(provider, &fast_config());
        assert_eq!(generator.batch_size(), 4);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let mut config = fast_config();
        config.retry_base_ms = 1000;
        let generator = EmbeddingGenerator::new(provider, &config);
        assert_eq!(generator.backoff(1), Duration::from_secs(1));
        assert_eq!(generator.backoff(2), Duration::from_secs(2));
        assert_eq!(generator.backoff(4), Duration::from_secs(8));
        assert_eq!(generator.backoff(9), Duration::from_secs(32));
    }

    #[tokio::test]
    async fn test_attaches_vectors_in_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let generator = EmbeddingGenerator::new(provider.clone(), &fast_config());

        let mut chunks: Vec<Chunk> = (1..=10).map(|n| chunk(&"x".repeat(n))).collect();
        generator.generate_embeddings(&mut chunks).await.unwrap();

        for (i, c) in chunks.iter().enumerate() {
            assert_eq!(c.embedding.as_deref(), Some(&[(i + 1) as f32, 1.0][..]));
        }
        // 10 inputs in batches of 4
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_concurrent_batches_keep_order() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let mut config = fast_config();
        config.batch_concurrency = 3;
        let generator = EmbeddingGenerator::new(provider, &config);

        let texts: Vec<String> = (1..=11).map(|n| "y".repeat(n)).collect();
        let vectors = generator.embed_texts(&texts).await.unwrap();
        let lengths: Vec<f32> = vectors.iter().map(|v| v[0]).collect();
        assert_eq!(lengths, (1..=11).map(|n| n as f32).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_retries_transient_failures() {
        let provider = Arc::new(ScriptedProvider::new(vec![
            Some(server_error()),
            Some(server_error()),
        ]));
        let generator = EmbeddingGenerator::new(provider.clone(), &fast_config());

        let vector = generator.embed_query("hello").await.unwrap();
        assert_eq!(vector, vec![5.0, 1.0]);
        assert_eq!(provider.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_gives_up_after_max_retries() {
        let failures = (0..10).map(|_| Some(server_error())).collect();
        let provider = Arc::new(ScriptedProvider::new(failures));
        let generator = EmbeddingGenerator::new(provider.clone(), &fast_config());

        let err = generator.embed_query("hello").await.unwrap_err();
        match err {
            RagError::EmbeddingService { attempts, .. } => assert_eq!(attempts, 4),
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(provider.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_client_error_not_retried() {
        let provider = Arc::new(ScriptedProvider::new(vec![Some(ProviderError::Http {
            status: 401,
            body: "invalid api key".to_string(),
        })]));
        let generator = EmbeddingGenerator::new(provider.clone(), &fast_config());

        let err = generator.embed_query("hello").await.unwrap_err();
        assert!(matches!(err, RagError::EmbeddingService { attempts: 1, .. }));
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_timeout_surfaces_as_timeout() {
        let mut provider = ScriptedProvider::new(vec![]);
        provider.delay = Duration::from_secs(5);
        let mut config = fast_config();
        config.max_retries = 1;
        let generator = EmbeddingGenerator::new(Arc::new(provider), &config)
            .with_timeout(Duration::from_millis(20));

        let err = generator.embed_query("slow").await.unwrap_err();
        assert!(err.is_timeout());
    }

    #[tokio::test]
    async fn test_failure_leaves_chunks_untouched() {
        // Batch 1 succeeds, batch 2 hits a 400.
        let provider = Arc::new(ScriptedProvider::new(vec![
            None,
            Some(ProviderError::Http {
                status: 400,
                body: "too long".to_string(),
            }),
        ]));
        let generator = EmbeddingGenerator::new(provider, &fast_config());

        let mut chunks: Vec<Chunk> = (1..=6).map(|n| chunk(&"z".repeat(n))).collect();
        assert!(generator.generate_embeddings(&mut chunks).await.is_err());
        assert!(chunks.iter().all(|c| c.embedding.is_none()));
    }

    #[tokio::test]
    async fn test_dimension_mismatch_is_configuration_error() {
        let mut provider = ScriptedProvider::new(vec![]);
        provider.dims = 3;
        let generator = EmbeddingGenerator::new(Arc::new(provider), &fast_config());

        let err = generator.embed_query("abc").await.unwrap_err();
        assert!(matches!(err, RagError::Configuration(_)));
    }

    #[tokio::test]
    async fn test_empty_inputs() {
        let provider = Arc::new(ScriptedProvider::new(vec![]));
        let generator = EmbeddingGenerator::new(provider.clone(), &fast_config());

        let err = generator.embed_query("   ").await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));

        let mut chunks = vec![chunk("ok"), chunk(" ")];
        let err = generator.generate_embeddings(&mut chunks).await.unwrap_err();
        assert!(matches!(err, RagError::Validation(_)));

        generator.generate_embeddings(&mut []).await.unwrap();
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }
}
