use std::time::Duration;

use async_trait::async_trait;

use super::{
    classify_reqwest, http_client, json_to_vec, required_dims, required_model, EmbeddingProvider,
    ProviderError,
};
use crate::config::{EmbeddingConfig, OPENAI_MAX_BATCH};
use crate::error::{RagError, Result};

const DEFAULT_BASE_URL: &str = "https://api.openai.com/v1";

/// Embedding provider using the OpenAI API (or any compatible endpoint).
///
/// Calls `POST {url}/embeddings`. The API key comes from
/// `embedding.api_key`, falling back to `OPENAI_API_KEY`.
pub struct OpenAIProvider {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
    model: String,
    dims: usize,
    timeout: Duration,
}

impl OpenAIProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = required_model(config, "OpenAI")?;
        let dims = required_dims(config, "OpenAI")?;

        let api_key = match &config.api_key {
            Some(key) => key.clone(),
            None => std::env::var("OPENAI_API_KEY").map_err(|_| {
                RagError::config("OPENAI_API_KEY not set and embedding.api_key missing")
            })?,
        };

        let base_url = config
            .url
            .as_deref()
            .unwrap_or(DEFAULT_BASE_URL)
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: http_client(config)?,
            base_url,
            api_key,
            model,
            dims,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAIProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }
    fn max_batch_size(&self) -> usize {
        OPENAI_MAX_BATCH
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/embeddings", self.base_url))
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| classify_reqwest(e, self.timeout))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ProviderError::Http {
                status: status.as_u16(),
                body,
            });
        }

        let json: serde_json::Value = response
            .json()
            .await
            .map_err(|e| classify_reqwest(e, self.timeout))?;
        parse_openai_response(&json, texts.len())
    }
}

/// Parse `data[].{index, embedding}`, placing each vector at its `index`.
fn parse_openai_response(
    json: &serde_json::Value,
    expected: usize,
) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    let data = json
        .get("data")
        .and_then(|d| d.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing data array".to_string()))?;

    if data.len() != expected {
        return Err(ProviderError::InvalidResponse(format!(
            "expected {} embeddings, got {}",
            expected,
            data.len()
        )));
    }

    let mut slots: Vec<Option<Vec<f32>>> = vec![None; expected];

    for (position, item) in data.iter().enumerate() {
        let index = match item.get("index") {
            Some(v) => v
                .as_u64()
                .ok_or_else(|| ProviderError::InvalidResponse("non-integer index".to_string()))?
                as usize,
            None => position,
        };
        let embedding = item
            .get("embedding")
            .ok_or_else(|| ProviderError::InvalidResponse("missing embedding".to_string()))?;

        let slot = slots.get_mut(index).ok_or_else(|| {
            ProviderError::InvalidResponse(format!("index {} out of range", index))
        })?;
        if slot.is_some() {
            return Err(ProviderError::InvalidResponse(format!(
                "duplicate index {}",
                index
            )));
        }
        *slot = Some(json_to_vec(embedding)?);
    }

    slots
        .into_iter()
        .map(|s| s.ok_or_else(|| ProviderError::InvalidResponse("missing index".to_string())))
        .collect()
}
