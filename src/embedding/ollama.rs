use std::time::Duration;

use async_trait::async_trait;

use super::{
    classify_reqwest, http_client, json_to_vec, required_dims, required_model, EmbeddingProvider,
    ProviderError,
};
use crate::config::EmbeddingConfig;
use crate::error::Result;

/// Embedding provider using a local Ollama instance.
///
/// Calls `POST /api/embed` on the configured URL (default:
/// `http://localhost:11434`). Requires an embedding model to be pulled
/// (e.g. `ollama pull nomic-embed-text`).
pub struct OllamaProvider {
    client: reqwest::Client,
    url: String,
    model: String,
    dims: usize,
    timeout: Duration,
}

impl OllamaProvider {
    pub fn new(config: &EmbeddingConfig) -> Result<Self> {
        let model = required_model(config, "Ollama")?;
        let dims = required_dims(config, "Ollama")?;
        let url = config
            .url
            .as_deref()
            .unwrap_or("http://localhost:11434")
            .trim_end_matches('/')
            .to_string();

        Ok(Self {
            client: http_client(config)?,
            url,
            model,
            dims,
            timeout: Duration::from_secs(config.timeout_secs),
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OllamaProvider {
    fn model_name(&self) -> &str {
        &self.model
    }
    fn dims(&self) -> usize {
        self.dims
    }

    async fn embed(&self, texts: &[String]) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
        let body = serde_json::json!({
            "model": self.model,
            "input": texts,
        });

        let response = self
            .client
            .post(format!("{}/api/embed", self.url))
            .header("Content-Type", "application/json")
            .json(&body)
            .send()
            .await
            .map_err(|e| match classify_reqwest(e, self.timeout) {
                ProviderError::Network(msg) => ProviderError::Network(format!(
                    "is Ollama running at {}? {}",
                    self.url, msg
                )),
                other => other,
            })?;

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
        parse_ollama_response(&json)
    }
}

fn parse_ollama_response(
    json: &serde_json::Value,
) -> std::result::Result<Vec<Vec<f32>>, ProviderError> {
    json.get("embeddings")
        .and_then(|e| e.as_array())
        .ok_or_else(|| ProviderError::InvalidResponse("missing embeddings array".to_string()))?
        .iter()
        .map(json_to_vec)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_ollama_response() {
        let body = serde_json::json!({"model": "m", "embeddings": [[0.5, 1.0], [2.0, 3.0]]});
        let vectors = parse_ollama_response(&body).unwrap();
        assert_eq!(vectors, vec![vec![0.5, 1.0], vec![2.0, 3.0]]);

        let bad = serde_json::json!({"embedding": [1.0]});
        assert!(parse_ollama_response(&bad).is_err());
    }
}
