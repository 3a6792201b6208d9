use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::EmbeddingProvider;
use crate::core::errors::ApiError;

/// Embedding client for any OpenAI-compatible `/v1/embeddings` endpoint
/// (OpenAI itself, LM Studio, llama-server and friends).
#[derive(Clone)]
pub struct OpenAiEmbeddingProvider {
    base_url: String,
    api_key: Option<String>,
    model: String,
    client: Client,
}

impl OpenAiEmbeddingProvider {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        timeout: Duration,
    ) -> Result<Self, ApiError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(ApiError::internal)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            api_key,
            model: model.to_string(),
            client,
        })
    }
}

#[async_trait]
impl EmbeddingProvider for OpenAiEmbeddingProvider {
    fn model(&self) -> &str {
        &self.model
    }

    async fn embed_batch(&self, texts: &[String]) -> Result<Vec<Vec<f32>>, ApiError> {
        if texts.is_empty() {
            return Ok(Vec::new());
        }
        if let Some(blank) = texts.iter().position(|t| t.trim().is_empty()) {
            return Err(ApiError::Embedding(format!(
                "cannot embed empty text (input {})",
                blank
            )));
        }

        let url = format!("{}/v1/embeddings", self.base_url);
        let body = json!({
            "model": self.model,
            "input": texts,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Embedding("embedding request timed out".to_string())
            } else {
                ApiError::embedding(e)
            }
        })?;

        if !res.status().is_success() {
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Embedding(format!(
                "embedding endpoint returned {}: {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::embedding)?;
        let data = payload["data"]
            .as_array()
            .ok_or_else(|| ApiError::Embedding("malformed embedding response".to_string()))?;

        if data.len() != texts.len() {
            return Err(ApiError::Embedding(format!(
                "embedding count mismatch: sent {} inputs, got {} vectors",
                texts.len(),
                data.len()
            )));
        }

        let mut embeddings = Vec::with_capacity(data.len());
        for item in data {
            let vals = item["embedding"]
                .as_array()
                .ok_or_else(|| ApiError::Embedding("malformed embedding response".to_string()))?;
            let vec: Vec<f32> = vals
                .iter()
                .filter_map(|v| v.as_f64().map(|f| f as f32))
                .collect();
            if vec.is_empty() {
                return Err(ApiError::Embedding("provider returned an empty vector".to_string()));
            }
            embeddings.push(vec);
        }

        let dim = embeddings[0].len();
        if embeddings.iter().any(|v| v.len() != dim) {
            return Err(ApiError::Embedding(
                "provider returned vectors of differing dimensions".to_string(),
            ));
        }

        Ok(embeddings)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn provider() -> OpenAiEmbeddingProvider {
        OpenAiEmbeddingProvider::new(
            "http://localhost:1234",
            None,
            "intfloat/multilingual-e5-large",
            Duration::from_secs(5),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn blank_input_is_rejected_before_any_request() {
        let err = provider()
            .embed_batch(&["   ".to_string()])
            .await
            .unwrap_err();
        assert!(matches!(err, ApiError::Embedding(_)));
    }

    #[tokio::test]
    async fn empty_batch_short_circuits() {
        let vectors = provider().embed_batch(&[]).await.unwrap();
        assert!(vectors.is_empty());
    }

    #[tokio::test]
    #[ignore] // needs a running OpenAI-compatible server on localhost:1234
    async fn live_embedding_has_consistent_dimensions() {
        let vectors = provider()
            .embed_batch(&["gacha pity".to_string(), "stamina regen".to_string()])
            .await
            .unwrap();
        assert_eq!(vectors.len(), 2);
        assert_eq!(vectors[0].len(), vectors[1].len());
    }
}
