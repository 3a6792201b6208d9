use std::time::Duration;

use async_trait::async_trait;
use reqwest::Client;
use serde_json::{json, Value};

use super::{ChatMessage, ChatProvider};
use crate::core::errors::ApiError;

/// Chat client for any OpenAI-compatible `/v1/chat/completions` endpoint.
#[derive(Clone)]
pub struct OpenAiChatProvider {
    base_url: String,
    api_key: Option<String>,
    model: String,
    temperature: f32,
    client: Client,
}

impl OpenAiChatProvider {
    pub fn new(
        base_url: &str,
        api_key: Option<String>,
        model: &str,
        temperature: f32,
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
            temperature,
            client,
        })
    }
}

#[async_trait]
impl ChatProvider for OpenAiChatProvider {
    fn name(&self) -> &str {
        "openai"
    }

    async fn chat(&self, messages: &[ChatMessage]) -> Result<String, ApiError> {
        let url = format!("{}/v1/chat/completions", self.base_url);

        let body = json!({
            "model": self.model,
            "messages": messages,
            "temperature": self.temperature,
            "stream": false,
        });

        let mut request = self.client.post(&url).json(&body);
        if let Some(key) = &self.api_key {
            request = request.bearer_auth(key);
        }

        let res = request.send().await.map_err(|e| {
            if e.is_timeout() {
                ApiError::Generation("generation request timed out".to_string())
            } else {
                ApiError::generation(e)
            }
        })?;

        if !res.status().is_success() {
            // Rate limits and provider faults surface with the provider's
            // own message; the caller decides whether to retry.
            let status = res.status();
            let text = res.text().await.unwrap_or_default();
            return Err(ApiError::Generation(format!(
                "chat endpoint returned {}: {}",
                status, text
            )));
        }

        let payload: Value = res.json().await.map_err(ApiError::generation)?;
        let content = payload["choices"][0]["message"]["content"]
            .as_str()
            .ok_or_else(|| ApiError::Generation("malformed chat response".to_string()))?;

        Ok(content.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    #[ignore] // needs a running OpenAI-compatible server on localhost:1234
    async fn live_chat_answers() {
        let provider = OpenAiChatProvider::new(
            "http://localhost:1234",
            None,
            "gpt-4o-mini",
            0.3,
            Duration::from_secs(30),
        )
        .unwrap();
        let answer = provider
            .chat(&[ChatMessage::user("Reply with the single word: pong")])
            .await
            .unwrap();
        assert!(!answer.is_empty());
    }
}
