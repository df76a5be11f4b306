//! Response generation against an OpenAI-compatible chat endpoint

use crate::context::summarizer::{ChatCompletionRequest, ChatCompletionResponse, ChatMessage};
use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use std::time::Duration;
use tracing::{debug, warn};

/// Produces the assistant's reply for a fully rendered prompt
#[async_trait]
pub trait Responder: Send + Sync {
    async fn respond(&self, prompt: &str) -> Result<String, ResponderError>;
}

#[derive(Debug, Clone)]
pub struct ResponderConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: usize,
    pub temperature: f32,
    pub max_tokens: Option<usize>,
}

impl Default for ResponderConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            timeout: Duration::from_secs(60),
            max_retries: 2,
            temperature: 0.7,
            max_tokens: None,
        }
    }
}

pub struct LlmResponder {
    client: Client,
    config: ResponderConfig,
}

impl LlmResponder {
    pub fn new(config: ResponderConfig) -> Result<Self, ResponderError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| ResponderError::InitializationError(e.to_string()))?;
        Ok(Self { client, config })
    }

    async fn attempt(&self, request: &ChatCompletionRequest) -> Result<String, ResponderError> {
        let mut req = self.client.post(&self.config.endpoint).json(request);
        if let Some(ref api_key) = self.config.api_key {
            req = req.bearer_auth(api_key.expose_secret());
        }

        let response = req
            .send()
            .await
            .map_err(|e| ResponderError::NetworkError(e.to_string()))?;

        if !response.status().is_success() {
            let status = response.status();
            let body = response.text().await.unwrap_or_default();
            return Err(ResponderError::ApiError(format!("HTTP {}: {}", status, body)));
        }

        let parsed: ChatCompletionResponse = response
            .json()
            .await
            .map_err(|e| ResponderError::ApiError(format!("Failed to parse response: {}", e)))?;

        parsed
            .choices
            .into_iter()
            .next()
            .map(|choice| choice.message.content)
            .ok_or(ResponderError::EmptyResponse)
    }
}

#[async_trait]
impl Responder for LlmResponder {
    async fn respond(&self, prompt: &str) -> Result<String, ResponderError> {
        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: prompt.to_string(),
            }],
            max_tokens: self.config.max_tokens,
            temperature: Some(self.config.temperature),
        };

        let attempts = self.config.max_retries.max(1);
        let mut last_error = ResponderError::EmptyResponse;
        for attempt in 0..attempts {
            if attempt > 0 {
                debug!("Retry attempt {} for response generation", attempt);
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }
            match self.attempt(&request).await {
                Ok(content) => return Ok(content),
                Err(e) => last_error = e,
            }
        }

        warn!("Response generation failed after {} attempts", attempts);
        Err(last_error)
    }
}

#[derive(Debug, thiserror::Error)]
pub enum ResponderError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Model returned no choices")]
    EmptyResponse,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn responder(url: String) -> LlmResponder {
        LlmResponder::new(ResponderConfig {
            endpoint: format!("{}/v1/chat/completions", url),
            max_retries: 1,
            ..Default::default()
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_respond_returns_first_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"Hi!"}}]}"#)
            .create_async()
            .await;

        let reply = responder(server.url()).respond("User: hello\nAssistant:").await.unwrap();
        assert_eq!(reply, "Hi!");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_http_error_is_api_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(503)
            .with_body("overloaded")
            .create_async()
            .await;

        let err = responder(server.url()).respond("x").await.unwrap_err();
        assert!(matches!(err, ResponderError::ApiError(msg) if msg.contains("503")));
    }

    #[tokio::test]
    async fn test_empty_choices() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[]}"#)
            .create_async()
            .await;

        let err = responder(server.url()).respond("x").await.unwrap_err();
        assert!(matches!(err, ResponderError::EmptyResponse));
    }
}
