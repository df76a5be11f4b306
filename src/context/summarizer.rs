//! LLM-based summarization of chat history

use async_trait::async_trait;
use reqwest::Client;
use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::{debug, warn};

/// Maps an ordered sequence of message contents to a bounded prose summary
#[async_trait]
pub trait Summarizer: Send + Sync {
    /// Summarize the given texts, oldest first
    async fn summarize(&self, texts: &[String]) -> Result<String, SummarizerError>;
}

/// Configuration for LLM summarizer
#[derive(Debug, Clone)]
pub struct SummarizerConfig {
    pub endpoint: String,
    pub api_key: Option<SecretString>,
    pub model: String,
    pub timeout: Duration,
    pub max_retries: usize,
    pub max_words: usize,
    pub temperature: f32,
}

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://localhost:8080/v1/chat/completions".to_string(),
            api_key: None,
            model: "gpt-3.5-turbo".to_string(),
            timeout: Duration::from_secs(30),
            max_retries: 3,
            max_words: 250,
            temperature: 0.7,
        }
    }
}

/// LLM-based summarizer using an OpenAI-compatible API
pub struct LlmSummarizer {
    client: Client,
    config: SummarizerConfig,
}

impl LlmSummarizer {
    /// Create a new LLM summarizer
    pub fn new(config: SummarizerConfig) -> Result<Self, SummarizerError> {
        let client = Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SummarizerError::InitializationError(e.to_string()))?;

        Ok(Self { client, config })
    }

    fn build_prompt(&self, texts: &[String]) -> String {
        format!(
            "Given a history of chat messages, summarize the conversation between user and AI \
            into one paragraph of not more than {} words.\n\
            Summarize all user messages into one paragraph and all AI messages into another paragraph.\n\n\
            Message history:\n{}\n\nSummary:",
            self.config.max_words,
            texts.join("\n")
        )
    }
}

#[async_trait]
impl Summarizer for LlmSummarizer {
    async fn summarize(&self, texts: &[String]) -> Result<String, SummarizerError> {
        if texts.is_empty() {
            return Ok(String::new());
        }

        debug!("Summarizing {} text segments", texts.len());

        let request = ChatCompletionRequest {
            model: self.config.model.clone(),
            messages: vec![ChatMessage {
                role: "user".to_string(),
                content: self.build_prompt(texts),
            }],
            max_tokens: None,
            temperature: Some(self.config.temperature),
        };

        // Boundary retries; the strategies themselves never retry.
        let mut last_error = None;
        for attempt in 0..self.config.max_retries.max(1) {
            if attempt > 0 {
                debug!("Retry attempt {} for summarization", attempt);
                tokio::time::sleep(Duration::from_millis(100 * (1 << attempt))).await;
            }

            let mut req = self.client.post(&self.config.endpoint).json(&request);
            if let Some(ref api_key) = self.config.api_key {
                req = req.bearer_auth(api_key.expose_secret());
            }

            match req.send().await {
                Ok(response) => {
                    if !response.status().is_success() {
                        let status = response.status();
                        let body = response.text().await.unwrap_or_default();
                        last_error = Some(SummarizerError::ApiError(format!(
                            "HTTP {}: {}",
                            status, body
                        )));
                        continue;
                    }

                    match response.json::<ChatCompletionResponse>().await {
                        Ok(resp) => match resp.choices.into_iter().next() {
                            Some(choice) => return Ok(choice.message.content),
                            None => {
                                last_error = Some(SummarizerError::ApiError(
                                    "No choices in response".to_string(),
                                ));
                            }
                        },
                        Err(e) => {
                            last_error = Some(SummarizerError::ApiError(format!(
                                "Failed to parse response: {}",
                                e
                            )));
                        }
                    }
                }
                Err(e) => {
                    last_error = Some(SummarizerError::NetworkError(e.to_string()));
                }
            }
        }

        warn!(
            "Summarization failed after {} attempts",
            self.config.max_retries.max(1)
        );
        Err(last_error.unwrap_or(SummarizerError::Unknown))
    }
}

/// Joins texts with newlines; used when no model endpoint is configured
#[derive(Debug, Default, Clone, Copy)]
pub struct ConcatenationSummarizer;

#[async_trait]
impl Summarizer for ConcatenationSummarizer {
    async fn summarize(&self, texts: &[String]) -> Result<String, SummarizerError> {
        Ok(texts.join("\n"))
    }
}

/// Summarizer errors
#[derive(Debug, thiserror::Error)]
pub enum SummarizerError {
    #[error("Initialization error: {0}")]
    InitializationError(String),

    #[error("API error: {0}")]
    ApiError(String),

    #[error("Network error: {0}")]
    NetworkError(String),

    #[error("Unknown error")]
    Unknown,
}

// OpenAI-compatible API types, shared with the responder client
#[derive(Debug, Serialize)]
pub(crate) struct ChatCompletionRequest {
    pub model: String,
    pub messages: Vec<ChatMessage>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_tokens: Option<usize>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub temperature: Option<f32>,
}

#[derive(Debug, Serialize, Deserialize)]
pub(crate) struct ChatMessage {
    pub role: String,
    pub content: String,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatCompletionResponse {
    pub choices: Vec<ChatChoice>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ChatChoice {
    pub message: ChatMessage,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_concatenation_summarizer() {
        let summarizer = ConcatenationSummarizer;
        let texts = vec!["Hello".to_string(), "World".to_string()];
        let result = summarizer.summarize(&texts).await.unwrap();
        assert_eq!(result, "Hello\nWorld");
    }

    #[test]
    fn test_summarizer_config_default() {
        let config = SummarizerConfig::default();
        assert_eq!(config.model, "gpt-3.5-turbo");
        assert_eq!(config.max_retries, 3);
        assert_eq!(config.max_words, 250);
    }

    #[tokio::test]
    async fn test_llm_summarizer_parses_choice() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(r#"{"choices":[{"message":{"role":"assistant","content":"They talked about Rust."}}]}"#)
            .create_async()
            .await;

        let summarizer = LlmSummarizer::new(SummarizerConfig {
            endpoint: format!("{}/v1/chat/completions", server.url()),
            ..Default::default()
        })
        .unwrap();

        let summary = summarizer
            .summarize(&["user: what is rust?".to_string()])
            .await
            .unwrap();
        assert_eq!(summary, "They talked about Rust.");
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_llm_summarizer_surfaces_http_error() {
        let mut server = mockito::Server::new_async().await;
        let _mock = server
            .mock("POST", "/v1/chat/completions")
            .with_status(500)
            .with_body("boom")
            .expect(1)
            .create_async()
            .await;

        let summarizer = LlmSummarizer::new(SummarizerConfig {
            endpoint: format!("{}/v1/chat/completions", server.url()),
            max_retries: 1,
            ..Default::default()
        })
        .unwrap();

        let err = summarizer.summarize(&["x".to_string()]).await.unwrap_err();
        assert!(matches!(err, SummarizerError::ApiError(_)));
    }

    #[tokio::test]
    async fn test_empty_input_skips_call() {
        let summarizer = LlmSummarizer::new(SummarizerConfig {
            endpoint: "http://127.0.0.1:9/unreachable".to_string(),
            ..Default::default()
        })
        .unwrap();
        assert_eq!(summarizer.summarize(&[]).await.unwrap(), "");
    }
}
