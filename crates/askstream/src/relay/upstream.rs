//! Upstream completion client
//!
//! [`ChatCompletionsClient`] talks to any OpenAI-compatible
//! `/chat/completions` endpoint with `stream: true`. It is built once at
//! process start and shared read-only by every request through an `Arc`.
//!
//! Each relay session holds its upstream response open for the whole
//! answer, so N concurrent sessions means N concurrent upstream
//! connections. reqwest's keep-alive pool only reuses idle connections
//! between requests; nothing here multiplexes streams, which makes the
//! upstream connection count the first limit to hit under load.

use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::{BoxStream, StreamExt};
use reqwest::Client;
use reqwest::header::HeaderMap;
use serde::Serialize;
use std::env;
use std::time::Duration;
use tracing::{debug, info, warn};

use crate::config::UpstreamConfig;
use crate::error::{AskStreamError, Result};

use super::error::RelayError;
use super::question::Question;

/// Body of an open upstream response
pub type ByteStream = BoxStream<'static, std::result::Result<Bytes, RelayError>>;

/// An upstream response whose status was a success, with its body still unread
pub struct UpstreamStream {
    /// HTTP status returned by the provider
    pub status: u16,
    /// Response headers returned by the provider
    pub headers: HeaderMap,
    /// Raw response body chunks
    pub body: ByteStream,
}

impl UpstreamStream {
    pub fn new(status: u16, headers: HeaderMap, body: ByteStream) -> Self {
        Self {
            status,
            headers,
            body,
        }
    }
}

impl std::fmt::Debug for UpstreamStream {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UpstreamStream")
            .field("status", &self.status)
            .field("headers", &self.headers)
            .finish_non_exhaustive()
    }
}

/// Trait for providers that can stream a completion for a question
#[async_trait]
pub trait CompletionUpstream: Send + Sync {
    /// Open a streaming completion for the question
    ///
    /// Returns only once the provider has answered with a success status;
    /// non-success statuses and connection failures are returned as errors
    /// without touching the body stream.
    async fn open_stream(
        &self,
        question: &Question,
    ) -> std::result::Result<UpstreamStream, RelayError>;

    /// Provider name for logging
    fn name(&self) -> &'static str;
}

/// OpenAI-compatible chat completion request
#[derive(Debug, Serialize)]
struct ChatCompletionRequest<'a> {
    model: &'a str,
    messages: [Message<'a>; 2],
    stream: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    temperature: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    max_tokens: Option<u32>,
}

/// Message in the chat completion request
#[derive(Debug, Serialize)]
struct Message<'a> {
    role: &'static str,
    content: &'a str,
}

/// Streaming client for OpenAI-compatible chat completion APIs
pub struct ChatCompletionsClient {
    client: Client,
    config: UpstreamConfig,
    endpoint: String,
    api_key: String,
}

impl std::fmt::Debug for ChatCompletionsClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ChatCompletionsClient")
            .field("config", &self.config)
            .field("endpoint", &self.endpoint)
            .field("api_key", &"<redacted>")
            .finish_non_exhaustive()
    }
}

impl ChatCompletionsClient {
    /// Create a client, reading the credential from the environment variable
    /// named by `config.api_key_env`
    ///
    /// A missing or empty credential is a startup failure.
    pub fn from_env(config: &UpstreamConfig) -> Result<Self> {
        let api_key = env::var(&config.api_key_env).map_err(|_| {
            AskStreamError::Config(format!(
                "API key env var '{}' not set",
                config.api_key_env
            ))
        })?;

        Self::new(config, api_key)
    }

    /// Create a client with an explicit credential
    pub fn new(config: &UpstreamConfig, api_key: impl Into<String>) -> Result<Self> {
        let api_key = api_key.into();
        if api_key.trim().is_empty() {
            return Err(AskStreamError::Config(format!(
                "API key from '{}' is empty",
                config.api_key_env
            )));
        }

        let endpoint = url::Url::parse(&format!(
            "{}/chat/completions",
            config.api_url.trim_end_matches('/')
        ))
        .map_err(|e| AskStreamError::Config(format!("Invalid upstream api_url: {e}")))?
        .to_string();

        // No overall request timeout: a streamed answer may legitimately take
        // minutes. Stalls are caught per chunk by the session's idle timeout.
        let client = Client::builder()
            .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
            .build()
            .map_err(|e| AskStreamError::Config(format!("Failed to create HTTP client: {e}")))?;

        info!(
            "ChatCompletionsClient initialized with model: {}, endpoint: {}",
            config.model, endpoint
        );

        Ok(Self {
            client,
            config: config.clone(),
            endpoint,
            api_key,
        })
    }

    /// Full URL requests are posted to
    pub fn endpoint(&self) -> &str {
        &self.endpoint
    }

    fn build_request<'a>(&'a self, question: &'a Question) -> ChatCompletionRequest<'a> {
        ChatCompletionRequest {
            model: &self.config.model,
            messages: [
                Message {
                    role: "system",
                    content: &self.config.system_prompt,
                },
                Message {
                    role: "user",
                    content: question.as_str(),
                },
            ],
            stream: true,
            temperature: self.config.temperature,
            max_tokens: self.config.max_tokens,
        }
    }
}

#[async_trait]
impl CompletionUpstream for ChatCompletionsClient {
    async fn open_stream(
        &self,
        question: &Question,
    ) -> std::result::Result<UpstreamStream, RelayError> {
        let request = self.build_request(question);
        debug!("Opening upstream stream at: {}", self.endpoint);

        let response = self
            .client
            .post(&self.endpoint)
            .header("Authorization", format!("Bearer {}", self.api_key))
            .header("Accept", "text/event-stream")
            .json(&request)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    RelayError::Network(format!("Request timed out: {e}"))
                } else if e.is_connect() {
                    RelayError::Network(format!("Failed to connect to upstream: {e}"))
                } else {
                    RelayError::Network(format!("Request failed: {e}"))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            warn!(
                error_type = "upstream",
                status = status.as_u16(),
                body_length = body.len(),
                "Upstream rejected completion request"
            );
            return Err(RelayError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        let headers = response.headers().clone();
        let body = response
            .bytes_stream()
            .map(|chunk| {
                chunk.map_err(|e| RelayError::Network(format!("Failed to read upstream stream: {e}")))
            })
            .boxed();

        Ok(UpstreamStream::new(status.as_u16(), headers, body))
    }

    fn name(&self) -> &'static str {
        "chat-completions"
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_config() -> UpstreamConfig {
        UpstreamConfig {
            api_url: "https://llm.example.com/v1/".to_string(),
            model: "gpt-test".to_string(),
            system_prompt: "Be terse.".to_string(),
            temperature: Some(0.5),
            ..UpstreamConfig::default()
        }
    }

    #[test]
    fn test_endpoint_joins_api_url() {
        let client = ChatCompletionsClient::new(&test_config(), "sk-test").unwrap();
        assert_eq!(
            client.endpoint(),
            "https://llm.example.com/v1/chat/completions"
        );
    }

    #[test]
    fn test_empty_api_key_rejected() {
        let result = ChatCompletionsClient::new(&test_config(), "  ");
        assert!(matches!(result, Err(AskStreamError::Config(_))));
    }

    #[test]
    fn test_invalid_api_url_rejected() {
        let config = UpstreamConfig {
            api_url: "not a url".to_string(),
            ..UpstreamConfig::default()
        };
        let result = ChatCompletionsClient::new(&config, "sk-test");
        assert!(matches!(result, Err(AskStreamError::Config(_))));
    }

    #[test]
    fn test_missing_env_credential_rejected() {
        let config = UpstreamConfig {
            api_key_env: "ASKSTREAM_TEST_KEY_THAT_IS_NEVER_SET".to_string(),
            ..UpstreamConfig::default()
        };
        let err = ChatCompletionsClient::from_env(&config).unwrap_err();
        assert!(err.to_string().contains("ASKSTREAM_TEST_KEY_THAT_IS_NEVER_SET"));
    }

    #[test]
    fn test_request_body_shape() {
        let client = ChatCompletionsClient::new(&test_config(), "sk-test").unwrap();
        let question = Question::try_from("What is 2+2?").unwrap();

        let body = serde_json::to_value(client.build_request(&question)).unwrap();

        assert_eq!(
            body,
            serde_json::json!({
                "model": "gpt-test",
                "messages": [
                    {"role": "system", "content": "Be terse."},
                    {"role": "user", "content": "What is 2+2?"}
                ],
                "stream": true,
                "temperature": 0.5
            })
        );
    }
}
