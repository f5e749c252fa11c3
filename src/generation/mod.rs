//! Generation providers used for answers, streaming chat, and the generative risk tier.
//!
//! Both adapters issue HTTP requests directly to the runtime. Non-streaming calls return the
//! assistant text; streaming calls return a [`ChatEventStream`] that yields partial content as
//! it arrives. Dropping the stream drops the underlying HTTP response, which cancels the
//! request upstream.

mod ollama;
mod openai;
pub mod stream;

pub use ollama::OllamaGenerationClient;
pub use openai::OpenAiGenerationClient;

use crate::config::{Config, ProviderKind};
use async_trait::async_trait;
use futures_core::Stream;
use serde::{Deserialize, Serialize};
use std::pin::Pin;
use std::time::Duration;
use thiserror::Error;

/// Errors surfaced by generation providers.
#[derive(Debug, Error)]
pub enum GenerationError {
    /// Provider could not be reached, timed out, or dropped the connection.
    #[error("Generation provider unavailable: {0}")]
    ProviderUnavailable(String),
    /// Provider returned an error response.
    #[error("Failed to generate text: {0}")]
    GenerationFailed(String),
    /// Provider response could not be parsed.
    #[error("Malformed provider response: {0}")]
    InvalidResponse(String),
    /// Client could not be configured.
    #[error("Generation client misconfigured: {0}")]
    Misconfigured(String),
}

/// Speaker of a chat turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    /// Instructions and background context.
    System,
    /// End-user turn.
    User,
    /// Model turn.
    Assistant,
}

/// One turn submitted to the provider.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChatMessage {
    /// Speaker of the turn.
    pub role: ChatRole,
    /// Turn text.
    pub content: String,
}

impl ChatMessage {
    /// System turn.
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::System,
            content: content.into(),
        }
    }

    /// User turn.
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::User,
            content: content.into(),
        }
    }

    /// Assistant turn.
    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Assistant,
            content: content.into(),
        }
    }
}

/// Request payload passed to a generation provider.
#[derive(Debug, Clone)]
pub struct GenerationRequest {
    /// Model identifier understood by the provider.
    pub model: String,
    /// Ordered conversation.
    pub messages: Vec<ChatMessage>,
    /// Output bound; `None` leaves the provider default.
    pub max_tokens: Option<u32>,
    /// Sampling temperature.
    pub temperature: f32,
}

/// Partial content emitted by a streaming chat call.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ChatEvent {
    /// Content fragment; empty for the terminal event.
    pub content: String,
    /// Whether the provider signalled completion.
    pub done: bool,
}

/// Cancellable stream of chat events. Restarting requires issuing a new request.
pub type ChatEventStream = Pin<Box<dyn Stream<Item = Result<ChatEvent, GenerationError>> + Send>>;

/// Interface implemented by generation providers.
#[async_trait]
pub trait GenerationClient: Send + Sync {
    /// Generate a complete response.
    async fn generate(&self, request: GenerationRequest) -> Result<String, GenerationError>;

    /// Generate a response as a stream of partial-content events.
    async fn generate_stream(
        &self,
        request: GenerationRequest,
    ) -> Result<ChatEventStream, GenerationError>;
}

/// How long a provider request may take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TimeoutPolicy {
    /// The whole exchange, body included, must finish within the duration.
    Total(Duration),
    /// Connecting and every read must finish within the duration. A streamed body that keeps
    /// producing data may run longer.
    Idle(Duration),
}

impl From<Duration> for TimeoutPolicy {
    fn from(timeout: Duration) -> Self {
        Self::Total(timeout)
    }
}

/// Build the generation client used for answers and the generative risk tier.
pub fn get_generation_client(
    config: &Config,
) -> Result<Box<dyn GenerationClient + Send + Sync>, GenerationError> {
    build_client(config, TimeoutPolicy::Total(config.request_timeout()))
}

/// Build the generation client used for the streaming chat path.
///
/// `CHAT_TIMEOUT_SECS` bounds connecting, the first byte, and each pause between chunks, so a
/// long reply is never cut off while the provider is still sending it.
pub fn get_chat_client(
    config: &Config,
) -> Result<Box<dyn GenerationClient + Send + Sync>, GenerationError> {
    build_client(config, TimeoutPolicy::Idle(config.chat_timeout()))
}

fn build_client(
    config: &Config,
    timeout: TimeoutPolicy,
) -> Result<Box<dyn GenerationClient + Send + Sync>, GenerationError> {
    match config.generation_provider {
        ProviderKind::Ollama => Ok(Box::new(OllamaGenerationClient::new(
            config.ollama_url.clone(),
            timeout,
        )?)),
        ProviderKind::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                GenerationError::Misconfigured("OPENAI_API_KEY is not set".into())
            })?;
            Ok(Box::new(OpenAiGenerationClient::new(
                config.openai_base_url.clone(),
                api_key,
                timeout,
            )?))
        }
    }
}

fn build_http(timeout: TimeoutPolicy) -> Result<reqwest::Client, GenerationError> {
    let builder = reqwest::Client::builder().user_agent("ripsy/generate");
    let builder = match timeout {
        TimeoutPolicy::Total(limit) => builder.timeout(limit),
        TimeoutPolicy::Idle(limit) => builder.connect_timeout(limit).read_timeout(limit),
    };
    builder
        .build()
        .map_err(|error| GenerationError::Misconfigured(error.to_string()))
}

fn map_transport_error(base_url: &str, error: reqwest::Error) -> GenerationError {
    if error.is_timeout() || error.is_connect() {
        GenerationError::ProviderUnavailable(format!("failed to reach {base_url}: {error}"))
    } else {
        GenerationError::GenerationFailed(error.to_string())
    }
}

async fn error_for_status(
    provider: &str,
    response: reqwest::Response,
) -> Result<reqwest::Response, GenerationError> {
    let status = response.status();
    if status.is_success() {
        return Ok(response);
    }
    let body = response.text().await.unwrap_or_default();
    if status == reqwest::StatusCode::NOT_FOUND || status.is_server_error() {
        Err(GenerationError::ProviderUnavailable(format!(
            "{provider} returned {status}: {body}"
        )))
    } else {
        Err(GenerationError::GenerationFailed(format!(
            "{provider} returned {status}: {body}"
        )))
    }
}
