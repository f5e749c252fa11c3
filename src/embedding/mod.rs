//! Embedding client abstraction and HTTP adapters.
//!
//! Fragments and questions must be embedded by the same provider and model; the client built
//! by [`get_embedding_client`] is shared by the ingestion CLI and the retrieval pipeline so
//! both sides land in the same vector space.

mod ollama;
mod openai;

pub use ollama::OllamaEmbeddingClient;
pub use openai::OpenAiEmbeddingClient;

use crate::config::{Config, ProviderKind};
use async_trait::async_trait;
use thiserror::Error;

/// Errors raised by embedding providers.
#[derive(Debug, Error)]
pub enum EmbeddingClientError {
    /// Provider could not be reached or timed out.
    #[error("Embedding provider unavailable: {0}")]
    Unreachable(String),
    /// Provider was unable to produce embeddings for the supplied input.
    #[error("Failed to generate embeddings: {0}")]
    GenerationFailed(String),
    /// Provider answered with a payload we could not interpret.
    #[error("Malformed embedding response: {0}")]
    InvalidResponse(String),
    /// Client could not be configured.
    #[error("Embedding client misconfigured: {0}")]
    Misconfigured(String),
}

/// Interface implemented by embedding backends.
#[async_trait]
pub trait EmbeddingClient: Send + Sync {
    /// Produce an embedding vector for each supplied text, in input order.
    async fn generate_embeddings(
        &self,
        texts: Vec<String>,
    ) -> Result<Vec<Vec<f32>>, EmbeddingClientError>;
}

/// Build an embedding client suitable for the current configuration.
pub fn get_embedding_client(
    config: &Config,
) -> Result<Box<dyn EmbeddingClient + Send + Sync>, EmbeddingClientError> {
    tracing::debug!(
        provider = ?config.embedding_provider,
        model = %config.embedding_model,
        dimension = config.embedding_dimension,
        "Building embedding client"
    );
    match config.embedding_provider {
        ProviderKind::Ollama => Ok(Box::new(OllamaEmbeddingClient::new(
            config.ollama_url.clone(),
            config.embedding_model.clone(),
            config.request_timeout(),
        )?)),
        ProviderKind::OpenAI => {
            let api_key = config.openai_api_key.clone().ok_or_else(|| {
                EmbeddingClientError::Misconfigured("OPENAI_API_KEY is not set".into())
            })?;
            Ok(Box::new(OpenAiEmbeddingClient::new(
                config.openai_base_url.clone(),
                api_key,
                config.embedding_model.clone(),
                config.request_timeout(),
            )?))
        }
    }
}

fn map_transport_error(base_url: &str, error: reqwest::Error) -> EmbeddingClientError {
    if error.is_timeout() || error.is_connect() {
        EmbeddingClientError::Unreachable(format!("failed to reach {base_url}: {error}"))
    } else {
        EmbeddingClientError::GenerationFailed(error.to_string())
    }
}

fn ensure_vector_count(
    vectors: &[Vec<f32>],
    expected: usize,
) -> Result<(), EmbeddingClientError> {
    if vectors.len() != expected {
        return Err(EmbeddingClientError::InvalidResponse(format!(
            "provider returned {} embeddings for {} inputs",
            vectors.len(),
            expected
        )));
    }
    if vectors.iter().any(|vector| vector.is_empty()) {
        return Err(EmbeddingClientError::InvalidResponse(
            "provider returned an empty vector".into(),
        ));
    }
    Ok(())
}
