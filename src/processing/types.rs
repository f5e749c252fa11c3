//! Core data types and error definitions for the retrieval and chat pipelines.

use crate::{
    embedding::EmbeddingClientError, generation::GenerationError, glosa::ValidationReport,
    qdrant::QdrantError, storage::ObjectStoreError, store::FragmentStoreError,
};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Errors produced while splitting text into bounded chunks.
#[derive(Debug, Error)]
pub enum ChunkingError {
    /// A chunk size of zero would never make progress.
    #[error("chunk size must be greater than zero")]
    InvalidChunkSize,
}

/// Errors emitted by the question-answering and chat pipelines.
///
/// None of these are masked: an answer that cannot be grounded in retrieved fragments is
/// reported as a failure instead of being replaced by a fallback.
#[derive(Debug, Error)]
pub enum RetrievalError {
    /// Caller supplied an empty question.
    #[error("question must not be empty")]
    EmptyQuestion,
    /// Chunking was configured with an impossible size.
    #[error("invalid configuration: {0}")]
    Configuration(#[from] ChunkingError),
    /// The embedding provider failed, returned no vector, or returned one of the wrong size.
    #[error("embedding unavailable: {0}")]
    EmbeddingUnavailable(#[from] EmbeddingClientError),
    /// The fragment store could not be queried.
    #[error("ranking failed: {0}")]
    Ranking(#[from] FragmentStoreError),
    /// The generation provider failed.
    #[error("generation unavailable: {0}")]
    GenerationUnavailable(#[from] GenerationError),
}

/// A unit of regulatory text stored in the fragment store.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Fragment {
    /// Source filename the fragment was cut from.
    pub source: String,
    /// Fragment text.
    pub text: String,
    /// Insertion sequence, used to break score ties.
    pub sequence: u64,
}

/// A fragment paired with its similarity to the query (`1 - cosine_distance`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct RankedResult {
    /// Matched fragment.
    pub fragment: Fragment,
    /// Similarity score; higher is closer.
    pub score: f32,
}

/// Generated answer with the sources it was grounded in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Answer {
    /// Generated answer text.
    pub answer: String,
    /// Distinct source filenames, in ranked order of first appearance.
    pub sources: Vec<String>,
}

/// One prior exchange supplied as chat history.
#[derive(Debug, Clone, Default, PartialEq, Deserialize)]
pub struct ChatExchange {
    /// What the user said.
    #[serde(default)]
    pub user_message: Option<String>,
    /// What the assistant answered.
    #[serde(default)]
    pub bot_response: Option<String>,
}

/// Raw uploads for a document-based glosa assessment.
#[derive(Debug, Clone, Default)]
pub struct GlosaDocuments {
    /// Invoice PDF bytes.
    pub invoice_pdf: Vec<u8>,
    /// Clinical record PDF bytes.
    pub clinical_pdf: Vec<u8>,
    /// Optional RIPS validation report.
    pub validations: Option<ValidationReport>,
}

/// Failures while wiring the service at startup.
#[derive(Debug, Error)]
pub enum ServiceInitError {
    /// Embedding client could not be built.
    #[error(transparent)]
    Embedding(#[from] EmbeddingClientError),
    /// Generation client could not be built.
    #[error(transparent)]
    Generation(#[from] GenerationError),
    /// Fragment collection could not be prepared.
    #[error(transparent)]
    Qdrant(#[from] QdrantError),
    /// Object store could not be built.
    #[error(transparent)]
    ObjectStore(#[from] ObjectStoreError),
}
