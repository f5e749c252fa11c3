//! Retrieval, chat, and assessment pipelines.

pub mod chunking;
pub mod context;
pub(crate) mod mappers;
mod service;
pub mod types;

pub use service::{
    AssistantApi, AssistantOptions, AssistantParts, AssistantService, CHAT_HISTORY_EXCHANGES,
};
pub use types::{
    Answer, ChatExchange, ChunkingError, Fragment, GlosaDocuments, RankedResult, RetrievalError,
    ServiceInitError,
};
