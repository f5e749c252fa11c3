#![deny(missing_docs)]

//! Core library for Ripsy, the health-billing regulatory assistant.

/// HTTP routing and REST handlers.
pub mod api;
/// Environment-driven configuration management.
pub mod config;
/// Embedding client abstraction and adapters.
pub mod embedding;
/// PDF text extraction.
pub mod extraction;
/// Text generation clients for answers, chat, and audits.
pub mod generation;
/// Three-tier glosa risk scoring.
pub mod glosa;
/// Structured logging and tracing setup.
pub mod logging;
/// Assistant activity counters.
pub mod metrics;
/// Retrieval, chat, and assessment pipelines.
pub mod processing;
/// Qdrant vector store integration.
pub mod qdrant;
/// Hot-reloadable system prompt and glossary.
pub mod settings;
/// Object storage for prompt settings.
pub mod storage;
/// Ranked fragment lookups over the vector store.
pub mod store;
