//! Helpers for constructing and hashing fragment payloads.

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use uuid::Uuid;

/// Payload key holding the source filename.
pub const SOURCE_KEY: &str = "filename";
/// Payload key holding the fragment text.
pub const TEXT_KEY: &str = "chunk";
/// Payload key holding the insertion sequence.
pub const SEQUENCE_KEY: &str = "sequence";

/// Build the payload object stored alongside each fragment vector.
pub(crate) fn build_payload(source: &str, text: &str, sequence: u64, ingested_at: &str) -> Value {
    let mut payload = Map::new();
    payload.insert(SOURCE_KEY.into(), Value::String(source.to_string()));
    payload.insert(TEXT_KEY.into(), Value::String(text.to_string()));
    payload.insert(SEQUENCE_KEY.into(), Value::from(sequence));
    payload.insert(
        "chunk_hash".into(),
        Value::String(compute_chunk_hash(text)),
    );
    payload.insert("ingested_at".into(), Value::String(ingested_at.to_string()));
    Value::Object(payload)
}

/// Compute a deterministic SHA-256 hash for a text.
pub fn compute_chunk_hash(text: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(text.as_bytes());
    hex::encode(hasher.finalize())
}

/// Current timestamp formatted for payload storage.
pub(crate) fn current_timestamp_rfc3339() -> String {
    OffsetDateTime::now_utc()
        .format(&time::format_description::well_known::Rfc3339)
        .unwrap_or_else(|_| "1970-01-01T00:00:00Z".to_string())
}

/// Generate a new point identifier.
pub(crate) fn generate_point_id() -> String {
    Uuid::new_v4().to_string()
}
