//! PDF text extraction.
//!
//! Extraction runs on the blocking pool; a parser panic or an unreadable document surfaces as
//! [`ExtractionError`] and is never replaced with empty text.

use async_trait::async_trait;
use thiserror::Error;

/// Errors raised while turning a PDF into text.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The upload carried no bytes.
    #[error("document `{0}` is empty")]
    EmptyDocument(String),
    /// The PDF could not be parsed.
    #[error("failed to extract text from `{name}`: {reason}")]
    Unreadable {
        /// Logical document name (form field or filename).
        name: String,
        /// Parser failure description.
        reason: String,
    },
}

/// Text extraction backend.
#[async_trait]
pub trait TextExtractor: Send + Sync {
    /// Extract plain text from `bytes`; `name` is used for diagnostics only.
    async fn extract(&self, name: &str, bytes: Vec<u8>) -> Result<String, ExtractionError>;
}

/// [`TextExtractor`] backed by `pdf-extract`.
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfTextExtractor;

impl PdfTextExtractor {
    /// Create a new extractor.
    pub fn new() -> Self {
        Self
    }
}

#[async_trait]
impl TextExtractor for PdfTextExtractor {
    async fn extract(&self, name: &str, bytes: Vec<u8>) -> Result<String, ExtractionError> {
        if bytes.is_empty() {
            return Err(ExtractionError::EmptyDocument(name.to_string()));
        }
        let size = bytes.len();
        let result = tokio::task::spawn_blocking(move || pdf_extract::extract_text_from_mem(&bytes))
            .await
            .map_err(|join_error| ExtractionError::Unreadable {
                name: name.to_string(),
                reason: format!("extraction task aborted: {join_error}"),
            })?;

        let text = result.map_err(|err| ExtractionError::Unreadable {
            name: name.to_string(),
            reason: err.to_string(),
        })?;

        if text.trim().is_empty() {
            tracing::warn!(document = name, bytes = size, "No text extracted; document may be scanned");
        } else {
            tracing::debug!(document = name, bytes = size, chars = text.chars().count(), "Text extracted");
        }
        Ok(text)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn empty_upload_is_rejected() {
        let err = PdfTextExtractor::new()
            .extract("factura", Vec::new())
            .await
            .expect_err("empty bytes");
        assert!(matches!(err, ExtractionError::EmptyDocument(name) if name == "factura"));
    }

    #[tokio::test]
    async fn corrupt_pdf_is_unreadable() {
        let err = PdfTextExtractor::new()
            .extract("factura", b"this is not a pdf".to_vec())
            .await
            .expect_err("corrupt bytes");
        assert!(matches!(err, ExtractionError::Unreadable { name, .. } if name == "factura"));
    }
}
