//! Character-bounded chunking for background text.
//!
//! The generation model enforces a context-size limit, so long background documents (the
//! glossary, regulatory PDFs during ingestion) are split into contiguous pieces before they
//! are injected as separate context turns or embedded as fragments.
//!
//! Guarantees:
//!
//! - Input is trimmed first; blank input yields no chunks.
//! - Every chunk holds at most `max_chars` characters (Unicode scalar values, never bytes), so
//!   multi-byte text such as `"diagnóstico"` is never split inside a character.
//! - Chunks are contiguous and non-overlapping: concatenating them reproduces the trimmed text.
//! - The sequence is lazy and `Clone`; a clone resumes from the same position, and calling
//!   [`chunk`] again restarts from the beginning.

use std::iter::FusedIterator;

use super::types::ChunkingError;

/// Split `text` into chunks of at most `max_chars` characters.
///
/// Returns [`ChunkingError::InvalidChunkSize`] when `max_chars` is zero.
pub fn chunk(text: &str, max_chars: usize) -> Result<TextChunks<'_>, ChunkingError> {
    if max_chars == 0 {
        return Err(ChunkingError::InvalidChunkSize);
    }
    Ok(TextChunks {
        remaining: text.trim(),
        max_chars,
    })
}

/// Lazy iterator over contiguous chunks of a trimmed text.
#[derive(Debug, Clone)]
pub struct TextChunks<'a> {
    remaining: &'a str,
    max_chars: usize,
}

impl<'a> Iterator for TextChunks<'a> {
    type Item = &'a str;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining.is_empty() {
            return None;
        }
        let split_at = self
            .remaining
            .char_indices()
            .nth(self.max_chars)
            .map(|(offset, _)| offset)
            .unwrap_or(self.remaining.len());
        let (head, tail) = self.remaining.split_at(split_at);
        self.remaining = tail;
        Some(head)
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        if self.remaining.is_empty() {
            return (0, Some(0));
        }
        // Each character takes 1..=4 bytes.
        let bytes = self.remaining.len();
        let lower = (bytes / 4).div_ceil(self.max_chars).max(1);
        let upper = bytes.div_ceil(self.max_chars);
        (lower, Some(upper))
    }
}

impl FusedIterator for TextChunks<'_> {}
