//! Line framing for streamed provider responses.
//!
//! Ollama streams newline-delimited JSON objects; OpenAI streams server-sent events whose
//! `data:` lines carry JSON. Either way a network chunk may end mid-line, so bytes are
//! buffered until a newline arrives. Lines that fail to parse are skipped.

use super::ChatEvent;
use serde::Deserialize;

/// Incremental splitter turning arbitrary byte chunks into complete lines.
#[derive(Debug, Default)]
pub struct LineDecoder {
    buffer: Vec<u8>,
}

impl LineDecoder {
    /// Feed a chunk and return the lines it completed, without terminators.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.buffer.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(position) = self.buffer.iter().position(|byte| *byte == b'\n') {
            let raw: Vec<u8> = self.buffer.drain(..=position).collect();
            if let Some(line) = normalize_line(&raw[..raw.len() - 1]) {
                lines.push(line);
            }
        }
        lines
    }

    /// Flush a trailing line that never received a terminator.
    pub fn finish(&mut self) -> Option<String> {
        let rest = std::mem::take(&mut self.buffer);
        normalize_line(&rest)
    }
}

fn normalize_line(raw: &[u8]) -> Option<String> {
    let line = String::from_utf8_lossy(raw);
    let trimmed = line.trim();
    if trimmed.is_empty() {
        None
    } else {
        Some(trimmed.to_string())
    }
}

#[derive(Debug, Deserialize)]
struct OllamaChunk {
    #[serde(default)]
    message: Option<OllamaChunkMessage>,
    #[serde(default)]
    done: bool,
}

#[derive(Debug, Deserialize)]
struct OllamaChunkMessage {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one Ollama `/api/chat` stream line.
///
/// Returns `None` for malformed lines and for lines with neither content nor completion.
pub fn parse_ollama_line(line: &str) -> Option<ChatEvent> {
    let chunk: OllamaChunk = match serde_json::from_str(line) {
        Ok(chunk) => chunk,
        Err(error) => {
            tracing::debug!(error = %error, "Skipping malformed stream line");
            return None;
        }
    };
    let content = chunk
        .message
        .and_then(|message| message.content)
        .unwrap_or_default();
    if content.is_empty() && !chunk.done {
        return None;
    }
    Some(ChatEvent {
        content,
        done: chunk.done,
    })
}

#[derive(Debug, Deserialize)]
struct SseChunk {
    #[serde(default)]
    choices: Vec<SseChoice>,
}

#[derive(Debug, Deserialize)]
struct SseChoice {
    #[serde(default)]
    delta: Option<SseDelta>,
}

#[derive(Debug, Deserialize)]
struct SseDelta {
    #[serde(default)]
    content: Option<String>,
}

/// Parse one OpenAI server-sent event line.
pub fn parse_sse_line(line: &str) -> Option<ChatEvent> {
    let data = line.strip_prefix("data:")?.trim();
    if data == "[DONE]" {
        return Some(ChatEvent {
            content: String::new(),
            done: true,
        });
    }
    let chunk: SseChunk = match serde_json::from_str(data) {
        Ok(chunk) => chunk,
        Err(error) => {
            tracing::debug!(error = %error, "Skipping malformed event line");
            return None;
        }
    };
    let choice = chunk.choices.into_iter().next()?;
    let content = choice
        .delta
        .and_then(|delta| delta.content)
        .unwrap_or_default();
    // Completion is signalled by [DONE] alone.
    if content.is_empty() {
        return None;
    }
    Some(ChatEvent {
        content,
        done: false,
    })
}
