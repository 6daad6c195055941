//! Incremental decoding of `OpenAI`-style server-sent event streams
//!
//! The chat completions endpoint answers `stream: true` requests with
//! `data: {json}` lines terminated by `data: [DONE]`. Network chunks can
//! split a line anywhere, including inside a multi-byte character, so the
//! decoder buffers raw bytes and only interprets complete lines.

use super::LlmError;
use serde::Deserialize;

/// Event produced by one complete SSE line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StreamEvent {
    /// A non-empty text fragment
    Text(String),
    /// The provider signalled the end of the stream
    Done,
}

/// Line-buffering SSE decoder
#[derive(Debug, Default)]
pub struct SseDecoder {
    buffer: Vec<u8>,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed a network chunk, returning every event completed by it
    pub fn push(&mut self, chunk: &[u8]) -> Result<Vec<StreamEvent>, LlmError> {
        self.buffer.extend_from_slice(chunk);

        let mut events = Vec::new();
        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line);
            if let Some(event) = Self::decode_line(line.trim_end_matches(['\r', '\n']))? {
                events.push(event);
            }
        }
        Ok(events)
    }

    /// Interpret whatever is left once the byte stream has ended
    pub fn finish(&mut self) -> Result<Vec<StreamEvent>, LlmError> {
        if self.buffer.is_empty() {
            return Ok(Vec::new());
        }
        let rest = std::mem::take(&mut self.buffer);
        let line = String::from_utf8_lossy(&rest);
        Ok(Self::decode_line(line.trim())?.into_iter().collect())
    }

    fn decode_line(line: &str) -> Result<Option<StreamEvent>, LlmError> {
        let Some(data) = line.strip_prefix("data:") else {
            // Comments, `event:` and `id:` lines carry nothing we use
            return Ok(None);
        };
        let data = data.trim_start();
        if data == "[DONE]" {
            return Ok(Some(StreamEvent::Done));
        }

        let chunk: StreamChunk = serde_json::from_str(data)
            .map_err(|e| LlmError::unknown(format!("Failed to parse stream chunk: {e}")))?;

        if let Some(error) = chunk.error {
            return Err(LlmError::server_error(format!(
                "Stream error: {}",
                error.message
            )));
        }

        let text = chunk
            .choices
            .into_iter()
            .next()
            .and_then(|c| c.delta.content)
            .filter(|t| !t.is_empty());

        Ok(text.map(StreamEvent::Text))
    }
}

#[derive(Debug, Deserialize)]
struct StreamChunk {
    #[serde(default)]
    choices: Vec<StreamChoice>,
    #[serde(default)]
    error: Option<StreamError>,
}

#[derive(Debug, Deserialize)]
struct StreamChoice {
    delta: StreamDelta,
}

#[derive(Debug, Deserialize)]
struct StreamDelta {
    #[serde(default)]
    content: Option<String>,
}

#[derive(Debug, Deserialize)]
struct StreamError {
    message: String,
}
