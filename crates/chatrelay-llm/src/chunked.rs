//! Reassembly of Gemini's chunked JSON streaming format.
//!
//! `streamGenerateContent` answers with a JSON array that is delivered
//! piecewise: `[{...}\n,\r\n{...}\n,\r\n{...}]`. Network reads split that
//! text at arbitrary byte offsets, so objects (and multi-byte characters)
//! may straddle chunks. [`ChunkReassembler`] buffers the raw bytes and
//! extracts each complete top-level object as soon as its closing brace
//! arrives.

use futures::{Stream, StreamExt};
use serde_json::Value;
use tracing::{debug, warn};

use chatrelay_core::error::{RelayError, Result, UpstreamError, excerpt};
use chatrelay_core::model::StreamItem;

/// Scanner position relative to the JSON structure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScanState {
    /// Between objects, looking for the next `{`.
    Searching,
    /// Inside an object, outside any string literal.
    InObject,
    /// Inside a string literal.
    InString,
    /// Right after a backslash inside a string literal.
    Escaped,
}

/// Incremental extractor of top-level JSON objects from a byte stream.
///
/// The buffer only ever holds bytes not yet resolved into a complete
/// object. Scanning resumes at `cursor`, so feeding the same bytes in any
/// chunking produces the same objects in the same order.
#[derive(Debug)]
pub struct ChunkReassembler {
    buffer: Vec<u8>,
    state: ScanState,
    depth: usize,
    cursor: usize,
}

impl Default for ChunkReassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl ChunkReassembler {
    pub fn new() -> Self {
        Self {
            buffer: Vec::new(),
            state: ScanState::Searching,
            depth: 0,
            cursor: 0,
        }
    }

    pub fn state(&self) -> ScanState {
        self.state
    }

    /// Bytes received but not yet consumed.
    pub fn buffered(&self) -> &[u8] {
        &self.buffer
    }

    /// Append a chunk and return the items of every object it completes.
    ///
    /// Spans that fail to parse are logged and dropped.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<StreamItem> {
        if chunk.is_empty() {
            return Vec::new();
        }
        self.buffer.extend_from_slice(chunk);

        let mut items = Vec::new();
        while let Some(span) = self.next_object() {
            match serde_json::from_slice::<Value>(&span) {
                Ok(value) => items.extend(extract_items(&value)),
                Err(e) => {
                    let err = UpstreamError::MalformedFragment {
                        excerpt: excerpt(&String::from_utf8_lossy(&span), 120),
                        reason: e.to_string(),
                    };
                    warn!(error = %err, "dropping malformed fragment");
                }
            }
        }
        items
    }

    /// Signal end of stream. Whatever is still buffered never completed and
    /// is discarded.
    pub fn finish(&mut self) {
        if !self.buffer.is_empty() {
            debug!(
                bytes = self.buffer.len(),
                state = ?self.state,
                "discarding unterminated trailing data"
            );
        }
        self.buffer.clear();
        self.state = ScanState::Searching;
        self.depth = 0;
        self.cursor = 0;
    }

    /// Remove and return the next complete object span, if any.
    fn next_object(&mut self) -> Option<Vec<u8>> {
        if self.state == ScanState::Searching {
            let separators = self
                .buffer
                .iter()
                .take_while(|b| b.is_ascii_whitespace() || **b == b',')
                .count();
            self.buffer.drain(..separators);

            // Non-JSON text (e.g. the array's `[`) is only skipped once a
            // candidate start is in sight.
            let start = self.buffer.iter().position(|b| *b == b'{')?;
            self.buffer.drain(..start);
            self.state = ScanState::InObject;
            self.depth = 0;
            self.cursor = 0;
        }

        while self.cursor < self.buffer.len() {
            let byte = self.buffer[self.cursor];
            self.cursor += 1;

            self.state = match (self.state, byte) {
                (ScanState::InObject, b'"') => ScanState::InString,
                (ScanState::InObject, b'{') => {
                    self.depth += 1;
                    ScanState::InObject
                }
                (ScanState::InObject, b'}') => {
                    self.depth = self.depth.saturating_sub(1);
                    if self.depth == 0 {
                        let span = self.buffer.drain(..self.cursor).collect();
                        self.cursor = 0;
                        self.state = ScanState::Searching;
                        return Some(span);
                    }
                    ScanState::InObject
                }
                (ScanState::InString, b'\\') => ScanState::Escaped,
                (ScanState::InString, b'"') => ScanState::InObject,
                (ScanState::Escaped, _) => ScanState::InString,
                (state, _) => state,
            };
        }
        None
    }
}

/// Items carried by one parsed response object.
///
/// Uses the first entry of `candidates` when present, otherwise the object
/// itself is treated as a candidate. Yields each non-empty `parts[].text`
/// in order, then the `finishReason` if one is reported.
pub fn extract_items(value: &Value) -> Vec<StreamItem> {
    let candidate = match value.get("candidates") {
        Some(candidates) => match candidates.get(0) {
            Some(first) => first,
            None => return Vec::new(),
        },
        None => value,
    };

    let mut items: Vec<StreamItem> = candidate
        .pointer("/content/parts")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|part| part.get("text").and_then(Value::as_str))
        .filter(|text| !text.is_empty())
        .map(|text| StreamItem::Text(text.to_string()))
        .collect();

    if let Some(reason) = candidate.get("finishReason").and_then(Value::as_str) {
        items.push(StreamItem::Finished(reason.to_string()));
    }
    items
}

/// Drive a [`ChunkReassembler`] over a response body.
///
/// A read error is yielded once and ends the stream.
pub fn fragment_stream<S, B, E>(body: S) -> impl Stream<Item = Result<StreamItem>> + Send + 'static
where
    S: Stream<Item = std::result::Result<B, E>> + Send + 'static,
    B: AsRef<[u8]> + Send + 'static,
    E: std::fmt::Display + Send + 'static,
{
    async_stream::stream! {
        let mut reassembler = ChunkReassembler::new();
        let mut body = Box::pin(body);

        while let Some(chunk) = body.next().await {
            let chunk = match chunk {
                Ok(bytes) => bytes,
                Err(e) => {
                    yield Err(RelayError::from(UpstreamError::Transport(e.to_string())));
                    break;
                }
            };
            for item in reassembler.push(chunk.as_ref()) {
                yield Ok(item);
            }
        }

        reassembler.finish();
    }
}
