//! Server-Sent Events decoding for streaming chat completions.
//!
//! Byte chunks from the HTTP body are split into lines, grouped into events
//! on blank lines, and the `data:` payload of each event is decoded into a
//! [`ChatCompletionChunk`]. The literal `[DONE]` payload ends the stream.

use crate::provider::{ChunkStream, ModelError, ModelResult};
use crate::types::ChatCompletionChunk;
use futures::{Stream, StreamExt};
use serde_json::Value;
use std::collections::VecDeque;
use tracing::trace;

/// Terminal payload sent by OpenAI-compatible servers.
pub const DONE_MARKER: &str = "[DONE]";

/// A parsed SSE event.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SseEvent {
    /// Event type from the `event:` field, if any.
    pub event: Option<String>,
    /// Data lines joined with `\n`.
    pub data: String,
}

/// Incremental line-oriented SSE parser.
///
/// Input is buffered as bytes so multi-byte UTF-8 sequences split across
/// network chunks are decoded only once the full line has arrived.
#[derive(Debug, Default)]
pub struct SseParser {
    buffer: Vec<u8>,
    current: SseEvent,
    has_data: bool,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed raw bytes and return every event completed by them.
    pub fn feed(&mut self, bytes: &[u8]) -> Vec<SseEvent> {
        self.buffer.extend_from_slice(bytes);
        let mut events = Vec::new();

        while let Some(pos) = self.buffer.iter().position(|b| *b == b'\n') {
            let line: Vec<u8> = self.buffer.drain(..=pos).collect();
            let line = String::from_utf8_lossy(&line[..line.len() - 1]);
            let line = line.strip_suffix('\r').unwrap_or(&line);
            if let Some(event) = self.process_line(line) {
                events.push(event);
            }
        }

        events
    }

    /// Flush a trailing event that was not terminated by a blank line.
    pub fn finish(&mut self) -> Option<SseEvent> {
        if !self.buffer.is_empty() {
            let rest = std::mem::take(&mut self.buffer);
            let line = String::from_utf8_lossy(&rest);
            let line = line.strip_suffix('\r').unwrap_or(&line).to_string();
            if let Some(event) = self.process_line(&line) {
                return Some(event);
            }
        }
        self.take_event()
    }

    fn process_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            return self.take_event();
        }
        if line.starts_with(':') {
            // keep-alive comment
            return None;
        }

        let (field, value) = match line.split_once(':') {
            Some((field, value)) => (field, value.strip_prefix(' ').unwrap_or(value)),
            None => (line, ""),
        };

        match field {
            "event" => self.current.event = Some(value.to_string()),
            "data" => {
                if self.has_data {
                    self.current.data.push('\n');
                }
                self.current.data.push_str(value);
                self.has_data = true;
            }
            _ => {}
        }
        None
    }

    fn take_event(&mut self) -> Option<SseEvent> {
        if !self.has_data {
            self.current = SseEvent::default();
            return None;
        }
        self.has_data = false;
        Some(std::mem::take(&mut self.current))
    }
}

/// Decode one event payload. `None` marks the end of the stream.
pub fn decode_event(event: &SseEvent) -> Option<ModelResult<ChatCompletionChunk>> {
    let data = event.data.trim();
    if data == DONE_MARKER {
        return None;
    }

    let value: Value = match serde_json::from_str(data) {
        Ok(value) => value,
        Err(e) => {
            return Some(Err(ModelError::MalformedChunk {
                message: format!("{}: {}", e, data),
            }))
        }
    };

    if let Some(error) = value.get("error") {
        let message = error
            .get("message")
            .and_then(Value::as_str)
            .map(str::to_string)
            .unwrap_or_else(|| error.to_string());
        return Some(Err(ModelError::Stream { message }));
    }

    Some(
        serde_json::from_value(value).map_err(|e| ModelError::MalformedChunk {
            message: format!("{}: {}", e, data),
        }),
    )
}

struct DecoderState<S> {
    body: S,
    parser: SseParser,
    pending: VecDeque<SseEvent>,
    body_done: bool,
}

/// Turn an HTTP body byte stream into a stream of completion chunks.
///
/// A transport error is yielded once and ends the stream. Malformed events
/// are yielded as [`ModelError::MalformedChunk`] and decoding continues.
pub fn decode_chunks<S, B, E>(body: S) -> ChunkStream
where
    S: Stream<Item = Result<B, E>> + Send + Unpin + 'static,
    B: AsRef<[u8]> + Send,
    E: Into<ModelError> + Send,
{
    let state = DecoderState {
        body,
        parser: SseParser::new(),
        pending: VecDeque::new(),
        body_done: false,
    };

    Box::pin(futures::stream::unfold(state, |mut state| async move {
        loop {
            if let Some(event) = state.pending.pop_front() {
                trace!(data = %event.data, "sse event");
                return decode_event(&event).map(|item| (item, state));
            }

            if state.body_done {
                return None;
            }

            match state.body.next().await {
                Some(Ok(bytes)) => {
                    let events = state.parser.feed(bytes.as_ref());
                    state.pending.extend(events);
                }
                Some(Err(e)) => {
                    state.body_done = true;
                    return Some((Err(e.into()), state));
                }
                None => {
                    state.body_done = true;
                    state.pending.extend(state.parser.finish());
                }
            }
        }
    }))
}
