//! Server-Sent Events encode/decode (spec.md §4.2/§6).
//!
//! An SSE stream is just chunked `text/event-stream` body framing: each
//! event is a block of `field: value` lines terminated by a blank line.

use crate::error::HttpResult;
use crate::pipe::Pipe;
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Clone, Default)]
pub struct SseEvent {
    pub event: Option<String>,
    pub id: Option<String>,
    pub data: String,
    pub retry_ms: Option<u64>,
}

impl SseEvent {
    pub fn data(data: impl Into<String>) -> Self {
        Self {
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn named(event: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            event: Some(event.into()),
            data: data.into(),
            ..Self::default()
        }
    }

    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = Some(id.into());
        self
    }

    /// Render as wire bytes: `event:`/`id:`/`data:` lines (multi-line `data`
    /// is split one `data:` line per source line), then a trailing blank
    /// line.
    pub fn encode(&self) -> String {
        let mut out = String::new();
        if let Some(id) = &self.id {
            out.push_str("id: ");
            out.push_str(id);
            out.push('\n');
        }
        if let Some(event) = &self.event {
            out.push_str("event: ");
            out.push_str(event);
            out.push('\n');
        }
        if let Some(retry) = self.retry_ms {
            out.push_str("retry: ");
            out.push_str(&retry.to_string());
            out.push('\n');
        }
        for line in self.data.split('\n') {
            out.push_str("data: ");
            out.push_str(line);
            out.push('\n');
        }
        out.push('\n');
        out
    }
}

/// Write one SSE event as a chunk over the pipe. Callers are expected to
/// already be in chunked-body mode (the Engine drives this).
pub async fn send_event<S: AsyncRead + AsyncWrite + Unpin>(
    pipe: &mut Pipe<S>,
    event: &SseEvent,
) -> HttpResult<()> {
    pipe.write(event.encode().as_bytes()).await?;
    pipe.flush().await
}

/// Parses a raw SSE stream incrementally, accumulating lines and flushing a
/// complete event on the blank-line terminator. Used by an SSE client, not
/// the server side (which only ever produces events).
#[derive(Debug, Default)]
pub struct SseParser {
    event: Option<String>,
    id: Option<String>,
    data_lines: Vec<String>,
}

impl SseParser {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one line (without its trailing newline). Returns `Some(event)`
    /// when the line was a blank terminator and at least one `data:` line
    /// had been accumulated.
    pub fn feed_line(&mut self, line: &str) -> Option<SseEvent> {
        if line.is_empty() {
            if self.data_lines.is_empty() {
                self.event = None;
                self.id = None;
                return None;
            }
            let event = SseEvent {
                event: self.event.take(),
                id: self.id.take(),
                data: self.data_lines.join("\n"),
                retry_ms: None,
            };
            self.data_lines.clear();
            return Some(event);
        }
        if let Some(rest) = line.strip_prefix("data:") {
            self.data_lines.push(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("event:") {
            self.event = Some(rest.trim_start().to_string());
        } else if let Some(rest) = line.strip_prefix("id:") {
            self.id = Some(rest.trim_start().to_string());
        }
        // Unknown fields and comment lines (leading ':') are ignored.
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn encode_simple_event() {
        let event = SseEvent::named("update", "hello");
        assert_eq!(event.encode(), "event: update\ndata: hello\n\n");
    }

    #[test]
    fn encode_multiline_data_splits_per_line() {
        let event = SseEvent::data("line one\nline two");
        assert_eq!(event.encode(), "data: line one\ndata: line two\n\n");
    }

    #[test]
    fn encode_includes_id_and_retry() {
        let event = SseEvent {
            event: None,
            id: Some("42".into()),
            data: "x".into(),
            retry_ms: Some(3000),
        };
        assert_eq!(event.encode(), "id: 42\nretry: 3000\ndata: x\n\n");
    }

    #[test]
    fn parser_round_trips_an_encoded_event() {
        let event = SseEvent::named("log", "hi there");
        let wire = event.encode();
        let mut parser = SseParser::new();
        let mut parsed = None;
        for line in wire.split('\n') {
            if let Some(e) = parser.feed_line(line) {
                parsed = Some(e);
            }
        }
        let parsed = parsed.unwrap();
        assert_eq!(parsed.event.as_deref(), Some("log"));
        assert_eq!(parsed.data, "hi there");
    }

    #[test]
    fn parser_ignores_blank_line_with_no_pending_data() {
        let mut parser = SseParser::new();
        assert!(parser.feed_line("").is_none());
    }
}
