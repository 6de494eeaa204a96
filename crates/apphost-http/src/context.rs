//! The `Context` façade handed to route handlers (spec.md §4.3): request
//! metadata, params/query access, cached body decoding, and response
//! primitives built on top of the [`Engine`].

use crate::engine::Engine;
use crate::error::{HttpError, HttpResult};
use crate::headers::Headers;
use crate::sse::SseEvent;
use crate::ws::{FragmentCollector, WsEvent};
use serde::Serialize;
use serde_json::Value;
use std::collections::HashMap;
use tokio::io::{AsyncRead, AsyncWrite};

pub const DEFAULT_MAX_BODY: usize = 10 * 1024 * 1024;

pub struct Request {
    pub method: String,
    pub path: String,
    pub headers: Headers,
    pub body: Vec<u8>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamMode {
    Fixed,
    Chunked,
}

/// Owns the connection's [`Engine`] for the duration of one request and
/// exposes the handler-facing surface: params/query lookups, cached body
/// accessors, and response writers.
pub struct Context<S = tokio::net::TcpStream>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    engine: Engine<S>,
    request: Request,
    params: HashMap<String, String>,
    query: HashMap<String, String>,
    scratch: HashMap<String, Value>,
    response_status: u16,
    response_headers: Headers,
    responded: bool,
    cached_json: Option<Value>,
    stream_mode: Option<StreamMode>,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Context<S> {
    pub fn new(engine: Engine<S>, request: Request) -> Self {
        let query = parse_query(&request.path);
        let mut response_headers = Headers::new();
        response_headers.insert("Server", "apphost");
        response_headers.insert("Date", httpdate_now());
        Self {
            engine,
            request,
            params: HashMap::new(),
            query,
            scratch: HashMap::new(),
            response_status: 200,
            response_headers,
            responded: false,
            cached_json: None,
            stream_mode: None,
        }
    }

    pub fn method(&self) -> &str {
        &self.request.method
    }

    pub fn path(&self) -> &str {
        let p = &self.request.path;
        p.split('?').next().unwrap_or(p)
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.request.headers.get(name)
    }

    pub fn request_headers(&self) -> &Headers {
        &self.request.headers
    }

    pub fn set_params(&mut self, params: Vec<(String, String)>) {
        self.params = params.into_iter().collect();
    }

    pub fn param(&self, name: &str) -> Option<&str> {
        self.params.get(name).map(String::as_str)
    }

    pub fn query(&self, name: &str) -> Option<&str> {
        self.query.get(name).map(String::as_str)
    }

    pub fn set(&mut self, key: impl Into<String>, value: Value) {
        self.scratch.insert(key.into(), value);
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.scratch.get(key)
    }

    pub fn bytes(&self) -> &[u8] {
        &self.request.body
    }

    pub fn text(&self) -> HttpResult<&str> {
        std::str::from_utf8(&self.request.body).map_err(|_| HttpError::parse("body is not utf-8"))
    }

    /// Parses and caches the body as JSON. Subsequent calls reuse the
    /// cached value.
    pub fn json(&mut self) -> HttpResult<&Value> {
        if self.cached_json.is_none() {
            let value: Value = serde_json::from_slice(&self.request.body)
                .map_err(|e| HttpError::parse(format!("invalid json body: {e}")))?;
            self.cached_json = Some(value);
        }
        Ok(self.cached_json.as_ref().expect("just inserted"))
    }

    pub fn status(&mut self, code: u16) -> &mut Self {
        self.response_status = code;
        self
    }

    pub fn set_header(&mut self, name: impl Into<String>, value: impl Into<String>) -> &mut Self {
        self.response_headers.insert(name, value);
        self
    }

    pub async fn send(&mut self, body: &[u8]) -> HttpResult<()> {
        self.responded = true;
        let status = self.response_status;
        let headers = self.response_headers.clone();
        self.engine
            .write_response(status, reason_phrase(status), &headers, body)
            .await
    }

    pub async fn send_text(&mut self, text: &str) -> HttpResult<()> {
        self.response_headers.insert("Content-Type", "text/plain; charset=utf-8");
        self.send(text.as_bytes()).await
    }

    pub async fn json_response(&mut self, value: &impl Serialize) -> HttpResult<()> {
        self.response_headers.insert("Content-Type", "application/json");
        let body = serde_json::to_vec(value)
            .map_err(|e| HttpError::parse(format!("failed to serialize json response: {e}")))?;
        self.send(&body).await
    }

    pub async fn html(&mut self, body: &str) -> HttpResult<()> {
        self.response_headers.insert("Content-Type", "text/html; charset=utf-8");
        self.send(body.as_bytes()).await
    }

    pub async fn redirect(&mut self, location: &str, status: u16) -> HttpResult<()> {
        self.response_status = status;
        self.response_headers.insert("Location", location);
        self.send(&[]).await
    }

    /// Streams a response body. `total_len` drives fixed-length framing;
    /// pass `None` to use chunked transfer-encoding instead.
    pub async fn stream_start(&mut self, total_len: Option<usize>) -> HttpResult<()> {
        self.responded = true;
        self.stream_mode = Some(match total_len {
            Some(len) => {
                self.response_headers.insert("Content-Length", len.to_string());
                StreamMode::Fixed
            }
            None => {
                self.response_headers.insert("Transfer-Encoding", "chunked");
                StreamMode::Chunked
            }
        });
        let status = self.response_status;
        let headers = self.response_headers.clone();
        self.engine
            .write_response(status, reason_phrase(status), &headers, &[])
            .await
    }

    /// Writes one piece of a streamed body. Chunk-encodes it if
    /// `stream_start` was called with `total_len: None`; otherwise writes
    /// the bytes straight through, since the response already declared a
    /// fixed `Content-Length`.
    pub async fn stream_chunk(&mut self, data: &[u8]) -> HttpResult<()> {
        match self.stream_mode {
            Some(StreamMode::Chunked) => self.engine.write_chunk(data).await,
            _ => self.engine.pipe_mut().write(data).await,
        }
    }

    pub async fn stream_end(&mut self) -> HttpResult<()> {
        match self.stream_mode.take() {
            Some(StreamMode::Chunked) => self.engine.end_chunked(None).await,
            _ => Ok(()),
        }
    }

    pub async fn start_sse(&mut self) -> HttpResult<()> {
        self.responded = true;
        self.engine.start_sse(Some(&self.response_headers)).await
    }

    pub async fn send_sse(&mut self, event: &SseEvent) -> HttpResult<()> {
        self.engine.send_sse(event).await
    }

    /// Completes the WebSocket handshake and hands back a fragment
    /// collector for the caller to drive the rest of the connection.
    pub async fn upgrade_websocket(&mut self) -> HttpResult<FragmentCollector> {
        self.responded = true;
        self.engine.accept_websocket(&self.request.headers).await?;
        Ok(FragmentCollector::new(self.engine.ws_role()))
    }

    pub async fn next_ws_event(&mut self, collector: &mut FragmentCollector) -> HttpResult<WsEvent> {
        collector.next_event(self.engine.pipe_mut()).await
    }

    pub fn has_responded(&self) -> bool {
        self.responded
    }

    pub fn into_engine(self) -> Engine<S> {
        self.engine
    }
}

fn parse_query(path: &str) -> HashMap<String, String> {
    let Some((_, query)) = path.split_once('?') else {
        return HashMap::new();
    };
    query
        .split('&')
        .filter(|s| !s.is_empty())
        .filter_map(|pair| {
            let (k, v) = pair.split_once('=').unwrap_or((pair, ""));
            Some((url_decode(k), url_decode(v)))
        })
        .collect()
}

fn url_decode(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    let mut bytes = s.bytes();
    while let Some(b) = bytes.next() {
        match b {
            b'+' => out.push(' '),
            b'%' => {
                let hi = bytes.next();
                let lo = bytes.next();
                if let (Some(hi), Some(lo)) = (hi, lo) {
                    let hex = [hi, lo];
                    if let Ok(hex_str) = std::str::from_utf8(&hex) {
                        if let Ok(byte) = u8::from_str_radix(hex_str, 16) {
                            out.push(byte as char);
                            continue;
                        }
                    }
                }
                out.push('%');
            }
            _ => out.push(b as char),
        }
    }
    out
}

fn reason_phrase(status: u16) -> &'static str {
    match status {
        200 => "OK",
        201 => "Created",
        204 => "No Content",
        206 => "Partial Content",
        301 => "Moved Permanently",
        302 => "Found",
        304 => "Not Modified",
        400 => "Bad Request",
        404 => "Not Found",
        405 => "Method Not Allowed",
        409 => "Conflict",
        416 => "Range Not Satisfiable",
        500 => "Internal Server Error",
        _ => "Unknown",
    }
}

fn httpdate_now() -> String {
    chrono::Utc::now().format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_query_decodes_percent_and_plus() {
        let q = parse_query("/search?q=a+b&tag=%2Fx%2Fy");
        assert_eq!(q.get("q"), Some(&"a b".to_string()));
        assert_eq!(q.get("tag"), Some(&"/x/y".to_string()));
    }

    #[test]
    fn parse_query_on_path_without_query_is_empty() {
        assert!(parse_query("/no/query").is_empty());
    }

    #[test]
    fn reason_phrase_covers_common_statuses() {
        assert_eq!(reason_phrase(200), "OK");
        assert_eq!(reason_phrase(404), "Not Found");
        assert_eq!(reason_phrase(999), "Unknown");
    }
}
