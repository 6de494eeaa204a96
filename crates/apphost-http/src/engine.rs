//! HTTP/1.1 request/response engine (spec.md §4.2): a role-tagged state
//! machine driving a [`Pipe`] through request-line/status-line, headers,
//! and body framing (fixed-length or chunked+trailers), with in-band
//! upgrade to WebSocket and SSE.

use crate::error::{HttpError, HttpResult};
use crate::headers::Headers;
use crate::pipe::Pipe;
use crate::sse::SseEvent;
use crate::ws::{self, Role as WsRole};
use tokio::io::{AsyncRead, AsyncWrite};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Protocol {
    Http,
    WebSocket,
    Sse,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadState {
    Idle,
    StartLine,
    Headers,
    Body,
    Trailer,
    Done,
    Error,
    Upgraded,
}

#[derive(Debug, Clone, Copy)]
enum BodyFraming {
    None,
    Fixed(usize),
    Chunked,
}

#[derive(Debug, Clone)]
pub struct RequestLine {
    pub method: String,
    pub path: String,
    pub version: String,
}

#[derive(Debug, Clone)]
pub struct StatusLine {
    pub version: String,
    pub status: u16,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum StartLine {
    Request(RequestLine),
    Status(StatusLine),
}

/// Maximum line length accepted for the start line and each header line.
const MAX_LINE: usize = 16 * 1024;
const MAX_HEADER_COUNT: usize = 256;

pub struct Engine<S> {
    pipe: Pipe<S>,
    role: Role,
    pub protocol: Protocol,
    pub read_state: ReadState,
    keep_alive: bool,
    body_framing: BodyFraming,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Engine<S> {
    pub fn new(stream: S, role: Role) -> Self {
        Self {
            pipe: Pipe::new(stream),
            role,
            protocol: Protocol::Http,
            read_state: ReadState::Idle,
            keep_alive: true,
            body_framing: BodyFraming::None,
        }
    }

    pub fn pipe_mut(&mut self) -> &mut Pipe<S> {
        &mut self.pipe
    }

    pub fn keep_alive(&self) -> bool {
        self.keep_alive
    }

    /// Reads the request-line (server role) or status-line (client role)
    /// followed by headers. Leaves `read_state` at `Headers` and
    /// `body_framing` resolved via [`Self::analyze_headers`]; the caller
    /// still must call `read_body`/`read_chunked` to consume any body.
    pub async fn start(&mut self) -> HttpResult<(StartLine, Headers)> {
        self.read_state = ReadState::StartLine;
        let start_line = match self.read_raw_line().await? {
            Some(line) => line,
            None => {
                self.read_state = ReadState::Error;
                return Err(HttpError::protocol("connection closed before start line"));
            }
        };
        let start = self.parse_start_line(&start_line)?;

        self.read_state = ReadState::Headers;
        let headers = self.read_headers().await?;
        self.analyze_headers(&start, &headers)?;
        Ok((start, headers))
    }

    async fn read_raw_line(&mut self) -> HttpResult<Option<Vec<u8>>> {
        let line = self.pipe.read_line(MAX_LINE).await.map_err(|e| {
            self.read_state = ReadState::Error;
            e
        })?;
        Ok(line)
    }

    fn parse_start_line(&mut self, raw: &[u8]) -> HttpResult<StartLine> {
        let text = std::str::from_utf8(raw)
            .map_err(|_| HttpError::parse("start line is not valid utf-8"))?;
        match self.role {
            Role::Server => {
                let mut parts = text.splitn(3, ' ');
                let method = parts.next().ok_or_else(|| HttpError::parse("missing method"))?;
                let path = parts.next().ok_or_else(|| HttpError::parse("missing path"))?;
                let version = parts.next().ok_or_else(|| HttpError::parse("missing version"))?;
                Ok(StartLine::Request(RequestLine {
                    method: method.to_string(),
                    path: path.to_string(),
                    version: version.trim_end().to_string(),
                }))
            }
            Role::Client => {
                let mut parts = text.splitn(3, ' ');
                let version = parts.next().ok_or_else(|| HttpError::parse("missing version"))?;
                let status = parts.next().ok_or_else(|| HttpError::parse("missing status"))?;
                let reason = parts.next().unwrap_or("").trim_end();
                let status: u16 = status
                    .parse()
                    .map_err(|_| HttpError::parse("status code is not numeric"))?;
                Ok(StartLine::Status(StatusLine {
                    version: version.to_string(),
                    status,
                    reason: reason.to_string(),
                }))
            }
        }
    }

    async fn read_headers(&mut self) -> HttpResult<Headers> {
        let mut headers = Headers::new();
        loop {
            let line = self.read_raw_line().await?.ok_or_else(|| {
                self.read_state = ReadState::Error;
                HttpError::protocol("connection closed while reading headers")
            })?;
            if line.is_empty() {
                break;
            }
            if headers.len() >= MAX_HEADER_COUNT {
                self.read_state = ReadState::Error;
                return Err(HttpError::protocol("too many headers"));
            }
            let text = std::str::from_utf8(&line)
                .map_err(|_| HttpError::parse("header line is not valid utf-8"))?;
            let (name, value) = text
                .split_once(':')
                .ok_or_else(|| HttpError::parse("header line missing ':'"))?;
            headers.insert(name.trim(), value.trim());
        }
        Ok(headers)
    }

    /// Determines protocol (HTTP/WebSocket/SSE), body framing, and
    /// keep-alive eligibility from the parsed headers.
    fn analyze_headers(&mut self, start: &StartLine, headers: &Headers) -> HttpResult<()> {
        let version = match start {
            StartLine::Request(r) => r.version.as_str(),
            StartLine::Status(s) => s.version.as_str(),
        };
        let http_11 = version.ends_with("1.1");

        self.keep_alive = if http_11 {
            !headers.has_token("connection", "close")
        } else {
            headers.has_token("connection", "keep-alive")
        };

        let is_upgrade = headers.has_token("connection", "upgrade")
            && headers
                .get("upgrade")
                .is_some_and(|v| v.eq_ignore_ascii_case("websocket"));

        let is_sse = headers
            .get("content-type")
            .is_some_and(|v| v.trim_start().starts_with("text/event-stream"));

        if is_upgrade {
            self.protocol = Protocol::WebSocket;
            self.body_framing = BodyFraming::None;
            return Ok(());
        }
        if is_sse {
            self.protocol = Protocol::Sse;
        } else {
            self.protocol = Protocol::Http;
        }

        if headers.has_token("transfer-encoding", "chunked") {
            self.body_framing = BodyFraming::Chunked;
        } else if let Some(len) = headers.get("content-length") {
            let len: usize = len
                .trim()
                .parse()
                .map_err(|_| HttpError::parse("content-length is not numeric"))?;
            self.body_framing = BodyFraming::Fixed(len);
        } else {
            self.body_framing = BodyFraming::None;
        }
        Ok(())
    }

    /// Reads the full body per the framing resolved by `analyze_headers`.
    /// Returns `(body, trailers)`; `trailers` is empty unless the body was
    /// chunked and trailer headers were present.
    pub async fn read_body(&mut self) -> HttpResult<(Vec<u8>, Headers)> {
        self.read_state = ReadState::Body;
        let result = match self.body_framing {
            BodyFraming::None => Ok((Vec::new(), Headers::new())),
            BodyFraming::Fixed(len) => {
                if len > crate::context::DEFAULT_MAX_BODY {
                    self.read_state = ReadState::Error;
                    return Err(HttpError::protocol("request body exceeds the maximum accepted size"));
                }
                let body = self.pipe.read_exact(len).await?;
                if body.len() < len {
                    self.read_state = ReadState::Error;
                    return Err(HttpError::protocol("connection closed mid-body"));
                }
                Ok((body, Headers::new()))
            }
            BodyFraming::Chunked => self.read_chunked().await,
        };
        match &result {
            Ok(_) => self.read_state = ReadState::Done,
            Err(_) => self.read_state = ReadState::Error,
        }
        result
    }

    async fn read_chunked(&mut self) -> HttpResult<(Vec<u8>, Headers)> {
        let mut body = Vec::new();
        loop {
            let size_line = self
                .pipe
                .read_line(MAX_LINE)
                .await?
                .ok_or_else(|| HttpError::protocol("connection closed reading chunk size"))?;
            let size_text = std::str::from_utf8(&size_line)
                .map_err(|_| HttpError::parse("chunk size line is not utf-8"))?;
            let size_hex = size_text.split(';').next().unwrap_or("").trim();
            let size = usize::from_str_radix(size_hex, 16)
                .map_err(|_| HttpError::parse("chunk size is not valid hex"))?;

            if size == 0 {
                self.read_state = ReadState::Trailer;
                let trailers = self.read_headers().await?;
                return Ok((body, trailers));
            }
            if body.len() + size > crate::context::DEFAULT_MAX_BODY {
                return Err(HttpError::protocol("request body exceeds the maximum accepted size"));
            }

            let chunk = self.pipe.read_exact(size).await?;
            if chunk.len() < size {
                return Err(HttpError::protocol("connection closed mid-chunk"));
            }
            body.extend_from_slice(&chunk);

            let crlf = self.pipe.read_exact(2).await?;
            if crlf != b"\r\n" {
                return Err(HttpError::protocol("missing CRLF after chunk data"));
            }
        }
    }

    /// Writes a request line + headers (+ body, auto-setting
    /// `Content-Length` when absent and the caller isn't streaming
    /// chunked).
    pub async fn write_request(
        &mut self,
        method: &str,
        path: &str,
        headers: &Headers,
        body: &[u8],
    ) -> HttpResult<()> {
        self.pipe.write_line(&format!("{method} {path} HTTP/1.1")).await?;
        self.write_headers_and_body(headers, body).await
    }

    pub async fn write_response(
        &mut self,
        status: u16,
        reason: &str,
        headers: &Headers,
        body: &[u8],
    ) -> HttpResult<()> {
        self.pipe
            .write_line(&format!("HTTP/1.1 {status} {reason}"))
            .await?;
        self.write_headers_and_body(headers, body).await
    }

    async fn write_headers_and_body(&mut self, headers: &Headers, body: &[u8]) -> HttpResult<()> {
        let needs_length = !headers.contains("content-length")
            && !headers.has_token("transfer-encoding", "chunked");
        for (name, value) in headers.iter() {
            self.pipe.write_line(&format!("{name}: {value}")).await?;
        }
        if needs_length {
            self.pipe
                .write_line(&format!("content-length: {}", body.len()))
                .await?;
        }
        self.pipe.write_line("").await?;
        if !body.is_empty() {
            self.pipe.write(body).await?;
        }
        self.pipe.flush().await
    }

    /// Writes one chunk of a chunked response body. Callers must have
    /// already written a response with `Transfer-Encoding: chunked`.
    pub async fn write_chunk(&mut self, data: &[u8]) -> HttpResult<()> {
        self.pipe.write_line(&format!("{:x}", data.len())).await?;
        if !data.is_empty() {
            self.pipe.write(data).await?;
        }
        self.pipe.write(b"\r\n").await?;
        self.pipe.flush().await
    }

    /// Terminates a chunked body with the zero-length chunk, optionally
    /// followed by trailer headers.
    pub async fn end_chunked(&mut self, trailers: Option<&Headers>) -> HttpResult<()> {
        self.pipe.write_line("0").await?;
        if let Some(trailers) = trailers {
            for (name, value) in trailers.iter() {
                self.pipe.write_line(&format!("{name}: {value}")).await?;
            }
        }
        self.pipe.write_line("").await?;
        self.pipe.flush().await
    }

    /// Resets state for the next request on a kept-alive connection.
    pub fn reuse(&mut self) -> HttpResult<()> {
        if !self.keep_alive {
            return Err(HttpError::protocol("connection is not eligible for reuse"));
        }
        self.read_state = ReadState::Idle;
        self.protocol = Protocol::Http;
        self.body_framing = BodyFraming::None;
        Ok(())
    }

    /// Server-side WebSocket handshake: validates `Sec-WebSocket-Key`,
    /// writes the `101 Switching Protocols` response, and marks the
    /// connection upgraded.
    pub async fn accept_websocket(&mut self, request_headers: &Headers) -> HttpResult<()> {
        let client_key = request_headers
            .get("sec-websocket-key")
            .ok_or_else(|| HttpError::protocol("missing Sec-WebSocket-Key"))?;
        let accept = ws::accept_key(client_key);

        let mut headers = Headers::new();
        headers.insert("Upgrade", "websocket");
        headers.insert("Connection", "Upgrade");
        headers.insert("Sec-WebSocket-Accept", accept);
        self.write_response(101, "Switching Protocols", &headers, &[]).await?;

        self.protocol = Protocol::WebSocket;
        self.read_state = ReadState::Upgraded;
        Ok(())
    }

    /// Writes the `200 OK` response headers that open an SSE stream: after
    /// calling this, use `send_sse` to push events as chunks.
    pub async fn start_sse(&mut self, extra_headers: Option<&Headers>) -> HttpResult<()> {
        let mut headers = Headers::new();
        headers.insert("Content-Type", "text/event-stream");
        headers.insert("Cache-Control", "no-cache");
        headers.insert("Transfer-Encoding", "chunked");
        if let Some(extra) = extra_headers {
            for (name, value) in extra.iter() {
                headers.insert(name, value);
            }
        }
        self.write_response(200, "OK", &headers, &[]).await?;
        self.protocol = Protocol::Sse;
        Ok(())
    }

    pub async fn send_sse(&mut self, event: &SseEvent) -> HttpResult<()> {
        self.write_chunk(event.encode().as_bytes()).await
    }

    pub fn ws_role(&self) -> WsRole {
        match self.role {
            Role::Server => WsRole::Server,
            Role::Client => WsRole::Client,
        }
    }
}
