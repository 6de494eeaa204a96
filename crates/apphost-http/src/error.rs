//! Error kinds for the HTTP/WS/SSE engine (spec.md §7).
//!
//! These are the engine-level kinds only (`ParseError`, `IoError`,
//! `ProtocolError`); `AppStateError`, `Cancelled`, and `UserError` belong to
//! the App runtime in `services/host` since they describe lifecycle, not
//! wire, failures.

use std::io;

#[derive(Debug, thiserror::Error)]
pub enum HttpError {
    #[error("parse error: {0}")]
    Parse(String),

    #[error("io error: {0}")]
    Io(#[from] io::Error),

    #[error("protocol error: {0}")]
    Protocol(String),
}

impl HttpError {
    pub fn parse(msg: impl Into<String>) -> Self {
        HttpError::Parse(msg.into())
    }

    pub fn protocol(msg: impl Into<String>) -> Self {
        HttpError::Protocol(msg.into())
    }

    /// spec.md §7: "Errors whose message matches closed/reset are silently
    /// dropped (expected disconnect)."
    pub fn is_expected_disconnect(&self) -> bool {
        let text = self.to_string();
        text.contains("closed") || text.contains("reset")
    }
}

pub type HttpResult<T> = Result<T, HttpError>;
