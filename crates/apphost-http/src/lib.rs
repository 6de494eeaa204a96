//! A hand-rolled HTTP/1.1 engine: byte-level request/response parsing,
//! chunked transfer encoding, in-band upgrade to WebSocket framing, SSE,
//! a path-trie router, and static file serving.

pub mod context;
pub mod engine;
pub mod error;
pub mod headers;
pub mod pipe;
pub mod router;
pub mod sse;
pub mod static_files;
pub mod ws;

pub use context::Context;
pub use engine::{Engine, Protocol, ReadState, Role};
pub use error::{HttpError, HttpResult};
pub use headers::Headers;
pub use pipe::Pipe;
pub use router::Router;
