//! Static file serving (spec.md §4.3): prefix stripping, dotfile policy,
//! conditional requests (ETag/Last-Modified), and byte-range support.

use crate::context::Context;
use std::path::{Component, Path, PathBuf};
use std::time::UNIX_EPOCH;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncSeekExt, AsyncWrite, SeekFrom};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DotfilesPolicy {
    Allow,
    Deny,
    Ignore,
}

pub struct StaticFilesConfig {
    pub root: PathBuf,
    pub prefix: String,
    pub index: String,
    pub dotfiles: DotfilesPolicy,
}

impl StaticFilesConfig {
    pub fn new(root: impl Into<PathBuf>, prefix: impl Into<String>) -> Self {
        Self {
            root: root.into(),
            prefix: prefix.into(),
            index: "index.html".to_string(),
            dotfiles: DotfilesPolicy::Ignore,
        }
    }
}

/// Outcome of resolving a request path against a static-files config.
enum PathResolution {
    /// Out of scope for this handler (wrong prefix, or `..` traversal):
    /// fall through to the next route, as if this handler didn't exist.
    NotHandled,
    /// In scope, but the dotfile policy is `Deny`: the caller should
    /// answer 403, distinct from a path that was never in scope at all.
    Forbidden,
    Path(PathBuf),
}

/// Resolves `request_path` (already stripped of query string) against
/// `config`, rejecting `..` traversal and applying the dotfile policy:
/// `Ignore` falls through as [`PathResolution::NotHandled`] (404 via the
/// next route), `Deny` surfaces as [`PathResolution::Forbidden`] (403).
fn resolve_path(config: &StaticFilesConfig, request_path: &str) -> PathResolution {
    let Some(rel) = request_path.strip_prefix(&config.prefix) else {
        return PathResolution::NotHandled;
    };
    let rel = rel.trim_start_matches('/');

    let mut real = config.root.clone();
    for segment in rel.split('/') {
        if segment.is_empty() || segment == "." {
            continue;
        }
        if segment == ".." {
            return PathResolution::NotHandled;
        }
        if segment.starts_with('.') {
            match config.dotfiles {
                DotfilesPolicy::Deny => return PathResolution::Forbidden,
                DotfilesPolicy::Ignore => return PathResolution::NotHandled,
                DotfilesPolicy::Allow => {}
            }
        }
        real.push(segment);
    }

    for component in real.components() {
        if matches!(component, Component::ParentDir) {
            return PathResolution::NotHandled;
        }
    }
    PathResolution::Path(real)
}

/// Literal `<size>-<mtime-ms>` form, no `W/` prefix, matching the quoted
/// values a client would send back in `If-None-Match`.
fn weak_etag(len: u64, mtime_ms: u128) -> String {
    format!("\"{len}-{mtime_ms}\"")
}

fn http_date(mtime_ms: u128) -> String {
    let secs = (mtime_ms / 1000) as i64;
    let dt = chrono::DateTime::from_timestamp(secs, 0).unwrap_or_default();
    dt.format("%a, %d %b %Y %H:%M:%S GMT").to_string()
}

pub enum ServeOutcome {
    /// Request path wasn't under this handler's prefix, or was rejected by
    /// `..` traversal; fall through to the next route.
    NotHandled,
    /// In scope, but the dotfile policy denies it: answer 403.
    Forbidden,
    Served,
    NotFound,
}

/// Serves one file for `ctx`. Handles directory-index resolution,
/// conditional GET (`If-None-Match`/`If-Modified-Since`), and byte ranges.
pub async fn serve<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &mut Context<S>,
    config: &StaticFilesConfig,
) -> crate::error::HttpResult<ServeOutcome> {
    let mut path = match resolve_path(config, ctx.path()) {
        PathResolution::NotHandled => return Ok(ServeOutcome::NotHandled),
        PathResolution::Forbidden => return Ok(ServeOutcome::Forbidden),
        PathResolution::Path(p) => p,
    };

    let mut meta = match tokio::fs::metadata(&path).await {
        Ok(m) => m,
        Err(_) => return Ok(ServeOutcome::NotFound),
    };

    if meta.is_dir() {
        if !ctx.path().ends_with('/') {
            ctx.redirect(&format!("{}/", ctx.path()), 301).await?;
            return Ok(ServeOutcome::Served);
        }
        path.push(&config.index);
        meta = match tokio::fs::metadata(&path).await {
            Ok(m) => m,
            Err(_) => return Ok(ServeOutcome::NotFound),
        };
    }

    let len = meta.len();
    let mtime_ms = meta
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_millis())
        .unwrap_or(0);
    let etag = weak_etag(len, mtime_ms);
    let last_modified = http_date(mtime_ms);

    if ctx.header("if-none-match").is_some_and(|v| v == etag)
        || ctx
            .header("if-modified-since")
            .is_some_and(|v| v == last_modified)
    {
        ctx.status(304);
        ctx.set_header("ETag", etag);
        ctx.set_header("Last-Modified", last_modified);
        ctx.send(&[]).await?;
        return Ok(ServeOutcome::Served);
    }

    let content_type = mime_guess::from_path(&path).first_or_octet_stream();
    ctx.set_header("ETag", etag);
    ctx.set_header("Last-Modified", last_modified);
    ctx.set_header("Content-Type", content_type.essence_str().to_string());
    ctx.set_header("Cache-Control", "public, max-age=3600");
    ctx.set_header("Accept-Ranges", "bytes");

    let range = ctx.header("range").map(str::to_string);
    let mut file = match tokio::fs::File::open(&path).await {
        Ok(f) => f,
        Err(_) => return Ok(ServeOutcome::NotFound),
    };

    if let Some(range) = range.as_deref().and_then(|r| parse_range(r, len)) {
        let (start, end) = range;
        let chunk_len = end - start + 1;
        ctx.status(206);
        ctx.set_header("Content-Range", format!("bytes {start}-{end}/{len}"));
        file.seek(SeekFrom::Start(start)).await?;
        ctx.stream_start(Some(chunk_len as usize)).await?;
        stream_file_body(ctx, &mut file, chunk_len).await?;
        return Ok(ServeOutcome::Served);
    }
    if ctx.header("range").is_some() {
        ctx.status(416);
        ctx.set_header("Content-Range", format!("bytes */{len}"));
        ctx.send(&[]).await?;
        return Ok(ServeOutcome::Served);
    }

    ctx.stream_start(Some(len as usize)).await?;
    stream_file_body(ctx, &mut file, len).await?;
    Ok(ServeOutcome::Served)
}

const STREAM_CHUNK: usize = 16 * 1024;

async fn stream_file_body<S: AsyncRead + AsyncWrite + Unpin>(
    ctx: &mut Context<S>,
    file: &mut tokio::fs::File,
    mut remaining: u64,
) -> crate::error::HttpResult<()> {
    let mut buf = vec![0u8; STREAM_CHUNK];
    while remaining > 0 {
        let want = (STREAM_CHUNK as u64).min(remaining) as usize;
        let n = file.read(&mut buf[..want]).await?;
        if n == 0 {
            break;
        }
        ctx.stream_chunk(&buf[..n]).await?;
        remaining -= n as u64;
    }
    Ok(())
}

/// Parses a single-range `Range: bytes=start-end` header. Multi-range
/// requests are not supported; they fall through to a full 200 response.
fn parse_range(header: &str, total_len: u64) -> Option<(u64, u64)> {
    let spec = header.strip_prefix("bytes=")?;
    if spec.contains(',') {
        return None;
    }
    let (start, end) = spec.split_once('-')?;
    if start.is_empty() {
        // suffix range: "-500" means last 500 bytes
        let suffix_len: u64 = end.parse().ok()?;
        if suffix_len == 0 || total_len == 0 {
            return None;
        }
        let suffix_len = suffix_len.min(total_len);
        return Some((total_len - suffix_len, total_len - 1));
    }
    let start: u64 = start.parse().ok()?;
    let end: u64 = if end.is_empty() {
        total_len.saturating_sub(1)
    } else {
        end.parse().ok()?
    };
    if start > end || end >= total_len {
        return None;
    }
    Some((start, end))
}
