//! The buffered byte pipe (spec.md §4.1): a framed reader/writer over a
//! reliable bidirectional byte stream.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{HttpError, HttpResult};

pub const DEFAULT_CAPACITY: usize = 4096;
const DEFAULT_LINE_MAX: usize = 65536;

/// A buffered reader/writer over `S`. Owns the connection exclusively: no
/// other code should read from or write to `S` once it is wrapped here.
pub struct Pipe<S> {
    stream: S,
    buf: Vec<u8>,
    start: usize,
    end: usize,
    capacity: usize,
    eof: bool,
}

impl<S: AsyncRead + AsyncWrite + Unpin> Pipe<S> {
    pub fn new(stream: S) -> Self {
        Self::with_capacity(stream, DEFAULT_CAPACITY)
    }

    pub fn with_capacity(stream: S, capacity: usize) -> Self {
        Self {
            stream,
            buf: vec![0u8; capacity],
            start: 0,
            end: 0,
            capacity,
            eof: false,
        }
    }

    fn buffered_len(&self) -> usize {
        self.end - self.start
    }

    fn buffered(&self) -> &[u8] {
        &self.buf[self.start..self.end]
    }

    /// Compact unread bytes to offset 0, then fill from the connection.
    /// Returns the number of new bytes read (0 means EOF).
    async fn fill(&mut self) -> HttpResult<usize> {
        if self.start > 0 {
            self.buf.copy_within(self.start..self.end, 0);
            self.end -= self.start;
            self.start = 0;
        }
        if self.end == self.capacity {
            // Buffered content already fills the capacity; caller must drain
            // via readExact/readUntil before asking for more.
            return Ok(0);
        }
        let n = self.stream.read(&mut self.buf[self.end..self.capacity]).await?;
        if n == 0 {
            self.eof = true;
        } else {
            self.end += n;
        }
        Ok(n)
    }

    /// Grow the backing buffer so at least `want` bytes can be buffered at
    /// once (used by `readUntil` with a delimiter near max length).
    fn ensure_capacity(&mut self, want: usize) {
        if want > self.capacity {
            self.buf.resize(want, 0);
            self.capacity = want;
        }
    }

    /// Returns exactly `n` bytes, or fewer on EOF. Returns an empty vec only
    /// if no bytes were ever available.
    pub async fn read_exact(&mut self, n: usize) -> HttpResult<Vec<u8>> {
        let mut out = Vec::with_capacity(n);
        while out.len() < n {
            if self.buffered_len() == 0 {
                if self.eof {
                    break;
                }
                if self.fill().await? == 0 {
                    break;
                }
                continue;
            }
            let take = (n - out.len()).min(self.buffered_len());
            out.extend_from_slice(&self.buffered()[..take]);
            self.start += take;
        }
        Ok(out)
    }

    /// Returns text up to (not including) the next `\n` or `\r\n`. On EOF
    /// with unterminated bytes, returns them as the final line (`Some`); at
    /// true EOF with nothing buffered, returns `None`.
    pub async fn read_line(&mut self, max: usize) -> HttpResult<Option<Vec<u8>>> {
        let max = if max == 0 { DEFAULT_LINE_MAX } else { max };
        loop {
            if let Some(pos) = self.buffered().iter().position(|&b| b == b'\n') {
                let mut line_end = pos;
                if line_end > 0 && self.buffered()[line_end - 1] == b'\r' {
                    line_end -= 1;
                }
                let line = self.buffered()[..line_end].to_vec();
                self.start += pos + 1;
                return Ok(Some(line));
            }
            if self.buffered_len() >= max {
                return Err(HttpError::protocol("line length exceeded max"));
            }
            if self.eof {
                if self.buffered_len() == 0 {
                    return Ok(None);
                }
                let line = self.buffered().to_vec();
                self.start = self.end;
                return Ok(Some(line));
            }
            self.ensure_capacity((self.buffered_len() + DEFAULT_CAPACITY).min(max + 1));
            if self.fill().await? == 0 && self.eof {
                // Loop again; the eof branch above will drain what's left.
                continue;
            }
        }
    }

    /// Returns bytes up to (not including) the next occurrence of `delim`.
    /// The internal buffer retains `delim.len() - 1` bytes across fills so a
    /// delimiter straddling two reads is still found.
    pub async fn read_until(&mut self, delim: &[u8], max: usize) -> HttpResult<Option<Vec<u8>>> {
        assert!(!delim.is_empty(), "delimiter must be non-empty");
        let max = if max == 0 { DEFAULT_LINE_MAX } else { max };
        loop {
            if let Some(pos) = find_subslice(self.buffered(), delim) {
                let out = self.buffered()[..pos].to_vec();
                self.start += pos + delim.len();
                return Ok(Some(out));
            }
            if self.buffered_len() >= max {
                return Err(HttpError::protocol("delimiter not found before max"));
            }
            if self.eof {
                if self.buffered_len() == 0 {
                    return Ok(None);
                }
                let out = self.buffered().to_vec();
                self.start = self.end;
                return Ok(Some(out));
            }
            self.ensure_capacity((self.buffered_len() + DEFAULT_CAPACITY).min(max + delim.len()));
            self.fill().await?;
        }
    }

    /// `size == 0` returns whatever is already buffered, or one fill's
    /// worth if the buffer is empty. `size > 0` behaves like `read_exact`.
    pub async fn read(&mut self, size: usize) -> HttpResult<Vec<u8>> {
        if size > 0 {
            return self.read_exact(size).await;
        }
        if self.buffered_len() > 0 {
            let out = self.buffered().to_vec();
            self.start = self.end;
            return Ok(out);
        }
        if self.eof {
            return Ok(Vec::new());
        }
        self.fill().await?;
        let out = self.buffered().to_vec();
        self.start = self.end;
        Ok(out)
    }

    /// Look at the next `n` buffered bytes without consuming them, filling
    /// as needed.
    pub async fn peek(&mut self, n: usize) -> HttpResult<Vec<u8>> {
        while self.buffered_len() < n && !self.eof {
            self.ensure_capacity(self.start + n);
            if self.fill().await? == 0 {
                break;
            }
        }
        let take = n.min(self.buffered_len());
        Ok(self.buffered()[..take].to_vec())
    }

    pub async fn skip(&mut self, n: usize) -> HttpResult<()> {
        let mut remaining = n;
        while remaining > 0 {
            if self.buffered_len() == 0 {
                if self.eof || self.fill().await? == 0 {
                    break;
                }
                continue;
            }
            let take = remaining.min(self.buffered_len());
            self.start += take;
            remaining -= take;
        }
        Ok(())
    }

    /// Writes are unbuffered: delegated straight to the connection.
    pub async fn write(&mut self, bytes: &[u8]) -> HttpResult<()> {
        self.stream.write_all(bytes).await?;
        Ok(())
    }

    pub async fn write_line(&mut self, text: &str) -> HttpResult<()> {
        self.write(text.as_bytes()).await?;
        self.write(b"\r\n").await
    }

    pub async fn flush(&mut self) -> HttpResult<()> {
        self.stream.flush().await?;
        Ok(())
    }

    pub async fn shutdown(&mut self) -> HttpResult<()> {
        self.stream.shutdown().await?;
        Ok(())
    }

    pub fn is_eof(&self) -> bool {
        self.eof && self.buffered_len() == 0
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    pub fn get_mut(&mut self) -> &mut S {
        &mut self.stream
    }
}

/// `setOptions({keepAlive, noDelay})` (spec.md §4.1), available only when
/// the pipe wraps a real TCP socket -- an arbitrary generic `S` (e.g. the
/// in-memory duplex streams the test suite uses) has no such options.
impl Pipe<tokio::net::TcpStream> {
    pub fn set_options(&mut self, no_delay: bool, keep_alive: bool) -> HttpResult<()> {
        self.stream.set_nodelay(no_delay)?;
        if keep_alive {
            let sock_ref = socket2::SockRef::from(&self.stream);
            sock_ref.set_keepalive(true)?;
        }
        Ok(())
    }
}

fn find_subslice(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    if needle.is_empty() || haystack.len() < needle.len() {
        return None;
    }
    haystack.windows(needle.len()).position(|w| w == needle)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn read_exact_returns_fewer_bytes_on_eof() {
        let (mut client, server) = duplex(64);
        let mut pipe = Pipe::new(server);
        client.write_all(b"abc").await.unwrap();
        drop(client);
        let out = pipe.read_exact(10).await.unwrap();
        assert_eq!(out, b"abc");
    }

    #[tokio::test]
    async fn read_line_handles_crlf_and_lf() {
        let (mut client, server) = duplex(64);
        let mut pipe = Pipe::with_capacity(server, 16);
        client.write_all(b"one\r\ntwo\nthree").await.unwrap();
        drop(client);
        assert_eq!(pipe.read_line(0).await.unwrap().unwrap(), b"one");
        assert_eq!(pipe.read_line(0).await.unwrap().unwrap(), b"two");
        assert_eq!(pipe.read_line(0).await.unwrap().unwrap(), b"three");
        assert_eq!(pipe.read_line(0).await.unwrap(), None);
    }

    #[tokio::test]
    async fn read_line_fails_when_max_exceeded() {
        let (mut client, server) = duplex(64);
        let mut pipe = Pipe::with_capacity(server, 16);
        client.write_all(b"0123456789").await.unwrap();
        let err = pipe.read_line(4).await.unwrap_err();
        assert!(matches!(err, HttpError::Protocol(_)));
    }

    #[tokio::test]
    async fn read_until_finds_delimiter_straddling_fills() {
        let (mut client, server) = duplex(4);
        let mut pipe = Pipe::with_capacity(server, 4);
        let writer = tokio::spawn(async move {
            client.write_all(b"ab--cd").await.unwrap();
        });
        let out = pipe.read_until(b"--", 64).await.unwrap().unwrap();
        assert_eq!(out, b"ab");
        let rest = pipe.read_until(b"--", 64).await.unwrap();
        assert!(rest.is_none() || rest == Some(b"cd".to_vec()));
        writer.await.unwrap();
    }

    #[tokio::test]
    async fn peek_does_not_consume() {
        let (mut client, server) = duplex(64);
        let mut pipe = Pipe::new(server);
        client.write_all(b"hello").await.unwrap();
        let peeked = pipe.peek(3).await.unwrap();
        assert_eq!(peeked, b"hel");
        let read = pipe.read_exact(5).await.unwrap();
        assert_eq!(read, b"hello");
    }

    #[tokio::test]
    async fn skip_discards_bytes() {
        let (mut client, server) = duplex(64);
        let mut pipe = Pipe::new(server);
        client.write_all(b"0123456789").await.unwrap();
        pipe.skip(3).await.unwrap();
        let rest = pipe.read_exact(7).await.unwrap();
        assert_eq!(rest, b"3456789");
    }
}
