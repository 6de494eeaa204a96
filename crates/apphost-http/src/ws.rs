//! RFC 6455 WebSocket framing (spec.md §4.2/§6).
//!
//! Handles the handshake accept-key computation and frame encode/decode,
//! including masking (client frames MUST be masked, server frames MUST
//! NOT), fragmentation (CONTINUATION), and inline control-frame handling
//! (CLOSE/PING/PONG).
//!
//! Frame lengths are read as the RFC's 64-bit extended length but, like the
//! reference implementation this spec is modeled on, payloads are capped at
//! `u32::MAX` bytes; longer frames are rejected with a protocol error
//! (spec.md §9: "pick one and document").

use crate::error::{HttpError, HttpResult};
use crate::pipe::Pipe;
use base64::Engine;
use rand::RngCore;
use sha1::{Digest, Sha1};
use tokio::io::{AsyncRead, AsyncWrite};

pub const WS_GUID: &str = "258EAFA5-E914-47DA-95CA-C5AB0DC85B11";
const MAX_PAYLOAD_LEN: u64 = u32::MAX as u64;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Server,
    Client,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OpCode {
    Continuation,
    Text,
    Binary,
    Close,
    Ping,
    Pong,
}

impl OpCode {
    fn from_byte(b: u8) -> HttpResult<Self> {
        match b {
            0x0 => Ok(OpCode::Continuation),
            0x1 => Ok(OpCode::Text),
            0x2 => Ok(OpCode::Binary),
            0x8 => Ok(OpCode::Close),
            0x9 => Ok(OpCode::Ping),
            0xA => Ok(OpCode::Pong),
            other => Err(HttpError::protocol(format!("unknown ws opcode 0x{other:x}"))),
        }
    }

    fn to_byte(self) -> u8 {
        match self {
            OpCode::Continuation => 0x0,
            OpCode::Text => 0x1,
            OpCode::Binary => 0x2,
            OpCode::Close => 0x8,
            OpCode::Ping => 0x9,
            OpCode::Pong => 0xA,
        }
    }

    pub fn is_control(self) -> bool {
        matches!(self, OpCode::Close | OpCode::Ping | OpCode::Pong)
    }
}

#[derive(Debug, Clone)]
pub struct Frame {
    pub fin: bool,
    pub opcode: OpCode,
    pub payload: Vec<u8>,
}

/// `Sec-WebSocket-Accept = base64(SHA-1(key + GUID))`.
pub fn accept_key(client_key: &str) -> String {
    let mut hasher = Sha1::new();
    hasher.update(client_key.as_bytes());
    hasher.update(WS_GUID.as_bytes());
    let digest = hasher.finalize();
    base64::engine::general_purpose::STANDARD.encode(digest)
}

fn mask(payload: &mut [u8], key: [u8; 4]) {
    for (i, byte) in payload.iter_mut().enumerate() {
        *byte ^= key[i % 4];
    }
}

/// Read one raw frame off the wire. Does not unmask/merge fragments; callers
/// that want whole messages should use `FragmentCollector`.
pub async fn read_frame<S: AsyncRead + AsyncWrite + Unpin>(
    pipe: &mut Pipe<S>,
    role: Role,
) -> HttpResult<Frame> {
    let head = pipe.read_exact(2).await?;
    if head.len() < 2 {
        return Err(HttpError::protocol("eof reading ws frame header"));
    }
    let fin = head[0] & 0x80 != 0;
    let opcode = OpCode::from_byte(head[0] & 0x0F)?;
    let masked = head[1] & 0x80 != 0;
    let len7 = head[1] & 0x7F;

    // Server expects masked frames from clients; client expects unmasked
    // frames from servers.
    let expect_masked = role == Role::Server;
    if masked != expect_masked {
        return Err(HttpError::protocol(format!(
            "ws frame masking violates role contract (role={role:?}, masked={masked})"
        )));
    }

    let len: u64 = match len7 {
        126 => {
            let ext = pipe.read_exact(2).await?;
            if ext.len() < 2 {
                return Err(HttpError::protocol("eof reading ws extended length"));
            }
            u16::from_be_bytes([ext[0], ext[1]]) as u64
        }
        127 => {
            let ext = pipe.read_exact(8).await?;
            if ext.len() < 8 {
                return Err(HttpError::protocol("eof reading ws extended length"));
            }
            u64::from_be_bytes(ext.try_into().unwrap())
        }
        n => n as u64,
    };
    if len > MAX_PAYLOAD_LEN {
        return Err(HttpError::protocol("ws frame payload exceeds 32-bit cap"));
    }

    let mask_key = if masked {
        let key = pipe.read_exact(4).await?;
        if key.len() < 4 {
            return Err(HttpError::protocol("eof reading ws mask key"));
        }
        Some([key[0], key[1], key[2], key[3]])
    } else {
        None
    };

    let mut payload = pipe.read_exact(len as usize).await?;
    if payload.len() < len as usize {
        return Err(HttpError::protocol("eof reading ws payload"));
    }
    if let Some(key) = mask_key {
        mask(&mut payload, key);
    }

    Ok(Frame { fin, opcode, payload })
}

/// Write one raw frame. Masks iff `role == Client` (client -> server frames
/// are masked; server -> client frames MUST NOT be).
pub async fn write_frame<S: AsyncRead + AsyncWrite + Unpin>(
    pipe: &mut Pipe<S>,
    role: Role,
    fin: bool,
    opcode: OpCode,
    payload: &[u8],
) -> HttpResult<()> {
    if payload.len() as u64 > MAX_PAYLOAD_LEN {
        return Err(HttpError::protocol("ws frame payload exceeds 32-bit cap"));
    }

    let mut head = Vec::with_capacity(14);
    let first = (if fin { 0x80 } else { 0 }) | opcode.to_byte();
    head.push(first);

    let should_mask = role == Role::Client;
    let mask_bit = if should_mask { 0x80 } else { 0 };

    let len = payload.len();
    if len < 126 {
        head.push(mask_bit | len as u8);
    } else if len <= u16::MAX as usize {
        head.push(mask_bit | 126);
        head.extend_from_slice(&(len as u16).to_be_bytes());
    } else {
        head.push(mask_bit | 127);
        head.extend_from_slice(&(len as u64).to_be_bytes());
    }

    let mut body = payload.to_vec();
    if should_mask {
        let key: [u8; 4] = rand_mask_key();
        head.extend_from_slice(&key);
        mask(&mut body, key);
    }

    pipe.write(&head).await?;
    pipe.write(&body).await?;
    pipe.flush().await
}

fn rand_mask_key() -> [u8; 4] {
    let mut key = [0u8; 4];
    rand::rngs::OsRng.fill_bytes(&mut key);
    key
}

/// Collects fragmented messages (TEXT/BINARY + zero or more CONTINUATION
/// frames) into whole messages, and answers control frames inline: CLOSE
/// echoes a CLOSE, PING replies with PONG, PONG is ignored.
pub struct FragmentCollector {
    role: Role,
    fragment_opcode: Option<OpCode>,
    fragment_payload: Vec<u8>,
    closed: bool,
}

pub enum WsEvent {
    Message { opcode: OpCode, payload: Vec<u8> },
    Closed,
}

impl FragmentCollector {
    pub fn new(role: Role) -> Self {
        Self {
            role,
            fragment_opcode: None,
            fragment_payload: Vec::new(),
            closed: false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    /// Read and process frames until a whole message (or closure) is ready.
    pub async fn next_event<S: AsyncRead + AsyncWrite + Unpin>(
        &mut self,
        pipe: &mut Pipe<S>,
    ) -> HttpResult<WsEvent> {
        loop {
            let frame = read_frame(pipe, self.role).await?;

            if frame.opcode.is_control() {
                match frame.opcode {
                    OpCode::Close => {
                        write_frame(pipe, self.role, true, OpCode::Close, &frame.payload).await?;
                        self.closed = true;
                        return Ok(WsEvent::Closed);
                    }
                    OpCode::Ping => {
                        write_frame(pipe, self.role, true, OpCode::Pong, &frame.payload).await?;
                        continue;
                    }
                    OpCode::Pong => continue,
                    _ => unreachable!(),
                }
            }

            match frame.opcode {
                OpCode::Continuation => {
                    let Some(opcode) = self.fragment_opcode else {
                        return Err(HttpError::protocol("unexpected continuation frame"));
                    };
                    self.fragment_payload.extend_from_slice(&frame.payload);
                    if frame.fin {
                        let payload = std::mem::take(&mut self.fragment_payload);
                        self.fragment_opcode = None;
                        return Ok(WsEvent::Message { opcode, payload });
                    }
                }
                OpCode::Text | OpCode::Binary => {
                    if frame.fin {
                        if self.fragment_opcode.is_some() {
                            return Err(HttpError::protocol(
                                "missing continuation before new data frame",
                            ));
                        }
                        return Ok(WsEvent::Message {
                            opcode: frame.opcode,
                            payload: frame.payload,
                        });
                    }
                    if self.fragment_opcode.is_some() {
                        return Err(HttpError::protocol(
                            "new data frame started before prior fragment finished",
                        ));
                    }
                    self.fragment_opcode = Some(frame.opcode);
                    self.fragment_payload = frame.payload;
                }
                _ => unreachable!("control frames handled above"),
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[test]
    fn accept_key_matches_rfc6455_worked_example() {
        // The example key/accept pair straight from RFC 6455 §1.3.
        let key = "dGhlIHNhbXBsZSBub25jZQ==";
        assert_eq!(accept_key(key), "s3pPLMBiTxaQ9kYGzzhZRbK+xOo=");
    }

    #[tokio::test]
    async fn round_trip_single_frame_any_opcode() {
        for (opcode, role) in [
            (OpCode::Text, Role::Client),
            (OpCode::Binary, Role::Server),
        ] {
            let (a, b) = duplex(4096);
            let mut writer = Pipe::new(a);
            let mut reader = Pipe::new(b);
            let payload = b"hello websocket".to_vec();
            write_frame(&mut writer, role, true, opcode, &payload).await.unwrap();
            let frame = read_frame(&mut reader, role).await.unwrap();
            assert_eq!(frame.opcode, opcode);
            assert_eq!(frame.payload, payload);
            assert!(frame.fin);
        }
    }

    #[tokio::test]
    async fn fragmentation_reassembles_into_one_message() {
        let (a, b) = duplex(4096);
        let mut writer = Pipe::new(a);
        let mut reader = Pipe::new(b);
        write_frame(&mut writer, Role::Server, false, OpCode::Text, b"He").await.unwrap();
        write_frame(&mut writer, Role::Server, false, OpCode::Continuation, b"ll").await.unwrap();
        write_frame(&mut writer, Role::Server, true, OpCode::Continuation, b"o").await.unwrap();

        let mut collector = FragmentCollector::new(Role::Server);
        match collector.next_event(&mut reader).await.unwrap() {
            WsEvent::Message { opcode, payload } => {
                assert_eq!(opcode, OpCode::Text);
                assert_eq!(payload, b"Hello");
            }
            WsEvent::Closed => panic!("expected message"),
        }
    }

    #[tokio::test]
    async fn ping_gets_inline_pong_with_same_payload() {
        let (a, b) = duplex(4096);
        let mut writer = Pipe::new(a);
        let mut server_side = Pipe::new(b);
        write_frame(&mut writer, Role::Client, true, OpCode::Ping, &[1, 2]).await.unwrap();
        write_frame(&mut writer, Role::Client, true, OpCode::Text, b"after").await.unwrap();

        let mut collector = FragmentCollector::new(Role::Server);
        let event = collector.next_event(&mut server_side).await.unwrap();
        match event {
            WsEvent::Message { opcode, payload } => {
                assert_eq!(opcode, OpCode::Text);
                assert_eq!(payload, b"after");
            }
            WsEvent::Closed => panic!("expected message after pong handling"),
        }

        let pong = read_frame(&mut writer, Role::Server).await.unwrap();
        assert_eq!(pong.opcode, OpCode::Pong);
        assert_eq!(pong.payload, vec![1, 2]);
    }

    #[tokio::test]
    async fn close_echoes_close_and_marks_collector_closed() {
        let (a, b) = duplex(4096);
        let mut writer = Pipe::new(a);
        let mut server_side = Pipe::new(b);
        write_frame(&mut writer, Role::Client, true, OpCode::Close, b"bye").await.unwrap();

        let mut collector = FragmentCollector::new(Role::Server);
        let event = collector.next_event(&mut server_side).await.unwrap();
        assert!(matches!(event, WsEvent::Closed));
        assert!(collector.is_closed());

        let echoed = read_frame(&mut writer, Role::Server).await.unwrap();
        assert_eq!(echoed.opcode, OpCode::Close);
        assert_eq!(echoed.payload, b"bye");
    }

    #[tokio::test]
    async fn unexpected_continuation_is_a_protocol_error() {
        let (a, b) = duplex(4096);
        let mut writer = Pipe::new(a);
        let mut server_side = Pipe::new(b);
        write_frame(&mut writer, Role::Client, true, OpCode::Continuation, b"x").await.unwrap();
        let mut collector = FragmentCollector::new(Role::Server);
        let err = collector.next_event(&mut server_side).await.unwrap_err();
        assert!(matches!(err, HttpError::Protocol(_)));
    }

    #[tokio::test]
    async fn wrong_masking_for_role_is_rejected() {
        // Server frames must NOT be masked; a masked "server" frame is a
        // protocol violation from the client's point of view.
        let (a, b) = duplex(4096);
        let mut writer = Pipe::new(a);
        let mut reader = Pipe::new(b);
        write_frame(&mut writer, Role::Client, true, OpCode::Text, b"x").await.unwrap();
        let err = read_frame(&mut reader, Role::Client).await.unwrap_err();
        assert!(matches!(err, HttpError::Protocol(_)));
    }
}
