//! Per-connection state: the live authentication connection entity, and
//! the pure frame-assembly logic that turns a raw byte stream into
//! [`AuthFrame`]s.

use std::{
    collections::HashMap,
    net::SocketAddr,
    sync::atomic::{AtomicU64, Ordering},
};

use bytes::{Bytes, BytesMut};
use hichain_core::hichain::HiChainHandle;
use hichain_proto::{AuthFrame, AuthFrameHeader, ProtocolError};
use tokio::{net::tcp::OwnedWriteHalf, sync::Mutex};

/// Default capacity of a connection's receive buffer.
pub const DEFAULT_RECV_BUFFER: usize = 1536;

/// Pure incremental frame decoder over a growable byte buffer.
///
/// Bytes arrive from the socket in arbitrary chunks; `feed` appends them,
/// and `try_take_frame` pulls out complete frames as soon as enough bytes
/// are available. Carries no socket or async dependency, so it is testable
/// with plain byte slices.
pub struct FrameAssembler {
    buf: BytesMut,
    max_frame_size: usize,
}

impl FrameAssembler {
    /// Build an assembler with the given initial buffer capacity and
    /// maximum allowed frame size.
    #[must_use]
    pub fn new(capacity: usize, max_frame_size: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), max_frame_size }
    }

    /// Append newly read bytes.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Try to pull a complete frame off the front of the buffer.
    ///
    /// Returns `Ok(None)` when more bytes are needed. Returns `Err` on a
    /// bad identifier or an oversize declared length - both are fatal to
    /// the connection.
    pub fn try_take_frame(&mut self) -> Result<Option<AuthFrame>, ProtocolError> {
        if self.buf.len() < AuthFrameHeader::SIZE {
            return Ok(None);
        }

        let header = *AuthFrameHeader::from_bytes(&self.buf)?;
        let total = AuthFrameHeader::SIZE.checked_add(header.data_length() as usize).ok_or(
            ProtocolError::PayloadTooLarge { size: usize::MAX, max: self.max_frame_size },
        )?;

        if total > self.max_frame_size {
            return Err(ProtocolError::PayloadTooLarge { size: total, max: self.max_frame_size });
        }

        if self.buf.len() < total {
            return Ok(None);
        }

        let frame_bytes = self.buf.split_to(total);
        Ok(Some(AuthFrame::decode(&frame_bytes, self.max_frame_size)?))
    }
}

/// A HiChain handshake bound to one session id on one connection.
pub struct AuthSession {
    /// The wire sequence this session was opened under (reused as the
    /// `sessionId` on every follow-up frame).
    pub seq: i64,
    /// The handshake state machine for this session.
    pub handle: HiChainHandle,
}

/// Mutable peer-learned fields of a live authentication connection.
#[derive(Debug, Clone, Default)]
pub struct PeerInfo {
    /// Peer's stable device identifier, learned via `TrustEngine`.
    pub device_id: Option<String>,
    /// Peer's HiChain auth identifier, learned via `TrustEngine`.
    pub auth_id: Option<String>,
    /// Negotiated bus version, set once `VerifyIp` completes.
    pub bus_version: Option<u32>,
    /// Peer's advertised authentication listener port.
    pub auth_port: Option<i32>,
    /// Peer's advertised session listener port.
    pub session_port: Option<i32>,
    /// Whether version negotiation has completed for this connection.
    pub online: bool,
}

/// A live, accepted authentication TCP connection.
pub struct AuthConnection {
    /// Process-unique identifier for this connection (the "pseudo-fd").
    pub id: u64,
    /// Remote socket address.
    pub peer_addr: SocketAddr,
    /// Peer fields learned over the course of the handshake.
    pub peer: std::sync::RwLock<PeerInfo>,
    /// Write half of the socket, serialized so replies from different
    /// dispatch paths never interleave.
    pub writer: Mutex<OwnedWriteHalf>,
    /// Live HiChain sessions on this connection, keyed by session id.
    pub sessions: std::sync::Mutex<HashMap<u32, AuthSession>>,
}

impl AuthConnection {
    /// Wrap an accepted socket's write half into a new connection record.
    #[must_use]
    pub fn new(id: u64, peer_addr: SocketAddr, writer: OwnedWriteHalf) -> Self {
        Self {
            id,
            peer_addr,
            peer: std::sync::RwLock::new(PeerInfo::default()),
            writer: Mutex::new(writer),
            sessions: std::sync::Mutex::new(HashMap::new()),
        }
    }
}

/// Generates process-unique connection identifiers.
#[derive(Default)]
pub struct ConnectionIdAllocator(AtomicU64);

impl ConnectionIdAllocator {
    /// Allocate the next identifier.
    pub fn next(&self) -> u64 {
        self.0.fetch_add(1, Ordering::Relaxed)
    }
}

/// Encode `frame` into a fresh byte buffer, ready to write to a socket.
pub fn encode_frame(frame: &AuthFrame, max_frame_size: usize) -> Result<Bytes, ProtocolError> {
    let mut buf = Vec::new();
    frame.encode(&mut buf, max_frame_size)?;
    Ok(Bytes::from(buf))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assembler_waits_for_full_header() {
        let mut asm = FrameAssembler::new(64, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE);
        asm.feed(&[0u8; 10]);
        assert!(asm.try_take_frame().unwrap().is_none());
    }

    #[test]
    fn assembler_yields_frame_once_complete() {
        let frame = AuthFrame::new(1, 7, 0, b"hello".to_vec());
        let mut wire = Vec::new();
        frame.encode(&mut wire, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE).unwrap();

        let mut asm = FrameAssembler::new(64, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE);
        asm.feed(&wire[..20]);
        assert!(asm.try_take_frame().unwrap().is_none());
        asm.feed(&wire[20..]);
        let decoded = asm.try_take_frame().unwrap().expect("frame ready");
        assert_eq!(decoded.header.seq(), 7);
        assert_eq!(decoded.payload.as_ref(), b"hello");
    }

    #[test]
    fn assembler_yields_two_frames_fed_together() {
        let a = AuthFrame::new(1, 1, 0, b"a".to_vec());
        let b = AuthFrame::new(1, 2, 0, b"bb".to_vec());
        let mut wire = Vec::new();
        a.encode(&mut wire, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE).unwrap();
        b.encode(&mut wire, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE).unwrap();

        let mut asm = FrameAssembler::new(128, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE);
        asm.feed(&wire);
        let first = asm.try_take_frame().unwrap().expect("first frame");
        assert_eq!(first.header.seq(), 1);
        let second = asm.try_take_frame().unwrap().expect("second frame");
        assert_eq!(second.header.seq(), 2);
        assert!(asm.try_take_frame().unwrap().is_none());
    }

    #[test]
    fn assembler_rejects_bad_identifier() {
        let mut asm = FrameAssembler::new(64, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE);
        asm.feed(&[0xDE, 0xAD, 0xBE, 0xEF, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(asm.try_take_frame().is_err());
    }

    #[test]
    fn assembler_rejects_oversize_length() {
        let header = AuthFrameHeader::new(1, 0, 0, 2000);
        let mut asm = FrameAssembler::new(64, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE);
        asm.feed(&header.to_bytes());
        assert!(asm.try_take_frame().is_err());
    }
}
