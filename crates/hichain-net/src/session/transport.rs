//! Per-session state: the live post-auth session entity, the pure frame
//! assembler for [`SessionFrame`]s, and the steady-state send/receive
//! framing built on top of AES-128-GCM.

use std::{
    net::SocketAddr,
    sync::atomic::{AtomicI32, Ordering},
    time::Instant,
};

use bytes::{Bytes, BytesMut};
use hichain_proto::{ProtocolError, SessionFrame, SessionFrameHeader};
use tokio::{net::tcp::OwnedWriteHalf, sync::Mutex};

use crate::{
    error::{NetError, Result},
    session::{key::SessionKeyMaterial, replay::ReplayWindow},
};

/// Default capacity of a session's receive buffer.
pub const DEFAULT_RECV_BUFFER: usize = 4096;

/// Pure incremental frame decoder over a growable byte buffer, the session
/// counterpart to the auth channel's frame assembler.
pub struct SessionFrameAssembler {
    buf: BytesMut,
    max_frame_size: usize,
}

impl SessionFrameAssembler {
    /// Build an assembler with the given initial capacity and frame-size
    /// ceiling.
    #[must_use]
    pub fn new(capacity: usize, max_frame_size: usize) -> Self {
        Self { buf: BytesMut::with_capacity(capacity), max_frame_size }
    }

    /// Append freshly-read bytes to the internal buffer.
    pub fn feed(&mut self, bytes: &[u8]) {
        self.buf.extend_from_slice(bytes);
    }

    /// Pull one complete frame out of the buffer, if one is available.
    pub fn try_take_frame(&mut self) -> std::result::Result<Option<SessionFrame>, ProtocolError> {
        if self.buf.len() < SessionFrameHeader::SIZE {
            return Ok(None);
        }

        let header = *SessionFrameHeader::from_bytes(&self.buf)?;
        let total = SessionFrameHeader::SIZE.checked_add(header.data_length() as usize).ok_or(
            ProtocolError::PayloadTooLarge { size: usize::MAX, max: self.max_frame_size },
        )?;

        if total > self.max_frame_size {
            return Err(ProtocolError::PayloadTooLarge { size: total, max: self.max_frame_size });
        }

        if self.buf.len() < total {
            return Ok(None);
        }

        let frame_bytes = self.buf.split_to(total);
        Ok(Some(SessionFrame::decode(&frame_bytes, self.max_frame_size)?))
    }
}

/// A live, post-handshake session: one steady-state AES-128-GCM channel
/// identified by a process-unique id.
pub struct TcpSession {
    /// Process-unique session id, allocated by the session manager.
    pub id: u64,
    /// Bus name this session was opened against.
    pub session_name: String,
    /// Remote socket address.
    pub peer_addr: SocketAddr,
    peer_device_id: std::sync::RwLock<String>,
    bus_version: std::sync::atomic::AtomicU32,
    key: SessionKeyMaterial,
    send_seq: AtomicI32,
    replay: std::sync::Mutex<ReplayWindow>,
    writer: Mutex<OwnedWriteHalf>,
    last_active: std::sync::Mutex<Instant>,
}

impl TcpSession {
    /// Build a session around an already-negotiated key and writer half.
    #[must_use]
    pub fn new(
        id: u64,
        session_name: String,
        peer_device_id: String,
        bus_version: u32,
        peer_addr: SocketAddr,
        key: SessionKeyMaterial,
        writer: OwnedWriteHalf,
    ) -> Self {
        Self {
            id,
            session_name,
            peer_addr,
            peer_device_id: std::sync::RwLock::new(peer_device_id),
            bus_version: std::sync::atomic::AtomicU32::new(bus_version),
            key,
            send_seq: AtomicI32::new(0),
            replay: std::sync::Mutex::new(ReplayWindow::default()),
            writer: Mutex::new(writer),
            last_active: std::sync::Mutex::new(Instant::now()),
        }
    }

    /// Time elapsed since the last successfully decrypted frame (or since
    /// construction, if none has arrived yet).
    #[must_use]
    pub fn idle_for(&self) -> std::time::Duration {
        self.last_active.lock().unwrap_or_else(std::sync::PoisonError::into_inner).elapsed()
    }

    /// Peer's device identifier, as learned from the handshake.
    #[must_use]
    pub fn peer_device_id(&self) -> String {
        self.peer_device_id.read().unwrap_or_else(std::sync::PoisonError::into_inner).clone()
    }

    /// Negotiated bus protocol version.
    #[must_use]
    pub fn bus_version(&self) -> u32 {
        self.bus_version.load(Ordering::Relaxed)
    }

    /// Record the peer identity and negotiated version learned from a
    /// handshake response (client side only; the server side knows both
    /// up front).
    pub fn set_peer_info(&self, device_id: String, bus_version: u32) {
        *self.peer_device_id.write().unwrap_or_else(std::sync::PoisonError::into_inner) = device_id;
        self.bus_version.store(bus_version, Ordering::Relaxed);
    }

    /// Encrypt `plaintext`, frame it, and write it to the socket.
    ///
    /// Atomically increments the per-session send counter so concurrent
    /// callers never reuse a sequence number.
    pub async fn send(&self, plaintext: &[u8]) -> Result<()> {
        use tokio::io::AsyncWriteExt;

        let seq = self.send_seq.fetch_add(1, Ordering::SeqCst);
        let envelope = hichain_crypto::encrypt(self.key.aead_key(), plaintext)?;
        let frame = SessionFrame::new(seq, 0, envelope);

        let mut buf = Vec::new();
        frame.encode(&mut buf, SessionFrame::DEFAULT_MAX_FRAME_SIZE)?;

        let mut writer = self.writer.lock().await;
        writer.write_all(&buf).await?;
        Ok(())
    }

    /// Decrypt a received frame's envelope, rejecting replays.
    ///
    /// # Errors
    ///
    /// Returns [`NetError::ReplayAttack`] if `frame`'s sequence number has
    /// already been observed on this session.
    pub fn decrypt_received(&self, frame: &SessionFrame) -> Result<Vec<u8>> {
        let seq = frame.header.send_seq();
        let first_time = {
            let mut replay = self.replay.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            replay.check_and_record(seq)
        };
        if !first_time {
            return Err(NetError::ReplayAttack(seq));
        }

        let plaintext = hichain_crypto::decrypt(self.key.aead_key(), &frame.envelope)?;
        *self.last_active.lock().unwrap_or_else(std::sync::PoisonError::into_inner) = Instant::now();
        Ok(plaintext)
    }
}

/// Encode a pre-built [`SessionFrame`] into a fresh byte buffer.
pub fn encode_session_frame(frame: &SessionFrame, max_frame_size: usize) -> Result<Bytes> {
    let mut buf = Vec::new();
    frame.encode(&mut buf, max_frame_size)?;
    Ok(Bytes::from(buf))
}
