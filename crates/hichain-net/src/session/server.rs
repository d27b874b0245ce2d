//! Session listener registry and the accept/connect paths that perform the
//! post-auth key handshake before handing a live [`TcpSession`] to an
//! application callback.

use std::{
    collections::{HashMap, HashSet},
    net::SocketAddr,
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
};

use base64::Engine;
use hichain_core::{DeviceInfo, Environment, SessionKeyStore};
use hichain_proto::{AuthFrame, AuthFrameHeader, Module, SessionOpenMessage, SessionOpenResponse};
use tokio::{
    io::AsyncReadExt,
    net::{TcpListener, TcpStream},
    sync::{RwLock, watch},
    task::JoinHandle,
};

use crate::{
    auth::connection::FrameAssembler,
    error::{NetError, Result},
    session::{
        key::{SESSION_KEY_SIZE, SessionKeyMaterial},
        transport::{DEFAULT_RECV_BUFFER, SessionFrameAssembler, TcpSession},
    },
};

/// Default cap on simultaneous sessions registered to one [`SessionServer`].
pub const DEFAULT_MAX_SESSIONS: usize = 32;

/// Application hook for a registered session bus.
///
/// Mirrors the listener pattern a client uses to observe session lifecycle
/// and inbound application data, with no knowledge of sockets or framing.
pub trait ISessionListener: Send + Sync {
    /// Called once a session finishes its handshake and is registered.
    /// Returning non-zero rejects the session; the caller is told and the
    /// connection is closed.
    fn on_session_opened(&self, session: &Arc<TcpSession>) -> i32;

    /// Called once a session's connection has closed, for any reason.
    fn on_session_closed(&self, session_id: u64);

    /// Called for each decrypted application payload received on a
    /// session.
    fn on_bytes_received(&self, session_id: u64, bytes: &[u8]);
}

/// A named bus: one listener plus the sessions currently registered to it.
pub struct SessionServer {
    /// Name this server is registered under.
    pub bus_name: String,
    listener: Arc<dyn ISessionListener>,
    session_ids: std::sync::RwLock<HashSet<u64>>,
    max_sessions: usize,
}

impl SessionServer {
    #[must_use]
    fn new(bus_name: String, listener: Arc<dyn ISessionListener>, max_sessions: usize) -> Self {
        Self { bus_name, listener, session_ids: std::sync::RwLock::new(HashSet::new()), max_sessions }
    }

    /// Number of sessions currently registered.
    #[must_use]
    pub fn session_count(&self) -> usize {
        self.session_ids.read().unwrap_or_else(std::sync::PoisonError::into_inner).len()
    }

    fn try_register(&self, session: &Arc<TcpSession>) -> Result<i32> {
        let mut ids = self.session_ids.write().unwrap_or_else(std::sync::PoisonError::into_inner);
        if ids.len() >= self.max_sessions {
            return Err(NetError::MaxSessions);
        }
        let session_id = session.id;
        let listener = Arc::clone(&self.listener);
        let session = Arc::clone(session);
        let result = guarded_call(move || listener.on_session_opened(&session)).unwrap_or(1);
        if result == 0 {
            ids.insert(session_id);
        }
        Ok(result)
    }

    fn unregister(&self, session_id: u64) {
        let removed = self
            .session_ids
            .write()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .remove(&session_id);
        if removed {
            let listener = Arc::clone(&self.listener);
            guarded_call(move || listener.on_session_closed(session_id));
        }
    }
}

/// Process-unique session ids split into disjoint ranges so locally-opened
/// and remotely-accepted sessions can never collide.
#[derive(Default)]
struct SessionIdAllocator {
    accepted: AtomicU64,
    opened: AtomicU64,
}

impl SessionIdAllocator {
    /// High bit set: reserved for sessions this process opened as a
    /// client.
    const OPENED_TAG: u64 = 1 << 63;

    fn next_accepted(&self) -> u64 {
        self.accepted.fetch_add(1, Ordering::Relaxed)
    }

    fn next_opened(&self) -> u64 {
        Self::OPENED_TAG | self.opened.fetch_add(1, Ordering::Relaxed)
    }
}

/// Owns every registered [`SessionServer`] and every live [`TcpSession`],
/// and drives both the accept loop for inbound sessions and the handshake
/// for outbound ones.
pub struct SessionManager<E: Environment> {
    env: E,
    device: Arc<RwLock<DeviceInfo>>,
    key_store: Arc<SessionKeyStore>,
    servers: std::sync::RwLock<HashMap<String, Arc<SessionServer>>>,
    sessions: std::sync::RwLock<HashMap<u64, Arc<TcpSession>>>,
    ids: SessionIdAllocator,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<E: Environment> SessionManager<E> {
    /// Build a manager sharing `device` and `key_store` with the auth
    /// connection manager.
    #[must_use]
    pub fn new(env: E, device: Arc<RwLock<DeviceInfo>>, key_store: Arc<SessionKeyStore>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            env,
            device,
            key_store,
            servers: std::sync::RwLock::new(HashMap::new()),
            sessions: std::sync::RwLock::new(HashMap::new()),
            ids: SessionIdAllocator::default(),
            shutdown_tx,
            shutdown_rx,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Signal the accept loop and every live session's receive loop to
    /// stop, then wait for all of them to exit.
    pub async fn shutdown(&self) {
        let _ = self.shutdown_tx.send(true);
        let handles: Vec<_> =
            std::mem::take(&mut *self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner));
        for handle in handles {
            let _ = handle.await;
        }
    }

    fn track_task(&self, handle: JoinHandle<()>) {
        let mut tasks = self.tasks.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
        tasks.retain(|h| !h.is_finished());
        tasks.push(handle);
    }

    /// Register a bus name with a listener. Replaces any existing
    /// registration under the same name.
    pub fn register_server(
        &self,
        bus_name: impl Into<String>,
        listener: Arc<dyn ISessionListener>,
        max_sessions: usize,
    ) -> Arc<SessionServer> {
        let bus_name = bus_name.into();
        let server = Arc::new(SessionServer::new(bus_name.clone(), listener, max_sessions));
        self.servers.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(bus_name, Arc::clone(&server));
        server
    }

    /// Remove a bus registration. Does not close sessions already opened
    /// against it.
    pub fn unregister_server(&self, bus_name: &str) {
        self.servers.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(bus_name);
    }

    /// Look up a live session by id.
    #[must_use]
    pub fn get_session(&self, session_id: u64) -> Option<Arc<TcpSession>> {
        self.sessions.read().unwrap_or_else(std::sync::PoisonError::into_inner).get(&session_id).cloned()
    }

    /// Encrypt and send `bytes` on the given session.
    pub async fn send(&self, session_id: u64, bytes: &[u8]) -> Result<()> {
        let session = self.get_session(session_id).ok_or(NetError::SessionNotFound(session_id))?;
        session.send(bytes).await
    }

    /// Accept loop for inbound sessions: consumes an already-bound
    /// listener so the caller controls the address.
    pub async fn run(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            let (stream, addr) = tokio::select! {
                result = listener.accept() => result?,
                _ = shutdown_rx.changed() => return Ok(()),
            };
            let manager = Arc::clone(self);
            let handle = tokio::spawn(async move {
                if let Err(err) = manager.accept_session(stream, addr).await {
                    tracing::debug!(%addr, %err, "session handshake failed");
                }
            });
            self.track_task(handle);
        }
    }

    async fn accept_session(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        stream.set_nodelay(true).ok();
        let (mut read_half, write_half) = stream.into_split();

        let opening = read_one_auth_frame(&mut read_half).await?;
        let (key_index, envelope) = split_key_index(&opening.payload)?;
        let auth_entry = self
            .key_store
            .get_by_index(i64::from(key_index))
            .ok_or(NetError::InvalidMessage("no auth key for handshake frame".to_string()))?;
        let plaintext = hichain_crypto::decrypt(auth_entry.key.as_bytes(), envelope)?;
        let open_msg: SessionOpenMessage =
            serde_json::from_slice(&plaintext).map_err(|err| NetError::InvalidMessage(err.to_string()))?;

        let key_bytes = decode_session_key(&open_msg.session_key)?;
        let id = self.ids.next_accepted();
        let local_device_id = self.device.read().await.config.device_id.clone();
        let session = Arc::new(TcpSession::new(
            id,
            open_msg.bus_name.clone(),
            open_msg.device_id.clone(),
            open_msg.bus_version,
            addr,
            SessionKeyMaterial::new(key_bytes),
            write_half,
        ));

        let server = self
            .servers
            .read()
            .unwrap_or_else(std::sync::PoisonError::into_inner)
            .get(&open_msg.bus_name)
            .cloned();

        let Some(server) = server else {
            let response = SessionOpenResponse {
                device_id: local_device_id,
                session_name: open_msg.bus_name.clone(),
                bus_version: open_msg.bus_version,
                my_session_name: String::new(),
                result: 1,
            };
            let payload = serde_json::to_vec(&response)?;
            let _ = session.send(&payload).await;
            return Err(NetError::ServerNotFound(open_msg.bus_name));
        };

        let result = server.try_register(&session);
        let result = match result {
            Ok(code) => code,
            Err(err) => {
                let response = SessionOpenResponse {
                    device_id: local_device_id,
                    session_name: open_msg.bus_name.clone(),
                    bus_version: open_msg.bus_version,
                    my_session_name: server.bus_name.clone(),
                    result: 1,
                };
                let payload = serde_json::to_vec(&response)?;
                let _ = session.send(&payload).await;
                return Err(err);
            },
        };

        let response = SessionOpenResponse {
            device_id: local_device_id,
            session_name: open_msg.bus_name.clone(),
            bus_version: open_msg.bus_version,
            my_session_name: server.bus_name.clone(),
            result,
        };
        let payload = serde_json::to_vec(&response)?;
        session.send(&payload).await?;

        if result != 0 {
            return Ok(());
        }

        self.sessions.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, Arc::clone(&session));
        self.run_receive_loop(session, read_half, Arc::clone(&server)).await;
        Ok(())
    }

    /// Open a session against a peer that has already completed a HiChain
    /// handshake with this device. `auth_key_index` selects the
    /// auth-negotiated key to encrypt the opening packet under.
    pub async fn connect(
        self: &Arc<Self>,
        addr: SocketAddr,
        bus_name: impl Into<String>,
        auth_key_index: i64,
        listener: Arc<dyn ISessionListener>,
    ) -> Result<Arc<TcpSession>> {
        let bus_name = bus_name.into();
        let auth_entry = self
            .key_store
            .get_by_index(auth_key_index)
            .ok_or(NetError::InvalidMessage("no auth key for session connect".to_string()))?;

        let mut key_bytes = [0u8; SESSION_KEY_SIZE];
        self.env.random_bytes(&mut key_bytes);

        let device = self.device.read().await;
        let open_msg = SessionOpenMessage {
            bus_name: bus_name.clone(),
            device_id: device.config.device_id.clone(),
            session_key: base64::engine::general_purpose::STANDARD.encode(key_bytes),
            bus_version: device.config.version,
        };
        drop(device);

        let plaintext = serde_json::to_vec(&open_msg)?;
        let envelope = hichain_crypto::encrypt(auth_entry.key.as_bytes(), &plaintext)?;
        let mut payload = Vec::with_capacity(4 + envelope.len());
        payload.extend_from_slice(&(auth_key_index as u32).to_le_bytes());
        payload.extend_from_slice(&envelope);
        let opening = AuthFrame::new(Module::Session.to_u32(), 0, 0, payload);
        let mut wire = Vec::new();
        opening.encode(&mut wire, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE)?;

        let stream = TcpStream::connect(addr).await?;
        stream.set_nodelay(true).ok();
        let (mut read_half, write_half) = stream.into_split();

        {
            use tokio::io::AsyncWriteExt;
            let mut write_half = write_half;
            write_half.write_all(&wire).await?;
            let id = self.ids.next_opened();
            let session = Arc::new(TcpSession::new(
                id,
                bus_name,
                String::new(),
                open_msg.bus_version,
                addr,
                SessionKeyMaterial::new(key_bytes),
                write_half,
            ));

            let response_frame = read_one_session_frame(&mut read_half).await?;
            let plaintext = session.decrypt_received(&response_frame)?;
            let response: SessionOpenResponse =
                serde_json::from_slice(&plaintext).map_err(|err| NetError::InvalidMessage(err.to_string()))?;

            if response.result != 0 {
                return Err(NetError::InvalidMessage(format!(
                    "session open rejected with code {}",
                    response.result
                )));
            }

            session.set_peer_info(response.device_id, response.bus_version);
            let accepted = {
                let listener = Arc::clone(&listener);
                let session = Arc::clone(&session);
                guarded_call(move || listener.on_session_opened(&session)).unwrap_or(1)
            };
            if accepted != 0 {
                return Err(NetError::InvalidMessage(format!("local listener rejected session: {accepted}")));
            }

            self.sessions.write().unwrap_or_else(std::sync::PoisonError::into_inner).insert(id, Arc::clone(&session));

            let manager = Arc::clone(self);
            let session_for_task = Arc::clone(&session);
            let handle = tokio::spawn(async move {
                manager.run_client_receive_loop(session_for_task, read_half, listener).await;
            });
            self.track_task(handle);

            Ok(session)
        }
    }

    async fn run_receive_loop(
        self: &Arc<Self>,
        session: Arc<TcpSession>,
        mut read_half: tokio::net::tcp::OwnedReadHalf,
        server: Arc<SessionServer>,
    ) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut assembler = SessionFrameAssembler::new(DEFAULT_RECV_BUFFER, hichain_proto::SessionFrame::DEFAULT_MAX_FRAME_SIZE);
        let mut read_buf = [0u8; DEFAULT_RECV_BUFFER];

        loop {
            let n = tokio::select! {
                res = read_half.read(&mut read_buf) => match res {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                },
                _ = shutdown_rx.changed() => break,
            };
            assembler.feed(&read_buf[..n]);

            loop {
                match assembler.try_take_frame() {
                    Ok(Some(frame)) => match session.decrypt_received(&frame) {
                        Ok(plaintext) => {
                            let listener = Arc::clone(&server.listener);
                            let session_id = session.id;
                            guarded_call(move || listener.on_bytes_received(session_id, &plaintext));
                        },
                        Err(err) => tracing::warn!(session_id = session.id, %err, "dropping undecryptable frame"),
                    },
                    Ok(None) => break,
                    Err(err) => {
                        tracing::warn!(session_id = session.id, %err, "session framing error, closing");
                        self.close_accepted(&session, &server);
                        return;
                    },
                }
            }
        }

        self.close_accepted(&session, &server);
    }

    fn close_accepted(&self, session: &Arc<TcpSession>, server: &Arc<SessionServer>) {
        self.sessions.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&session.id);
        server.unregister(session.id);
    }

    async fn run_client_receive_loop(
        self: Arc<Self>,
        session: Arc<TcpSession>,
        mut read_half: tokio::net::tcp::OwnedReadHalf,
        listener: Arc<dyn ISessionListener>,
    ) {
        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut assembler = SessionFrameAssembler::new(DEFAULT_RECV_BUFFER, hichain_proto::SessionFrame::DEFAULT_MAX_FRAME_SIZE);
        let mut read_buf = [0u8; DEFAULT_RECV_BUFFER];

        loop {
            let n = tokio::select! {
                res = read_half.read(&mut read_buf) => match res {
                    Ok(0) | Err(_) => break,
                    Ok(n) => n,
                },
                _ = shutdown_rx.changed() => break,
            };
            assembler.feed(&read_buf[..n]);

            loop {
                match assembler.try_take_frame() {
                    Ok(Some(frame)) => match session.decrypt_received(&frame) {
                        Ok(plaintext) => {
                            let listener = Arc::clone(&listener);
                            let session_id = session.id;
                            guarded_call(move || listener.on_bytes_received(session_id, &plaintext));
                        },
                        Err(err) => tracing::warn!(session_id = session.id, %err, "dropping undecryptable frame"),
                    },
                    Ok(None) => break,
                    Err(_) => {
                        self.sessions.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&session.id);
                        let listener = Arc::clone(&listener);
                        let session_id = session.id;
                        guarded_call(move || listener.on_session_closed(session_id));
                        return;
                    },
                }
            }
        }

        self.sessions.write().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&session.id);
        guarded_call(move || listener.on_session_closed(session.id));
    }
}

/// Run a listener callback behind `catch_unwind` so a panicking application
/// hook cannot tear down the receive task (and, transitively, the process).
fn guarded_call<T>(f: impl FnOnce() -> T) -> Option<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(value) => Some(value),
        Err(_) => {
            tracing::error!("session listener callback panicked");
            None
        },
    }
}

async fn read_one_auth_frame(read_half: &mut tokio::net::tcp::OwnedReadHalf) -> Result<AuthFrame> {
    let mut assembler = FrameAssembler::new(DEFAULT_RECV_BUFFER, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE);
    let mut buf = [0u8; DEFAULT_RECV_BUFFER];
    loop {
        if let Some(frame) = assembler.try_take_frame()? {
            return Ok(frame);
        }
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            return Err(NetError::ConnectionClosed);
        }
        assembler.feed(&buf[..n]);
    }
}

async fn read_one_session_frame(
    read_half: &mut tokio::net::tcp::OwnedReadHalf,
) -> Result<hichain_proto::SessionFrame> {
    let mut assembler = SessionFrameAssembler::new(DEFAULT_RECV_BUFFER, hichain_proto::SessionFrame::DEFAULT_MAX_FRAME_SIZE);
    let mut buf = [0u8; DEFAULT_RECV_BUFFER];
    loop {
        if let Some(frame) = assembler.try_take_frame()? {
            return Ok(frame);
        }
        let n = read_half.read(&mut buf).await?;
        if n == 0 {
            return Err(NetError::ConnectionClosed);
        }
        assembler.feed(&buf[..n]);
    }
}

/// Split a ciphertext auth-frame payload into its leading 4-byte
/// little-endian key index and the AEAD envelope that follows it.
fn split_key_index(payload: &[u8]) -> Result<(u32, &[u8])> {
    if payload.len() < 4 {
        return Err(NetError::InvalidMessage("payload too short for key index".to_string()));
    }
    let (index_bytes, envelope) = payload.split_at(4);
    let index = u32::from_le_bytes([index_bytes[0], index_bytes[1], index_bytes[2], index_bytes[3]]);
    Ok((index, envelope))
}

fn decode_session_key(encoded: &str) -> Result<[u8; SESSION_KEY_SIZE]> {
    let bytes = base64::engine::general_purpose::STANDARD
        .decode(encoded)
        .map_err(|err| NetError::InvalidMessage(format!("bad session key encoding: {err}")))?;
    <[u8; SESSION_KEY_SIZE]>::try_from(bytes.as_slice())
        .map_err(|_| NetError::InvalidMessage(format!("session key must be {SESSION_KEY_SIZE} bytes")))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn session_id_ranges_are_disjoint() {
        let ids = SessionIdAllocator::default();
        let accepted = ids.next_accepted();
        let opened = ids.next_opened();
        assert_eq!(accepted & SessionIdAllocator::OPENED_TAG, 0);
        assert_ne!(opened & SessionIdAllocator::OPENED_TAG, 0);
    }

    #[test]
    fn decode_session_key_rejects_wrong_length() {
        let short = base64::engine::general_purpose::STANDARD.encode([0u8; 10]);
        assert!(decode_session_key(&short).is_err());
    }

    #[test]
    fn decode_session_key_accepts_32_bytes() {
        let encoded = base64::engine::general_purpose::STANDARD.encode([7u8; SESSION_KEY_SIZE]);
        let decoded = decode_session_key(&encoded).unwrap();
        assert_eq!(decoded, [7u8; SESSION_KEY_SIZE]);
    }

    #[test]
    fn split_key_index_reads_leading_le_u32() {
        let mut payload = 42u32.to_le_bytes().to_vec();
        payload.extend_from_slice(b"rest");
        let (index, envelope) = split_key_index(&payload).unwrap();
        assert_eq!(index, 42);
        assert_eq!(envelope, b"rest");
    }

    #[test]
    fn split_key_index_rejects_short_payload() {
        assert!(split_key_index(&[1, 2, 3]).is_err());
    }
}
