//! Auth connection manager: accepts TCP connections, assembles frames,
//! and dispatches them by module.

use std::{net::SocketAddr, sync::Arc};

use hichain_core::{
    DeviceInfo, Environment, SessionKeyEntry, SessionKeyStore,
    hichain::{HiChainHandle, HiChainIdentity, HiChainMessage, RESULT_SUCCESS},
};
use hichain_proto::{
    AuthFrame, AuthFrameHeader, FLAG_REPLY, Module,
    messages::{
        ConnectionCode, DeviceIdField, TrustEngineMessage, VerifyDeviceIdMessage, VerifyIpMessage,
    },
};
use tokio::{
    io::AsyncWriteExt,
    net::{TcpListener, TcpStream},
    sync::{RwLock, watch},
    task::JoinHandle,
};

use crate::{
    auth::connection::{
        AuthConnection, AuthSession, ConnectionIdAllocator, FrameAssembler, encode_frame,
        DEFAULT_RECV_BUFFER,
    },
    error::{NetError, Result},
};

/// Default cap on simultaneous authentication connections.
pub const DEFAULT_MAX_CONNECTIONS: usize = 32;

/// Owns every live authentication connection and routes frames by module.
pub struct AuthManager<E: Environment> {
    env: E,
    device: Arc<RwLock<DeviceInfo>>,
    key_store: Arc<SessionKeyStore>,
    connections: RwLock<std::collections::HashMap<u64, Arc<AuthConnection>>>,
    ids: ConnectionIdAllocator,
    max_connections: usize,
    shutdown_tx: watch::Sender<bool>,
    shutdown_rx: watch::Receiver<bool>,
    tasks: std::sync::Mutex<Vec<JoinHandle<()>>>,
}

impl<E: Environment> AuthManager<E> {
    /// Build a manager for `device`, sharing `key_store` with the session
    /// transport. `device` is also written to by the bus coordinator once
    /// the listeners are bound.
    #[must_use]
    pub fn new(env: E, device: Arc<RwLock<DeviceInfo>>, key_store: Arc<SessionKeyStore>) -> Self {
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        Self {
            env,
            device,
            key_store,
            connections: RwLock::new(std::collections::HashMap::new()),
            ids: ConnectionIdAllocator::default(),
            max_connections: DEFAULT_MAX_CONNECTIONS,
            shutdown_tx,
            shutdown_rx,
            tasks: std::sync::Mutex::new(Vec::new()),
        }
    }

    /// Number of live connections.
    pub async fn connection_count(&self) -> usize {
        self.connections.read().await.len()
    }

    /// Signal the accept loop and every live connection's receive loop to
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

    /// Accept loop: binds nothing itself, consumes an already-bound
    /// listener so the caller controls the address (including `:0`).
    pub async fn run(self: &Arc<Self>, listener: TcpListener) -> Result<()> {
        let mut shutdown_rx = self.shutdown_rx.clone();
        loop {
            let (stream, addr) = tokio::select! {
                result = listener.accept() => result?,
                _ = shutdown_rx.changed() => return Ok(()),
            };
            if self.connections.read().await.len() >= self.max_connections {
                tracing::warn!(%addr, "rejecting connection: max connections reached");
                drop(stream);
                continue;
            }

            let manager = Arc::clone(self);
            let handle = tokio::spawn(async move {
                if let Err(err) = manager.handle_connection(stream, addr).await {
                    tracing::debug!(%addr, %err, "connection ended");
                }
            });
            self.track_task(handle);
        }
    }

    async fn handle_connection(self: &Arc<Self>, stream: TcpStream, addr: SocketAddr) -> Result<()> {
        stream.set_nodelay(true).ok();
        let (mut read_half, write_half) = stream.into_split();

        let id = self.ids.next();
        let conn = Arc::new(AuthConnection::new(id, addr, write_half));
        self.connections.write().await.insert(id, Arc::clone(&conn));
        tracing::debug!(%addr, id, "authentication connection accepted");

        let mut shutdown_rx = self.shutdown_rx.clone();
        let mut assembler = FrameAssembler::new(DEFAULT_RECV_BUFFER, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE);
        let mut read_buf = [0u8; DEFAULT_RECV_BUFFER];

        let result = 'outer: loop {
            use tokio::io::AsyncReadExt;
            let n = tokio::select! {
                res = read_half.read(&mut read_buf) => match res {
                    Ok(0) => break Ok(()),
                    Ok(n) => n,
                    Err(err) => break Err(NetError::Io(err)),
                },
                _ = shutdown_rx.changed() => break Ok(()),
            };
            assembler.feed(&read_buf[..n]);

            loop {
                match assembler.try_take_frame() {
                    Ok(Some(frame)) => {
                        if let Err(err) = self.dispatch(&conn, frame).await {
                            tracing::warn!(id, %err, "dropping frame after dispatch error");
                        }
                    },
                    Ok(None) => break,
                    Err(err) => break 'outer Err(NetError::Protocol(err)),
                }
            }
        };

        self.connections.write().await.remove(&id);
        tracing::debug!(id, "authentication connection closed");
        result
    }

    async fn dispatch(self: &Arc<Self>, conn: &Arc<AuthConnection>, frame: AuthFrame) -> Result<()> {
        let module = Module::from_u32(frame.header.module())?;

        let reply = match module {
            Module::TrustEngine if !frame.header.is_reply() => self.handle_trust_engine(conn, &frame).await?,
            Module::Connection => self.handle_connection_module(conn, &frame).await?,
            Module::HiChain | Module::AuthSdk => {
                self.handle_hichain(conn, &frame).await?;
                None
            },
            other => {
                self.dispatch_other(other, &frame).await;
                None
            },
        };

        if let Some(reply) = reply {
            self.send(conn, reply).await?;
        }
        Ok(())
    }

    /// Fallback for modules with no dedicated handler (`HiChainSync`,
    /// `Session`, `SmartComm`, `AuthChannel`, `AuthMsg`). If the module's
    /// ciphertext policy is on and the payload carries a 4-byte key index
    /// for a key this connection already holds, decrypt and re-dispatch the
    /// recovered plaintext; otherwise fall back to treating the frame as
    /// plaintext. Neither path has a registered handler today, so both end
    /// in a logged drop - this only decides what gets logged.
    async fn dispatch_other(&self, module: Module, frame: &AuthFrame) {
        if module.is_ciphertext() {
            if let Ok((key_index, _)) = frame.key_index() {
                if let Some(entry) = self.key_store.get_by_index(i64::from(key_index)) {
                    match frame.decrypt_payload(entry.key.as_bytes()) {
                        Ok((_, plaintext)) => {
                            tracing::debug!(
                                module = ?module,
                                key_index,
                                len = plaintext.len(),
                                "decrypted other-module frame, no handler registered"
                            );
                            return;
                        },
                        Err(err) => {
                            tracing::warn!(module = ?module, %err, "failed to decrypt other-module frame");
                            return;
                        },
                    }
                }
            }
        }

        tracing::warn!(module = ?module, "no handler for module, treating as plaintext");
    }

    async fn handle_trust_engine(&self, conn: &Arc<AuthConnection>, frame: &AuthFrame) -> Result<Option<AuthFrame>> {
        let msg: TrustEngineMessage = serde_json::from_slice(&frame.payload)
            .map_err(|err| NetError::InvalidMessage(err.to_string()))?;

        {
            let mut peer = conn.peer.write().unwrap_or_else(std::sync::PoisonError::into_inner);
            peer.device_id = Some(msg.te_data.into_inner());
            peer.auth_id = Some(msg.te_device_id);
        }

        let local_device_id = self.device.read().await.config.device_id.clone();
        let reply = TrustEngineMessage {
            te_cmd: TrustEngineMessage::CMD_RET_AUTH_INFO.to_string(),
            te_data: DeviceIdField::Plain(local_device_id.clone()),
            te_device_id: local_device_id,
        };
        let payload = serde_json::to_vec(&reply)?;
        Ok(Some(AuthFrame::new(
            Module::TrustEngine.to_u32(),
            frame.header.seq(),
            frame.header.flags() | FLAG_REPLY,
            payload,
        )))
    }

    async fn handle_connection_module(&self, conn: &Arc<AuthConnection>, frame: &AuthFrame) -> Result<Option<AuthFrame>> {
        let code = frame_connection_code(&frame.payload)?;
        match code {
            ConnectionCode::VerifyIp => {
                let msg: VerifyIpMessage = serde_json::from_slice(&frame.payload)
                    .map_err(|err| NetError::InvalidMessage(err.to_string()))?;

                let local = self.verify_ip_self().await;
                let negotiated_max = local.bus_max_version.min(msg.bus_max_version);
                let negotiated_min = local.bus_min_version.max(msg.bus_min_version);

                {
                    let mut peer = conn.peer.write().unwrap_or_else(std::sync::PoisonError::into_inner);
                    peer.bus_version = Some(negotiated_max);
                    peer.auth_port = Some(i32::from(msg.auth_port));
                    peer.session_port = Some(i32::from(msg.session_port));
                    peer.online = true;
                }

                let reply = VerifyIpMessage {
                    code: ConnectionCode::VerifyIp,
                    bus_max_version: negotiated_max,
                    bus_min_version: negotiated_min,
                    ..local
                };
                let payload = serde_json::to_vec(&reply)?;
                Ok(Some(AuthFrame::new(
                    Module::Connection.to_u32(),
                    frame.header.seq(),
                    frame.header.flags() | FLAG_REPLY,
                    payload,
                )))
            },
            ConnectionCode::VerifyDeviceId => {
                let reply = VerifyDeviceIdMessage {
                    code: ConnectionCode::VerifyDeviceId,
                    device_id: self.device.read().await.config.device_id.clone(),
                };
                let payload = serde_json::to_vec(&reply)?;
                Ok(Some(AuthFrame::new(
                    Module::Connection.to_u32(),
                    frame.header.seq(),
                    frame.header.flags() | FLAG_REPLY,
                    payload,
                )))
            },
        }
    }

    async fn verify_ip_self(&self) -> VerifyIpMessage {
        let info = self.device.read().await;
        VerifyIpMessage {
            code: ConnectionCode::VerifyIp,
            bus_max_version: info.config.version,
            bus_min_version: info.config.version,
            auth_port: u16::try_from(info.auth_port.max(0)).unwrap_or(0),
            session_port: u16::try_from(info.session_port.max(0)).unwrap_or(0),
            conn_cap: u32::try_from(self.max_connections).unwrap_or(u32::MAX),
            device_name: info.config.device_name.clone(),
            device_type: 0,
            device_id: info.config.device_id.clone(),
            version_type: 0,
        }
    }

    async fn handle_hichain(self: &Arc<Self>, conn: &Arc<AuthConnection>, frame: &AuthFrame) -> Result<()> {
        let msg: HiChainMessage = serde_json::from_slice(&frame.payload)
            .map_err(|err| NetError::InvalidMessage(err.to_string()))?;
        let session_id = msg.session_id;
        let local_device_id = self.device.read().await.config.device_id.clone();

        let actions = {
            let mut sessions = conn.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
            let entry = sessions.entry(session_id).or_insert_with(|| {
                let identity = HiChainIdentity::new(session_id);
                let self_auth_id = conn
                    .peer
                    .read()
                    .unwrap_or_else(std::sync::PoisonError::into_inner)
                    .auth_id
                    .clone()
                    .unwrap_or(local_device_id);
                AuthSession {
                    seq: frame.header.seq(),
                    handle: HiChainHandle::new_responder(identity, self_auth_id),
                }
            });
            entry.handle.handle_message(&self.env, &msg)
        };

        let actions = match actions {
            Ok(actions) => actions,
            Err(err) => {
                tracing::warn!(session_id, %err, "HiChain handshake failed");
                conn.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&session_id);
                self.key_store.evict_index(i64::from(session_id));
                return Err(NetError::Core(err));
            },
        };

        let mut terminal = false;
        for action in actions {
            match action {
                hichain_core::hichain::HiChainAction::SendMessage(reply) => {
                    let payload = serde_json::to_vec(&reply)?;
                    let out = AuthFrame::new(Module::AuthSdk.to_u32(), i64::from(session_id), 0, payload);
                    self.send(conn, out).await?;
                },
                hichain_core::hichain::HiChainAction::SessionKeyReady(key) => {
                    let device_id = conn
                        .peer
                        .read()
                        .unwrap_or_else(std::sync::PoisonError::into_inner)
                        .device_id
                        .clone()
                        .unwrap_or_default();
                    self.key_store.insert(SessionKeyEntry {
                        key,
                        index: i64::from(session_id),
                        device_id,
                    });
                },
                hichain_core::hichain::HiChainAction::ServiceResult(result) => {
                    terminal = true;
                    if result != RESULT_SUCCESS {
                        self.key_store.evict_index(i64::from(session_id));
                    }
                },
            }
        }

        if terminal {
            conn.sessions.lock().unwrap_or_else(std::sync::PoisonError::into_inner).remove(&session_id);
        }

        Ok(())
    }

    async fn send(&self, conn: &Arc<AuthConnection>, frame: AuthFrame) -> Result<()> {
        let bytes = encode_frame(&frame, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE)?;
        let mut writer = conn.writer.lock().await;
        writer.write_all(&bytes).await?;
        Ok(())
    }
}

fn frame_connection_code(payload: &[u8]) -> Result<ConnectionCode> {
    #[derive(serde::Deserialize)]
    struct CodeOnly {
        #[serde(rename = "CODE")]
        code: ConnectionCode,
    }
    let parsed: CodeOnly =
        serde_json::from_slice(payload).map_err(|err| NetError::InvalidMessage(err.to_string()))?;
    Ok(parsed.code)
}
