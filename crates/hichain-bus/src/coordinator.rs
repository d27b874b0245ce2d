//! Starts and stops a device's auth and session listeners as one unit.
//!
//! [`BusCoordinator`] owns the [`AuthManager`] and [`SessionManager`] for one
//! device and drives their accept loops as background tasks. `start` and
//! `stop` are idempotent and serialized under a single mutex so a caller can
//! call either repeatedly without racing itself.

use std::sync::Arc;

use hichain_core::{DeviceInfo, Environment, SessionKeyStore};
use hichain_net::{
    auth::AuthManager,
    session::{ISessionListener, SessionManager},
};
use tokio::{net::TcpListener, sync::RwLock, task::JoinHandle};

use crate::error::Result;

struct RunningListeners {
    auth_task: JoinHandle<()>,
    session_task: JoinHandle<()>,
}

/// Owns the auth and session managers for one device and brings their
/// listeners up or down together.
pub struct BusCoordinator<E: Environment> {
    device: Arc<RwLock<DeviceInfo>>,
    auth_manager: Arc<AuthManager<E>>,
    session_manager: Arc<SessionManager<E>>,
    running: tokio::sync::Mutex<Option<RunningListeners>>,
}

impl<E: Environment> BusCoordinator<E> {
    /// Build a coordinator around a freshly-constructed auth/session pair,
    /// sharing one key store between them.
    #[must_use]
    pub fn new(env: E, device: Arc<RwLock<DeviceInfo>>, key_store: Arc<SessionKeyStore>) -> Self {
        let auth_manager = Arc::new(AuthManager::new(env.clone(), Arc::clone(&device), Arc::clone(&key_store)));
        let session_manager = Arc::new(SessionManager::new(env, Arc::clone(&device), key_store));
        Self { device, auth_manager, session_manager, running: tokio::sync::Mutex::new(None) }
    }

    /// The shared auth connection manager, for registering callers that
    /// need to drive HiChain handshakes directly.
    #[must_use]
    pub fn auth_manager(&self) -> Arc<AuthManager<E>> {
        Arc::clone(&self.auth_manager)
    }

    /// The shared session transport manager, for registering buses.
    #[must_use]
    pub fn session_manager(&self) -> Arc<SessionManager<E>> {
        Arc::clone(&self.session_manager)
    }

    /// Bind both listeners on `bind_ip` with an OS-chosen port, record the
    /// assigned ports into the shared device descriptor, and start their
    /// accept loops as background tasks.
    ///
    /// A no-op if the coordinator is already running.
    pub async fn start(self: &Arc<Self>, bind_ip: &str) -> Result<()> {
        let mut running = self.running.lock().await;
        if running.is_some() {
            return Ok(());
        }

        let auth_listener = TcpListener::bind((bind_ip, 0)).await?;
        let auth_port = i32::from(auth_listener.local_addr()?.port());

        let session_listener = TcpListener::bind((bind_ip, 0)).await?;
        let session_port = i32::from(session_listener.local_addr()?.port());

        {
            let mut device = self.device.write().await;
            device.auth_port = auth_port;
            device.session_port = session_port;
        }

        let auth_manager = Arc::clone(&self.auth_manager);
        let auth_task = tokio::spawn(async move {
            if let Err(err) = auth_manager.run(auth_listener).await {
                tracing::warn!(%err, "auth listener stopped");
            }
        });

        let session_manager = Arc::clone(&self.session_manager);
        let session_task = tokio::spawn(async move {
            if let Err(err) = session_manager.run(session_listener).await {
                tracing::warn!(%err, "session listener stopped");
            }
        });

        *running = Some(RunningListeners { auth_task, session_task });
        Ok(())
    }

    /// Signal both accept loops and every live connection and session to
    /// stop, wait for all of their tasks to exit, then reset the advertised
    /// ports to `-1`.
    ///
    /// A no-op if the coordinator is already stopped.
    pub async fn stop(self: &Arc<Self>) {
        let mut running = self.running.lock().await;
        let Some(listeners) = running.take() else {
            return;
        };

        self.auth_manager.shutdown().await;
        self.session_manager.shutdown().await;
        let _ = listeners.auth_task.await;
        let _ = listeners.session_task.await;

        self.device.write().await.reset_ports();
    }

    /// Whether the coordinator currently has both listeners running.
    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    /// Register a bus name to receive opened sessions.
    pub fn register_bus(
        &self,
        bus_name: impl Into<String>,
        listener: Arc<dyn ISessionListener>,
        max_sessions: usize,
    ) {
        self.session_manager.register_server(bus_name, listener, max_sessions);
    }
}
