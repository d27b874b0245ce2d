//! End-to-end test opening a post-auth session over real TCP sockets,
//! exercising both the server accept path and the client connect path.

use std::{
    sync::{
        Arc, Mutex,
        atomic::{AtomicI32, Ordering},
    },
    time::{Duration, Instant},
};

use hichain_core::{DeviceConfig, DeviceInfo, Environment, SessionKeyEntry, SessionKeyStore};
use hichain_crypto::SessionKeyBytes;
use hichain_net::session::{ISessionListener, SessionManager, TcpSession};
use tokio::{net::TcpListener, sync::RwLock};

#[derive(Clone)]
struct FixedEnv(u8);

impl Environment for FixedEnv {
    type Instant = Instant;
    fn now(&self) -> Instant {
        Instant::now()
    }
    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }
    fn random_bytes(&self, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.0.wrapping_add(i as u8).wrapping_mul(13);
        }
    }
}

fn device(id: &str) -> Arc<RwLock<DeviceInfo>> {
    Arc::new(RwLock::new(DeviceInfo::new(DeviceConfig {
        device_id: id.to_string(),
        device_name: format!("{id}-name"),
        device_ip: "127.0.0.1".to_string(),
        version: 2,
    })))
}

#[derive(Default)]
struct RecordingListener {
    opened: AtomicI32,
    received: Mutex<Vec<Vec<u8>>>,
    closed: AtomicI32,
}

impl ISessionListener for RecordingListener {
    fn on_session_opened(&self, _session: &Arc<TcpSession>) -> i32 {
        self.opened.fetch_add(1, Ordering::SeqCst);
        0
    }

    fn on_session_closed(&self, _session_id: u64) {
        self.closed.fetch_add(1, Ordering::SeqCst);
    }

    fn on_bytes_received(&self, _session_id: u64, bytes: &[u8]) {
        self.received.lock().unwrap_or_else(std::sync::PoisonError::into_inner).push(bytes.to_vec());
    }
}

#[tokio::test]
async fn client_opens_session_and_exchanges_bytes_with_server() {
    let key_store = Arc::new(SessionKeyStore::new(2));
    key_store.insert(SessionKeyEntry {
        key: SessionKeyBytes::new([0x42; 16]),
        index: 100,
        device_id: "client-dev".to_string(),
    });

    let server_device = device("server-dev");
    let server_manager = Arc::new(SessionManager::new(FixedEnv(1), Arc::clone(&server_device), Arc::clone(&key_store)));
    let server_listener = Arc::new(RecordingListener::default());
    server_manager.register_server("chat", server_listener.clone(), 8);

    let tcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp_listener.local_addr().unwrap();
    let running = Arc::clone(&server_manager);
    tokio::spawn(async move {
        let _ = running.run(tcp_listener).await;
    });

    let client_device = device("client-dev");
    let client_manager = Arc::new(SessionManager::new(FixedEnv(2), client_device, Arc::clone(&key_store)));
    let client_listener = Arc::new(RecordingListener::default());

    let session =
        client_manager.connect(addr, "chat", 100, client_listener.clone()).await.expect("handshake succeeds");

    session.send(b"hello from client").await.unwrap();

    tokio::time::sleep(Duration::from_millis(50)).await;

    assert_eq!(server_listener.opened.load(Ordering::SeqCst), 1);
    let received = server_listener.received.lock().unwrap_or_else(std::sync::PoisonError::into_inner);
    assert_eq!(received.as_slice(), [b"hello from client".to_vec()]);
}

#[tokio::test]
async fn connect_fails_for_unregistered_bus_name() {
    let key_store = Arc::new(SessionKeyStore::new(2));
    key_store.insert(SessionKeyEntry {
        key: SessionKeyBytes::new([0x11; 16]),
        index: 7,
        device_id: "client-dev".to_string(),
    });

    let server_manager = Arc::new(SessionManager::new(FixedEnv(3), device("server-dev"), Arc::clone(&key_store)));
    let tcp_listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = tcp_listener.local_addr().unwrap();
    let running = Arc::clone(&server_manager);
    tokio::spawn(async move {
        let _ = running.run(tcp_listener).await;
    });

    let client_manager = Arc::new(SessionManager::new(FixedEnv(4), device("client-dev"), Arc::clone(&key_store)));
    let listener = Arc::new(RecordingListener::default());
    let result = client_manager.connect(addr, "nonexistent-bus", 7, listener).await;
    assert!(result.is_err());
}
