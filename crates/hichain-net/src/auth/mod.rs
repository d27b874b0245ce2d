//! Authentication connection manager: accepts TCP connections, runs the
//! handshake dispatch by module, and owns per-connection HiChain sessions.

pub mod connection;
pub mod manager;

pub use connection::{AuthConnection, AuthSession, FrameAssembler, PeerInfo};
pub use manager::{AuthManager, DEFAULT_MAX_CONNECTIONS};
