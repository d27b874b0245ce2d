//! Post-authentication session transport: per-session AES-128-GCM framing,
//! replay protection, and the bus-name registry sessions are opened
//! against.

pub mod key;
pub mod replay;
pub mod server;
pub mod transport;

pub use key::SessionKeyMaterial;
pub use replay::ReplayWindow;
pub use server::{ISessionListener, SessionManager, SessionServer, DEFAULT_MAX_SESSIONS};
pub use transport::{SessionFrameAssembler, TcpSession};
