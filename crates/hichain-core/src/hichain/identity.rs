//! Identity of a single HiChain handshake.

/// Which side of the handshake a handle plays.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiChainRole {
    /// Sends AUTH_START and AUTH_CONFIRM; drives the handshake to
    /// completion.
    Initiator,
    /// Replies to AUTH_START with AUTH_CHALLENGE and waits for
    /// AUTH_RESPONSE/AUTH_CONFIRM.
    Responder,
}

/// Identifies one HiChain handshake among the connections a manager is
/// tracking.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HiChainIdentity {
    /// Session id shared by both sides of the handshake (the auth seq it
    /// was created under).
    pub session_id: u32,
}

impl HiChainIdentity {
    /// Build an identity for the given session id.
    #[must_use]
    pub fn new(session_id: u32) -> Self {
        Self { session_id }
    }
}
