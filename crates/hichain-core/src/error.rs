//! Error types for the session-key store and the HiChain engine.
//!
//! We avoid using `std::io::Error` for protocol logic to maintain type
//! safety; transport errors are a `hichain-net` concern that wraps these.

use std::io;

use thiserror::Error;

use crate::hichain::HiChainState;

/// Errors produced by the session-key store and the HiChain protocol engine.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CoreError {
    /// `start_auth` called outside of `HiChainState::Init`, or a message
    /// arrived for a handle that is not in the state it expects.
    #[error("invalid state: cannot {operation} from {state:?}")]
    InvalidState {
        /// State the handle was in when the operation was attempted.
        state: HiChainState,
        /// Operation that was attempted.
        operation: String,
    },

    /// A HiChain message carried a `message` discriminant outside 1..=4.
    #[error("unknown HiChain message type: {0}")]
    UnknownMessageType(u32),

    /// A HiChain message failed to parse as JSON or was missing a required
    /// field for its message type.
    #[error("invalid HiChain message: {0}")]
    InvalidMessage(String),

    /// Challenge/response verification failed, or the confirm result was
    /// non-zero.
    #[error("authentication failed: {0}")]
    AuthFailed(String),

    /// Lookup by session id found no HiChain handle.
    #[error("no HiChain handle for session {0}")]
    HandleNotFound(u32),

    /// Lookup found no session key matching the requested index or device.
    #[error("session key not found")]
    SessionKeyNotFound,

    /// Underlying cryptographic primitive error.
    #[error("crypto error: {0}")]
    Crypto(#[from] hichain_crypto::CryptoError),

    /// Underlying wire codec error.
    #[error("protocol error: {0}")]
    Protocol(#[from] hichain_proto::ProtocolError),
}

impl CoreError {
    /// Returns true if this error is transient and may succeed on retry.
    ///
    /// Protocol violations (bad state, unknown message types, auth
    /// failures) are never transient - they indicate a broken or malicious
    /// peer.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        false
    }
}

/// Convert `CoreError` to `io::Error` for driver code that needs to surface
/// it through an async I/O boundary.
impl From<CoreError> for io::Error {
    fn from(err: CoreError) -> Self {
        let kind = match &err {
            CoreError::InvalidState { .. }
            | CoreError::UnknownMessageType(_)
            | CoreError::InvalidMessage(_)
            | CoreError::Protocol(_) => io::ErrorKind::InvalidData,
            CoreError::AuthFailed(_) => io::ErrorKind::PermissionDenied,
            CoreError::HandleNotFound(_) | CoreError::SessionKeyNotFound => {
                io::ErrorKind::NotFound
            },
            CoreError::Crypto(_) => io::ErrorKind::Other,
        };
        Self::new(kind, err.to_string())
    }
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, CoreError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn protocol_violations_are_never_transient() {
        assert!(
            !CoreError::InvalidState {
                state: HiChainState::Init,
                operation: "handle_response".to_string(),
            }
            .is_transient()
        );
        assert!(!CoreError::UnknownMessageType(9).is_transient());
        assert!(!CoreError::AuthFailed("bad response".to_string()).is_transient());
    }
}
