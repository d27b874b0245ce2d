//! I/O-facing errors: socket failures plus everything that can go wrong
//! above them (protocol faults, replay, capacity limits).

use thiserror::Error;

/// Errors produced by the auth connection manager and the session
/// transport.
#[derive(Error, Debug)]
pub enum NetError {
    /// A HiChain/codec/crypto fault surfaced from `hichain-core`.
    #[error(transparent)]
    Core(#[from] hichain_core::CoreError),

    /// A framing fault surfaced directly from `hichain-proto`.
    #[error(transparent)]
    Protocol(#[from] hichain_proto::ProtocolError),

    /// An AEAD fault surfaced directly from `hichain-crypto` (e.g. a
    /// forged or corrupted session envelope).
    #[error(transparent)]
    Crypto(#[from] hichain_crypto::CryptoError),

    /// Underlying socket I/O failure.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    /// The auth listener already has the maximum number of live
    /// connections.
    #[error("maximum authentication connections reached")]
    MaxConnections,

    /// A `SessionServer` already has the maximum number of live sessions.
    #[error("maximum sessions reached for this server")]
    MaxSessions,

    /// No `SessionServer` is registered under the requested bus name.
    #[error("no session server registered for bus '{0}'")]
    ServerNotFound(String),

    /// A received session frame's sequence number has already been
    /// observed on this session.
    #[error("replay detected: sequence {0} already seen")]
    ReplayAttack(i32),

    /// Lookup by session id found no live `TcpSession`.
    #[error("no session with id {0}")]
    SessionNotFound(u64),

    /// The connection or session is already closed.
    #[error("connection closed")]
    ConnectionClosed,

    /// A JSON handshake payload was malformed or missing a required field.
    #[error("invalid message: {0}")]
    InvalidMessage(String),

    /// Serializing an outbound JSON payload failed.
    #[error("failed to encode message: {0}")]
    Encode(#[from] serde_json::Error),

    /// A send exceeded the configured maximum payload size.
    #[error("message too large: {size} > {max}")]
    MessageTooLarge {
        /// Size of the rejected payload.
        size: usize,
        /// Configured maximum.
        max: usize,
    },

    /// A bounded wait (e.g. client handshake round trip) elapsed before
    /// completion.
    #[error("operation timed out")]
    Timeout,
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, NetError>;
