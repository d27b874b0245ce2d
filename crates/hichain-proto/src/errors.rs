//! Error types for the wire codec.
//!
//! Kept separate from `hichain-core`'s protocol-fault errors: this crate only
//! ever fails on malformed bytes, never on protocol state.

use thiserror::Error;

/// Errors produced while encoding or decoding frames.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ProtocolError {
    /// Buffer shorter than the fixed header size.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    FrameTooShort {
        /// Minimum bytes required.
        expected: usize,
        /// Bytes actually available.
        actual: usize,
    },

    /// Magic identifier did not match `AuthFrameHeader::IDENTIFIER` or
    /// `SessionFrameHeader::MAGIC`.
    #[error("invalid frame identifier")]
    InvalidIdentifier,

    /// Header claims more payload than the buffer holds.
    #[error("frame truncated: header claims {expected} payload bytes, buffer has {actual}")]
    FrameTruncated {
        /// Payload length claimed by the header.
        expected: usize,
        /// Payload bytes actually available after the header.
        actual: usize,
    },

    /// Declared payload length exceeds the configured maximum frame size.
    #[error("payload too large: {size} bytes exceeds maximum {max}")]
    PayloadTooLarge {
        /// Declared payload size.
        size: usize,
        /// Maximum allowed payload size.
        max: usize,
    },

    /// Module tag is not one of the known values (0-9).
    #[error("unknown module tag: {0}")]
    UnknownModule(u32),

    /// A ciphertext payload was shorter than the 4-byte key-index prefix.
    #[error("ciphertext payload too short for key index: {actual} bytes")]
    MissingKeyIndex {
        /// Bytes actually available.
        actual: usize,
    },

    /// AES-GCM encryption or decryption of a ciphertext payload failed.
    #[error(transparent)]
    Crypto(#[from] hichain_crypto::CryptoError),
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, ProtocolError>;
