//! Error types for the AES-GCM primitive.

use thiserror::Error;

/// Errors produced by the AEAD encrypt/decrypt functions.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    /// Key was not exactly 16 bytes (AES-128).
    #[error("invalid key length: expected 16 bytes, got {actual}")]
    InvalidKeyLength {
        /// Length actually supplied.
        actual: usize,
    },

    /// Envelope too short to contain an IV and a tag.
    #[error("envelope too short: expected at least {expected} bytes, got {actual}")]
    EnvelopeTooShort {
        /// Minimum bytes required (IV + tag).
        expected: usize,
        /// Bytes actually supplied.
        actual: usize,
    },

    /// AEAD authentication failed, or the key/nonce/ciphertext do not match.
    #[error("decryption failed: authentication tag mismatch")]
    Decrypt,
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, CryptoError>;
