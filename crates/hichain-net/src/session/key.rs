//! 32-byte session key material exchanged during the session handshake.
//!
//! The wire key is 32 bytes (to match the handshake's `sessionKey` field),
//! but the crate's only AEAD primitive is AES-128-GCM, so steady-state
//! framing encrypts under the key's first 16 bytes.

use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of the wire-format session key.
pub const SESSION_KEY_SIZE: usize = 32;

/// A session's 32-byte symmetric key. Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyMaterial([u8; SESSION_KEY_SIZE]);

impl SessionKeyMaterial {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn new(bytes: [u8; SESSION_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// The full 32 bytes, as exchanged on the wire.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; SESSION_KEY_SIZE] {
        &self.0
    }

    /// The leading 16 bytes, used as the AES-128-GCM key for steady-state
    /// framing.
    #[must_use]
    pub fn aead_key(&self) -> &[u8] {
        &self.0[..16]
    }
}

impl std::fmt::Debug for SessionKeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionKeyMaterial").field(&"<redacted>").finish()
    }
}
