//! Key material that zeroizes itself on drop.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::aead::KEY_SIZE;

/// A 16-byte AES-128 key. Zeroized when dropped.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SessionKeyBytes([u8; KEY_SIZE]);

impl SessionKeyBytes {
    /// Wrap raw key bytes.
    #[must_use]
    pub fn new(bytes: [u8; KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Borrow the raw key bytes.
    #[must_use]
    pub fn as_bytes(&self) -> &[u8; KEY_SIZE] {
        &self.0
    }
}

impl std::fmt::Debug for SessionKeyBytes {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_tuple("SessionKeyBytes").field(&"<redacted>").finish()
    }
}

impl PartialEq for SessionKeyBytes {
    fn eq(&self, other: &Self) -> bool {
        self.0 == other.0
    }
}

impl Eq for SessionKeyBytes {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_does_not_leak_key_bytes() {
        let key = SessionKeyBytes::new([0xAB; KEY_SIZE]);
        let rendered = format!("{key:?}");
        assert!(!rendered.contains("171")); // 0xAB as decimal
        assert!(rendered.contains("redacted"));
    }
}
