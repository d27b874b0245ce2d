//! AES-128-GCM encryption and decryption.
//!
//! All functions are pure with respect to their inputs except that
//! `encrypt` draws its nonce from the process RNG; callers who need
//! deterministic output should use [`encrypt_with_nonce`] directly.

use aes_gcm::{
    Aes128Gcm, Nonce,
    aead::{Aead, KeyInit},
};
use rand::RngCore;

use crate::errors::{CryptoError, Result};

/// Size of the random nonce (12 bytes, the GCM standard).
pub const NONCE_SIZE: usize = 12;

/// Size of the Poly1305-style GCM authentication tag (16 bytes).
pub const TAG_SIZE: usize = 16;

/// AES-128 key length in bytes.
pub const KEY_SIZE: usize = 16;

/// Encrypt `plaintext` under `key`, generating a fresh random nonce.
///
/// Returns `IV(12) || ciphertext || tag(16)`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] if `key` is not 16 bytes.
pub fn encrypt(key: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
    let mut nonce_bytes = [0u8; NONCE_SIZE];
    rand::thread_rng().fill_bytes(&mut nonce_bytes);
    encrypt_with_nonce(key, plaintext, nonce_bytes)
}

/// Encrypt `plaintext` under `key` using a caller-supplied nonce.
///
/// Exposed for deterministic tests; production callers should use
/// [`encrypt`], which always draws a fresh random nonce.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] if `key` is not 16 bytes.
pub fn encrypt_with_nonce(
    key: &[u8],
    plaintext: &[u8],
    nonce_bytes: [u8; NONCE_SIZE],
) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength { actual: key.len() });
    }

    let cipher = Aes128Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength { actual: key.len() })?;
    let nonce = Nonce::from_slice(&nonce_bytes);

    let ciphertext_and_tag =
        cipher.encrypt(nonce, plaintext).map_err(|_| CryptoError::Decrypt)?;

    let mut envelope = Vec::with_capacity(NONCE_SIZE + ciphertext_and_tag.len());
    envelope.extend_from_slice(&nonce_bytes);
    envelope.extend_from_slice(&ciphertext_and_tag);
    Ok(envelope)
}

/// Decrypt an envelope of the form `IV(12) || ciphertext || tag(16)`.
///
/// # Errors
///
/// Returns [`CryptoError::InvalidKeyLength`] if `key` is not 16 bytes,
/// [`CryptoError::EnvelopeTooShort`] if `envelope` cannot hold an IV and a
/// tag, or [`CryptoError::Decrypt`] if authentication fails.
pub fn decrypt(key: &[u8], envelope: &[u8]) -> Result<Vec<u8>> {
    if key.len() != KEY_SIZE {
        return Err(CryptoError::InvalidKeyLength { actual: key.len() });
    }

    let min_len = NONCE_SIZE + TAG_SIZE;
    if envelope.len() < min_len {
        return Err(CryptoError::EnvelopeTooShort { expected: min_len, actual: envelope.len() });
    }

    let (nonce_bytes, ciphertext_and_tag) = envelope.split_at(NONCE_SIZE);
    let cipher = Aes128Gcm::new_from_slice(key)
        .map_err(|_| CryptoError::InvalidKeyLength { actual: key.len() })?;
    let nonce = Nonce::from_slice(nonce_bytes);

    cipher.decrypt(nonce, ciphertext_and_tag).map_err(|_| CryptoError::Decrypt)
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    fn arbitrary_key() -> impl Strategy<Value = Vec<u8>> {
        prop::collection::vec(any::<u8>(), KEY_SIZE)
    }

    proptest! {
        #[test]
        fn encrypt_decrypt_roundtrip(key in arbitrary_key(), plaintext in prop::collection::vec(any::<u8>(), 0..2048)) {
            let envelope = encrypt(&key, &plaintext).expect("encrypt");
            let decrypted = decrypt(&key, &envelope).expect("decrypt");
            prop_assert_eq!(decrypted, plaintext);
        }

        #[test]
        fn tampered_tag_fails(key in arbitrary_key(), plaintext in prop::collection::vec(any::<u8>(), 1..256)) {
            let mut envelope = encrypt(&key, &plaintext).expect("encrypt");
            let last = envelope.len() - 1;
            envelope[last] ^= 0xFF;
            prop_assert!(decrypt(&key, &envelope).is_err());
        }
    }

    #[test]
    fn rejects_short_key() {
        let err = encrypt(&[0u8; 8], b"hello").unwrap_err();
        assert_eq!(err, CryptoError::InvalidKeyLength { actual: 8 });
    }

    #[test]
    fn rejects_short_envelope() {
        let err = decrypt(&[0u8; KEY_SIZE], &[0u8; 10]).unwrap_err();
        assert_eq!(err, CryptoError::EnvelopeTooShort { expected: 28, actual: 10 });
    }

    #[test]
    fn different_nonces_produce_different_envelopes() {
        let key = [7u8; KEY_SIZE];
        let a = encrypt_with_nonce(&key, b"same plaintext", [0u8; NONCE_SIZE]).unwrap();
        let b = encrypt_with_nonce(&key, b"same plaintext", [1u8; NONCE_SIZE]).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn empty_plaintext_round_trips() {
        let key = [3u8; KEY_SIZE];
        let envelope = encrypt(&key, b"").unwrap();
        assert_eq!(envelope.len(), NONCE_SIZE + TAG_SIZE);
        assert_eq!(decrypt(&key, &envelope).unwrap(), b"");
    }
}
