//! Authentication-channel frame: a fixed 24-byte little-endian header
//! followed by a variable-length payload.
//!
//! Layout on the wire:
//! `[AuthFrameHeader: 24 bytes, little-endian] + [payload: variable bytes]`

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Fixed 24-byte authentication frame header (little-endian).
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct AuthFrameHeader {
    identifier: [u8; 4],
    module: [u8; 4],
    seq: [u8; 8],
    flags: [u8; 4],
    data_length: [u8; 4],
}

/// Reply bit within `AuthFrameHeader::flags`.
pub const FLAG_REPLY: u32 = 0x1;

impl AuthFrameHeader {
    /// Size of the serialized header in bytes.
    pub const SIZE: usize = 24;

    /// Fixed magic identifier for every auth frame.
    pub const IDENTIFIER: u32 = 0xBABE_FACE;

    /// Default maximum total frame size (header + payload).
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 1512;

    /// Build a new header. `data_length` is set to `payload_len`.
    #[must_use]
    pub fn new(module: u32, seq: i64, flags: u32, payload_len: u32) -> Self {
        Self {
            identifier: Self::IDENTIFIER.to_le_bytes(),
            module: module.to_le_bytes(),
            seq: seq.to_le_bytes(),
            flags: flags.to_le_bytes(),
            data_length: payload_len.to_le_bytes(),
        }
    }

    /// Parse a header from the front of `bytes`, validating the magic
    /// identifier.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if header.identifier() != Self::IDENTIFIER {
            return Err(ProtocolError::InvalidIdentifier);
        }

        Ok(header)
    }

    /// Serialize the header to its wire bytes.
    #[must_use]
    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let bytes = IntoBytes::as_bytes(&self);
        let mut arr = [0u8; Self::SIZE];
        arr.copy_from_slice(bytes);
        arr
    }

    /// Magic identifier (always `IDENTIFIER` for a validated header).
    #[must_use]
    pub fn identifier(&self) -> u32 {
        u32::from_le_bytes(self.identifier)
    }

    /// Routing module tag, raw.
    #[must_use]
    pub fn module(&self) -> u32 {
        u32::from_le_bytes(self.module)
    }

    /// Per-connection sequence number.
    #[must_use]
    pub fn seq(&self) -> i64 {
        i64::from_le_bytes(self.seq)
    }

    /// Header flags (bit 0 = reply).
    #[must_use]
    pub fn flags(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    /// Whether the reply bit is set.
    #[must_use]
    pub fn is_reply(&self) -> bool {
        self.flags() & FLAG_REPLY != 0
    }

    /// Declared payload length in bytes.
    #[must_use]
    pub fn data_length(&self) -> u32 {
        u32::from_le_bytes(self.data_length)
    }
}

impl std::fmt::Debug for AuthFrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthFrameHeader")
            .field("identifier", &format!("{:#010x}", self.identifier()))
            .field("module", &self.module())
            .field("seq", &self.seq())
            .field("flags", &self.flags())
            .field("data_length", &self.data_length())
            .finish()
    }
}

/// A complete authentication frame: header plus raw (possibly encrypted)
/// payload bytes.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthFrame {
    /// Frame header.
    pub header: AuthFrameHeader,
    /// Raw payload bytes (plaintext JSON, or a ciphertext envelope).
    pub payload: Bytes,
}

impl AuthFrame {
    /// Build a frame, computing `data_length` from the payload.
    #[must_use]
    pub fn new(module: u32, seq: i64, flags: u32, payload: impl Into<Bytes>) -> Self {
        let payload = payload.into();
        #[allow(clippy::cast_possible_truncation)]
        let len = payload.len() as u32;
        Self { header: AuthFrameHeader::new(module, seq, flags, len), payload }
    }

    /// Encode header and payload into `dst`.
    ///
    /// # Errors
    /// Returns [`ProtocolError::PayloadTooLarge`] if the payload would push
    /// the frame past `max_frame_size`.
    pub fn encode(&self, dst: &mut impl BufMut, max_frame_size: usize) -> Result<()> {
        let total = AuthFrameHeader::SIZE + self.payload.len();
        if total > max_frame_size {
            return Err(ProtocolError::PayloadTooLarge { size: total, max: max_frame_size });
        }
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.payload);
        Ok(())
    }

    /// Build a ciphertext frame: `payload` is AES-GCM-encrypted under `key`
    /// and the result is prefixed with a 4-byte little-endian `key_index`,
    /// per the ciphertext-payload wire format.
    ///
    /// # Errors
    /// Returns [`ProtocolError::Crypto`] if `key` is not a valid AES-128 key.
    pub fn new_ciphertext(
        module: u32,
        seq: i64,
        flags: u32,
        key_index: u32,
        key: &[u8],
        plaintext: &[u8],
    ) -> Result<Self> {
        let envelope = hichain_crypto::encrypt(key, plaintext)?;
        let mut payload = Vec::with_capacity(4 + envelope.len());
        payload.extend_from_slice(&key_index.to_le_bytes());
        payload.extend_from_slice(&envelope);
        Ok(Self::new(module, seq, flags, payload))
    }

    /// Split a ciphertext payload into its leading 4-byte little-endian key
    /// index and the AES-GCM envelope that follows it, without decrypting.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MissingKeyIndex`] if the payload is shorter
    /// than 4 bytes.
    pub fn key_index(&self) -> Result<(u32, &[u8])> {
        if self.payload.len() < 4 {
            return Err(ProtocolError::MissingKeyIndex { actual: self.payload.len() });
        }
        let (index_bytes, envelope) = self.payload.split_at(4);
        let index = u32::from_le_bytes([index_bytes[0], index_bytes[1], index_bytes[2], index_bytes[3]]);
        Ok((index, envelope))
    }

    /// Decrypt a ciphertext frame's payload under `key`, returning the
    /// leading key index and the recovered plaintext.
    ///
    /// # Errors
    /// Returns [`ProtocolError::MissingKeyIndex`] if the payload is too
    /// short, or [`ProtocolError::Crypto`] if decryption fails.
    pub fn decrypt_payload(&self, key: &[u8]) -> Result<(u32, Vec<u8>)> {
        let (index, envelope) = self.key_index()?;
        let plaintext = hichain_crypto::decrypt(key, envelope)?;
        Ok((index, plaintext))
    }

    /// Decode a frame from `bytes`, which must contain at least a full
    /// header plus its declared payload.
    pub fn decode(bytes: &[u8], max_frame_size: usize) -> Result<Self> {
        let header = *AuthFrameHeader::from_bytes(bytes)?;

        let payload_len = header.data_length() as usize;
        let total = AuthFrameHeader::SIZE.checked_add(payload_len).ok_or(
            ProtocolError::PayloadTooLarge { size: payload_len, max: max_frame_size },
        )?;

        if total > max_frame_size {
            return Err(ProtocolError::PayloadTooLarge { size: total, max: max_frame_size });
        }

        if bytes.len() < total {
            return Err(ProtocolError::FrameTruncated {
                expected: payload_len,
                actual: bytes.len().saturating_sub(AuthFrameHeader::SIZE),
            });
        }

        let payload = Bytes::copy_from_slice(&bytes[AuthFrameHeader::SIZE..total]);
        Ok(Self { header, payload })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn frame_round_trip(module in 0u32..10, seq in any::<i64>(), flags in any::<u32>(), payload in prop::collection::vec(any::<u8>(), 0..1400)) {
            let frame = AuthFrame::new(module, seq, flags, payload.clone());
            let mut wire = Vec::new();
            frame.encode(&mut wire, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE).expect("encode");

            let parsed = AuthFrame::decode(&wire, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE).expect("decode");
            prop_assert_eq!(parsed.header.module(), module);
            prop_assert_eq!(parsed.header.seq(), seq);
            prop_assert_eq!(parsed.header.flags(), flags);
            prop_assert_eq!(parsed.payload.as_ref(), payload.as_slice());
        }
    }

    #[test]
    fn known_header_bytes() {
        let frame = AuthFrame::new(1, 7, 0, b"abc".to_vec());
        let mut wire = Vec::new();
        frame.encode(&mut wire, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(
            &wire[..24],
            &[0xCE, 0xFA, 0xBE, 0xBA, 1, 0, 0, 0, 7, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 3, 0, 0, 0]
        );
    }

    #[test]
    fn rejects_bad_identifier() {
        let mut bytes = [0u8; AuthFrameHeader::SIZE];
        bytes[0..4].copy_from_slice(&0xDEAD_BEEFu32.to_le_bytes());
        let err = AuthFrameHeader::from_bytes(&bytes).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidIdentifier);
    }

    #[test]
    fn rejects_truncated_payload() {
        let header = AuthFrameHeader::new(1, 0, 0, 100);
        let bytes = header.to_bytes();
        let err = AuthFrame::decode(&bytes, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTruncated { .. }));
    }

    #[test]
    fn ciphertext_frame_decrypts_under_the_same_key() {
        let key = [9u8; 16];
        let frame = AuthFrame::new_ciphertext(6, 1, 0, 42, &key, b"session open").unwrap();
        let (index, plaintext) = frame.decrypt_payload(&key).unwrap();
        assert_eq!(index, 42);
        assert_eq!(plaintext, b"session open");
    }

    #[test]
    fn ciphertext_frame_rejects_wrong_key() {
        let frame = AuthFrame::new_ciphertext(6, 1, 0, 42, &[9u8; 16], b"session open").unwrap();
        assert!(frame.decrypt_payload(&[1u8; 16]).is_err());
    }

    #[test]
    fn rejects_oversized_frame() {
        let header = AuthFrameHeader::new(1, 0, 0, 2000);
        let bytes = header.to_bytes();
        let err = AuthFrame::decode(&bytes, AuthFrameHeader::DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::PayloadTooLarge { .. }));
    }
}
