//! Post-authentication session frame: a fixed 16-byte little-endian header
//! followed by an AES-GCM ciphertext (`IV(12) || ciphertext || tag(16)`).

use bytes::{BufMut, Bytes};
use zerocopy::{FromBytes, Immutable, IntoBytes, KnownLayout};

use crate::errors::{ProtocolError, Result};

/// Fixed 16-byte session frame header (little-endian).
#[repr(C, packed)]
#[derive(Clone, Copy, FromBytes, IntoBytes, KnownLayout, Immutable, PartialEq, Eq)]
pub struct SessionFrameHeader {
    magic: [u8; 4],
    send_seq: [u8; 4],
    flags: [u8; 4],
    data_length: [u8; 4],
}

impl SessionFrameHeader {
    /// Size of the serialized header in bytes.
    pub const SIZE: usize = 16;

    /// Fixed magic identifier for every session frame.
    pub const MAGIC: u32 = 0xBABE_FACE;

    /// Build a new header. `data_length` is set to `payload_len`.
    #[must_use]
    pub fn new(send_seq: i32, flags: u32, payload_len: u32) -> Self {
        Self {
            magic: Self::MAGIC.to_le_bytes(),
            send_seq: send_seq.to_le_bytes(),
            flags: flags.to_le_bytes(),
            data_length: payload_len.to_le_bytes(),
        }
    }

    /// Parse a header from the front of `bytes`, validating the magic value.
    pub fn from_bytes(bytes: &[u8]) -> Result<&Self> {
        let header = Self::ref_from_prefix(bytes)
            .map_err(|_| ProtocolError::FrameTooShort { expected: Self::SIZE, actual: bytes.len() })?
            .0;

        if header.magic() != Self::MAGIC {
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

    /// Magic identifier.
    #[must_use]
    pub fn magic(&self) -> u32 {
        u32::from_le_bytes(self.magic)
    }

    /// Per-session send sequence number.
    #[must_use]
    pub fn send_seq(&self) -> i32 {
        i32::from_le_bytes(self.send_seq)
    }

    /// Header flags (currently unused, reserved for future framing bits).
    #[must_use]
    pub fn flags(&self) -> u32 {
        u32::from_le_bytes(self.flags)
    }

    /// Declared ciphertext length in bytes (`IV || ct || tag`).
    #[must_use]
    pub fn data_length(&self) -> u32 {
        u32::from_le_bytes(self.data_length)
    }
}

impl std::fmt::Debug for SessionFrameHeader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionFrameHeader")
            .field("magic", &format!("{:#010x}", self.magic()))
            .field("send_seq", &self.send_seq())
            .field("flags", &self.flags())
            .field("data_length", &self.data_length())
            .finish()
    }
}

/// A complete session frame: header plus the raw AES-GCM envelope.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionFrame {
    /// Frame header.
    pub header: SessionFrameHeader,
    /// `IV(12) || ciphertext || tag(16)`.
    pub envelope: Bytes,
}

impl SessionFrame {
    /// Minimum envelope size: 12-byte IV plus 16-byte tag, zero plaintext.
    pub const MIN_ENVELOPE_SIZE: usize = 28;

    /// Default maximum total frame size (header + envelope).
    pub const DEFAULT_MAX_FRAME_SIZE: usize = 4096;

    /// Build a frame, computing `data_length` from the envelope.
    #[must_use]
    pub fn new(send_seq: i32, flags: u32, envelope: impl Into<Bytes>) -> Self {
        let envelope = envelope.into();
        #[allow(clippy::cast_possible_truncation)]
        let len = envelope.len() as u32;
        Self { header: SessionFrameHeader::new(send_seq, flags, len), envelope }
    }

    /// Encode header and envelope into `dst`.
    pub fn encode(&self, dst: &mut impl BufMut, max_frame_size: usize) -> Result<()> {
        let total = SessionFrameHeader::SIZE + self.envelope.len();
        if total > max_frame_size {
            return Err(ProtocolError::PayloadTooLarge { size: total, max: max_frame_size });
        }
        dst.put_slice(&self.header.to_bytes());
        dst.put_slice(&self.envelope);
        Ok(())
    }

    /// Decode a frame from `bytes`, which must contain at least a full
    /// header plus its declared envelope.
    pub fn decode(bytes: &[u8], max_frame_size: usize) -> Result<Self> {
        let header = *SessionFrameHeader::from_bytes(bytes)?;

        let envelope_len = header.data_length() as usize;
        let total = SessionFrameHeader::SIZE.checked_add(envelope_len).ok_or(
            ProtocolError::PayloadTooLarge { size: envelope_len, max: max_frame_size },
        )?;

        if total > max_frame_size {
            return Err(ProtocolError::PayloadTooLarge { size: total, max: max_frame_size });
        }

        if bytes.len() < total {
            return Err(ProtocolError::FrameTruncated {
                expected: envelope_len,
                actual: bytes.len().saturating_sub(SessionFrameHeader::SIZE),
            });
        }

        let envelope = Bytes::copy_from_slice(&bytes[SessionFrameHeader::SIZE..total]);
        Ok(Self { header, envelope })
    }
}

#[cfg(test)]
mod tests {
    use proptest::prelude::*;

    use super::*;

    proptest! {
        #[test]
        fn frame_round_trip(send_seq in any::<i32>(), envelope in prop::collection::vec(any::<u8>(), 28..3000)) {
            let frame = SessionFrame::new(send_seq, 0, envelope.clone());
            let mut wire = Vec::new();
            frame.encode(&mut wire, SessionFrame::DEFAULT_MAX_FRAME_SIZE).expect("encode");

            let parsed = SessionFrame::decode(&wire, SessionFrame::DEFAULT_MAX_FRAME_SIZE).expect("decode");
            prop_assert_eq!(parsed.header.send_seq(), send_seq);
            prop_assert_eq!(parsed.envelope.as_ref(), envelope.as_slice());
        }
    }

    #[test]
    fn rejects_bad_magic() {
        let mut bytes = [0u8; SessionFrameHeader::SIZE];
        bytes[0..4].copy_from_slice(&0u32.to_le_bytes());
        let err = SessionFrameHeader::from_bytes(&bytes).unwrap_err();
        assert_eq!(err, ProtocolError::InvalidIdentifier);
    }

    #[test]
    fn rejects_truncated_envelope() {
        let header = SessionFrameHeader::new(1, 0, 40);
        let bytes = header.to_bytes();
        let err = SessionFrame::decode(&bytes, SessionFrame::DEFAULT_MAX_FRAME_SIZE).unwrap_err();
        assert!(matches!(err, ProtocolError::FrameTruncated { .. }));
    }
}
