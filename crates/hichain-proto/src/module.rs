//! Module tags carried in the auth frame header.
//!
//! Each tag both routes the frame to a handler and determines whether its
//! payload travels as plaintext or as an AES-GCM ciphertext envelope.

use crate::errors::ProtocolError;

/// Routing tag for an authentication-channel frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum Module {
    /// No module assigned; reserved.
    None = 0,
    /// Device-identity exchange (`GetDeviceID` / `retAuthInfo`).
    TrustEngine = 1,
    /// HiChain challenge-response handshake.
    HiChain = 2,
    /// HiChain carried over the authenticator SDK channel.
    AuthSdk = 3,
    /// HiChain re-synchronization.
    HiChainSync = 4,
    /// Bus version negotiation / device verification.
    Connection = 5,
    /// Session transport control frames.
    Session = 6,
    /// Smart-communication module (ciphertext, handled like `Session`).
    SmartComm = 7,
    /// Out-of-band auth channel.
    AuthChannel = 8,
    /// Auth channel status/error messages.
    AuthMsg = 9,
}

impl Module {
    /// Whether frames carrying this module travel encrypted.
    ///
    /// Modules 1-4 and 8-9 are plaintext; 5, 6 and 7 are ciphertext.
    #[must_use]
    pub fn is_ciphertext(self) -> bool {
        matches!(self, Self::Connection | Self::Session | Self::SmartComm)
    }

    /// Raw wire value.
    #[must_use]
    pub fn to_u32(self) -> u32 {
        self as u32
    }

    /// Parse a wire value into a known module tag.
    pub fn from_u32(value: u32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(Self::None),
            1 => Ok(Self::TrustEngine),
            2 => Ok(Self::HiChain),
            3 => Ok(Self::AuthSdk),
            4 => Ok(Self::HiChainSync),
            5 => Ok(Self::Connection),
            6 => Ok(Self::Session),
            7 => Ok(Self::SmartComm),
            8 => Ok(Self::AuthChannel),
            9 => Ok(Self::AuthMsg),
            other => Err(ProtocolError::UnknownModule(other)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ciphertext_modules_are_exactly_connection_session_smartcomm() {
        for module in
            [Module::None, Module::TrustEngine, Module::HiChain, Module::AuthSdk, Module::HiChainSync, Module::AuthChannel, Module::AuthMsg]
        {
            assert!(!module.is_ciphertext(), "{module:?} should be plaintext");
        }
        for module in [Module::Connection, Module::Session, Module::SmartComm] {
            assert!(module.is_ciphertext(), "{module:?} should be ciphertext");
        }
    }

    #[test]
    fn round_trips_through_u32() {
        for raw in 0..=9u32 {
            let module = Module::from_u32(raw).expect("known tag");
            assert_eq!(module.to_u32(), raw);
        }
    }

    #[test]
    fn rejects_unknown_tag() {
        assert_eq!(Module::from_u32(10), Err(ProtocolError::UnknownModule(10)));
    }
}
