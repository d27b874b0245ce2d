//! AES-128-GCM primitive protecting the auth and session channels.
//!
//! This crate has no notion of sessions, devices or wire formats - it only
//! implements authenticated encryption over raw byte slices. Every
//! encryption draws its own random nonce; there is no API for the caller to
//! reuse one.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod aead;
pub mod errors;
pub mod key;

pub use aead::{KEY_SIZE, NONCE_SIZE, TAG_SIZE, decrypt, encrypt, encrypt_with_nonce};
pub use errors::{CryptoError, Result};
pub use key::SessionKeyBytes;
