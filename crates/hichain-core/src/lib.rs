//! Device descriptor, bounded session-key store, and the HiChain
//! challenge-response engine.
//!
//! Like `hichain-proto` and `hichain-crypto`, this crate is pure: the
//! [`env::Environment`] abstraction supplies time and randomness, so the
//! [`hichain::HiChainHandle`] state machine and [`key_store::SessionKeyStore`]
//! can be driven deterministically in tests and with real system resources
//! in production.

#![forbid(unsafe_code)]
#![deny(missing_docs)]

pub mod device;
pub mod env;
pub mod error;
pub mod hichain;
pub mod key_store;

pub use device::{DeviceConfig, DeviceInfo};
pub use env::Environment;
pub use error::{CoreError, Result};
pub use key_store::{SessionKeyEntry, SessionKeyStore};
