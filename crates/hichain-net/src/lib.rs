//! TCP transport for HiChain: the authentication connection manager and
//! the post-auth session transport it hands derived keys to.
//!
//! [`auth`] accepts authentication connections, assembles [`AuthFrame`]s,
//! and drives a [`hichain_core::hichain::HiChainHandle`] per session id.
//! [`session`] accepts and opens post-auth sessions, encrypting application
//! bytes with the keys the auth manager deposits into a shared
//! [`hichain_core::SessionKeyStore`].
//!
//! Both managers are generic over [`hichain_core::Environment`] so tests
//! can drive them with deterministic time and randomness.

pub mod auth;
pub mod error;
pub mod session;

pub use error::{NetError, Result};
