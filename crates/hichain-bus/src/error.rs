//! Errors surfaced by the bus coordinator's start/stop lifecycle.

use thiserror::Error;

/// Errors produced by [`crate::coordinator::BusCoordinator`].
#[derive(Error, Debug)]
pub enum BusError {
    /// Binding the auth or session listener socket failed.
    #[error("failed to bind listener: {0}")]
    Io(#[from] std::io::Error),

    /// A fault from the underlying auth or session transport.
    #[error(transparent)]
    Net(#[from] hichain_net::NetError),
}

/// Convenience alias for results returned by this crate.
pub type Result<T> = std::result::Result<T, BusError>;
