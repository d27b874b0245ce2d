//! `tracing-subscriber` convenience for embedders that have no logging
//! setup of their own.

use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

/// Install a global `tracing` subscriber that writes formatted logs to
/// stderr, filtered by `RUST_LOG` (falling back to `default_level` when
/// unset or invalid).
///
/// Intended for embedders and examples that just want reasonable default
/// logging; an embedder that already owns a subscriber should not call
/// this.
pub fn init_tracing(default_level: &str) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::registry().with(fmt::layer()).with(filter).init();
}
