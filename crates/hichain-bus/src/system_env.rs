//! Production `Environment` using system time and OS cryptographic RNG.

use std::time::Duration;

use hichain_core::Environment;

/// Production environment: real monotonic time, `tokio::time::sleep`, and
/// `getrandom` for all randomness.
///
/// # Panics
///
/// [`Environment::random_bytes`] panics if the OS RNG fails. A device that
/// cannot source cryptographic randomness cannot negotiate session keys
/// safely, so continuing would be worse than aborting.
#[derive(Clone, Copy, Default)]
pub struct SystemEnv;

impl SystemEnv {
    /// Build a new system environment.
    #[must_use]
    pub fn new() -> Self {
        Self
    }
}

impl Environment for SystemEnv {
    type Instant = std::time::Instant;

    #[allow(clippy::disallowed_methods)]
    fn now(&self) -> Self::Instant {
        std::time::Instant::now()
    }

    fn sleep(&self, duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        tokio::time::sleep(duration)
    }

    #[allow(clippy::expect_used)]
    fn random_bytes(&self, buffer: &mut [u8]) {
        getrandom::fill(buffer).expect("OS RNG failure is unrecoverable for a device that must mint session keys");
    }
}
