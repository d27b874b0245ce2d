//! Bus coordinator: brings a device's auth and session listeners up and
//! down together and keeps the device descriptor's advertised ports in
//! sync with what actually got bound.

pub mod coordinator;
pub mod error;
pub mod logging;
pub mod system_env;

pub use coordinator::BusCoordinator;
pub use error::{BusError, Result};
pub use logging::init_tracing;
pub use system_env::SystemEnv;
