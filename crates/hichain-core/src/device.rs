//! Local device descriptor.

/// Static identity and network configuration for the local device.
///
/// Constructed directly by the embedder; this crate never loads a
/// configuration file.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceConfig {
    /// Stable device identifier, shared with peers during TrustEngine
    /// exchange.
    pub device_id: String,
    /// Human-readable device name, advertised during bus negotiation.
    pub device_name: String,
    /// Local IP address peers should use to reach this device.
    pub device_ip: String,
    /// Bus protocol version this device implements.
    pub version: u32,
}

/// Live device descriptor, extending `DeviceConfig` with the ports assigned
/// once the auth and session listeners are bound.
///
/// `auth_port` and `session_port` are `-1` before the corresponding
/// listener has started.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceInfo {
    /// Static configuration this descriptor was built from.
    pub config: DeviceConfig,
    /// Bound authentication listener port, or `-1` if not started.
    pub auth_port: i32,
    /// Bound session listener port, or `-1` if not started.
    pub session_port: i32,
}

impl DeviceInfo {
    /// Build a descriptor with both listener ports unset.
    #[must_use]
    pub fn new(config: DeviceConfig) -> Self {
        Self { config, auth_port: -1, session_port: -1 }
    }

    /// Whether both listeners have been assigned a port.
    #[must_use]
    pub fn is_started(&self) -> bool {
        self.auth_port >= 0 && self.session_port >= 0
    }

    /// Reset both listener ports to the unstarted state.
    pub fn reset_ports(&mut self) {
        self.auth_port = -1;
        self.session_port = -1;
    }
}
