//! JSON payloads carried over plaintext auth-channel modules.
//!
//! These are the structures exchanged before a HiChain key exists, so they
//! travel as plain JSON rather than CBOR: device identity exchange and bus
//! version negotiation.

use serde::{Deserialize, Serialize};

/// Either a bare device-id string or `{"UDID": "..."}`, accepted because
/// real deployments send both forms interchangeably.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum DeviceIdField {
    /// Bare device-id string.
    Plain(String),
    /// Wrapped form carrying a UDID.
    Udid {
        /// The inner device identifier.
        #[serde(rename = "UDID")]
        udid: String,
    },
}

impl DeviceIdField {
    /// Extract the device-id string regardless of wire shape.
    #[must_use]
    pub fn into_inner(self) -> String {
        match self {
            Self::Plain(id) | Self::Udid { udid: id } => id,
        }
    }
}

/// TrustEngine (module 1) device-identity exchange message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrustEngineMessage {
    /// `"getAuthInfo"` on request, `"retAuthInfo"` on reply.
    #[serde(rename = "TECmd")]
    pub te_cmd: String,
    /// The sender's device identifier.
    #[serde(rename = "TEData")]
    pub te_data: DeviceIdField,
    /// The sender's auth identifier.
    #[serde(rename = "TEDeviceId")]
    pub te_device_id: String,
}

impl TrustEngineMessage {
    /// Command value sent in an initial request.
    pub const CMD_GET_AUTH_INFO: &'static str = "getAuthInfo";
    /// Command value sent in a reply.
    pub const CMD_RET_AUTH_INFO: &'static str = "retAuthInfo";
}

/// Connection (module 5) control code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum ConnectionCode {
    /// Bus version / capability negotiation.
    VerifyIp = 0,
    /// Device identity verification.
    VerifyDeviceId = 1,
}

/// Connection (module 5) CODE=0 negotiation message, sent both ways.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyIpMessage {
    /// Always `ConnectionCode::VerifyIp`.
    #[serde(rename = "CODE")]
    pub code: ConnectionCode,
    /// Sender's highest supported bus version.
    #[serde(rename = "BUS_MAX_VERSION")]
    pub bus_max_version: u32,
    /// Sender's lowest supported bus version.
    #[serde(rename = "BUS_MIN_VERSION")]
    pub bus_min_version: u32,
    /// Sender's authentication listener port.
    #[serde(rename = "AUTH_PORT")]
    pub auth_port: u16,
    /// Sender's session listener port.
    #[serde(rename = "SESSION_PORT")]
    pub session_port: u16,
    /// Maximum simultaneous authentication connections the sender accepts.
    #[serde(rename = "CONN_CAP")]
    pub conn_cap: u32,
    /// Human-readable device name.
    #[serde(rename = "DEVICE_NAME")]
    pub device_name: String,
    /// Device type tag (opaque to this crate).
    #[serde(rename = "DEVICE_TYPE")]
    pub device_type: u32,
    /// Sender's device identifier.
    #[serde(rename = "DEVICE_ID")]
    pub device_id: String,
    /// Version-scheme tag (opaque to this crate).
    #[serde(rename = "VERSION_TYPE")]
    pub version_type: u32,
}

/// Connection (module 5) CODE=1 device-identity verification message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VerifyDeviceIdMessage {
    /// Always `ConnectionCode::VerifyDeviceId`.
    #[serde(rename = "CODE")]
    pub code: ConnectionCode,
    /// Sender's device identifier.
    #[serde(rename = "DEVICE_ID")]
    pub device_id: String,
}

// Encoded/decoded as its raw `u8` discriminant via manual impls (no
// serde_repr dependency).
impl Serialize for ConnectionCode {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_u8(*self as u8)
    }
}

impl<'de> Deserialize<'de> for ConnectionCode {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let raw = u8::deserialize(deserializer)?;
        match raw {
            0 => Ok(Self::VerifyIp),
            1 => Ok(Self::VerifyDeviceId),
            other => Err(serde::de::Error::custom(format!("unknown CODE value: {other}"))),
        }
    }
}

/// Session-handshake first packet: client announces a bus, its device id,
/// and the session key it wants the server to adopt. Carried inside an
/// AES-GCM envelope under the auth-negotiated key, never on the wire in
/// plaintext.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpenMessage {
    /// Name of the registered `SessionServer` the client wants to reach.
    #[serde(rename = "busName")]
    pub bus_name: String,
    /// Client's device identifier.
    pub device_id: String,
    /// Base64-encoded 32-byte session key, client-chosen.
    #[serde(rename = "sessionKey")]
    pub session_key: String,
    /// Client's bus protocol version.
    #[serde(rename = "busVersion")]
    pub bus_version: u32,
}

/// Session-handshake response, carried under the just-installed session
/// key.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionOpenResponse {
    /// Server's device identifier.
    pub device_id: String,
    /// Name the client requested.
    pub session_name: String,
    /// Negotiated bus version.
    pub bus_version: u32,
    /// Server's own name for this session (may differ from the client's).
    pub my_session_name: String,
    /// `0` on success, non-zero on rejection.
    pub result: i32,
}
