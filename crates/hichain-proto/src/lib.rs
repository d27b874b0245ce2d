//! Wire codec for the authentication and session channels.
//!
//! This crate is pure: no sockets, no async, no clocks. It only knows how
//! to turn bytes into frames and frames into bytes, and how to (de)serialize
//! the plaintext JSON messages exchanged before a session key exists.
//!
//! See [`auth_frame`] and [`session_frame`] for the two wire formats, and
//! [`messages`] for the plaintext payloads carried over the auth channel.

pub mod auth_frame;
pub mod errors;
pub mod messages;
pub mod module;
pub mod session_frame;

pub use auth_frame::{AuthFrame, AuthFrameHeader, FLAG_REPLY};
pub use errors::{ProtocolError, Result};
pub use messages::{
    ConnectionCode, DeviceIdField, SessionOpenMessage, SessionOpenResponse, TrustEngineMessage,
    VerifyDeviceIdMessage, VerifyIpMessage,
};
pub use module::Module;
pub use session_frame::{SessionFrame, SessionFrameHeader};
