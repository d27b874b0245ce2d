//! HiChain challenge-response handshake: identity, wire messages, and the
//! per-session state machine.

pub mod engine;
pub mod identity;

pub use engine::{
    HiChainAction, HiChainHandle, HiChainMessage, HiChainState, MSG_AUTH_CHALLENGE,
    MSG_AUTH_CONFIRM, MSG_AUTH_RESPONSE, MSG_AUTH_START, RESULT_AUTH_FAILED, RESULT_SUCCESS,
};
pub use identity::{HiChainIdentity, HiChainRole};
