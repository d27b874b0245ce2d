//! HiChain challenge-response state machine.
//!
//! Uses the action pattern: methods take the environment (for randomness)
//! as input and return actions for the driver to execute. The state
//! machine itself performs no I/O.
//!
//! # State machine
//!
//! ```text
//! ┌──────┐  AUTH_START    ┌──────────┐ AUTH_CHALLENGE  ┌────────────────┐
//! │ Init │───────────────>│ Started  │────────────────>│ Authenticating │
//! └──────┘ (initiator)    └──────────┘  (initiator)     └────────────────┘
//!                                                              │
//!     Init ──AUTH_START──> Authenticating (responder)          │ AUTH_RESPONSE
//!                                                              ↓
//!                                                        ┌───────────┐
//!                                                        │ Completed │
//!                                                        └───────────┘
//!                                                              │
//!                                                          (or Failed on
//!                                                           any mismatch)
//! ```
//!
//! Both `response` fields are computed the same way: `response(challenge,
//! authId) = SHA-256(challenge || authId)`, hex-encoded. The responder
//! persists the challenge it issues in AUTH_CHALLENGE (`challenge_R`) and
//! reuses it when deriving the session key on AUTH_RESPONSE, so both ends
//! derive from the identical `(challenge_R, response, authId_I, authId_R)`
//! tuple.

use hichain_crypto::SessionKeyBytes;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::{env::Environment, error::CoreError, hichain::identity::{HiChainIdentity, HiChainRole}};

/// `message` discriminant: initiator announces a fresh challenge.
pub const MSG_AUTH_START: u32 = 1;
/// `message` discriminant: responder answers with its own challenge.
pub const MSG_AUTH_CHALLENGE: u32 = 2;
/// `message` discriminant: initiator proves it holds the responder's
/// challenge.
pub const MSG_AUTH_RESPONSE: u32 = 3;
/// `message` discriminant: initiator reports the final result.
pub const MSG_AUTH_CONFIRM: u32 = 4;

/// Result code carried in `AUTH_CONFIRM` on success.
pub const RESULT_SUCCESS: i32 = 0;
/// Result code carried in `AUTH_CONFIRM`, or returned via
/// [`HiChainAction::ServiceResult`], on failure.
pub const RESULT_AUTH_FAILED: i32 = 1;

/// A HiChain wire message (JSON).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HiChainMessage {
    /// One of the `MSG_*` constants.
    pub message: u32,
    /// Session id shared by both handles.
    #[serde(rename = "sessionId")]
    pub session_id: u32,
    /// Hex-encoded challenge, present on AUTH_START and AUTH_CHALLENGE.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub challenge: Option<String>,
    /// Hex-encoded response, present on AUTH_CHALLENGE and AUTH_RESPONSE.
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub response: Option<String>,
    /// Sender's auth id, present on AUTH_START and AUTH_CHALLENGE.
    #[serde(rename = "authId", skip_serializing_if = "Option::is_none", default)]
    pub auth_id: Option<String>,
    /// Final result, present on AUTH_CONFIRM (`RESULT_SUCCESS` or
    /// `RESULT_AUTH_FAILED`).
    #[serde(skip_serializing_if = "Option::is_none", default)]
    pub result: Option<i32>,
}

/// State of a single HiChain handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HiChainState {
    /// No message exchanged yet.
    Init,
    /// Initiator has sent AUTH_START.
    Started,
    /// Challenge/response exchange in progress.
    Authenticating,
    /// Key derived and confirmed on both sides.
    Completed,
    /// Verification failed; the handle is dead.
    Failed,
}

/// Actions the driver must carry out after a state transition.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum HiChainAction {
    /// Serialize and send this message to the peer, on the session's
    /// module/seq.
    SendMessage(HiChainMessage),
    /// The handshake derived a session key; install it in the key store.
    SessionKeyReady(SessionKeyBytes),
    /// Report the final result to the embedder (0 = success).
    ServiceResult(i32),
}

fn compute_response(challenge_hex: &str, auth_id: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(challenge_hex.as_bytes());
    hasher.update(auth_id.as_bytes());
    hex::encode(hasher.finalize())
}

fn derive_key(challenge_hex: &str, response_hex: &str, auth_id_i: &str, auth_id_r: &str) -> SessionKeyBytes {
    let mut hasher = Sha256::new();
    hasher.update(challenge_hex.as_bytes());
    hasher.update(response_hex.as_bytes());
    hasher.update(auth_id_i.as_bytes());
    hasher.update(auth_id_r.as_bytes());
    let digest = hasher.finalize();
    let mut key = [0u8; 16];
    key.copy_from_slice(&digest[..16]);
    SessionKeyBytes::new(key)
}

/// One side of a HiChain handshake.
#[derive(Debug)]
pub struct HiChainHandle {
    identity: HiChainIdentity,
    role: HiChainRole,
    state: HiChainState,
    self_auth_id: Option<String>,
    peer_auth_id: Option<String>,
    /// Challenge this side generated: `challenge_I` for the initiator,
    /// `challenge_R` for the responder.
    self_challenge: Option<String>,
    /// Challenge received from the peer: `challenge_R` for the initiator,
    /// `challenge_I` for the responder.
    peer_challenge: Option<String>,
}

impl HiChainHandle {
    /// Build an initiator handle. Call [`Self::start_auth`] to begin.
    #[must_use]
    pub fn new_initiator(identity: HiChainIdentity) -> Self {
        Self {
            identity,
            role: HiChainRole::Initiator,
            state: HiChainState::Init,
            self_auth_id: None,
            peer_auth_id: None,
            self_challenge: None,
            peer_challenge: None,
        }
    }

    /// Build a responder handle, which waits for an incoming AUTH_START.
    #[must_use]
    pub fn new_responder(identity: HiChainIdentity, self_auth_id: String) -> Self {
        Self {
            identity,
            role: HiChainRole::Responder,
            state: HiChainState::Init,
            self_auth_id: Some(self_auth_id),
            peer_auth_id: None,
            self_challenge: None,
            peer_challenge: None,
        }
    }

    /// Identity of this handle.
    #[must_use]
    pub fn identity(&self) -> HiChainIdentity {
        self.identity
    }

    /// Current state.
    #[must_use]
    pub fn state(&self) -> HiChainState {
        self.state
    }

    /// Peer's auth id, once known.
    #[must_use]
    pub fn peer_auth_id(&self) -> Option<&str> {
        self.peer_auth_id.as_deref()
    }

    /// Initiate the handshake. Only valid for an initiator in `Init`.
    ///
    /// # Errors
    /// Returns [`CoreError::InvalidState`] if not a fresh initiator handle.
    pub fn start_auth<E: Environment>(
        &mut self,
        env: &E,
        self_auth_id: String,
    ) -> Result<Vec<HiChainAction>, CoreError> {
        if self.role != HiChainRole::Initiator || self.state != HiChainState::Init {
            return Err(CoreError::InvalidState {
                state: self.state,
                operation: "start_auth".to_string(),
            });
        }

        let challenge = hex::encode(env.random_challenge());
        self.self_challenge = Some(challenge.clone());
        self.self_auth_id = Some(self_auth_id.clone());
        self.state = HiChainState::Started;

        Ok(vec![HiChainAction::SendMessage(HiChainMessage {
            message: MSG_AUTH_START,
            session_id: self.identity.session_id,
            challenge: Some(challenge),
            response: None,
            auth_id: Some(self_auth_id),
            result: None,
        })])
    }

    /// Feed an incoming HiChain message to this handle.
    ///
    /// # Errors
    /// Returns [`CoreError::UnknownMessageType`] for an out-of-range
    /// `message`, [`CoreError::InvalidMessage`] for a missing required
    /// field, [`CoreError::InvalidState`] for a message that doesn't match
    /// the current role/state, and [`CoreError::AuthFailed`] if challenge
    /// verification fails.
    pub fn handle_message<E: Environment>(
        &mut self,
        env: &E,
        msg: &HiChainMessage,
    ) -> Result<Vec<HiChainAction>, CoreError> {
        match msg.message {
            MSG_AUTH_START => self.handle_start(env, msg),
            MSG_AUTH_CHALLENGE => self.handle_challenge(msg),
            MSG_AUTH_RESPONSE => self.handle_response(msg),
            MSG_AUTH_CONFIRM => self.handle_confirm(msg),
            other => Err(CoreError::UnknownMessageType(other)),
        }
    }

    fn handle_start<E: Environment>(
        &mut self,
        env: &E,
        msg: &HiChainMessage,
    ) -> Result<Vec<HiChainAction>, CoreError> {
        if self.role != HiChainRole::Responder || self.state != HiChainState::Init {
            return Err(CoreError::InvalidState {
                state: self.state,
                operation: "handle_start".to_string(),
            });
        }
        let challenge_i = msg.challenge.clone().ok_or_else(|| {
            CoreError::InvalidMessage("AUTH_START missing challenge".to_string())
        })?;
        let auth_id_i = msg.auth_id.clone().ok_or_else(|| {
            CoreError::InvalidMessage("AUTH_START missing authId".to_string())
        })?;
        let Some(self_auth_id) = self.self_auth_id.clone() else {
            return Err(CoreError::InvalidMessage(
                "responder handle has no local auth id".to_string(),
            ));
        };

        self.peer_challenge = Some(challenge_i.clone());
        self.peer_auth_id = Some(auth_id_i);

        let challenge_r = hex::encode(env.random_challenge());
        self.self_challenge = Some(challenge_r.clone());
        let response_to_peer = compute_response(&challenge_i, &self_auth_id);
        self.state = HiChainState::Authenticating;

        Ok(vec![HiChainAction::SendMessage(HiChainMessage {
            message: MSG_AUTH_CHALLENGE,
            session_id: self.identity.session_id,
            challenge: Some(challenge_r),
            response: Some(response_to_peer),
            auth_id: Some(self_auth_id),
            result: None,
        })])
    }

    fn handle_challenge(&mut self, msg: &HiChainMessage) -> Result<Vec<HiChainAction>, CoreError> {
        if self.role != HiChainRole::Initiator || self.state != HiChainState::Started {
            return Err(CoreError::InvalidState {
                state: self.state,
                operation: "handle_challenge".to_string(),
            });
        }
        let challenge_r = msg.challenge.clone().ok_or_else(|| {
            CoreError::InvalidMessage("AUTH_CHALLENGE missing challenge".to_string())
        })?;
        let auth_id_r = msg.auth_id.clone().ok_or_else(|| {
            CoreError::InvalidMessage("AUTH_CHALLENGE missing authId".to_string())
        })?;
        let response = msg.response.clone().ok_or_else(|| {
            CoreError::InvalidMessage("AUTH_CHALLENGE missing response".to_string())
        })?;

        let challenge_i = self.self_challenge.clone().unwrap_or_default();
        let expected = compute_response(&challenge_i, &auth_id_r);
        if expected != response {
            self.state = HiChainState::Failed;
            return Err(CoreError::AuthFailed(
                "AUTH_CHALLENGE response did not match challenge_I".to_string(),
            ));
        }

        self.peer_auth_id = Some(auth_id_r.clone());
        self.peer_challenge = Some(challenge_r.clone());

        let self_auth_id = self.self_auth_id.clone().unwrap_or_default();
        let response_confirm = compute_response(&challenge_r, &self_auth_id);
        let key = derive_key(&challenge_r, &response_confirm, &self_auth_id, &auth_id_r);
        self.state = HiChainState::Completed;

        Ok(vec![
            HiChainAction::SendMessage(HiChainMessage {
                message: MSG_AUTH_RESPONSE,
                session_id: self.identity.session_id,
                challenge: None,
                response: Some(response_confirm),
                auth_id: None,
                result: None,
            }),
            HiChainAction::SessionKeyReady(key),
            HiChainAction::SendMessage(HiChainMessage {
                message: MSG_AUTH_CONFIRM,
                session_id: self.identity.session_id,
                challenge: None,
                response: None,
                auth_id: None,
                result: Some(RESULT_SUCCESS),
            }),
            HiChainAction::ServiceResult(RESULT_SUCCESS),
        ])
    }

    fn handle_response(&mut self, msg: &HiChainMessage) -> Result<Vec<HiChainAction>, CoreError> {
        if self.role != HiChainRole::Responder || self.state != HiChainState::Authenticating {
            return Err(CoreError::InvalidState {
                state: self.state,
                operation: "handle_response".to_string(),
            });
        }
        let response = msg.response.clone().ok_or_else(|| {
            CoreError::InvalidMessage("AUTH_RESPONSE missing response".to_string())
        })?;

        let challenge_r = self.self_challenge.clone().unwrap_or_default();
        let auth_id_i = self.peer_auth_id.clone().unwrap_or_default();
        let expected = compute_response(&challenge_r, &auth_id_i);
        if expected != response {
            self.state = HiChainState::Failed;
            return Err(CoreError::AuthFailed(
                "AUTH_RESPONSE response did not match challenge_R".to_string(),
            ));
        }

        let self_auth_id = self.self_auth_id.clone().unwrap_or_default();
        let key = derive_key(&challenge_r, &response, &auth_id_i, &self_auth_id);
        self.state = HiChainState::Completed;

        Ok(vec![HiChainAction::SessionKeyReady(key)])
    }

    fn handle_confirm(&mut self, msg: &HiChainMessage) -> Result<Vec<HiChainAction>, CoreError> {
        if self.state != HiChainState::Completed {
            return Err(CoreError::InvalidState {
                state: self.state,
                operation: "handle_confirm".to_string(),
            });
        }
        match msg.result {
            Some(RESULT_SUCCESS) => Ok(vec![HiChainAction::ServiceResult(RESULT_SUCCESS)]),
            _ => {
                self.state = HiChainState::Failed;
                Err(CoreError::AuthFailed("peer reported non-zero AUTH_CONFIRM result".to_string()))
            },
        }
    }
}
