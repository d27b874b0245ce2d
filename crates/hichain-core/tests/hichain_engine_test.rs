//! End-to-end test driving a full HiChain handshake between two independent
//! handles, the way two real devices would exchange messages over a socket.

use hichain_core::{
    Environment,
    hichain::{HiChainAction, HiChainHandle, HiChainIdentity, HiChainState, MSG_AUTH_CONFIRM, MSG_AUTH_RESPONSE},
};
use std::time::{Duration, Instant};

#[derive(Clone)]
struct FixedEnv(u8);

impl Environment for FixedEnv {
    type Instant = Instant;
    fn now(&self) -> Instant {
        Instant::now()
    }
    fn sleep(&self, _duration: Duration) -> impl std::future::Future<Output = ()> + Send {
        async {}
    }
    fn random_bytes(&self, buffer: &mut [u8]) {
        for (i, byte) in buffer.iter_mut().enumerate() {
            *byte = self.0.wrapping_add(i as u8).wrapping_mul(7);
        }
    }
}

fn find_send(actions: &[HiChainAction], message: u32) -> hichain_core::hichain::HiChainMessage {
    actions
        .iter()
        .find_map(|a| match a {
            HiChainAction::SendMessage(m) if m.message == message => Some(m.clone()),
            _ => None,
        })
        .unwrap_or_else(|| panic!("expected message {message} among actions"))
}

fn find_key(actions: &[HiChainAction]) -> hichain_crypto::SessionKeyBytes {
    actions
        .iter()
        .find_map(|a| match a {
            HiChainAction::SessionKeyReady(k) => Some(k.clone()),
            _ => None,
        })
        .expect("expected a derived session key")
}

#[test]
fn two_devices_converge_on_the_same_key_and_report_success() {
    let controller_env = FixedEnv(1);
    let accessory_env = FixedEnv(2);

    let identity = HiChainIdentity::new(42);
    let mut controller = HiChainHandle::new_initiator(identity);
    let mut accessory = HiChainHandle::new_responder(identity, "accessory-1".to_string());

    let start_actions = controller.start_auth(&controller_env, "controller-1".to_string()).unwrap();
    let start_msg = find_send(&start_actions, hichain_core::hichain::MSG_AUTH_START);

    let challenge_actions = accessory.handle_message(&accessory_env, &start_msg).unwrap();
    assert_eq!(accessory.state(), HiChainState::Authenticating);
    let challenge_msg = find_send(&challenge_actions, hichain_core::hichain::MSG_AUTH_CHALLENGE);

    let controller_actions = controller.handle_message(&controller_env, &challenge_msg).unwrap();
    assert_eq!(controller.state(), HiChainState::Completed);
    let response_msg = find_send(&controller_actions, MSG_AUTH_RESPONSE);
    let confirm_msg = find_send(&controller_actions, MSG_AUTH_CONFIRM);
    let controller_key = find_key(&controller_actions);

    let accessory_response_actions = accessory.handle_message(&accessory_env, &response_msg).unwrap();
    assert_eq!(accessory.state(), HiChainState::Completed);
    let accessory_key = find_key(&accessory_response_actions);

    assert_eq!(controller_key.as_bytes(), accessory_key.as_bytes());

    let confirm_actions = accessory.handle_message(&accessory_env, &confirm_msg).unwrap();
    assert!(matches!(confirm_actions[0], HiChainAction::ServiceResult(0)));
}

#[test]
fn confirm_before_handshake_completes_is_rejected() {
    let env = FixedEnv(3);
    let mut accessory = HiChainHandle::new_responder(HiChainIdentity::new(1), "a".to_string());
    let confirm = hichain_core::hichain::HiChainMessage {
        message: MSG_AUTH_CONFIRM,
        session_id: 1,
        challenge: None,
        response: None,
        auth_id: None,
        result: Some(0),
    };
    let err = accessory.handle_message(&env, &confirm).unwrap_err();
    assert!(matches!(err, hichain_core::CoreError::InvalidState { .. }));
}
