//! The handshake state machine.
//!
//! An asynchronous continuation chain, not a loop: each step is
//! triggered by the chunk decoder dispatching a payload for the
//! handshake endpoint, and every continuation consists of queueing one
//! transaction and returning. There is deliberately no timeout on
//! awaiting a response frame; an unresponsive peer parks the machine in
//! a non-terminal state until the transport errors out, and the outer
//! reconnect policy decides what happens next.

use tracing::{debug, error, warn};

use crate::codec::aes128_encrypt_block;
use crate::core::{
    AUTH_CMD_CHALLENGE, AUTH_CMD_PUBLIC_KEY, AUTH_RESP_REMOTE_KEY, AUTH_RESP_RESULT,
    AUTH_STATUS_SUCCESS, AUTH_STATUS_WRONG_KEY, AuthFailure, PUBLIC_POINT_SIZE,
    REMOTE_RANDOM_SIZE,
};

use super::key::DeviceKey;
use super::session::{HandshakeSession, SessionKeys};

/// Phase of the handshake.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthState {
    /// Not started.
    Idle,
    /// Our public point is on the wire, awaiting the peer's.
    KeyExchangeSent,
    /// The peer's random and public point arrived.
    RemoteKeyReceived,
    /// The double-encrypted challenge reply is on the wire.
    ChallengeSent,
    /// Terminal success.
    Authenticated,
    /// Terminal failure; the session must be torn down.
    Failed,
}

/// What the caller must do after feeding a handshake payload.
pub enum AuthStep {
    /// Register `keys` with the codec, then chunk-write `reply` to the
    /// handshake endpoint.
    SendChallenge {
        /// Challenge frame to write, unencrypted.
        reply: Vec<u8>,
        /// Session parameters for the chunk codec.
        keys: SessionKeys,
    },
    /// The peer accepted the challenge; proceed to initialization.
    Authenticated,
    /// Terminal failure; surface it and request disconnect.
    Failed(AuthFailure),
    /// Payload did not advance the machine (wrong step, unknown tag).
    Ignored,
}

/// The pairing handshake for one connection.
pub struct Handshake {
    device_key: DeviceKey,
    state: AuthState,
    session: Option<HandshakeSession>,
}

impl Handshake {
    /// Create an idle handshake bound to the pairing key.
    pub fn new(device_key: DeviceKey) -> Self {
        Self {
            device_key,
            state: AuthState::Idle,
            session: None,
        }
    }

    /// Current phase.
    pub fn state(&self) -> AuthState {
        self.state
    }

    /// Begin the handshake with a fresh ephemeral keypair and return
    /// the step-1 payload (our public point) to chunk-write,
    /// unencrypted, to the handshake endpoint.
    pub fn start(&mut self) -> Vec<u8> {
        self.start_with_session(HandshakeSession::generate())
    }

    /// Like [`Handshake::start`] with caller-supplied key material, for
    /// deterministic tests.
    pub fn start_with_session(&mut self, session: HandshakeSession) -> Vec<u8> {
        debug!("starting pairing handshake");
        let mut payload = Vec::with_capacity(1 + PUBLIC_POINT_SIZE);
        payload.push(AUTH_CMD_PUBLIC_KEY);
        payload.extend_from_slice(&session.public_point());
        self.session = Some(session);
        self.state = AuthState::KeyExchangeSent;
        payload
    }

    /// Feed a payload the decoder dispatched for the handshake
    /// endpoint.
    pub fn handle_payload(&mut self, payload: &[u8]) -> AuthStep {
        match (payload.first(), self.state) {
            (Some(&AUTH_RESP_REMOTE_KEY), AuthState::KeyExchangeSent) => {
                self.on_remote_key(payload)
            }
            (Some(&AUTH_RESP_RESULT), AuthState::ChallengeSent) => self.on_result(payload),
            (Some(&tag), state) => {
                warn!(tag = format_args!("{tag:#04x}"), ?state, "handshake payload for the wrong step, ignoring");
                AuthStep::Ignored
            }
            (None, _) => {
                warn!("empty handshake payload, ignoring");
                AuthStep::Ignored
            }
        }
    }

    /// Step 2: peer random + public point. Derives the session
    /// parameters and prepares the challenge reply.
    fn on_remote_key(&mut self, payload: &[u8]) -> AuthStep {
        const EXPECTED: usize = 2 + REMOTE_RANDOM_SIZE + PUBLIC_POINT_SIZE;
        if payload.len() < EXPECTED {
            error!(len = payload.len(), expected = EXPECTED, "short remote-key payload");
            return self.fail(AuthFailure::Malformed);
        }
        let status = payload[1];
        if status != AUTH_STATUS_SUCCESS {
            error!(status = format_args!("{status:#04x}"), "key exchange rejected by peer");
            return self.fail(AuthFailure::Status(status));
        }

        let Some(session) = self.session.take() else {
            error!("remote key arrived without a local session");
            return self.fail(AuthFailure::Malformed);
        };
        self.state = AuthState::RemoteKeyReceived;

        let mut remote_random = [0u8; REMOTE_RANDOM_SIZE];
        remote_random.copy_from_slice(&payload[2..2 + REMOTE_RANDOM_SIZE]);
        let mut remote_point = [0u8; PUBLIC_POINT_SIZE];
        remote_point.copy_from_slice(&payload[2 + REMOTE_RANDOM_SIZE..EXPECTED]);

        debug!("got remote random and public point, deriving session key");
        let keys = session.derive(remote_point, &self.device_key);
        debug!(key = %hex::encode(keys.key), "derived shared session key");

        // challenge: the peer's random encrypted once under the
        // pre-shared key, once under the fresh session key
        let mut reply = Vec::with_capacity(1 + 2 * REMOTE_RANDOM_SIZE);
        reply.push(AUTH_CMD_CHALLENGE);
        reply.extend_from_slice(&aes128_encrypt_block(
            self.device_key.as_bytes(),
            &remote_random,
        ));
        reply.extend_from_slice(&aes128_encrypt_block(&keys.key, &remote_random));

        self.state = AuthState::ChallengeSent;
        AuthStep::SendChallenge { reply, keys }
    }

    /// Step 4: the peer's verdict on our challenge.
    fn on_result(&mut self, payload: &[u8]) -> AuthStep {
        if payload.len() < 2 {
            error!("short handshake result payload");
            return self.fail(AuthFailure::Malformed);
        }
        match payload[1] {
            AUTH_STATUS_SUCCESS => {
                debug!("authentication success");
                self.state = AuthState::Authenticated;
                AuthStep::Authenticated
            }
            AUTH_STATUS_WRONG_KEY => {
                error!("authentication failed: wrong pairing key");
                self.fail(AuthFailure::WrongKey)
            }
            status => {
                error!(status = format_args!("{status:#04x}"), "authentication failed");
                self.fail(AuthFailure::Status(status))
            }
        }
    }

    fn fail(&mut self, failure: AuthFailure) -> AuthStep {
        self.state = AuthState::Failed;
        self.session = None;
        AuthStep::Failed(failure)
    }
}
