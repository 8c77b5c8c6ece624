//! Ephemeral handshake key material and session-key derivation.

use rand::rngs::OsRng;
use x25519_dalek::{PublicKey, StaticSecret};

use crate::core::{DEVICE_KEY_SIZE, PUBLIC_POINT_SIZE, SESSION_KEY_SIZE};

use super::key::DeviceKey;

/// Encryption parameters derived by the handshake and registered with
/// the chunk codec: the AES session key plus the initial message
/// counter.
#[derive(Clone, Copy)]
pub struct SessionKeys {
    /// Initial value of the per-message counter, taken from the shared
    /// secret.
    pub counter: u32,
    /// Derived 16-byte AES session key.
    pub key: [u8; SESSION_KEY_SIZE],
}

/// One handshake attempt's ephemeral keypair.
///
/// Lifetime is a single attempt: consumed by key derivation on success,
/// dropped (and the scalar wiped) on failure. The private scalar never
/// leaves this struct.
pub struct HandshakeSession {
    secret: StaticSecret,
    public: PublicKey,
}

impl HandshakeSession {
    /// Generate a fresh ephemeral keypair.
    pub fn generate() -> Self {
        let secret = StaticSecret::random_from_rng(OsRng);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Build a session from fixed scalar bytes.
    ///
    /// Deterministic; intended for tests of the shared-secret agreement
    /// property.
    pub fn from_private_bytes(bytes: [u8; 32]) -> Self {
        let secret = StaticSecret::from(bytes);
        let public = PublicKey::from(&secret);
        Self { secret, public }
    }

    /// Our public point, as sent in the first handshake frame.
    pub fn public_point(&self) -> [u8; PUBLIC_POINT_SIZE] {
        *self.public.as_bytes()
    }

    /// Complete the exchange: compute the shared secret with the peer's
    /// public point and derive the session parameters.
    ///
    /// The initial counter is the little-endian u32 at the start of the
    /// shared secret; the session key is secret bytes 8..24 XORed with
    /// the pre-shared device key.
    pub fn derive(&self, remote_point: [u8; PUBLIC_POINT_SIZE], device_key: &DeviceKey) -> SessionKeys {
        let shared = self.secret.diffie_hellman(&PublicKey::from(remote_point));
        let secret = shared.as_bytes();

        let counter = u32::from_le_bytes([secret[0], secret[1], secret[2], secret[3]]);
        let mut key = [0u8; SESSION_KEY_SIZE];
        for i in 0..DEVICE_KEY_SIZE {
            key[i] = secret[8 + i] ^ device_key.as_bytes()[i];
        }

        SessionKeys { counter, key }
    }
}
