//! Session configuration.

use crate::auth::DeviceKey;
use crate::core::DEFAULT_MTU;

/// One post-authentication initialization write (time sync, capability
/// query, ...), chunk-encoded and encrypted with the fresh session key.
#[derive(Debug, Clone)]
pub struct InitRequest {
    /// Destination endpoint.
    pub endpoint: u16,
    /// Request payload.
    pub payload: Vec<u8>,
}

/// Configuration of a [`DeviceSession`](super::DeviceSession).
#[derive(Clone)]
pub struct SessionConfig {
    /// Pre-shared pairing key.
    pub device_key: DeviceKey,
    /// Whether an unexpected link drop should end in
    /// `WaitingForReconnect` instead of `Disconnected`.
    pub auto_reconnect: bool,
    /// Link MTU the chunk encoder sizes frames for.
    pub mtu: usize,
    /// Writes to run after authentication, before the device is
    /// declared initialized.
    pub init_requests: Vec<InitRequest>,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            device_key: DeviceKey::default(),
            auto_reconnect: false,
            mtu: DEFAULT_MTU,
            init_requests: Vec::new(),
        }
    }
}

impl SessionConfig {
    /// Config with a pairing key parsed from a user-supplied string.
    pub fn with_key(key: &str) -> Self {
        Self {
            device_key: DeviceKey::parse(key),
            ..Self::default()
        }
    }
}
