//! The pre-shared device pairing key.

use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::core::DEVICE_KEY_SIZE;

/// Template the parsed key is overlaid onto; devices shipped before
/// per-user keys existed authenticate with this value as-is.
const DEFAULT_KEY: [u8; DEVICE_KEY_SIZE] = [
    0x30, 0x31, 0x32, 0x33, 0x34, 0x35, 0x36, 0x37, 0x38, 0x39, 0x40, 0x41, 0x42, 0x43, 0x44,
    0x45,
];

/// The 16-byte pre-shared pairing secret.
///
/// Entered by the user when pairing; the handshake mixes it into the
/// session key and uses it to encrypt half of the challenge reply.
/// Wiped on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct DeviceKey([u8; DEVICE_KEY_SIZE]);

impl DeviceKey {
    /// Wrap raw key bytes.
    pub fn new(bytes: [u8; DEVICE_KEY_SIZE]) -> Self {
        Self(bytes)
    }

    /// Parse a user-supplied key string.
    ///
    /// Accepted forms, in order of preference:
    /// - `0x`-prefixed 32-digit hex (34 characters)
    /// - bare 32-digit hex
    /// - raw ASCII, truncated to 16 bytes
    ///
    /// Shorter inputs are padded with the default template; an empty
    /// input yields the default key.
    pub fn parse(input: &str) -> Self {
        let input = input.trim();
        let mut key = DEFAULT_KEY;

        let source: Vec<u8> = if input.len() == 34 && input.starts_with("0x") {
            hex::decode(&input[2..]).unwrap_or_else(|_| input.as_bytes().to_vec())
        } else if input.len() == 32 {
            hex::decode(input).unwrap_or_else(|_| input.as_bytes().to_vec())
        } else {
            input.as_bytes().to_vec()
        };

        let n = source.len().min(DEVICE_KEY_SIZE);
        key[..n].copy_from_slice(&source[..n]);
        Self(key)
    }

    /// The raw key bytes.
    pub fn as_bytes(&self) -> &[u8; DEVICE_KEY_SIZE] {
        &self.0
    }
}

impl Default for DeviceKey {
    fn default() -> Self {
        Self(DEFAULT_KEY)
    }
}

impl std::fmt::Debug for DeviceKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // never print key material
        f.write_str("DeviceKey(..)")
    }
}
