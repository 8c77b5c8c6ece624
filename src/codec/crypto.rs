//! AES-128-ECB helpers for session encryption.
//!
//! The device protocol encrypts each chunked message as a whole with a
//! per-message key derived from the session key and the message handle,
//! block by block without chaining. Integrity comes from the CRC32 and
//! counter embedded in the plaintext trailer, not from the cipher mode.

use aes::Aes128;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit, generic_array::GenericArray};

use crate::core::{AES_BLOCK_SIZE, SESSION_KEY_SIZE};

/// Derive the per-message key: every session key byte XORed with the
/// message handle. Combined with the single-owner handle sequence this
/// makes key+counter reuse impossible by construction.
pub(crate) fn message_key(session_key: &[u8; SESSION_KEY_SIZE], handle: u8) -> [u8; SESSION_KEY_SIZE] {
    let mut key = [0u8; SESSION_KEY_SIZE];
    for (out, byte) in key.iter_mut().zip(session_key.iter()) {
        *out = byte ^ handle;
    }
    key
}

/// Encrypt `data` in place. `data.len()` must be a multiple of the AES
/// block size; the codec pads before calling.
pub(crate) fn aes128_ecb_encrypt(key: &[u8; SESSION_KEY_SIZE], data: &mut [u8]) {
    debug_assert_eq!(data.len() % AES_BLOCK_SIZE, 0);
    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        cipher.encrypt_block(GenericArray::from_mut_slice(block));
    }
}

/// Decrypt `data` in place. `data.len()` must be a multiple of the AES
/// block size; the decoder verifies before calling.
pub(crate) fn aes128_ecb_decrypt(key: &[u8; SESSION_KEY_SIZE], data: &mut [u8]) {
    debug_assert_eq!(data.len() % AES_BLOCK_SIZE, 0);
    let cipher = Aes128::new(GenericArray::from_slice(key));
    for block in data.chunks_exact_mut(AES_BLOCK_SIZE) {
        cipher.decrypt_block(GenericArray::from_mut_slice(block));
    }
}

/// Encrypt one standalone 16-byte block, as the handshake challenge
/// does with the peer's random.
pub(crate) fn aes128_encrypt_block(
    key: &[u8; SESSION_KEY_SIZE],
    block: &[u8; AES_BLOCK_SIZE],
) -> [u8; AES_BLOCK_SIZE] {
    let mut out = *block;
    aes128_ecb_encrypt(key, &mut out);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encrypt_decrypt_roundtrip() {
        let key = [0x42u8; 16];
        let mut data = (0u8..32).collect::<Vec<u8>>();
        let original = data.clone();

        aes128_ecb_encrypt(&key, &mut data);
        assert_ne!(data, original);

        aes128_ecb_decrypt(&key, &mut data);
        assert_eq!(data, original);
    }

    #[test]
    fn test_message_key_depends_on_handle() {
        let session_key = [0x10u8; 16];
        let a = message_key(&session_key, 1);
        let b = message_key(&session_key, 2);
        assert_ne!(a, b);
        assert_eq!(a, [0x11u8; 16]);
        // handle 0 leaves the session key unchanged
        assert_eq!(message_key(&session_key, 0), session_key);
    }
}
