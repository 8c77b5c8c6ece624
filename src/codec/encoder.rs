//! Chunked message encoder.

use tracing::{debug, warn};
use zeroize::Zeroize;

use crate::core::{
    AES_BLOCK_SIZE, CHUNK_CONT_HEADER_SIZE, CHUNK_FIRST_HEADER_SIZE, CHUNK_MARKER, CodecError,
    LINK_OVERHEAD, SESSION_KEY_SIZE,
};

use super::crypto::{aes128_ecb_encrypt, message_key};
use super::header::ChunkFlags;

/// Smallest MTU that still fits a first header plus one payload byte.
const MIN_MTU: usize = CHUNK_FIRST_HEADER_SIZE + LINK_OVERHEAD + 1;

/// Splits arbitrary-length payloads into bounded chunk frames.
///
/// One encoder exists per connection and is driven only from the
/// writer side, which is what keeps the write handle and the encrypted
/// message counter strictly monotonic: reuse of a counter value under
/// the same key is a protocol violation.
pub struct ChunkEncoder {
    write_handle: u8,
    counter: u32,
    session_key: Option<[u8; SESSION_KEY_SIZE]>,
    mtu: usize,
}

impl ChunkEncoder {
    /// Create an encoder for a link with the given MTU.
    pub fn new(mtu: usize) -> Self {
        Self {
            write_handle: 0,
            counter: 0,
            session_key: None,
            mtu: clamp_mtu(mtu),
        }
    }

    /// Register the session key and initial message counter.
    ///
    /// Called exactly once per connection, right after the handshake
    /// completes; encoding before that point is plaintext only.
    pub fn set_encryption_parameters(&mut self, counter: u32, session_key: [u8; SESSION_KEY_SIZE]) {
        self.counter = counter;
        self.session_key = Some(session_key);
    }

    /// Update the MTU when the link renegotiates it.
    pub fn set_mtu(&mut self, mtu: usize) {
        self.mtu = clamp_mtu(mtu);
    }

    /// Slice `payload` into chunk frames and hand each one to `emit`
    /// in order.
    ///
    /// With `encrypt`, the whole message is AES-encrypted under the
    /// per-message key before slicing. With `request_ack`, the final
    /// frame asks the peer to acknowledge the message.
    pub fn write(
        &mut self,
        mut emit: impl FnMut(Vec<u8>),
        endpoint: u16,
        payload: &[u8],
        encrypt: bool,
        request_ack: bool,
    ) -> Result<(), CodecError> {
        self.write_handle = self.write_handle.wrapping_add(1);
        let handle = self.write_handle;
        let declared_len = payload.len() as u32;

        let data = if encrypt {
            let Some(session_key) = self.session_key else {
                return Err(CodecError::NoSessionKey);
            };
            let sealed = self.seal(&session_key, handle, payload);
            debug!(
                endpoint = format_args!("{endpoint:#06x}"),
                plaintext = payload.len(),
                ciphertext = sealed.len(),
                "encrypted chunked message"
            );
            sealed
        } else {
            payload.to_vec()
        };

        let mut remaining = data.len();
        let mut sent = 0usize;
        let mut count: u8 = 0;
        let mut header_size = CHUNK_FIRST_HEADER_SIZE;

        loop {
            let budget = self.mtu - LINK_OVERHEAD - header_size;
            let take = remaining.min(budget);

            let mut flags = ChunkFlags::NONE;
            if encrypt {
                flags = flags.with_encrypted();
            }
            if count == 0 {
                flags = flags.with_first();
            }
            if remaining <= budget {
                flags = flags.with_final();
                if request_ack {
                    flags = flags.with_needs_ack();
                }
            }

            let mut frame = Vec::with_capacity(header_size + take);
            frame.push(CHUNK_MARKER);
            frame.push(flags.as_byte());
            frame.push(handle);
            frame.push(count);
            if count == 0 {
                frame.extend_from_slice(&endpoint.to_be_bytes());
                frame.extend_from_slice(&declared_len.to_be_bytes());
            }
            frame.extend_from_slice(&data[sent..sent + take]);
            emit(frame);

            sent += take;
            remaining -= take;
            header_size = CHUNK_CONT_HEADER_SIZE;
            count = count.wrapping_add(1);

            if remaining == 0 {
                break;
            }
        }

        Ok(())
    }

    /// Extend the plaintext with the counter/CRC trailer, pad to the
    /// block size and encrypt under the per-message key.
    fn seal(
        &mut self,
        session_key: &[u8; SESSION_KEY_SIZE],
        handle: u8,
        payload: &[u8],
    ) -> Vec<u8> {
        let mut buf = Vec::with_capacity(payload.len() + AES_BLOCK_SIZE);
        buf.extend_from_slice(payload);
        buf.extend_from_slice(&self.counter.to_le_bytes());
        self.counter = self.counter.wrapping_add(1);

        let checksum = crc32fast::hash(&buf);
        buf.extend_from_slice(&checksum.to_le_bytes());

        let overflow = buf.len() % AES_BLOCK_SIZE;
        if overflow > 0 {
            buf.resize(buf.len() + AES_BLOCK_SIZE - overflow, 0);
        }

        aes128_ecb_encrypt(&message_key(session_key, handle), &mut buf);
        buf
    }

    /// Forget the session key and reset handle and counter, for reuse
    /// across connections.
    pub fn reset(&mut self) {
        self.write_handle = 0;
        self.counter = 0;
        if let Some(mut key) = self.session_key.take() {
            key.zeroize();
        }
    }
}

impl Drop for ChunkEncoder {
    fn drop(&mut self) {
        if let Some(mut key) = self.session_key.take() {
            key.zeroize();
        }
    }
}

fn clamp_mtu(mtu: usize) -> usize {
    if mtu < MIN_MTU {
        warn!(mtu, minimum = MIN_MTU, "mtu below minimum, clamping");
        MIN_MTU
    } else {
        mtu
    }
}
