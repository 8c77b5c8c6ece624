//! Chunked message decoder and reassembly.

use tracing::{debug, info, warn};
use zeroize::Zeroize;

use crate::core::{
    AES_BLOCK_SIZE, CodecError, ENCRYPTED_TRAILER_SIZE, SESSION_KEY_SIZE,
};

use super::crypto::{aes128_ecb_decrypt, message_key};
use super::header::{ChunkHeader, is_ack, is_chunked};

/// Result of feeding one inbound frame to the decoder.
#[derive(Debug, PartialEq, Eq)]
pub enum DecodeOutcome {
    /// Not chunked traffic; forward the frame untouched to the raw
    /// handler.
    Passthrough,
    /// Chunk accepted, message not complete yet.
    Incomplete,
    /// A complete message was reassembled (and decrypted if needed).
    Frame {
        /// Endpoint the message is addressed to.
        endpoint: u16,
        /// Complete plaintext payload.
        payload: Vec<u8>,
        /// Whether the peer asked for an acknowledgement.
        needs_ack: bool,
    },
    /// The peer acknowledged one of our chunked messages.
    Ack {
        /// Handle of the acknowledged message.
        handle: u8,
        /// Final chunk count of the acknowledged message.
        count: u8,
    },
}

/// Per-connection accumulator of partial payload bytes.
///
/// Discarded on protocol error, on final-frame completion and on
/// disconnect.
#[derive(Default)]
struct ReassemblyBuffer {
    active: bool,
    data: Vec<u8>,
    endpoint: u16,
    declared_len: usize,
    handle: u8,
    next_count: u8,
    encrypted: bool,
}

impl ReassemblyBuffer {
    fn start(&mut self, endpoint: u16, declared_len: usize, handle: u8, encrypted: bool) {
        self.active = true;
        self.data.clear();
        self.endpoint = endpoint;
        self.declared_len = declared_len;
        self.handle = handle;
        self.next_count = 0;
        self.encrypted = encrypted;
    }

    fn reset(&mut self) {
        self.active = false;
        self.data.clear();
    }
}

/// Reassembles inbound chunk frames back into complete messages.
///
/// Owned by the connection's byte-sink and driven only from the reader
/// thread; inbound frames arrive in read order, so reassembly never
/// needs reordering logic, only drop and corruption detection.
pub struct ChunkDecoder {
    buffer: ReassemblyBuffer,
    session_key: Option<[u8; SESSION_KEY_SIZE]>,
    counter: u32,
    last_handle: u8,
    last_count: u8,
}

impl ChunkDecoder {
    /// Create a decoder with no session key (plaintext mode).
    pub fn new() -> Self {
        Self {
            buffer: ReassemblyBuffer::default(),
            session_key: None,
            counter: 0,
            last_handle: 0,
            last_count: 0,
        }
    }

    /// Register the session key and initial message counter, exactly
    /// once per connection after the handshake completes.
    pub fn set_encryption_parameters(&mut self, counter: u32, session_key: [u8; SESSION_KEY_SIZE]) {
        self.counter = counter;
        self.session_key = Some(session_key);
    }

    /// Handle and final count of the last completed message, for
    /// building the acknowledgement frame.
    pub fn last_message(&self) -> (u8, u8) {
        (self.last_handle, self.last_count)
    }

    /// Feed one inbound frame.
    ///
    /// Framing errors reset the reassembly buffer and are reported to
    /// the caller, which logs and keeps reading: the next first frame
    /// resynchronizes the stream.
    pub fn decode(&mut self, frame: &[u8]) -> Result<DecodeOutcome, CodecError> {
        if !is_chunked(frame) {
            if is_ack(frame) {
                return Ok(DecodeOutcome::Ack {
                    handle: frame[2],
                    count: frame[4],
                });
            }
            return Ok(DecodeOutcome::Passthrough);
        }

        let (header, payload_offset) = match ChunkHeader::parse(frame) {
            Ok(parsed) => parsed,
            Err(err) => {
                self.buffer.reset();
                return Err(err);
            }
        };

        if header.flags.is_first() {
            if self.buffer.active {
                warn!(
                    stale_handle = self.buffer.handle,
                    new_handle = header.handle,
                    buffered = self.buffer.data.len(),
                    "first frame while reassembling, discarding stale buffer"
                );
                self.buffer.reset();
            }
            // both present on a parsed first header
            let endpoint = header.endpoint.unwrap_or_default();
            let declared_len = header.declared_len.unwrap_or_default();
            self.buffer.start(
                endpoint,
                declared_len,
                header.handle,
                header.flags.is_encrypted(),
            );
        } else {
            if !self.buffer.active {
                return Err(CodecError::OrphanContinuation);
            }
            if header.handle != self.buffer.handle {
                let err = CodecError::HandleMismatch {
                    expected: self.buffer.handle,
                    actual: header.handle,
                };
                self.buffer.reset();
                return Err(err);
            }
            if header.count != self.buffer.next_count {
                let err = CodecError::OutOfOrder {
                    expected: self.buffer.next_count,
                    actual: header.count,
                };
                self.buffer.reset();
                return Err(err);
            }
        }

        self.buffer.data.extend_from_slice(&frame[payload_offset..]);
        self.buffer.next_count = header.count.wrapping_add(1);

        if !header.flags.is_final() {
            return Ok(DecodeOutcome::Incomplete);
        }

        self.last_handle = header.handle;
        self.last_count = header.count;
        let result = self.complete();
        let endpoint = self.buffer.endpoint;
        self.buffer.reset();

        let payload = result?;
        debug!(
            endpoint = format_args!("{endpoint:#06x}"),
            len = payload.len(),
            "reassembled chunked message"
        );
        Ok(DecodeOutcome::Frame {
            endpoint,
            payload,
            needs_ack: header.flags.needs_ack(),
        })
    }

    /// Finalize the buffered message: decrypt, verify and truncate.
    fn complete(&mut self) -> Result<Vec<u8>, CodecError> {
        let declared = self.buffer.declared_len;

        if !self.buffer.encrypted {
            if declared > self.buffer.data.len() {
                return Err(CodecError::LengthMismatch {
                    declared,
                    actual: self.buffer.data.len(),
                });
            }
            if declared < self.buffer.data.len() {
                warn!(
                    declared,
                    actual = self.buffer.data.len(),
                    "message longer than declared, truncating"
                );
            }
            let mut payload = std::mem::take(&mut self.buffer.data);
            payload.truncate(declared);
            return Ok(payload);
        }

        let Some(session_key) = self.session_key else {
            return Err(CodecError::NoSessionKey);
        };
        let mut data = std::mem::take(&mut self.buffer.data);
        if data.len() % AES_BLOCK_SIZE != 0 {
            return Err(CodecError::NotBlockAligned(data.len()));
        }
        if declared + ENCRYPTED_TRAILER_SIZE > data.len() {
            return Err(CodecError::LengthMismatch {
                declared,
                actual: data.len(),
            });
        }

        aes128_ecb_decrypt(&message_key(&session_key, self.buffer.handle), &mut data);

        let counter = u32::from_le_bytes([
            data[declared],
            data[declared + 1],
            data[declared + 2],
            data[declared + 3],
        ]);
        let embedded = u32::from_le_bytes([
            data[declared + 4],
            data[declared + 5],
            data[declared + 6],
            data[declared + 7],
        ]);
        let computed = crc32fast::hash(&data[..declared + 4]);
        if computed != embedded {
            return Err(CodecError::ChecksumMismatch { computed, embedded });
        }

        if counter != self.counter {
            info!(
                expected = self.counter,
                received = counter,
                "message counter out of step, resynchronizing"
            );
        }
        self.counter = counter.wrapping_add(1);

        data.truncate(declared);
        Ok(data)
    }

    /// Drop any partial reassembly, e.g. on disconnect.
    pub fn reset(&mut self) {
        self.buffer.reset();
    }

    /// Forget the session key as well, for reuse across connections.
    pub fn reset_encryption(&mut self) {
        self.reset();
        self.counter = 0;
        if let Some(mut key) = self.session_key.take() {
            key.zeroize();
        }
    }
}

impl Default for ChunkDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl Drop for ChunkDecoder {
    fn drop(&mut self) {
        if let Some(mut key) = self.session_key.take() {
            key.zeroize();
        }
    }
}
