//! Chunk frame format.
//!
//! Wire format of a first frame (10-byte header):
//!
//! ```text
//! +--------+--------+--------+--------+----------------+----------------+---------+
//! | Marker | Flags  | Handle | Count  | Endpoint       | Payload Length | Data    |
//! | 0x03   | 1 byte | 1 byte | 1 byte | 2 bytes (BE16) | 4 bytes (BE32) | ...     |
//! +--------+--------+--------+--------+----------------+----------------+---------+
//! ```
//!
//! Continuation and final frames carry only the 4-byte
//! `marker + flags + handle + count` header. The payload length always
//! announces the plaintext size, also in encrypted mode.

use crate::core::{
    CHUNK_ACK_MARKER, CHUNK_ACK_SIZE, CHUNK_CONT_HEADER_SIZE, CHUNK_FIRST_HEADER_SIZE,
    CHUNK_FLAG_ENCRYPTED, CHUNK_FLAG_FINAL, CHUNK_FLAG_FIRST, CHUNK_FLAG_NEEDS_ACK, CHUNK_MARKER,
    CodecError,
};

/// Flag byte of a chunk frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ChunkFlags(u8);

impl ChunkFlags {
    /// No flags set.
    pub const NONE: Self = Self(0);

    /// Create flags from a raw byte.
    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    /// Get the raw byte value.
    pub fn as_byte(self) -> u8 {
        self.0
    }

    /// Check if this is the first frame of a message.
    pub fn is_first(self) -> bool {
        self.0 & CHUNK_FLAG_FIRST != 0
    }

    /// Check if this is the final frame of a message.
    pub fn is_final(self) -> bool {
        self.0 & CHUNK_FLAG_FINAL != 0
    }

    /// Check if the sender requests an acknowledgement.
    pub fn needs_ack(self) -> bool {
        self.0 & CHUNK_FLAG_NEEDS_ACK != 0
    }

    /// Check if the message payload is encrypted.
    pub fn is_encrypted(self) -> bool {
        self.0 & CHUNK_FLAG_ENCRYPTED != 0
    }

    /// Set the first-frame flag.
    pub fn with_first(self) -> Self {
        Self(self.0 | CHUNK_FLAG_FIRST)
    }

    /// Set the final-frame flag.
    pub fn with_final(self) -> Self {
        Self(self.0 | CHUNK_FLAG_FINAL)
    }

    /// Set the needs-ack flag.
    pub fn with_needs_ack(self) -> Self {
        Self(self.0 | CHUNK_FLAG_NEEDS_ACK)
    }

    /// Set the encrypted flag.
    pub fn with_encrypted(self) -> Self {
        Self(self.0 | CHUNK_FLAG_ENCRYPTED)
    }
}

/// Parsed header of one chunk frame.
///
/// `endpoint` and `declared_len` are only present on first frames;
/// continuation frames are located purely by `(handle, count)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChunkHeader {
    /// Frame flags.
    pub flags: ChunkFlags,
    /// One-byte id of the chunked message this frame belongs to.
    pub handle: u8,
    /// Index of this frame within its message.
    pub count: u8,
    /// Destination endpoint (first frames only).
    pub endpoint: Option<u16>,
    /// Announced plaintext payload length (first frames only).
    pub declared_len: Option<usize>,
}

impl ChunkHeader {
    /// Parse the header of `frame` and return it together with the
    /// offset at which the payload starts.
    pub fn parse(frame: &[u8]) -> Result<(Self, usize), CodecError> {
        if frame.len() < CHUNK_CONT_HEADER_SIZE {
            return Err(CodecError::TooShort {
                expected: CHUNK_CONT_HEADER_SIZE,
                actual: frame.len(),
            });
        }

        let flags = ChunkFlags::from_byte(frame[1]);
        let handle = frame[2];
        let count = frame[3];

        if !flags.is_first() {
            return Ok((
                Self {
                    flags,
                    handle,
                    count,
                    endpoint: None,
                    declared_len: None,
                },
                CHUNK_CONT_HEADER_SIZE,
            ));
        }

        if frame.len() < CHUNK_FIRST_HEADER_SIZE {
            return Err(CodecError::TooShort {
                expected: CHUNK_FIRST_HEADER_SIZE,
                actual: frame.len(),
            });
        }
        let endpoint = u16::from_be_bytes([frame[4], frame[5]]);
        let declared_len = u32::from_be_bytes([frame[6], frame[7], frame[8], frame[9]]) as usize;
        Ok((
            Self {
                flags,
                handle,
                count,
                endpoint: Some(endpoint),
                declared_len: Some(declared_len),
            },
            CHUNK_FIRST_HEADER_SIZE,
        ))
    }
}

/// Check whether `frame` is chunked traffic (reserved marker byte).
pub(crate) fn is_chunked(frame: &[u8]) -> bool {
    frame.first() == Some(&CHUNK_MARKER)
}

/// Check whether `frame` is a chunked-transfer acknowledgement.
pub(crate) fn is_ack(frame: &[u8]) -> bool {
    frame.len() == CHUNK_ACK_SIZE && frame[0] == CHUNK_ACK_MARKER
}

/// Build the acknowledgement frame for a completed message.
pub fn ack_frame(handle: u8, count: u8) -> [u8; CHUNK_ACK_SIZE] {
    [CHUNK_ACK_MARKER, 0x00, handle, 0x01, count]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_roundtrip() {
        let flags = ChunkFlags::NONE.with_first().with_encrypted();
        assert!(flags.is_first());
        assert!(flags.is_encrypted());
        assert!(!flags.is_final());
        assert!(!flags.needs_ack());
        assert_eq!(ChunkFlags::from_byte(flags.as_byte()), flags);
    }

    #[test]
    fn test_parse_first_header() {
        let frame = [
            0x03, 0x01, 0x07, 0x00, 0x00, 0x82, 0x00, 0x00, 0x01, 0x00, 0xAA,
        ];
        let (header, offset) = ChunkHeader::parse(&frame).unwrap();
        assert!(header.flags.is_first());
        assert_eq!(header.handle, 0x07);
        assert_eq!(header.count, 0);
        assert_eq!(header.endpoint, Some(0x0082));
        assert_eq!(header.declared_len, Some(256));
        assert_eq!(offset, CHUNK_FIRST_HEADER_SIZE);
    }

    #[test]
    fn test_parse_continuation_header() {
        let frame = [0x03, 0x02, 0x07, 0x03, 0xBB, 0xCC];
        let (header, offset) = ChunkHeader::parse(&frame).unwrap();
        assert!(!header.flags.is_first());
        assert!(header.flags.is_final());
        assert_eq!(header.count, 3);
        assert_eq!(header.endpoint, None);
        assert_eq!(offset, CHUNK_CONT_HEADER_SIZE);
    }

    #[test]
    fn test_parse_short_first_frame() {
        let frame = [0x03, 0x01, 0x07, 0x00, 0x00, 0x82];
        assert!(matches!(
            ChunkHeader::parse(&frame),
            Err(CodecError::TooShort { .. })
        ));
    }

    #[test]
    fn test_ack_frame_shape() {
        let ack = ack_frame(0x07, 0x02);
        assert!(is_ack(&ack));
        assert_eq!(ack, [0x04, 0x00, 0x07, 0x01, 0x02]);
    }
}
