//! Protocol constants for the TETHER wire formats.
//!
//! These values are fixed by the device protocol and MUST NOT be changed.

// =============================================================================
// CHUNK CODEC
// =============================================================================

/// Reserved leading byte that marks a frame as chunked traffic.
pub const CHUNK_MARKER: u8 = 0x03;

/// Leading byte of a chunked-transfer acknowledgement frame.
pub const CHUNK_ACK_MARKER: u8 = 0x04;

/// Flag: first frame of a chunked message.
pub const CHUNK_FLAG_FIRST: u8 = 0x01;

/// Flag: final frame of a chunked message.
pub const CHUNK_FLAG_FINAL: u8 = 0x02;

/// Flag: the sender requests an acknowledgement for this message.
pub const CHUNK_FLAG_NEEDS_ACK: u8 = 0x04;

/// Flag: the message payload is encrypted with the session key.
pub const CHUNK_FLAG_ENCRYPTED: u8 = 0x08;

/// Header size of a first frame (marker + flags + handle + count + endpoint + length).
pub const CHUNK_FIRST_HEADER_SIZE: usize = 10;

/// Header size of a continuation frame (marker + flags + handle + count).
pub const CHUNK_CONT_HEADER_SIZE: usize = 4;

/// Size of a chunked-transfer acknowledgement frame.
pub const CHUNK_ACK_SIZE: usize = 5;

/// Link-layer overhead subtracted from the MTU when sizing frames.
pub const LINK_OVERHEAD: usize = 3;

/// Default MTU assumed before the link reports a negotiated value.
pub const DEFAULT_MTU: usize = 247;

// =============================================================================
// SESSION ENCRYPTION
// =============================================================================

/// AES block size; encrypted payloads are padded to a multiple of this.
pub const AES_BLOCK_SIZE: usize = 16;

/// Derived session key size.
pub const SESSION_KEY_SIZE: usize = 16;

/// Pre-shared device pairing key size.
pub const DEVICE_KEY_SIZE: usize = 16;

/// Trailer appended to the plaintext before encryption (counter + CRC32).
pub const ENCRYPTED_TRAILER_SIZE: usize = 8;

// =============================================================================
// HANDSHAKE
// =============================================================================

/// Endpoint carrying the pairing handshake.
pub const AUTH_ENDPOINT: u16 = 0x0082;

/// X25519 public point size.
pub const PUBLIC_POINT_SIZE: usize = 32;

/// X25519 private scalar size.
pub const PRIVATE_SCALAR_SIZE: usize = 32;

/// Random nonce the peer sends in its key-exchange response.
pub const REMOTE_RANDOM_SIZE: usize = 16;

/// Handshake step 1: our public point.
pub const AUTH_CMD_PUBLIC_KEY: u8 = 0x04;

/// Handshake step 3: double-encrypted challenge reply.
pub const AUTH_CMD_CHALLENGE: u8 = 0x05;

/// Handshake step 2: peer's random + public point (response to step 1).
pub const AUTH_RESP_REMOTE_KEY: u8 = 0x84;

/// Handshake step 4: peer's verdict on the challenge (response to step 3).
pub const AUTH_RESP_RESULT: u8 = 0x85;

/// Status byte: the peer accepted the preceding step.
pub const AUTH_STATUS_SUCCESS: u8 = 0x01;

/// Status byte: the challenge failed because the pairing key is wrong.
pub const AUTH_STATUS_WRONG_KEY: u8 = 0x25;

// =============================================================================
// QUEUE
// =============================================================================

/// Default read buffer handed to the transport's blocking read.
pub const DEFAULT_READ_BUFFER_SIZE: usize = 8192;
