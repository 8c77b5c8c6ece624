//! Error types for the TETHER protocol.

use thiserror::Error;

/// Errors raised by the command queue and its public API surface.
#[derive(Debug, Error)]
pub enum QueueError {
    /// The queue was disposed; no further work is accepted.
    #[error("queue has been disposed")]
    Disposed,

    /// A connection attempt could not be scheduled.
    #[error("unable to schedule a connection to the device")]
    ConnectRejected,

    /// An action required a live connection that does not exist.
    #[error("not connected")]
    NotConnected,

    /// I/O failure on the underlying transport.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors raised while encoding or decoding chunked frames.
#[derive(Debug, Error)]
pub enum CodecError {
    /// Frame shorter than its mandatory header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum length required for this frame kind.
        expected: usize,
        /// Actual length received.
        actual: usize,
    },

    /// A continuation frame arrived with no reassembly in progress.
    #[error("continuation frame without a first frame")]
    OrphanContinuation,

    /// A frame's handle does not match the message being reassembled.
    #[error("handle mismatch: reassembling {expected:#04x}, frame carries {actual:#04x}")]
    HandleMismatch {
        /// Handle of the in-progress message.
        expected: u8,
        /// Handle carried by the offending frame.
        actual: u8,
    },

    /// A frame's chunk count is not the next expected one.
    #[error("chunk out of order: expected count {expected}, got {actual}")]
    OutOfOrder {
        /// Next expected chunk count.
        expected: u8,
        /// Count carried by the offending frame.
        actual: u8,
    },

    /// Encryption was requested before the handshake delivered a key.
    #[error("no session key registered")]
    NoSessionKey,

    /// Ciphertext length is not a whole number of AES blocks.
    #[error("ciphertext length {0} is not block aligned")]
    NotBlockAligned(usize),

    /// The embedded checksum of a decrypted payload does not match.
    #[error("payload checksum mismatch: computed {computed:#010x}, embedded {embedded:#010x}")]
    ChecksumMismatch {
        /// CRC32 recomputed over the decrypted payload.
        computed: u32,
        /// CRC32 embedded in the decrypted payload.
        embedded: u32,
    },

    /// Declared payload length exceeds what was reassembled.
    #[error("declared length {declared} exceeds reassembled {actual} bytes")]
    LengthMismatch {
        /// Length announced in the first frame's header.
        declared: usize,
        /// Bytes actually reassembled.
        actual: usize,
    },
}

/// Reasons the pairing handshake can fail.
///
/// Terminal for the session; the surrounding reconnect policy may retry the
/// whole connection, the state machine itself never does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum AuthFailure {
    /// The peer rejected the challenge: the pairing key is wrong.
    #[error("authentication failed, check the pairing key")]
    WrongKey,

    /// The peer reported a non-success status.
    #[error("device reported handshake status {0:#04x}")]
    Status(u8),

    /// A handshake payload was too short to parse.
    #[error("malformed handshake payload")]
    Malformed,
}

/// Top-level TETHER errors.
#[derive(Debug, Error)]
pub enum TetherError {
    /// Queue error.
    #[error("queue error: {0}")]
    Queue(#[from] QueueError),

    /// Codec error.
    #[error("codec error: {0}")]
    Codec(#[from] CodecError),

    /// Handshake failure.
    #[error("handshake failure: {0}")]
    Auth(#[from] AuthFailure),

    /// I/O error.
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}
