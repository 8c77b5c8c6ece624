//! TETHER Protocol - Device Session layer.
//!
//! [`DeviceSession`] composes the command queue, the chunk codec and
//! the pairing handshake into the per-device object applications hold:
//!
//! - it is the queue's byte-sink, feeding every read into the decoder
//! - it routes completed messages by endpoint: the handshake endpoint
//!   drives the [`Handshake`](crate::auth::Handshake) machine, every
//!   other endpoint is delivered as a
//!   [`DeviceEvent::FrameReceived`](crate::device::DeviceEvent)
//! - it answers chunked acks and runs the post-authentication
//!   initialization writes
//!
//! Each session owns its own codec and handshake, so multiple
//! simultaneous device connections stay fully independent.

mod config;
mod device_session;

pub use config::{InitRequest, SessionConfig};
pub use device_session::DeviceSession;
