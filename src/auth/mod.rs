//! TETHER Protocol - Pairing handshake layer.
//!
//! A specialized transaction sequence, run once per connection, that
//! performs an elliptic-curve key exchange, derives the shared AES
//! session key and hands it to the chunk codec before the device is
//! declared initialized:
//!
//! - **Key material**: [`DeviceKey`] (the pre-shared pairing secret)
//!   and [`HandshakeSession`] (the ephemeral X25519 keypair)
//! - **State machine**: [`Handshake`], driven by decoder dispatch on
//!   the handshake endpoint rather than by a loop — every continuation
//!   queues a transaction and returns
//!
//! The machine owns no thread: its steps run on the reader thread's
//! decode dispatch and the writer thread's transaction execution, so
//! none of them may block for unbounded time.

mod key;
mod machine;
mod session;

pub use key::DeviceKey;
pub use machine::{AuthState, AuthStep, Handshake};
pub use session::{HandshakeSession, SessionKeys};
