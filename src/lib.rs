//! # TETHER Protocol
//!
//! **T**ransport & **E**ncryption for **T**ethered **E**xternal **R**adios
//!
//! TETHER is the session/transport core for driving wearable and
//! peripheral devices (watches, bands, rings, printers) over duplex
//! byte-stream links such as serial Bluetooth sockets or BLE
//! notification pipes with a constrained MTU. It provides:
//!
//! - **Ordering**: a strictly-ordered command queue built on one
//!   dedicated reader and one dedicated writer thread per connection
//! - **Scripting**: a transaction/action model for device interactions
//! - **Chunking**: a fragmentation/reassembly codec that moves large
//!   payloads over links that deliver only small frames
//! - **Pairing**: an elliptic-curve handshake deriving a shared AES
//!   session key that transparently encrypts chunked traffic
//!
//! ## Modules
//!
//! - [`core`]: transport traits, constants and error types
//! - [`device`]: connection state, device record and observer events
//! - [`queue`]: actions, transactions and the command queue
//! - [`codec`]: the chunked message encoder and decoder
//! - [`auth`]: key material and the handshake state machine
//! - [`session`]: the composition applications hold per device
//!
//! ## Example Usage
//!
//! ```ignore
//! use tether_protocol::prelude::*;
//!
//! let device = Device::new("Example Watch 2");
//! device.set_event_sink(my_sink);
//!
//! let session = DeviceSession::new(
//!     my_transport,
//!     device,
//!     SessionConfig::with_key("0x00112233445566778899aabbccddeeff"),
//! );
//!
//! // drives Connecting → Connected → Authenticating → Initialized
//! session.connect();
//!
//! // stalls until the connection is up, then goes out in order
//! TransactionBuilder::new("vibrate twice")
//!     .write([0x21, 0x01])
//!     .wait(std::time::Duration::from_millis(100))
//!     .write([0x21, 0x01])
//!     .queue(session.command_queue());
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]
#![cfg_attr(docsrs, feature(doc_cfg))]

pub mod auth;
pub mod codec;
pub mod core;
pub mod device;
pub mod queue;
pub mod session;

#[cfg(test)]
pub(crate) mod testing;

/// Prelude module for convenient imports.
pub mod prelude {
    pub use crate::auth::{AuthState, DeviceKey, Handshake};
    pub use crate::codec::{ChunkDecoder, ChunkEncoder, DecodeOutcome};
    pub use crate::core::{
        AuthFailure, CodecError, QueueError, SocketCallback, TetherError, Transport,
        TransportHandle,
    };
    pub use crate::device::{ConnectionState, Device, DeviceEvent, EventSink};
    pub use crate::queue::{Action, CommandQueue, Transaction, TransactionBuilder};
    pub use crate::session::{DeviceSession, InitRequest, SessionConfig};
}

// Re-export commonly used items at crate root
pub use crate::core::TetherError;
pub use crate::device::{ConnectionState, Device, DeviceEvent, EventSink};
pub use crate::queue::{CommandQueue, Transaction, TransactionBuilder};
pub use crate::session::{DeviceSession, SessionConfig};
