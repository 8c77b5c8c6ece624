//! Core traits for the TETHER protocol.
//!
//! These traits define the seam between the command queue and the
//! operating system's byte-stream primitive, and the callback surface
//! through which inbound bytes and lifecycle notifications reach the
//! layers above the queue.

use std::io;

/// Factory for duplex byte-stream connections to one device.
///
/// This is the only thing the core requires from the platform's native
/// Bluetooth (or serial) API. `connect` performs the blocking transport
/// connect and returns a live [`TransportHandle`] on success.
///
/// # Requirements
///
/// - `connect` MUST block until the link is up or failed
/// - repeated `connect` calls after a handle was closed MUST be able to
///   produce a fresh handle (reconnect support)
pub trait Transport: Send + Sync + 'static {
    /// The live connection type produced by [`Transport::connect`].
    type Handle: TransportHandle;

    /// Open the link to the device.
    fn connect(&self) -> io::Result<Self::Handle>;
}

/// A live duplex byte-stream connection.
///
/// The handle is shared between exactly two threads: the reader thread
/// calls `read`, the writer thread calls `write`. `close` may be called
/// from any thread and MUST unblock a concurrent `read`, which then
/// returns `Ok(0)` or an error.
pub trait TransportHandle: Send + Sync + 'static {
    /// Blocking read into `buf`. Returns the number of bytes read;
    /// `Ok(0)` means the peer closed the link.
    fn read(&self, buf: &mut [u8]) -> io::Result<usize>;

    /// Write `bytes` as one link-layer unit.
    fn write(&self, bytes: &[u8]) -> io::Result<()>;

    /// Tear the link down.
    fn close(&self);
}

/// Callback surface the command queue drives.
///
/// `on_socket_read` is invoked synchronously on the reader thread for
/// every successful read, before the next read is issued; back-pressure
/// is therefore implicit. `on_connection_established` is invoked on the
/// writer thread once the transport-level connect has succeeded.
pub trait SocketCallback: Send + Sync + 'static {
    /// A run of bytes arrived from the device.
    fn on_socket_read(&self, data: &[u8]);

    /// The transport-level connection is up.
    fn on_connection_established(&self);
}
