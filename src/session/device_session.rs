//! The per-device session object.

use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, error, info, warn};

use crate::auth::{AuthStep, Handshake};
use crate::codec::{ChunkDecoder, ChunkEncoder, DecodeOutcome, ack_frame};
use crate::core::{AUTH_ENDPOINT, CodecError, QueueError, SocketCallback, TetherError, Transport};
use crate::device::{ConnectionState, Device, DeviceEvent};
use crate::queue::{Action, CommandQueue, TransactionBuilder};

use super::config::{InitRequest, SessionConfig};

/// A paired connection to one peripheral device.
///
/// Composes the command queue, the chunk codec and the pairing
/// handshake. Construction wires the session in as the queue's
/// byte-sink; [`DeviceSession::connect`] then drives the whole ladder
/// `Connecting → Connected → Authenticating → Initializing →
/// Initialized` without further calls.
pub struct DeviceSession<T: Transport> {
    inner: Arc<SessionInner<T>>,
}

struct SessionInner<T: Transport> {
    device: Device,
    queue: CommandQueue<T>,
    encoder: Mutex<ChunkEncoder>,
    decoder: Mutex<ChunkDecoder>,
    handshake: Mutex<Handshake>,
    init_requests: Vec<InitRequest>,
}

impl<T: Transport> DeviceSession<T> {
    /// Build a session over `transport` for `device`.
    pub fn new(transport: T, device: Device, config: SessionConfig) -> Self {
        let queue = CommandQueue::new(transport, device.clone(), config.auto_reconnect);
        let inner = Arc::new(SessionInner {
            device,
            queue,
            encoder: Mutex::new(ChunkEncoder::new(config.mtu)),
            decoder: Mutex::new(ChunkDecoder::new()),
            handshake: Mutex::new(Handshake::new(config.device_key)),
            init_requests: config.init_requests,
        });
        inner.queue.set_callback(Arc::clone(&inner) as Arc<dyn SocketCallback>);
        Self { inner }
    }

    /// Schedule a connection attempt; see
    /// [`CommandQueue::connect`](crate::queue::CommandQueue::connect).
    pub fn connect(&self) -> bool {
        self.inner.queue.connect()
    }

    /// Close the connection, keeping the session reusable.
    pub fn disconnect(&self) {
        self.inner.queue.disconnect();
        self.inner.decoder.lock().reset();
    }

    /// Tear the session down for good. Idempotent.
    pub fn dispose(&self) {
        self.inner.queue.dispose();
        self.inner.decoder.lock().reset();
    }

    /// Whether a live transport connection exists.
    pub fn is_connected(&self) -> bool {
        self.inner.queue.is_connected()
    }

    /// The device record.
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// The underlying command queue, for raw transactions.
    pub fn command_queue(&self) -> &CommandQueue<T> {
        &self.inner.queue
    }

    /// Update the encoder's MTU when the link renegotiates it.
    pub fn set_mtu(&self, mtu: usize) {
        debug!(mtu, "setting mtu");
        self.inner.encoder.lock().set_mtu(mtu);
    }

    /// Chunk-encode `payload` for `endpoint` and queue one transaction
    /// writing the frames in order.
    ///
    /// Stalls with the rest of the queue while disconnected. Encrypted
    /// sends require a completed handshake.
    pub fn write_chunked(
        &self,
        task_name: &str,
        endpoint: u16,
        payload: &[u8],
        encrypt: bool,
        request_ack: bool,
    ) -> Result<(), CodecError> {
        self.inner
            .write_chunked(task_name, endpoint, payload, encrypt, request_ack)
    }

    /// Like [`DeviceSession::write_chunked`], but schedules a connect
    /// first when disconnected and fails if that cannot be done.
    pub fn write_chunked_connected(
        &self,
        task_name: &str,
        endpoint: u16,
        payload: &[u8],
        encrypt: bool,
        request_ack: bool,
    ) -> Result<(), TetherError> {
        if !self.is_connected() && !self.inner.queue.connect() {
            return Err(QueueError::ConnectRejected.into());
        }
        self.inner
            .write_chunked(task_name, endpoint, payload, encrypt, request_ack)?;
        Ok(())
    }
}

impl<T: Transport> Drop for DeviceSession<T> {
    fn drop(&mut self) {
        // the queue holds the session as its callback; dropping that
        // reference lets the whole chain unwind and dispose
        self.inner.queue.clear_callback();
    }
}

impl<T: Transport> SessionInner<T> {
    fn write_chunked(
        &self,
        task_name: &str,
        endpoint: u16,
        payload: &[u8],
        encrypt: bool,
        request_ack: bool,
    ) -> Result<(), CodecError> {
        let builder = self.chunk_into(
            TransactionBuilder::new(task_name),
            endpoint,
            payload,
            encrypt,
            request_ack,
        )?;
        builder.queue(&self.queue);
        Ok(())
    }

    /// Append the chunk frames of one message to `builder` as write
    /// actions.
    fn chunk_into(
        &self,
        mut builder: TransactionBuilder,
        endpoint: u16,
        payload: &[u8],
        encrypt: bool,
        request_ack: bool,
    ) -> Result<TransactionBuilder, CodecError> {
        let mut frames = Vec::new();
        self.encoder
            .lock()
            .write(|frame| frames.push(frame), endpoint, payload, encrypt, request_ack)?;
        for frame in frames {
            builder = builder.add_action(Action::Write(frame));
        }
        Ok(builder)
    }

    /// A complete chunked message arrived.
    fn on_message(&self, endpoint: u16, payload: Vec<u8>, needs_ack: bool) {
        if needs_ack {
            let (handle, count) = self.decoder.lock().last_message();
            debug!(handle, count, "acknowledging chunked message");
            TransactionBuilder::new("chunked ack")
                .write(ack_frame(handle, count))
                .queue(&self.queue);
        }

        if endpoint == AUTH_ENDPOINT {
            self.on_auth_payload(&payload);
            return;
        }

        self.device.emit(DeviceEvent::FrameReceived { endpoint, payload });
    }

    /// Drive the handshake machine with a payload from its endpoint.
    fn on_auth_payload(&self, payload: &[u8]) {
        let step = self.handshake.lock().handle_payload(payload);
        match step {
            AuthStep::SendChallenge { reply, keys } => {
                // the codec learns the key before the challenge goes
                // out; everything after this point may be encrypted
                self.encoder
                    .lock()
                    .set_encryption_parameters(keys.counter, keys.key);
                self.decoder
                    .lock()
                    .set_encryption_parameters(keys.counter, keys.key);
                if let Err(err) =
                    self.write_chunked("send encrypted challenge", AUTH_ENDPOINT, &reply, false, false)
                {
                    error!(%err, "failed to encode challenge reply");
                }
            }
            AuthStep::Authenticated => {
                info!(device = %self.device.label(), "authenticated");
                self.device.emit(DeviceEvent::Authentication(Ok(())));
                self.queue_initialization();
            }
            AuthStep::Failed(failure) => {
                error!(device = %self.device.label(), %failure, "authentication failed, disconnecting");
                self.device.emit(DeviceEvent::Authentication(Err(failure)));
                self.queue.disconnect();
            }
            AuthStep::Ignored => {}
        }
    }

    /// Post-authentication initialization: configured requests, then
    /// the `Initialized` state.
    fn queue_initialization(&self) {
        let mut builder = TransactionBuilder::new("initialize device")
            .set_connection_state(ConnectionState::Initializing);
        for request in &self.init_requests {
            builder = match self.chunk_into(builder, request.endpoint, &request.payload, true, false)
            {
                Ok(builder) => builder,
                Err(err) => {
                    error!(%err, endpoint = request.endpoint, "failed to encode init request");
                    return;
                }
            };
        }
        builder
            .set_connection_state(ConnectionState::Initialized)
            .queue(&self.queue);
    }
}

impl<T: Transport> SocketCallback for SessionInner<T> {
    fn on_connection_established(&self) {
        debug!(device = %self.device.label(), "connection established, starting authentication");
        self.decoder.lock().reset_encryption();
        self.encoder.lock().reset();

        let step1 = self.handshake.lock().start();
        let builder = TransactionBuilder::new("authenticate")
            .set_connection_state(ConnectionState::Authenticating);
        match self.chunk_into(builder, AUTH_ENDPOINT, &step1, false, false) {
            Ok(builder) => builder.queue(&self.queue),
            Err(err) => error!(%err, "failed to encode handshake start"),
        }
    }

    fn on_socket_read(&self, data: &[u8]) {
        let outcome = self.decoder.lock().decode(data);
        match outcome {
            Ok(DecodeOutcome::Frame {
                endpoint,
                payload,
                needs_ack,
            }) => self.on_message(endpoint, payload, needs_ack),
            Ok(DecodeOutcome::Incomplete) => {}
            Ok(DecodeOutcome::Ack { handle, count }) => {
                debug!(handle, count, "peer acknowledged chunked message");
            }
            Ok(DecodeOutcome::Passthrough) => {
                self.device.emit(DeviceEvent::RawData(data.to_vec()));
            }
            Err(err) => {
                warn!(%err, "framing error, partial buffer dropped");
            }
        }
    }
}
