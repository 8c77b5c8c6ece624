//! Device model: connection lifecycle state and observer events.
//!
//! A [`Device`] is the shared, thread-safe record of one peripheral:
//! its diagnostic label, its current [`ConnectionState`], and the
//! registered [`EventSink`] through which state transitions, decoded
//! frames and authentication results are delivered to the application.

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::debug;

use crate::core::AuthFailure;

/// Connection lifecycle state of a device.
///
/// Exactly one value is held per device at a time, and transitions are
/// the only way observers learn of progress. The ordering is
/// significant: `connect()` refuses when the state is already
/// [`ConnectionState::Connecting`] or higher. Progress is monotonic
/// except for the reconnect cycle
/// (`WaitingForReconnect → Connecting`).
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum ConnectionState {
    /// No connection and none pending.
    Disconnected,
    /// The link dropped and the reconnect policy will try again.
    WaitingForReconnect,
    /// A connection attempt is scheduled or in flight.
    Connecting,
    /// The transport-level link is up.
    Connected,
    /// The pairing handshake is running.
    Authenticating,
    /// Authenticated; post-auth initialization writes are running.
    Initializing,
    /// Fully initialized and ready for application traffic.
    Initialized,
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let label = match self {
            Self::Disconnected => "DISCONNECTED",
            Self::WaitingForReconnect => "WAITING_FOR_RECONNECT",
            Self::Connecting => "CONNECTING",
            Self::Connected => "CONNECTED",
            Self::Authenticating => "AUTHENTICATING",
            Self::Initializing => "INITIALIZING",
            Self::Initialized => "INITIALIZED",
        };
        f.write_str(label)
    }
}

/// Notifications delivered to the registered [`EventSink`].
#[derive(Debug, Clone)]
pub enum DeviceEvent {
    /// The connection state changed.
    StateChanged(ConnectionState),
    /// A complete chunked message was reassembled for an application
    /// endpoint.
    FrameReceived {
        /// Endpoint the message is addressed to.
        endpoint: u16,
        /// Reassembled (and, if applicable, decrypted) payload.
        payload: Vec<u8>,
    },
    /// Non-chunked bytes passed through untouched.
    RawData(Vec<u8>),
    /// Outcome of the pairing handshake.
    Authentication(Result<(), AuthFailure>),
    /// The device-busy label changed; `None` clears it.
    BusyTask(Option<String>),
    /// A long-running operation reported progress.
    Progress {
        /// Human-readable description of the operation.
        label: String,
        /// Whether the operation is still running.
        ongoing: bool,
        /// Completion percentage, 0..=100.
        percent: u8,
    },
}

/// Observer for [`DeviceEvent`]s.
///
/// Events are emitted from the queue's reader and writer threads; the
/// sink must not block for unbounded time.
pub trait EventSink: Send + Sync + 'static {
    /// Deliver one event.
    fn on_event(&self, event: DeviceEvent);
}

/// Shared record of one peripheral device.
#[derive(Clone)]
pub struct Device {
    inner: Arc<DeviceInner>,
}

struct DeviceInner {
    label: String,
    state: Mutex<ConnectionState>,
    busy: Mutex<Option<String>>,
    sink: Mutex<Option<Arc<dyn EventSink>>>,
}

impl Device {
    /// Create a device record with a diagnostic label.
    pub fn new(label: impl Into<String>) -> Self {
        Self {
            inner: Arc::new(DeviceInner {
                label: label.into(),
                state: Mutex::new(ConnectionState::Disconnected),
                busy: Mutex::new(None),
                sink: Mutex::new(None),
            }),
        }
    }

    /// The diagnostic label.
    pub fn label(&self) -> &str {
        &self.inner.label
    }

    /// Register the sink receiving [`DeviceEvent`]s, replacing any
    /// previous one.
    pub fn set_event_sink(&self, sink: Arc<dyn EventSink>) {
        *self.inner.sink.lock() = Some(sink);
    }

    /// Current connection state.
    pub fn state(&self) -> ConnectionState {
        *self.inner.state.lock()
    }

    /// Whether the transport-level link is up (state is `Connected` or
    /// further along).
    pub fn is_connected(&self) -> bool {
        self.state() >= ConnectionState::Connected
    }

    /// Whether the device finished post-auth initialization.
    pub fn is_initialized(&self) -> bool {
        self.state() >= ConnectionState::Initialized
    }

    /// Transition to `new_state` and notify the sink.
    pub fn set_state(&self, new_state: ConnectionState) {
        {
            let mut state = self.inner.state.lock();
            if *state == new_state {
                return;
            }
            debug!(device = %self.inner.label, from = %state, to = %new_state, "connection state change");
            *state = new_state;
        }
        self.emit(DeviceEvent::StateChanged(new_state));
    }

    /// Current busy-task label, if any.
    pub fn busy_task(&self) -> Option<String> {
        self.inner.busy.lock().clone()
    }

    /// Set or clear the busy-task label and notify the sink.
    pub fn set_busy_task(&self, label: Option<String>) {
        {
            let mut busy = self.inner.busy.lock();
            debug!(device = %self.inner.label, ?label, "busy task change");
            *busy = label.clone();
        }
        self.emit(DeviceEvent::BusyTask(label));
    }

    /// Deliver an event to the registered sink, if any.
    pub fn emit(&self, event: DeviceEvent) {
        let sink = self.inner.sink.lock().clone();
        if let Some(sink) = sink {
            sink.on_event(event);
        }
    }
}

impl fmt::Debug for Device {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Device")
            .field("label", &self.inner.label)
            .field("state", &self.state())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex as PlMutex;

    struct Recorder(PlMutex<Vec<DeviceEvent>>);

    impl EventSink for Recorder {
        fn on_event(&self, event: DeviceEvent) {
            self.0.lock().push(event);
        }
    }

    #[test]
    fn test_state_ordering() {
        assert!(ConnectionState::Disconnected < ConnectionState::Connecting);
        assert!(ConnectionState::WaitingForReconnect < ConnectionState::Connecting);
        assert!(ConnectionState::Connected < ConnectionState::Initialized);
        assert!(ConnectionState::Authenticating > ConnectionState::Connected);
    }

    #[test]
    fn test_state_change_notifies_sink() {
        let device = Device::new("test-band");
        let recorder = Arc::new(Recorder(PlMutex::new(Vec::new())));
        device.set_event_sink(recorder.clone());

        device.set_state(ConnectionState::Connecting);
        device.set_state(ConnectionState::Connecting); // no-op
        device.set_state(ConnectionState::Connected);

        let events = recorder.0.lock();
        assert_eq!(events.len(), 2);
        assert!(matches!(
            events[0],
            DeviceEvent::StateChanged(ConnectionState::Connecting)
        ));
        assert!(matches!(
            events[1],
            DeviceEvent::StateChanged(ConnectionState::Connected)
        ));
    }

    #[test]
    fn test_busy_task_roundtrip() {
        let device = Device::new("test-band");
        assert_eq!(device.busy_task(), None);

        device.set_busy_task(Some("syncing activity data".into()));
        assert_eq!(device.busy_task().as_deref(), Some("syncing activity data"));

        device.set_busy_task(None);
        assert_eq!(device.busy_task(), None);
    }

    #[test]
    fn test_is_connected_thresholds() {
        let device = Device::new("test-band");
        assert!(!device.is_connected());

        device.set_state(ConnectionState::Connecting);
        assert!(!device.is_connected());

        device.set_state(ConnectionState::Connected);
        assert!(device.is_connected());
        assert!(!device.is_initialized());

        device.set_state(ConnectionState::Initialized);
        assert!(device.is_initialized());
    }
}
