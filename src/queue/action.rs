//! Primitive operations executed by the writer thread.

use std::fmt;
use std::io;
use std::thread;
use std::time::Duration;

use crate::core::TransportHandle;
use crate::device::{ConnectionState, Device, DeviceEvent};

/// One primitive operation inside a [`Transaction`](super::Transaction).
///
/// Actions are immutable once constructed and owned exclusively by
/// their transaction. The writer thread executes them with a single
/// exhaustive match; an action that fails (returns `false` or errors)
/// aborts the remaining actions of its transaction, but the queue
/// itself keeps processing subsequent transactions.
pub enum Action {
    /// Write bytes to the transport as one link-layer unit.
    Write(Vec<u8>),
    /// Sleep the writer thread. Never blocks the reader.
    Wait(Duration),
    /// Publish a new connection state.
    SetConnectionState(ConnectionState),
    /// Set or clear the device-busy label.
    SetBusyTask(Option<String>),
    /// Report progress of a long-running operation.
    SetProgress {
        /// Human-readable description of the operation.
        label: String,
        /// Whether the operation is still running.
        ongoing: bool,
        /// Completion percentage, 0..=100.
        percent: u8,
    },
    /// Run a check; `false` aborts the rest of the transaction.
    Predicate(Box<dyn FnOnce() -> bool + Send>),
    /// Run a side effect; always succeeds.
    SideEffect(Box<dyn FnOnce() + Send>),
}

impl Action {
    /// Execute the action on the writer thread.
    ///
    /// Returns `Ok(true)` on success, `Ok(false)` when a predicate
    /// vetoed the transaction, and `Err` on transport failure.
    pub(crate) fn execute<H: TransportHandle>(
        self,
        handle: &H,
        device: &Device,
    ) -> io::Result<bool> {
        match self {
            Self::Write(bytes) => {
                handle.write(&bytes)?;
                Ok(true)
            }
            Self::Wait(duration) => {
                thread::sleep(duration);
                Ok(true)
            }
            Self::SetConnectionState(state) => {
                device.set_state(state);
                Ok(true)
            }
            Self::SetBusyTask(label) => {
                device.set_busy_task(label);
                Ok(true)
            }
            Self::SetProgress {
                label,
                ongoing,
                percent,
            } => {
                device.emit(DeviceEvent::Progress {
                    label,
                    ongoing,
                    percent,
                });
                Ok(true)
            }
            Self::Predicate(check) => Ok(check()),
            Self::SideEffect(effect) => {
                effect();
                Ok(true)
            }
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Write(bytes) => write!(f, "Write({} bytes)", bytes.len()),
            Self::Wait(duration) => write!(f, "Wait({duration:?})"),
            Self::SetConnectionState(state) => write!(f, "SetConnectionState({state})"),
            Self::SetBusyTask(Some(label)) => write!(f, "SetBusyTask({label})"),
            Self::SetBusyTask(None) => f.write_str("SetBusyTask(none)"),
            Self::SetProgress {
                label, percent, ..
            } => write!(f, "SetProgress({label}, {percent}%)"),
            Self::Predicate(_) => f.write_str("Predicate"),
            Self::SideEffect(_) => f.write_str("SideEffect"),
        }
    }
}

impl fmt::Debug for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Display::fmt(self, f)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::MockLink;
    use std::time::Instant;

    #[test]
    fn test_write_action_reaches_transport() {
        let (transport, remote) = MockLink::pair();
        let handle = transport.connect_now();
        let device = Device::new("test-band");

        let ok = Action::Write(vec![0xAA, 0xBB])
            .execute(&handle, &device)
            .unwrap();
        assert!(ok);
        assert_eq!(remote.take_written(), vec![vec![0xAA, 0xBB]]);
    }

    #[test]
    fn test_wait_action_sleeps() {
        let (transport, _remote) = MockLink::pair();
        let handle = transport.connect_now();
        let device = Device::new("test-band");

        let start = Instant::now();
        Action::Wait(Duration::from_millis(30))
            .execute(&handle, &device)
            .unwrap();
        assert!(start.elapsed() >= Duration::from_millis(30));
    }

    #[test]
    fn test_predicate_veto() {
        let (transport, _remote) = MockLink::pair();
        let handle = transport.connect_now();
        let device = Device::new("test-band");

        let ok = Action::Predicate(Box::new(|| false))
            .execute(&handle, &device)
            .unwrap();
        assert!(!ok);
    }

    #[test]
    fn test_set_state_action_updates_device() {
        let (transport, _remote) = MockLink::pair();
        let handle = transport.connect_now();
        let device = Device::new("test-band");

        Action::SetConnectionState(ConnectionState::Initializing)
            .execute(&handle, &device)
            .unwrap();
        assert_eq!(device.state(), ConnectionState::Initializing);
    }
}
