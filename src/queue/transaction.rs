//! Transactions: ordered, atomically-scheduled groups of actions.

use std::fmt;
use std::time::Duration;

use tracing::debug;

use crate::core::{QueueError, Transport};
use crate::device::ConnectionState;

use super::action::Action;
use super::command_queue::CommandQueue;

/// An ordered, named list of [`Action`]s; the atomic unit of scheduling.
///
/// Built through a [`TransactionBuilder`] and frozen once queued. The
/// name only serves diagnostics and appears in every log line about the
/// transaction's execution.
pub struct Transaction {
    name: String,
    actions: Vec<Action>,
    on_complete: Option<Box<dyn FnOnce(bool) + Send>>,
}

impl Transaction {
    pub(crate) fn new(name: String) -> Self {
        Self {
            name,
            actions: Vec::new(),
            on_complete: None,
        }
    }

    /// Diagnostic task name.
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Whether the transaction holds no actions. Empty transactions are
    /// never queued.
    pub fn is_empty(&self) -> bool {
        self.actions.is_empty()
    }

    /// Number of actions.
    pub fn len(&self) -> usize {
        self.actions.len()
    }

    pub(crate) fn push(&mut self, action: Action) {
        self.actions.push(action);
    }

    pub(crate) fn set_on_complete(&mut self, callback: Box<dyn FnOnce(bool) + Send>) {
        self.on_complete = Some(callback);
    }

    pub(crate) fn into_parts(self) -> (Vec<Action>, Option<Box<dyn FnOnce(bool) + Send>>) {
        (self.actions, self.on_complete)
    }
}

impl fmt::Debug for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Transaction")
            .field("name", &self.name)
            .field("actions", &self.actions)
            .finish()
    }
}

/// Chainable builder for [`Transaction`]s.
///
/// `queue` and `queue_if_connected` consume the builder, so queueing the
/// same transaction twice is a compile error rather than a runtime bug.
///
/// # Example
///
/// ```ignore
/// TransactionBuilder::new("set alarm")
///     .write([0x02, 0x01])
///     .wait(Duration::from_millis(50))
///     .write([0x02, 0x02])
///     .queue(&queue);
/// ```
pub struct TransactionBuilder {
    transaction: Transaction,
}

impl TransactionBuilder {
    /// Start a transaction with a diagnostic task name.
    pub fn new(task_name: impl Into<String>) -> Self {
        Self {
            transaction: Transaction::new(task_name.into()),
        }
    }

    /// Append a write of `bytes` to the transport.
    pub fn write(self, bytes: impl Into<Vec<u8>>) -> Self {
        self.add_action(Action::Write(bytes.into()))
    }

    /// Append a sleep of the writer thread.
    ///
    /// This is usually a bad idea under load, since the writer cannot
    /// process other transactions during the sleep, but some device
    /// protocols require an inter-command delay. The reader thread is
    /// never affected.
    pub fn wait(self, duration: Duration) -> Self {
        self.add_action(Action::Wait(duration))
    }

    /// Append a connection-state transition.
    pub fn set_connection_state(self, state: ConnectionState) -> Self {
        self.add_action(Action::SetConnectionState(state))
    }

    /// Append a busy-task change; `None` clears the label.
    pub fn set_busy_task(self, label: Option<String>) -> Self {
        self.add_action(Action::SetBusyTask(label))
    }

    /// Append a progress report.
    pub fn set_progress(self, label: impl Into<String>, ongoing: bool, percent: u8) -> Self {
        self.add_action(Action::SetProgress {
            label: label.into(),
            ongoing,
            percent,
        })
    }

    /// Append a check; the transaction is aborted if it returns `false`.
    pub fn run_checked(self, check: impl FnOnce() -> bool + Send + 'static) -> Self {
        self.add_action(Action::Predicate(Box::new(check)))
    }

    /// Append a side effect.
    pub fn run(self, effect: impl FnOnce() + Send + 'static) -> Self {
        self.add_action(Action::SideEffect(Box::new(effect)))
    }

    /// Append a custom action.
    pub fn add_action(mut self, action: Action) -> Self {
        self.transaction.push(action);
        self
    }

    /// Register a callback invoked after the transaction executed, with
    /// `true` iff every action ran successfully.
    pub fn on_complete(mut self, callback: impl FnOnce(bool) + Send + 'static) -> Self {
        self.transaction.set_on_complete(Box::new(callback));
        self
    }

    /// Diagnostic task name.
    pub fn task_name(&self) -> &str {
        self.transaction.name()
    }

    /// Finalize the transaction and hand it to the queue.
    ///
    /// Consumes the builder: ownership moves to the queue exactly once.
    pub fn queue<T: Transport>(self, queue: &CommandQueue<T>) {
        queue.add(self.transaction);
    }

    /// Ensure the device is connected, then queue the transaction.
    ///
    /// If no connection exists, a connect attempt is scheduled first;
    /// the connect message always runs before the queued transaction.
    /// Fails if the attempt could not be scheduled (already disposed,
    /// or a conflicting attempt raced this one).
    pub fn queue_if_connected<T: Transport>(
        self,
        queue: &CommandQueue<T>,
    ) -> Result<(), QueueError> {
        if !queue.is_connected() {
            debug!(task = %self.transaction.name(), "not connected, scheduling connect first");
            if !queue.connect() {
                return Err(QueueError::ConnectRejected);
            }
        }
        self.queue(queue);
        Ok(())
    }

    /// Consume the builder and return the raw transaction.
    pub fn build(self) -> Transaction {
        self.transaction
    }
}
