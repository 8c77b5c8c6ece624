//! The command queue: connection lifecycle and the two per-connection
//! threads.
//!
//! One dedicated reader thread runs the blocking read loop; one
//! dedicated writer thread executes connect requests and transactions
//! strictly in order. Callers only enqueue work and never touch the
//! transport directly. The transport handle needs no lock of its own:
//! only the writer writes to it and only the reader reads from it.

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info, warn};

use crate::core::{DEFAULT_READ_BUFFER_SIZE, SocketCallback, Transport, TransportHandle};
use crate::device::{ConnectionState, Device};

use super::transaction::Transaction;

static THREAD_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Work accepted by the writer thread.
enum Job {
    /// Open the transport and start the reader.
    Connect,
    /// Execute one transaction's actions in order.
    Perform(Transaction),
}

/// Condvar-guarded work state shared with the writer thread.
///
/// A connect request is a flag rather than a queue entry, which is what
/// makes it preempt every buffered transaction. Transactions stay in
/// the deque while the link is down, so work queued before a connect
/// stalls instead of being dropped.
#[derive(Default)]
struct WorkState {
    connect_requested: bool,
    transactions: VecDeque<Transaction>,
    link_up: bool,
    closed: bool,
}

struct WorkQueue {
    state: Mutex<WorkState>,
    available: Condvar,
}

impl WorkQueue {
    fn new() -> Self {
        Self {
            state: Mutex::new(WorkState::default()),
            available: Condvar::new(),
        }
    }

    fn push(&self, transaction: Transaction) {
        let mut state = self.state.lock();
        if state.closed {
            warn!(task = %transaction.name(), "work queue closed, dropping transaction");
            return;
        }
        state.transactions.push_back(transaction);
        self.available.notify_all();
    }

    fn push_front(&self, transaction: Transaction) {
        let mut state = self.state.lock();
        state.transactions.push_front(transaction);
        self.available.notify_all();
    }

    fn request_connect(&self) {
        let mut state = self.state.lock();
        state.connect_requested = true;
        self.available.notify_all();
    }

    fn cancel_connect(&self) {
        self.state.lock().connect_requested = false;
    }

    fn set_link_up(&self, up: bool) {
        let mut state = self.state.lock();
        state.link_up = up;
        self.available.notify_all();
    }

    fn close(&self) {
        let mut state = self.state.lock();
        state.closed = true;
        self.available.notify_all();
    }

    /// Block until there is work the writer may run, or the queue
    /// closed. Connect requests take priority; transactions are only
    /// handed out while the link is up.
    fn next_job(&self) -> Option<Job> {
        let mut state = self.state.lock();
        loop {
            if state.closed {
                return None;
            }
            if state.connect_requested {
                state.connect_requested = false;
                return Some(Job::Connect);
            }
            if state.link_up {
                if let Some(transaction) = state.transactions.pop_front() {
                    return Some(Job::Perform(transaction));
                }
            }
            self.available.wait(&mut state);
        }
    }
}

/// The connection/command-queue engine for one device.
///
/// Owns the transport connection exclusively and serializes every
/// interaction with it through its writer thread. See the module docs
/// for the thread model.
///
/// Dropping the queue disposes it.
pub struct CommandQueue<T: Transport> {
    inner: Arc<QueueInner<T>>,
}

struct QueueInner<T: Transport> {
    transport: T,
    device: Device,
    auto_reconnect: bool,
    read_buffer_size: usize,

    /// Serializes connect/disconnect/dispose against each other.
    api_lock: Mutex<()>,
    disposed: AtomicBool,
    /// Set by `disconnect` so the reader ends in `Disconnected` instead
    /// of `WaitingForReconnect`.
    halt: AtomicBool,

    callback: Mutex<Option<Arc<dyn SocketCallback>>>,
    work: WorkQueue,
    handle: Mutex<Option<Arc<T::Handle>>>,
    reader: Mutex<Option<JoinHandle<()>>>,
    writer: Mutex<Option<JoinHandle<()>>>,
}

impl<T: Transport> CommandQueue<T> {
    /// Create the queue and start its writer thread.
    ///
    /// No connection is attempted until [`CommandQueue::connect`].
    pub fn new(transport: T, device: Device, auto_reconnect: bool) -> Self {
        Self::with_read_buffer_size(transport, device, auto_reconnect, DEFAULT_READ_BUFFER_SIZE)
    }

    /// Like [`CommandQueue::new`] with an explicit read buffer size.
    pub fn with_read_buffer_size(
        transport: T,
        device: Device,
        auto_reconnect: bool,
        read_buffer_size: usize,
    ) -> Self {
        let inner = Arc::new(QueueInner {
            transport,
            device,
            auto_reconnect,
            read_buffer_size,
            api_lock: Mutex::new(()),
            disposed: AtomicBool::new(false),
            halt: AtomicBool::new(false),
            callback: Mutex::new(None),
            work: WorkQueue::new(),
            handle: Mutex::new(None),
            reader: Mutex::new(None),
            writer: Mutex::new(None),
        });

        let writer_inner = Arc::clone(&inner);
        let name = format!("tether-write-{}", THREAD_COUNTER.fetch_add(1, Ordering::Relaxed));
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || writer_inner.run_writer())
            .expect("failed to spawn writer thread");
        *inner.writer.lock() = Some(join);

        Self { inner }
    }

    /// Register the byte-sink receiving reads and lifecycle callbacks,
    /// replacing any previous one. Must be called before `connect` for
    /// the sink to observe the whole connection.
    pub fn set_callback(&self, callback: Arc<dyn SocketCallback>) {
        *self.inner.callback.lock() = Some(callback);
    }

    /// Drop the registered callback. Breaks the reference cycle when
    /// the callback itself owns this queue.
    pub(crate) fn clear_callback(&self) {
        *self.inner.callback.lock() = None;
    }

    /// The device record this queue drives.
    pub fn device(&self) -> &Device {
        &self.inner.device
    }

    /// Schedule a connection attempt.
    ///
    /// Returns `true` iff the attempt was scheduled. Idempotent while a
    /// connection exists or is establishing: a second call returns
    /// `false` without side effects, as does any call after `dispose`.
    /// The connect message preempts transactions already buffered for
    /// the writer.
    pub fn connect(&self) -> bool {
        let _guard = self.inner.api_lock.lock();

        if self.inner.disposed.load(Ordering::SeqCst) {
            error!(device = %self.inner.device.label(), "connect ignored, queue already disposed");
            return false;
        }
        let state = self.inner.device.state();
        if state >= ConnectionState::Connecting {
            warn!(device = %self.inner.device.label(), %state, "connect ignored");
            return false;
        }
        if self.inner.handle.lock().is_some() {
            warn!(device = %self.inner.device.label(), "connect ignored, handle still open");
            return false;
        }

        info!(device = %self.inner.device.label(), "attempting to connect");
        self.inner.halt.store(false, Ordering::SeqCst);
        self.inner.device.set_state(ConnectionState::Connecting);
        self.inner.work.request_connect();
        true
    }

    /// Hand a finalized transaction to the writer.
    ///
    /// Empty transactions are ignored. Transactions queued while
    /// disconnected stall until a connect succeeds.
    pub fn add(&self, transaction: Transaction) {
        if transaction.is_empty() {
            debug!(task = %transaction.name(), "ignoring empty transaction");
            return;
        }
        if self.inner.disposed.load(Ordering::SeqCst) {
            warn!(task = %transaction.name(), "queue disposed, dropping transaction");
            return;
        }
        debug!(task = %transaction.name(), actions = transaction.len(), "queueing transaction");
        self.inner.work.push(transaction);
    }

    /// Whether a live transport connection exists right now.
    pub fn is_connected(&self) -> bool {
        self.inner.device.is_connected() && self.inner.handle.lock().is_some()
    }

    /// Close the connection and stop the reader thread.
    ///
    /// The writer thread stays alive so `connect` can be called again;
    /// transactions still buffered stall until then.
    pub fn disconnect(&self) {
        {
            let _guard = self.inner.api_lock.lock();
            info!(device = %self.inner.device.label(), "disconnecting");

            self.inner.halt.store(true, Ordering::SeqCst);
            self.inner.work.cancel_connect();
            self.inner.work.set_link_up(false);
            self.inner.cleanup();
            self.inner.device.set_state(ConnectionState::Disconnected);
        }
        // Joined outside the api lock: the exiting reader may be inside
        // a callback that itself calls back into this queue.
        self.inner.join_reader();
    }

    /// Tear the queue down: disconnect, stop both threads.
    ///
    /// Idempotent; repeated calls are logged and ignored.
    pub fn dispose(&self) {
        if self.inner.disposed.swap(true, Ordering::SeqCst) {
            warn!(device = %self.inner.device.label(), "dispose() was called repeatedly");
            return;
        }
        debug!(device = %self.inner.device.label(), "disposing queue");
        self.disconnect();
        self.inner.work.close();
        self.inner.join_writer();
    }
}

impl<T: Transport> Drop for CommandQueue<T> {
    fn drop(&mut self) {
        if !self.inner.disposed.load(Ordering::SeqCst) {
            self.dispose();
        }
    }
}

impl<T: Transport> QueueInner<T> {
    /// Writer thread main loop.
    fn run_writer(self: Arc<Self>) {
        debug!("write thread started");
        while let Some(job) = self.work.next_job() {
            match job {
                Job::Connect => self.handle_connect(),
                Job::Perform(transaction) => self.handle_transaction(transaction),
            }
        }
        debug!("write thread finished");
    }

    fn handle_connect(self: &Arc<Self>) {
        match self.transport.connect() {
            Ok(handle) => {
                if self.disposed.load(Ordering::SeqCst) || self.halt.load(Ordering::SeqCst) {
                    warn!("connection established during teardown, closing");
                    handle.close();
                    self.device.set_state(ConnectionState::Disconnected);
                    return;
                }

                let handle = Arc::new(handle);
                *self.handle.lock() = Some(Arc::clone(&handle));
                info!(device = %self.device.label(), "connected");
                self.device.set_state(ConnectionState::Connected);
                self.work.set_link_up(true);
                self.spawn_reader(handle);

                let callback = self.callback.lock().clone();
                if let Some(callback) = callback {
                    callback.on_connection_established();
                }
            }
            Err(err) => {
                error!(device = %self.device.label(), %err, "i/o error while establishing connection");
                self.cleanup();
                self.device.set_state(self.loop_exit_state());
            }
        }
    }

    fn handle_transaction(self: &Arc<Self>, transaction: Transaction) {
        let handle = self.handle.lock().clone();
        let Some(handle) = handle else {
            debug!(task = %transaction.name(), "link went down, stalling transaction");
            self.work.push_front(transaction);
            return;
        };

        let name = transaction.name().to_owned();
        debug!(task = %name, "executing transaction");
        let (actions, on_complete) = transaction.into_parts();
        let mut completed = true;
        for action in actions {
            debug!(task = %name, %action, "about to run action");
            match action.execute(handle.as_ref(), &self.device) {
                Ok(true) => {}
                Ok(false) => {
                    error!(task = %name, "action returned false, cancelling remaining actions");
                    completed = false;
                    break;
                }
                Err(err) => {
                    error!(task = %name, %err, "action failed, cancelling remaining actions");
                    completed = false;
                    break;
                }
            }
        }
        if let Some(callback) = on_complete {
            callback(completed);
        }
    }

    /// Reader thread main loop: blocking read, forward, repeat.
    fn read_loop(self: Arc<Self>, handle: Arc<T::Handle>) {
        debug!("read thread started, entering loop");
        let mut buffer = vec![0u8; self.read_buffer_size];

        loop {
            if self.disposed.load(Ordering::SeqCst) || self.halt.load(Ordering::SeqCst) {
                break;
            }
            let n = match handle.read(&mut buffer) {
                Ok(0) => {
                    debug!("end of stream, leaving read loop");
                    break;
                }
                Ok(n) => n,
                Err(err) => {
                    error!(%err, "i/o error while reading, leaving read loop");
                    break;
                }
            };

            debug!(bytes = n, data = %hex::encode(&buffer[..n]), "received");
            let callback = self.callback.lock().clone();
            if let Some(callback) = callback {
                callback.on_socket_read(&buffer[..n]);
            }
        }

        // Handle must be gone before the new state is published, so a
        // concurrent is_connected() never observes a stale open handle.
        self.work.set_link_up(false);
        self.cleanup();
        let exit_state = self.loop_exit_state();
        debug!(%exit_state, "left read loop");
        self.device.set_state(exit_state);
        debug!("read thread finished");
    }

    fn spawn_reader(self: &Arc<Self>, handle: Arc<T::Handle>) {
        let name = format!("tether-read-{}", THREAD_COUNTER.fetch_add(1, Ordering::Relaxed));
        let reader_inner = Arc::clone(self);
        let join = thread::Builder::new()
            .name(name)
            .spawn(move || reader_inner.read_loop(handle))
            .expect("failed to spawn reader thread");
        *self.reader.lock() = Some(join);
    }

    /// State to publish when a connection attempt or the read loop
    /// ends, per the auto-reconnect policy.
    fn loop_exit_state(&self) -> ConnectionState {
        let wants_reconnect = self.auto_reconnect
            && !self.disposed.load(Ordering::SeqCst)
            && !self.halt.load(Ordering::SeqCst);
        if wants_reconnect {
            ConnectionState::WaitingForReconnect
        } else {
            ConnectionState::Disconnected
        }
    }

    /// Close and drop the transport handle, if any.
    fn cleanup(&self) {
        if let Some(handle) = self.handle.lock().take() {
            handle.close();
        }
    }

    fn join_reader(&self) {
        let join = self.reader.lock().take();
        if let Some(join) = join {
            if join.thread().id() == thread::current().id() {
                // disconnect() requested from the reader's own callback
                // chain; the loop is about to exit on its own.
                return;
            }
            if join.join().is_err() {
                error!("reader thread panicked");
            }
        }
    }

    fn join_writer(&self) {
        let join = self.writer.lock().take();
        if let Some(join) = join {
            if join.thread().id() == thread::current().id() {
                return;
            }
            if join.join().is_err() {
                error!("writer thread panicked");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::queue::TransactionBuilder;
    use crate::testing::{MockLink, wait_for};
    use std::time::{Duration, Instant};

    fn connected_queue() -> (CommandQueue<MockLink>, crate::testing::RemoteEnd) {
        let (transport, remote) = MockLink::pair();
        let queue = CommandQueue::new(transport, Device::new("test-band"), false);
        assert!(queue.connect());
        assert!(wait_for(Duration::from_secs(2), || queue.is_connected()));
        (queue, remote)
    }

    #[test]
    fn test_connect_is_idempotent() {
        let (transport, _remote) = MockLink::pair();
        let queue = CommandQueue::new(transport, Device::new("test-band"), false);

        assert!(queue.connect());
        assert!(!queue.connect());

        assert!(wait_for(Duration::from_secs(2), || queue.is_connected()));
        assert!(!queue.connect());
        queue.dispose();
    }

    #[test]
    fn test_connect_after_dispose_is_refused() {
        let (transport, _remote) = MockLink::pair();
        let queue = CommandQueue::new(transport, Device::new("test-band"), false);
        queue.dispose();
        assert!(!queue.connect());
    }

    #[test]
    fn test_connect_failure_reverts_state() {
        let (transport, _remote) = MockLink::pair();
        transport.fail_next_connect();
        let queue = CommandQueue::new(transport, Device::new("test-band"), false);

        assert!(queue.connect());
        assert!(wait_for(Duration::from_secs(2), || {
            queue.device().state() == ConnectionState::Disconnected
        }));
        assert!(!queue.is_connected());
        queue.dispose();
    }

    #[test]
    fn test_connect_failure_with_reconnect_policy() {
        let (transport, _remote) = MockLink::pair();
        transport.fail_next_connect();
        let queue = CommandQueue::new(transport, Device::new("test-band"), true);

        assert!(queue.connect());
        assert!(wait_for(Duration::from_secs(2), || {
            queue.device().state() == ConnectionState::WaitingForReconnect
        }));

        // the reconnect cycle allows another attempt
        assert!(queue.connect());
        assert!(wait_for(Duration::from_secs(2), || queue.is_connected()));
        queue.dispose();
    }

    #[test]
    fn test_transactions_stall_until_connected() {
        let (transport, remote) = MockLink::pair();
        let queue = CommandQueue::new(transport, Device::new("test-band"), false);

        TransactionBuilder::new("stalled")
            .write([0xAA])
            .wait(Duration::from_millis(50))
            .write([0xBB])
            .queue(&queue);

        std::thread::sleep(Duration::from_millis(100));
        assert!(remote.take_written().is_empty());

        assert!(queue.connect());
        let written = remote.wait_written(2, Duration::from_secs(2));
        assert_eq!(written.len(), 2);
        assert_eq!(written[0].1, vec![0xAA]);
        assert_eq!(written[1].1, vec![0xBB]);
        assert!(written[1].0.duration_since(written[0].0) >= Duration::from_millis(50));
        queue.dispose();
    }

    #[test]
    fn test_transactions_fifo_and_never_interleaved() {
        let (queue, remote) = connected_queue();
        let queue = std::sync::Arc::new(queue);

        const PRODUCERS: u8 = 4;
        const PER_PRODUCER: u8 = 20;

        let mut producers = Vec::new();
        for producer in 0..PRODUCERS {
            let queue = Arc::clone(&queue);
            producers.push(std::thread::spawn(move || {
                for seq in 0..PER_PRODUCER {
                    TransactionBuilder::new("fifo")
                        .write([producer, seq, 0])
                        .write([producer, seq, 1])
                        .write([producer, seq, 2])
                        .queue(&queue);
                }
            }));
        }
        for producer in producers {
            producer.join().unwrap();
        }

        let total = PRODUCERS as usize * PER_PRODUCER as usize * 3;
        let written = remote.wait_written(total, Duration::from_secs(5));
        assert_eq!(written.len(), total);

        // actions of one transaction are never interleaved
        for chunk in written.chunks(3) {
            assert_eq!(chunk[0].1[0], chunk[1].1[0]);
            assert_eq!(chunk[0].1[1], chunk[1].1[1]);
            assert_eq!(chunk[0].1[0], chunk[2].1[0]);
            assert_eq!(chunk[0].1[1], chunk[2].1[1]);
            assert_eq!(chunk[0].1[2], 0);
            assert_eq!(chunk[1].1[2], 1);
            assert_eq!(chunk[2].1[2], 2);
        }

        // per producer, transactions execute in queueing order
        for producer in 0..PRODUCERS {
            let sequence: Vec<u8> = written
                .iter()
                .filter(|(_, bytes)| bytes[0] == producer && bytes[2] == 0)
                .map(|(_, bytes)| bytes[1])
                .collect();
            let expected: Vec<u8> = (0..PER_PRODUCER).collect();
            assert_eq!(sequence, expected);
        }

        queue.dispose();
    }

    #[test]
    fn test_empty_transaction_is_ignored() {
        let (queue, remote) = connected_queue();
        TransactionBuilder::new("empty").queue(&queue);
        TransactionBuilder::new("marker").write([0x01]).queue(&queue);
        let written = remote.wait_written(1, Duration::from_secs(2));
        assert_eq!(written.len(), 1);
        queue.dispose();
    }

    #[test]
    fn test_failed_action_abandons_rest_of_transaction() {
        let (queue, remote) = connected_queue();

        let (done_tx, done_rx) = std::sync::mpsc::channel();
        TransactionBuilder::new("vetoed")
            .write([0x01])
            .run_checked(|| false)
            .write([0x02])
            .on_complete(move |ok| done_tx.send(ok).unwrap())
            .queue(&queue);
        TransactionBuilder::new("after")
            .write([0x03])
            .queue(&queue);

        assert_eq!(done_rx.recv_timeout(Duration::from_secs(2)), Ok(false));
        let written = remote.wait_written(2, Duration::from_secs(2));
        assert_eq!(written[0].1, vec![0x01]);
        // 0x02 skipped; queue continues with the next transaction
        assert_eq!(written[1].1, vec![0x03]);
        queue.dispose();
    }

    #[test]
    fn test_dispose_is_idempotent_and_stops_threads() {
        let (queue, _remote) = connected_queue();
        queue.dispose();
        queue.dispose(); // logged no-op

        assert!(!queue.is_connected());
        assert_eq!(queue.device().state(), ConnectionState::Disconnected);
        assert!(queue.inner.reader.lock().is_none());
        assert!(queue.inner.writer.lock().is_none());
    }

    #[test]
    fn test_remote_close_without_reconnect() {
        let (queue, remote) = connected_queue();
        remote.close();
        assert!(wait_for(Duration::from_secs(2), || {
            queue.device().state() == ConnectionState::Disconnected
        }));
        assert!(!queue.is_connected());
        queue.dispose();
    }

    #[test]
    fn test_remote_close_with_reconnect_policy() {
        let (transport, remote) = MockLink::pair();
        let queue = CommandQueue::new(transport, Device::new("test-band"), true);
        assert!(queue.connect());
        assert!(wait_for(Duration::from_secs(2), || queue.is_connected()));

        remote.close();
        assert!(wait_for(Duration::from_secs(2), || {
            queue.device().state() == ConnectionState::WaitingForReconnect
        }));
        queue.dispose();
    }

    #[test]
    fn test_reader_forwards_bytes_in_order() {
        use parking_lot::Mutex as PlMutex;

        struct Collector(PlMutex<Vec<Vec<u8>>>);
        impl SocketCallback for Collector {
            fn on_socket_read(&self, data: &[u8]) {
                self.0.lock().push(data.to_vec());
            }
            fn on_connection_established(&self) {}
        }

        let (transport, remote) = MockLink::pair();
        let queue = CommandQueue::new(transport, Device::new("test-band"), false);
        let collector = Arc::new(Collector(PlMutex::new(Vec::new())));
        queue.set_callback(collector.clone());

        assert!(queue.connect());
        assert!(wait_for(Duration::from_secs(2), || queue.is_connected()));

        remote.push_read(vec![0x01, 0x02]);
        remote.push_read(vec![0x03]);
        remote.push_read(vec![0x04, 0x05, 0x06]);

        assert!(wait_for(Duration::from_secs(2), || {
            collector.0.lock().len() == 3
        }));
        let reads = collector.0.lock().clone();
        assert_eq!(reads, vec![vec![0x01, 0x02], vec![0x03], vec![0x04, 0x05, 0x06]]);
        queue.dispose();
    }

    #[test]
    fn test_wait_does_not_block_reader() {
        use parking_lot::Mutex as PlMutex;

        struct Stamps(PlMutex<Vec<Instant>>);
        impl SocketCallback for Stamps {
            fn on_socket_read(&self, _data: &[u8]) {
                self.0.lock().push(Instant::now());
            }
            fn on_connection_established(&self) {}
        }

        let (transport, remote) = MockLink::pair();
        let queue = CommandQueue::new(transport, Device::new("test-band"), false);
        let stamps = Arc::new(Stamps(PlMutex::new(Vec::new())));
        queue.set_callback(stamps.clone());
        assert!(queue.connect());
        assert!(wait_for(Duration::from_secs(2), || queue.is_connected()));

        TransactionBuilder::new("long wait")
            .wait(Duration::from_millis(300))
            .queue(&queue);
        std::thread::sleep(Duration::from_millis(50));
        let sent_at = Instant::now();
        remote.push_read(vec![0xFF]);

        assert!(wait_for(Duration::from_secs(2), || {
            !stamps.0.lock().is_empty()
        }));
        let received_at = stamps.0.lock()[0];
        // delivered while the writer was still sleeping
        assert!(received_at.duration_since(sent_at) < Duration::from_millis(200));
        queue.dispose();
    }
}
