//! In-memory paired transport for tests.
//!
//! [`MockLink`] plays the host side handed to the queue; [`RemoteEnd`]
//! plays the device, letting tests inject reads and inspect writes.
//! Reads are frame-preserving (one injected frame per `read` call) and
//! `close` unblocks a blocked reader, matching the contract real
//! transports must provide.

use std::collections::VecDeque;
use std::io;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::core::{Transport, TransportHandle};

struct LinkState {
    /// Frames queued for the host to read (device → host).
    inbound: VecDeque<Vec<u8>>,
    /// Frames the host wrote (host → device), with write timestamps.
    written: Vec<(Instant, Vec<u8>)>,
    closed: bool,
}

struct LinkShared {
    state: Mutex<LinkState>,
    signal: Condvar,
    fail_next_connect: AtomicBool,
}

/// Host side: implements [`Transport`] for the queue under test.
pub(crate) struct MockLink {
    shared: Arc<LinkShared>,
}

/// Device side: inject reads, inspect writes, drop the link.
pub(crate) struct RemoteEnd {
    shared: Arc<LinkShared>,
}

/// A live mock connection.
pub(crate) struct MockHandle {
    shared: Arc<LinkShared>,
}

impl MockLink {
    pub(crate) fn pair() -> (Self, RemoteEnd) {
        let shared = Arc::new(LinkShared {
            state: Mutex::new(LinkState {
                inbound: VecDeque::new(),
                written: Vec::new(),
                closed: false,
            }),
            signal: Condvar::new(),
            fail_next_connect: AtomicBool::new(false),
        });
        (
            Self {
                shared: Arc::clone(&shared),
            },
            RemoteEnd { shared },
        )
    }

    /// Make the next `connect` call fail with `ConnectionRefused`.
    pub(crate) fn fail_next_connect(&self) {
        self.shared.fail_next_connect.store(true, Ordering::SeqCst);
    }

    /// Connect immediately, for tests that drive a handle directly.
    pub(crate) fn connect_now(&self) -> MockHandle {
        self.connect().unwrap()
    }
}

impl Transport for MockLink {
    type Handle = MockHandle;

    fn connect(&self) -> io::Result<Self::Handle> {
        if self.shared.fail_next_connect.swap(false, Ordering::SeqCst) {
            return Err(io::Error::new(
                io::ErrorKind::ConnectionRefused,
                "mock link refused",
            ));
        }
        self.shared.state.lock().closed = false;
        Ok(MockHandle {
            shared: Arc::clone(&self.shared),
        })
    }
}

impl TransportHandle for MockHandle {
    fn read(&self, buf: &mut [u8]) -> io::Result<usize> {
        let mut state = self.shared.state.lock();
        loop {
            if let Some(frame) = state.inbound.pop_front() {
                let n = frame.len().min(buf.len());
                buf[..n].copy_from_slice(&frame[..n]);
                return Ok(n);
            }
            if state.closed {
                return Ok(0);
            }
            self.shared.signal.wait(&mut state);
        }
    }

    fn write(&self, bytes: &[u8]) -> io::Result<()> {
        let mut state = self.shared.state.lock();
        if state.closed {
            return Err(io::Error::new(io::ErrorKind::BrokenPipe, "mock link closed"));
        }
        state.written.push((Instant::now(), bytes.to_vec()));
        self.shared.signal.notify_all();
        Ok(())
    }

    fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.signal.notify_all();
    }
}

impl RemoteEnd {
    /// Queue a frame for the host's next read.
    pub(crate) fn push_read(&self, frame: Vec<u8>) {
        let mut state = self.shared.state.lock();
        state.inbound.push_back(frame);
        self.shared.signal.notify_all();
    }

    /// Drain everything the host wrote so far.
    pub(crate) fn take_written(&self) -> Vec<Vec<u8>> {
        let mut state = self.shared.state.lock();
        state.written.drain(..).map(|(_, bytes)| bytes).collect()
    }

    /// Wait until the host has written at least `n` frames in total and
    /// return them (with timestamps). Returns whatever arrived if the
    /// timeout expires, so the caller's assertion fails loudly.
    pub(crate) fn wait_written(&self, n: usize, timeout: Duration) -> Vec<(Instant, Vec<u8>)> {
        let deadline = Instant::now() + timeout;
        let mut state = self.shared.state.lock();
        while state.written.len() < n {
            if self
                .shared
                .signal
                .wait_until(&mut state, deadline)
                .timed_out()
            {
                break;
            }
        }
        state.written.clone()
    }

    /// Drop the link from the device side; a blocked read returns 0.
    pub(crate) fn close(&self) {
        let mut state = self.shared.state.lock();
        state.closed = true;
        self.shared.signal.notify_all();
    }
}

/// Poll `cond` until it holds or `timeout` expires.
pub(crate) fn wait_for(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if cond() {
            return true;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
    cond()
}
