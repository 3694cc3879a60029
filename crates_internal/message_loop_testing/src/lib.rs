// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Test-only harness shared across the `message_loop` workspace: a
//! watchdog for tests that might hang inside a blocking `run()`, a
//! console logging initializer, and a recording [`Handler`] test double.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::mpsc;
use std::sync::Once;
use std::thread;
use std::time::Duration;

use message_loop::{Handle, Handler, MessageLoop, Signals, Status};

/// The ceiling any single test in this workspace is given before it is
/// considered hung. A `MessageLoop::run()` that never quits would
/// otherwise block the test binary forever.
pub const TEST_TIMEOUT: Duration = Duration::from_secs(10);

/// Runs `f` on a background thread and waits up to [`TEST_TIMEOUT`] for it
/// to finish. If it does not, the test thread panics and the background
/// thread is abandoned (not killed — `MessageLoop` is not `Send`, so the
/// closures this harness runs are thread-confined by construction).
pub fn execute_or_abandon<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    rx.recv_timeout(TEST_TIMEOUT)
        .expect("test exceeded its timeout; background thread abandoned")
}

/// Like [`execute_or_abandon`], but a timeout terminates the whole test
/// process instead of merely panicking the calling thread. Reach for this
/// when a hung background thread would hold a resource (a lock, a shared
/// fixture) that leaving it running would wedge every other test in the
/// same binary rather than just this one.
pub fn execute_or_terminate_process<F, R>(f: F) -> R
where
    F: FnOnce() -> R + Send + 'static,
    R: Send + 'static,
{
    let (tx, rx) = mpsc::channel();
    thread::spawn(move || {
        let _ = tx.send(f());
    });
    match rx.recv_timeout(TEST_TIMEOUT) {
        Ok(value) => value,
        Err(_) => {
            eprintln!("test exceeded its timeout; terminating process");
            std::process::exit(1);
        }
    }
}

static LOG_INIT: Once = Once::new();

/// Initializes a `tracing` console subscriber once per process, so tests
/// can assert on log output or simply see it on failure. Safe to call
/// from every test; later calls are no-ops.
pub fn log_to_console() {
    LOG_INIT.call_once(|| {
        let _ = tracing_subscriber::fmt().with_test_writer().try_init();
    });
}

/// A [`Handler`] that records every invocation instead of acting on it, for
/// asserting dispatch behavior in tests.
#[derive(Default)]
pub struct RecordingHandler {
    ready_count: Cell<usize>,
    last_pending_bits: Cell<Signals>,
    error_statuses: RefCell<Vec<Status>>,
}

impl RecordingHandler {
    /// Creates a fresh recorder with no observed calls.
    #[must_use]
    pub fn new() -> Rc<Self> {
        Rc::new(Self::default())
    }

    /// How many times `on_ready` has fired.
    #[must_use]
    pub fn ready_count(&self) -> usize {
        self.ready_count.get()
    }

    /// The `pending_bits` snapshot from the most recent `on_ready`.
    #[must_use]
    pub fn last_pending_bits(&self) -> Signals {
        self.last_pending_bits.get()
    }

    /// Every status delivered to `on_error`, in order.
    #[must_use]
    pub fn error_statuses(&self) -> Vec<Status> {
        self.error_statuses.borrow().clone()
    }
}

impl Handler for RecordingHandler {
    fn on_ready(&self, _message_loop: &MessageLoop, _handle: &Handle, pending_bits: Signals, _count: usize) {
        self.ready_count.set(self.ready_count.get() + 1);
        self.last_pending_bits.set(pending_bits);
    }

    fn on_error(&self, _message_loop: &MessageLoop, _handle: &Handle, status: Status) {
        self.error_statuses.borrow_mut().push(status);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn execute_or_abandon_returns_the_closures_value() {
        assert_eq!(execute_or_abandon(|| 1 + 1), 2);
    }

    #[test]
    fn execute_or_terminate_process_returns_the_closures_value() {
        assert_eq!(execute_or_terminate_process(|| 2 + 2), 4);
    }

    #[test]
    fn recording_handler_tallies_calls() {
        let message_loop = MessageLoop::new().expect("loop");
        let handler = RecordingHandler::new();
        let handle = Handle::new();
        handler.on_ready(&message_loop, &handle, Signals::READABLE, 1);
        handler.on_ready(&message_loop, &handle, Signals::READABLE, 2);
        handler.on_error(&message_loop, &handle, Status::TimedOut);
        assert_eq!(handler.ready_count(), 2);
        assert_eq!(handler.error_statuses(), vec![Status::TimedOut]);
    }
}
