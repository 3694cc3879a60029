// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Bridges POSIX-style file descriptors to the loop's handle-waiting
//! primitive by translating poll events to handle signals through an
//! external per-descriptor shim. The shim is the platform-specific part
//! (epoll, kqueue, IOCP); this module only knows how to drive one through
//! the loop's handler-registration surface.

use std::cell::{Cell, RefCell};
use std::os::fd::RawFd;
use std::rc::Rc;

use message_loop::{Deadline, Handle, HandlerKey, MessageLoop, Signals};

bitflags::bitflags! {
    /// A minimal poll event mask, independent of any particular platform's
    /// numeric encoding.
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct PollEvents: u32 {
        /// The descriptor is readable without blocking.
        const READABLE = 1 << 0;
        /// The descriptor is writable without blocking.
        const WRITABLE = 1 << 1;
    }
}

/// The outcome delivered to an [`FdWaiter::wait`] callback.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitStatus {
    /// The descriptor became ready for the requested events.
    Ok,
    /// The deadline elapsed with no matching readiness.
    TimedOut,
    /// The loop was destroyed while the wait was outstanding.
    LoopGone,
}

/// The external per-descriptor shim: translates between file-descriptor
/// poll events and the loop's handle/signal vocabulary. An implementer
/// backs this with a real OS facility; `message_loop_io` only drives it.
pub trait FdShim {
    /// Registers `fd` for `events`, returning the handle the loop should
    /// watch. Implementations are expected to keep asserting the relevant
    /// signal on that handle for as long as the descriptor remains ready.
    fn register(&self, fd: RawFd, events: PollEvents) -> Handle;

    /// Maps a poll event mask to the handle signal mask that represents it.
    fn events_to_signals(&self, events: PollEvents) -> Signals;

    /// Maps a handle's asserted signals back to a poll event mask.
    fn signals_to_events(&self, signals: Signals) -> PollEvents;
}

struct OneShotHandler {
    callback: RefCell<Option<Box<dyn FnOnce(WaitStatus, PollEvents)>>>,
    shim: Rc<dyn FdShim>,
    key_cell: Rc<Cell<Option<HandlerKey>>>,
}

impl OneShotHandler {
    fn fire(&self, message_loop: &MessageLoop, status: WaitStatus, events: PollEvents) {
        if let Some(key) = self.key_cell.take() {
            let _ = message_loop.remove_handler(key);
        }
        if let Some(callback) = self.callback.borrow_mut().take() {
            callback(status, events);
        }
    }
}

impl message_loop::Handler for OneShotHandler {
    fn on_ready(&self, message_loop: &MessageLoop, _handle: &Handle, pending_bits: Signals, _count: usize) {
        let events = self.shim.signals_to_events(pending_bits);
        self.fire(message_loop, WaitStatus::Ok, events);
    }

    fn on_error(&self, message_loop: &MessageLoop, _handle: &Handle, status: message_loop::Status) {
        let status = match status {
            message_loop::Status::TimedOut => WaitStatus::TimedOut,
            message_loop::Status::LoopGone => WaitStatus::LoopGone,
        };
        self.fire(message_loop, status, PollEvents::empty());
    }
}

/// A one-shot waiter bridging a file descriptor into a [`MessageLoop`].
/// Dropping the waiter cancels any outstanding registration.
pub struct FdWaiter {
    message_loop: Rc<MessageLoop>,
    key: Rc<Cell<Option<HandlerKey>>>,
}

impl FdWaiter {
    /// Creates a waiter bound to `message_loop`, with no wait outstanding.
    #[must_use]
    pub fn new(message_loop: Rc<MessageLoop>) -> Self {
        Self { message_loop, key: Rc::new(Cell::new(None)) }
    }

    /// Registers a one-shot wait for `poll_events` on `fd`, via `shim`,
    /// expiring at `timeout`. Returns whether registration succeeded.
    ///
    /// On success, `callback` fires exactly once: with `(Ok, events)` when
    /// the descriptor becomes ready, or with `(TimedOut | LoopGone, empty)`
    /// otherwise. The handler is removed before the callback runs.
    pub fn wait(
        &self,
        fd: RawFd,
        poll_events: PollEvents,
        timeout: Deadline,
        shim: Rc<dyn FdShim>,
        callback: impl FnOnce(WaitStatus, PollEvents) + 'static,
    ) -> bool {
        let handle = shim.register(fd, poll_events);
        let mask = shim.events_to_signals(poll_events);
        let handler = Rc::new(OneShotHandler {
            callback: RefCell::new(Some(Box::new(callback))),
            shim,
            key_cell: Rc::clone(&self.key),
        });
        match self.message_loop.add_handler(handler, handle, mask, timeout) {
            Ok(key) => {
                self.key.set(Some(key));
                true
            }
            Err(error) => {
                tracing::warn!(%error, "fd waiter registration failed");
                false
            }
        }
    }
}

impl Drop for FdWaiter {
    fn drop(&mut self) {
        if let Some(key) = self.key.take() {
            let _ = self.message_loop.remove_handler(key);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_loop::Channel;

    struct IdentityShim {
        handle: Handle,
    }

    impl FdShim for IdentityShim {
        fn register(&self, _fd: RawFd, _events: PollEvents) -> Handle {
            self.handle.clone()
        }

        fn events_to_signals(&self, events: PollEvents) -> Signals {
            let mut signals = Signals::empty();
            if events.contains(PollEvents::READABLE) {
                signals.insert(Signals::READABLE);
            }
            if events.contains(PollEvents::WRITABLE) {
                signals.insert(Signals::WRITABLE);
            }
            signals
        }

        fn signals_to_events(&self, signals: Signals) -> PollEvents {
            let mut events = PollEvents::empty();
            if signals.contains(Signals::READABLE) {
                events.insert(PollEvents::READABLE);
            }
            if signals.contains(Signals::WRITABLE) {
                events.insert(PollEvents::WRITABLE);
            }
            events
        }
    }

    #[test]
    fn ready_fd_invokes_callback_once_and_deregisters() {
        let message_loop = MessageLoop::new().expect("loop");
        let (a, b) = Channel::pair();
        let shim: Rc<dyn FdShim> = Rc::new(IdentityShim { handle: b.handle.clone() });
        let waiter = FdWaiter::new(Rc::clone(&message_loop));
        a.write_empty();
        let fired = Rc::new(Cell::new(false));
        let flag = Rc::clone(&fired);
        let registered = waiter.wait(0, PollEvents::READABLE, Deadline::Never, shim, move |status, events| {
            assert_eq!(status, WaitStatus::Ok);
            assert!(events.contains(PollEvents::READABLE));
            flag.set(true);
        });
        assert!(registered);
        message_loop.post_quit_task();
        message_loop.run();
        assert!(fired.get());
    }
}
