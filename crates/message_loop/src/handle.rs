// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Handles and signals: the user-space stand-in for the kernel objects the
//! original design waited on. A [`Handle`] is a cheap, `Send + Sync`
//! reference to a bit of shared signal state that any producer may assert
//! or deassert; the dispatcher polls registered handles for newly asserted
//! bits that intersect a handler's mask.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::waker::LoopWaker;

bitflags::bitflags! {
    /// The fixed vocabulary of signal bits a handle can carry.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub struct Signals: u32 {
        /// Data is available to read.
        const READABLE = 1 << 0;
        /// The handle can accept more data.
        const WRITABLE = 1 << 1;
        /// The peer endpoint has closed.
        const PEER_CLOSED = 1 << 2;
        /// An error condition is asserted.
        const ERROR = 1 << 3;
    }
}

/// The opaque, non-negative integer identifying a handle, per the glossary.
pub type HandleId = u64;

fn next_handle_id() -> HandleId {
    static NEXT: AtomicU64 = AtomicU64::new(1);
    NEXT.fetch_add(1, Ordering::Relaxed)
}

#[derive(Debug, Default)]
struct HandleState {
    signals: Signals,
    pending: usize,
    wakers: Vec<LoopWaker>,
}

#[derive(Debug)]
struct HandleInner {
    id: HandleId,
    state: Mutex<HandleState>,
}

/// A cloneable reference to a kernel-object stand-in capable of asserting
/// signal bits. Cloning a `Handle` yields another reference to the same
/// underlying state, like duplicating a kernel handle.
#[derive(Debug, Clone)]
pub struct Handle {
    inner: Arc<HandleInner>,
}

impl Handle {
    /// Creates a new handle with no signals asserted.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(HandleInner {
                id: next_handle_id(),
                state: Mutex::new(HandleState::default()),
            }),
        }
    }

    /// The opaque identifier for this handle.
    #[must_use]
    pub fn id(&self) -> HandleId {
        self.inner.id
    }

    /// The signal bits currently asserted on this handle.
    #[must_use]
    pub fn signals(&self) -> Signals {
        self.inner.state.lock().expect("handle state poisoned").signals
    }

    /// The best-effort pending-operation count last reported by a producer.
    #[must_use]
    pub fn pending(&self) -> usize {
        self.inner.state.lock().expect("handle state poisoned").pending
    }

    /// Asserts `signals`, optionally bumping the best-effort pending count,
    /// and wakes every loop currently watching this handle.
    pub fn assert(&self, signals: Signals) {
        self.assert_with_pending(signals, 1);
    }

    /// Asserts `signals` and sets the pending count to an explicit value.
    pub fn assert_with_pending(&self, signals: Signals, pending: usize) {
        let wakers = {
            let mut state = self.inner.state.lock().expect("handle state poisoned");
            state.signals.insert(signals);
            state.pending = pending;
            state.wakers.clone()
        };
        for waker in wakers {
            waker.notify();
        }
    }

    /// Clears `signals`.
    pub fn deassert(&self, signals: Signals) {
        let mut state = self.inner.state.lock().expect("handle state poisoned");
        state.signals.remove(signals);
        if state.signals.is_empty() {
            state.pending = 0;
        }
    }

    /// Registers interest from a loop's wakeup primitive; called by the
    /// registry when a handler is added for this handle.
    pub(crate) fn attach_waker(&self, waker: LoopWaker) {
        self.inner.state.lock().expect("handle state poisoned").wakers.push(waker);
    }
}

impl Default for Handle {
    fn default() -> Self {
        Self::new()
    }
}

impl PartialEq for Handle {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl Eq for Handle {}

/// A minimal in-process channel used to exercise handler registration in
/// tests: writing to one endpoint asserts `READABLE` on the other, and
/// dropping an endpoint asserts `PEER_CLOSED` on its sibling.
#[derive(Debug)]
pub struct Channel {
    /// This endpoint's own handle, watched by handlers registered on it.
    pub handle: Handle,
    peer: Handle,
}

impl Channel {
    /// Creates a connected pair of endpoints.
    #[must_use]
    pub fn pair() -> (Self, Self) {
        let a = Handle::new();
        let b = Handle::new();
        (
            Self { handle: a.clone(), peer: b.clone() },
            Self { handle: b, peer: a },
        )
    }

    /// Writes an empty message, asserting `READABLE` on the peer endpoint.
    pub fn write_empty(&self) {
        self.peer.assert(Signals::READABLE);
    }
}

impl Drop for Channel {
    fn drop(&mut self) {
        self.peer.assert(Signals::PEER_CLOSED);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn assert_wakes_attached_waker() {
        let handle = Handle::new();
        let waker = LoopWaker::new();
        handle.attach_waker(waker.clone());
        handle.assert(Signals::READABLE);
        assert!(handle.signals().contains(Signals::READABLE));
        // A notified waker returns immediately instead of blocking the full timeout.
        waker.wait(std::time::Duration::from_secs(5));
    }

    #[test]
    fn channel_write_signals_peer() {
        let (a, b) = Channel::pair();
        a.write_empty();
        assert!(b.handle.signals().contains(Signals::READABLE));
    }

    #[test]
    fn dropping_channel_signals_peer_closed() {
        let (a, b) = Channel::pair();
        drop(a);
        assert!(b.handle.signals().contains(Signals::PEER_CLOSED));
    }
}
