// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The map from opaque handler keys to live registrations. Touched only by
//! the loop's owning thread, so no internal locking is needed — the type
//! asserts this in its API rather than only in documentation.

use std::cell::Cell;
use std::collections::HashMap;
use std::num::NonZeroU64;
use std::rc::Rc;

use crate::dispatcher::MessageLoop;
use crate::error::{Error, Result};
use crate::handle::{Handle, Signals};
use crate::time::Deadline;
use crate::waker::LoopWaker;

/// The status delivered to [`Handler::on_error`] describing why a handler
/// is being torn down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Status {
    /// The handler's deadline elapsed with no matching signal observed.
    TimedOut,
    /// The loop was destroyed while the handler was still registered.
    LoopGone,
}

/// A capability registered against a `(handle, signal-mask, deadline)`
/// triple. Both methods default to no-ops so implementers only override
/// the one they care about.
///
/// Both methods are handed the owning loop by reference rather than
/// expecting the implementer to hold on to an `Rc<MessageLoop>` of its
/// own: a handler that registers itself also stores an `Rc` back into the
/// very registry holding it, and a loop reachable only through that cycle
/// would never reach a strong count of zero. Borrowing also means the
/// reference is valid even while this call is made from inside the loop's
/// own destructor, when no live `Rc`/`Weak` handle to it can be obtained.
pub trait Handler {
    /// Invoked when the handle asserts a bit intersecting the registered
    /// mask. `pending_bits` is the full set of bits asserted at the moment
    /// the wait completed; `count` is a best-effort pending-operation
    /// indicator forwarded from the handle.
    #[allow(unused_variables)]
    fn on_ready(&self, message_loop: &MessageLoop, handle: &Handle, pending_bits: Signals, count: usize) {}

    /// Invoked exactly once, as a terminal notification, when the handler
    /// is removed due to a deadline or loop destruction.
    #[allow(unused_variables)]
    fn on_error(&self, message_loop: &MessageLoop, handle: &Handle, status: Status) {}
}

/// The opaque, monotonically assigned, non-zero key identifying a live
/// registration.
pub type HandlerKey = NonZeroU64;

pub(crate) struct HandlerRecord {
    pub(crate) handler: Rc<dyn Handler>,
    pub(crate) handle: Handle,
    pub(crate) mask: Signals,
    pub(crate) deadline: Deadline,
    pub(crate) in_callback: Cell<bool>,
    pub(crate) remove_pending: Cell<bool>,
    /// The subset of `mask` already delivered via `on_ready` since it was
    /// last asserted; cleared implicitly whenever the handle deasserts
    /// those bits, so a later reassertion is treated as new again.
    pub(crate) delivered: Cell<Signals>,
}

/// The registry of live handler registrations for one loop.
pub struct HandlerRegistry {
    records: HashMap<HandlerKey, HandlerRecord>,
    next_key: Cell<u64>,
    waker: LoopWaker,
}

impl HandlerRegistry {
    pub(crate) fn new(waker: LoopWaker) -> Self {
        Self::with_capacity(waker, 0)
    }

    /// Creates a registry pre-sized for `capacity` registrations, to avoid
    /// rehashing early on a loop the caller knows will host many handlers.
    pub(crate) fn with_capacity(waker: LoopWaker, capacity: usize) -> Self {
        Self { records: HashMap::with_capacity(capacity), next_key: Cell::new(1), waker }
    }

    fn fresh_key(&self) -> HandlerKey {
        loop {
            let candidate = self.next_key.get();
            self.next_key.set(candidate.wrapping_add(1).max(1));
            if let Some(key) = NonZeroU64::new(candidate) {
                if !self.records.contains_key(&key) {
                    return key;
                }
            }
        }
    }

    /// Registers `handler` against `handle`, watching for `signals` until
    /// `deadline`. Returns the fresh key identifying the registration.
    pub fn add(
        &mut self,
        handler: Rc<dyn Handler>,
        handle: Handle,
        signals: Signals,
        deadline: Deadline,
    ) -> Result<HandlerKey> {
        if signals.is_empty() {
            return Err(Error::EmptySignalMask);
        }
        let key = self.fresh_key();
        handle.attach_waker(self.waker.clone());
        self.records.insert(
            key,
            HandlerRecord {
                handler,
                handle,
                mask: signals,
                deadline,
                in_callback: Cell::new(false),
                remove_pending: Cell::new(false),
                delivered: Cell::new(Signals::empty()),
            },
        );
        Ok(key)
    }

    /// Removes the registration for `key`. If the handler is currently
    /// executing its own callback, the removal is deferred until the
    /// callback returns. Returns an error if `key` is not registered.
    pub fn remove(&mut self, key: HandlerKey) -> Result<()> {
        let record = self.records.get(&key).ok_or(Error::BadKey(key.get()))?;
        if record.in_callback.get() {
            record.remove_pending.set(true);
            Ok(())
        } else {
            self.records.remove(&key);
            Ok(())
        }
    }

    /// Whether `key` identifies a live registration. Returns true for a
    /// handler that has requested its own removal but whose callback has
    /// not yet returned.
    #[must_use]
    pub fn has(&self, key: HandlerKey) -> bool {
        self.records.contains_key(&key)
    }

    pub(crate) fn keys(&self) -> Vec<HandlerKey> {
        self.records.keys().copied().collect()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub(crate) fn get(&self, key: HandlerKey) -> Option<&HandlerRecord> {
        self.records.get(&key)
    }

    /// Records `relevant` (the handle's currently asserted bits intersected
    /// with the handler's mask) as the delivered set for `key`, returning
    /// whether it contains a bit not present in the previously delivered
    /// set. A handle that deasserts and later reasserts the same bit is
    /// treated as newly ready again, since the intervening empty scan
    /// resets the delivered set to empty.
    pub(crate) fn sync_delivered(&self, key: HandlerKey, relevant: Signals) -> bool {
        let Some(record) = self.records.get(&key) else { return false };
        let previously_delivered = record.delivered.replace(relevant);
        !relevant.is_empty() && !previously_delivered.contains(relevant)
    }

    /// Marks `key`'s record as currently executing its callback, so a
    /// self-removal request during the callback is deferred rather than
    /// freeing a record whose method is still on the stack.
    pub(crate) fn enter_callback(&self, key: HandlerKey) {
        if let Some(record) = self.records.get(&key) {
            record.in_callback.set(true);
        }
    }

    /// Clears the in-callback flag and finalizes a deferred self-removal,
    /// if one was requested. Returns whether the record was removed.
    pub(crate) fn leave_callback(&mut self, key: HandlerKey) -> bool {
        let Some(record) = self.records.get(&key) else { return false };
        record.in_callback.set(false);
        if record.remove_pending.get() {
            self.records.remove(&key);
            true
        } else {
            false
        }
    }

    /// Unconditionally removes `key`'s record, used when a handler is torn
    /// down outside the reentrant-callback path (deadline expiry).
    pub(crate) fn force_remove(&mut self, key: HandlerKey) -> Option<HandlerRecord> {
        self.records.remove(&key)
    }
}
