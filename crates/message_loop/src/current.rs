// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The thread-local "current loop" binding: at most one [`MessageLoop`] may
//! be current on a thread at a time, and the binding's lifetime is tied to
//! the loop's own lifetime rather than kept alive by the thread-local
//! itself.

use std::cell::RefCell;
use std::rc::{Rc, Weak};

use crate::dispatcher::MessageLoop;
use crate::error::{Error, Result};

thread_local! {
    static CURRENT: RefCell<Option<Weak<MessageLoop>>> = const { RefCell::new(None) };
}

/// Returns the loop bound to the calling thread, or `None` if no loop has
/// been constructed there (or the one that was has since been dropped).
#[must_use]
pub fn current() -> Option<Rc<MessageLoop>> {
    CURRENT.with(|cell| cell.borrow().as_ref().and_then(Weak::upgrade))
}

/// Binds `message_loop` as current on the calling thread. Fails if another
/// loop is already current (and still alive) on this thread.
pub(crate) fn bind(message_loop: &Rc<MessageLoop>) -> Result<()> {
    CURRENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if slot.as_ref().and_then(Weak::upgrade).is_some() {
            return Err(Error::AlreadyRunning);
        }
        *slot = Some(Rc::downgrade(message_loop));
        Ok(())
    })
}

/// Clears the current-loop binding. Called from `MessageLoop`'s `Drop`
/// impl; since at most one loop is ever current on a thread, any drop
/// means the thread now has none.
pub(crate) fn unbind(_message_loop: &MessageLoop) {
    CURRENT.with(|cell| *cell.borrow_mut() = None);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn no_loop_is_current_before_construction() {
        assert!(current().is_none());
    }

    #[test]
    fn current_returns_none_once_loop_is_dropped() {
        let message_loop = MessageLoop::new().expect("first loop on this thread");
        assert!(current().is_some());
        drop(message_loop);
        assert!(current().is_none());
    }
}
