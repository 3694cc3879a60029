// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use std::sync::{Arc, Condvar, Mutex};
use std::time::Duration;

/// A waker used to interrupt a dispatcher blocked in its wait primitive.
///
/// Every post to the task queue and every signal assertion on a watched
/// handle notifies the owning loop's waker so it can reconsider its wake
/// deadline instead of sleeping past it.
///
/// This struct is cloneable and thread-safe.
#[derive(Debug, Clone)]
pub struct LoopWaker {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl LoopWaker {
    /// Creates a new, unsignaled waker.
    #[must_use]
    pub fn new() -> Self {
        Self {
            inner: Arc::new((Mutex::new(false), Condvar::new())),
        }
    }

    // Timing-dependent; not worth mutation-testing against a fragile clock.

    /// Notifies the waiting dispatcher, if any.
    #[cfg_attr(test, mutants::skip)]
    pub fn notify(&self) {
        *self.inner.0.lock().expect("waker state poisoned") = true;
        self.inner.1.notify_one();
    }

    /// Blocks until notified or until `timeout` elapses, whichever comes
    /// first. Consumes the pending notification, if any, before returning.
    #[cfg_attr(test, mutants::skip)]
    pub fn wait(&self, timeout: Duration) {
        let mut notified = self.inner.0.lock().expect("waker state poisoned");
        while !*notified {
            let (guard, result) = self
                .inner
                .1
                .wait_timeout(notified, timeout)
                .expect("waker state poisoned");
            notified = guard;
            if result.timed_out() {
                return;
            }
        }
        *notified = false;
    }
}

impl Default for LoopWaker {
    fn default() -> Self {
        Self::new()
    }
}
