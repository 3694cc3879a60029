// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The dispatcher: the single-threaded engine that alternates between
//! running due tasks and waiting on watched handles, with the after-task
//! hook invoked as a uniform epilogue after every dispatched task and
//! every handler callback.

use std::cell::{Cell, RefCell};
use std::rc::Rc;
use std::sync::Arc;
use std::time::{Duration, Instant};

use negative_impl::negative_impl;
use tracing::{debug, trace};

use crate::current;
use crate::error::{Error, Result};
use crate::handle::{Handle, Signals};
use crate::registry::{Handler, HandlerKey, HandlerRegistry, Status};
use crate::task_queue::{IncomingTaskQueue, TaskFn};
use crate::time::{Deadline, TimeBase};
use crate::waker::LoopWaker;

/// A long-but-finite stand-in for "wait indefinitely": real deadlines are
/// always either concrete or `Never`, and `Never` only ever means "nothing
/// is scheduled," so any wakeup (a post or a signal assertion) still
/// interrupts this immediately.
const INDEFINITE_WAIT: Duration = Duration::from_secs(60 * 60 * 24 * 365);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LoopState {
    Idle,
    Running,
    Quitting,
}

/// A per-thread cooperative event loop multiplexing posted tasks and
/// handle-signal waits.
///
/// A `MessageLoop` is confined to the thread that constructed it: it is
/// not `Send` or `Sync`, and at most one may be current on a thread at a
/// time.
pub struct MessageLoop {
    queue: Arc<IncomingTaskQueue>,
    registry: RefCell<HandlerRegistry>,
    waker: LoopWaker,
    state: Cell<LoopState>,
    running_on_stack: Cell<bool>,
    current_handler: Cell<Option<HandlerKey>>,
    after_task_hook: RefCell<Option<Box<dyn FnMut()>>>,
}

#[negative_impl]
impl !Send for MessageLoop {}
#[negative_impl]
impl !Sync for MessageLoop {}

impl MessageLoop {
    /// Constructs a loop on the calling thread, using a freshly created
    /// task queue. Fails if a loop is already current on this thread.
    pub fn new() -> Result<Rc<Self>> {
        Self::with_queue(Arc::new(IncomingTaskQueue::new()))
    }

    /// Constructs a loop on the calling thread using a queue that may
    /// already hold tasks posted before the loop existed.
    pub fn with_queue(queue: Arc<IncomingTaskQueue>) -> Result<Rc<Self>> {
        Self::with_queue_and_registry_capacity(queue, 0)
    }

    /// As [`Self::with_queue`], but pre-sizes the handler registry for
    /// `registry_capacity` registrations. Used by [`crate::MessageLoopBuilder`]
    /// to honor a caller-supplied capacity hint.
    pub(crate) fn with_queue_and_registry_capacity(
        queue: Arc<IncomingTaskQueue>,
        registry_capacity: usize,
    ) -> Result<Rc<Self>> {
        queue.attach();
        let waker = queue.waker();
        let this = Rc::new(Self {
            queue,
            registry: RefCell::new(HandlerRegistry::with_capacity(waker.clone(), registry_capacity)),
            waker,
            state: Cell::new(LoopState::Idle),
            running_on_stack: Cell::new(false),
            current_handler: Cell::new(None),
            after_task_hook: RefCell::new(None),
        });
        current::bind(&this)?;
        Ok(this)
    }

    /// A cloneable handle producers may use to post tasks to this loop,
    /// from any thread, even after the loop itself is destroyed.
    #[must_use]
    pub fn task_runner(&self) -> TaskRunner {
        TaskRunner { queue: Arc::clone(&self.queue) }
    }

    /// Registers `handler` against `handle`, watching for `signals` until
    /// `deadline` (defaulting to "never" — use [`Deadline::Never`]).
    pub fn add_handler(
        &self,
        handler: Rc<dyn Handler>,
        handle: Handle,
        signals: Signals,
        deadline: Deadline,
    ) -> Result<HandlerKey> {
        self.registry.borrow_mut().add(handler, handle, signals, deadline)
    }

    /// Removes the registration for `key`. Deferred until the handler's
    /// own callback returns if called reentrantly from within it.
    pub fn remove_handler(&self, key: HandlerKey) -> Result<()> {
        self.registry.borrow_mut().remove(key)
    }

    /// Whether `key` identifies a live registration.
    #[must_use]
    pub fn has_handler(&self, key: HandlerKey) -> bool {
        self.registry.borrow().has(key)
    }

    /// Installs a closure invoked after every dispatched task and every
    /// handler callback, replacing any previously installed hook.
    pub fn set_after_task_callback(&self, hook: impl FnMut() + 'static) {
        *self.after_task_hook.borrow_mut() = Some(Box::new(hook));
    }

    /// Removes the after-task hook, if one is installed.
    pub fn clear_after_task_callback(&self) {
        *self.after_task_hook.borrow_mut() = None;
    }

    /// Transitions the loop to `Quitting`. Legal from the owning thread at
    /// any time, including before the first `run()`; a subsequent `run()`
    /// then returns immediately without dispatching anything. Idempotent.
    pub fn quit_now(&self) {
        assert!(
            self.queue.runs_on_current_thread(),
            "quit_now() must be called from the loop's owning thread"
        );
        self.state.set(LoopState::Quitting);
    }

    /// Posts a task whose only effect is `quit_now()`. Safe from any
    /// thread, at any time.
    pub fn post_quit_task(&self) {
        // The closure reads the thread-local current loop when it runs,
        // rather than capturing `self`, since tasks must be `Send` and a
        // `MessageLoop` is not; dispatch always happens on the owning
        // thread, so `current()` resolves back to this same loop.
        self.task_runner().post(|| {
            if let Some(current) = current::current() {
                current.quit_now();
            }
        });
    }

    /// Blocks the calling thread, dispatching tasks and handler callbacks,
    /// until `quit_now()` is invoked. Re-entering `run()` from within a
    /// callback is forbidden.
    pub fn run(&self) {
        assert!(!self.running_on_stack.get(), "run() is not reentrant");
        self.running_on_stack.set(true);
        if self.state.get() != LoopState::Quitting {
            self.state.set(LoopState::Running);
        }
        debug!("message loop entering run()");

        loop {
            if self.state.get() == LoopState::Quitting {
                break;
            }
            let wake_deadline = self.compute_wake_deadline();
            self.wait_for_wake(wake_deadline);
            self.dispatch_due_tasks();
            self.dispatch_ready_handlers();
            self.dispatch_expired_handlers();
        }

        self.state.set(LoopState::Idle);
        self.running_on_stack.set(false);
        debug!("message loop returned from run()");
    }

    fn compute_wake_deadline(&self) -> Deadline {
        let task_deadline = self.queue.earliest_target_time();
        let handler_deadline = {
            let registry = self.registry.borrow();
            registry
                .keys()
                .into_iter()
                .filter_map(|key| registry.get(key).map(|record| record.deadline))
                .fold(Deadline::Never, Deadline::min)
        };
        task_deadline.min(handler_deadline)
    }

    fn wait_for_wake(&self, deadline: Deadline) {
        let now = TimeBase::now();
        let timeout = deadline.duration_since(now).unwrap_or(INDEFINITE_WAIT);
        trace!(?timeout, "waiting for next wakeup");
        self.waker.wait(timeout);
    }

    fn dispatch_due_tasks(&self) {
        let now = TimeBase::now();
        let due = self.queue.drain_due(now);
        for record in due {
            if self.state.get() == LoopState::Quitting {
                trace!("dropping due task posted before a quit in the same iteration");
                break;
            }
            (record.task)();
            self.run_after_task_hook();
        }
    }

    /// Delivers `on_ready` for every handler whose mask has a newly asserted
    /// bit, regardless of whether its deadline has also elapsed: a signal
    /// that arrives in the same pass as the deadline still counts as ready,
    /// per the "no matching signal" qualifier on expiry below.
    fn dispatch_ready_handlers(&self) {
        for key in self.registry.borrow().keys() {
            let Some((handler, handle, mask, _deadline)) = self.registry.borrow().get(key).map(
                |record| (Rc::clone(&record.handler), record.handle.clone(), record.mask, record.deadline),
            ) else {
                continue;
            };
            let current_signals = handle.signals();
            let relevant = current_signals & mask;
            if !self.registry.borrow().sync_delivered(key, relevant) {
                continue;
            }
            let pending = handle.pending();
            self.invoke_handler(key, |h| h.on_ready(self, &handle, current_signals, pending), &*handler);
        }
    }

    /// Delivers `on_error(TIMED_OUT)` for every handler whose deadline has
    /// elapsed with no matching signal currently asserted. A handler whose
    /// signal became ready in the same pass its deadline expired was
    /// already serviced by `dispatch_ready_handlers` and stays registered.
    fn dispatch_expired_handlers(&self) {
        let now = TimeBase::now();
        for key in self.registry.borrow().keys() {
            let Some((handler, handle, mask, deadline)) = self.registry.borrow().get(key).map(
                |record| (Rc::clone(&record.handler), record.handle.clone(), record.mask, record.deadline),
            ) else {
                continue;
            };
            if !deadline.has_elapsed(now) {
                continue;
            }
            if !(handle.signals() & mask).is_empty() {
                trace!(?key, "deadline elapsed but a matching signal arrived in the same pass");
                continue;
            }
            self.invoke_handler(key, |h| h.on_error(self, &handle, Status::TimedOut), &*handler);
            self.registry.borrow_mut().force_remove(key);
        }
    }

    fn invoke_handler(&self, key: HandlerKey, call: impl FnOnce(&dyn Handler), handler: &dyn Handler) {
        self.registry.borrow().enter_callback(key);
        let previous = self.current_handler.replace(Some(key));
        call(handler);
        self.current_handler.set(previous);
        self.registry.borrow_mut().leave_callback(key);
        self.run_after_task_hook();
    }

    fn run_after_task_hook(&self) {
        if let Some(hook) = self.after_task_hook.borrow_mut().as_mut() {
            hook();
        }
    }
}

impl Drop for MessageLoop {
    fn drop(&mut self) {
        current::unbind(self);
        self.notify_destruction();
        for record in self.queue.drain_all() {
            drop(record);
        }
        self.queue.detach();
    }
}

impl MessageLoop {
    /// Delivers `on_error(LOOP_GONE)` to every still-registered handler,
    /// including ones added by an earlier handler's own `on_error`, until
    /// the registry is empty (a fixed point, not a single pass).
    ///
    /// Each pass snapshots `(key, handler, handle)` for every record alive
    /// at the start of the pass *before* invoking any callback, so one
    /// handler's callback removing a sibling handler (scenario: H_odd
    /// removes H_even from its own `on_error`) cannot suppress that
    /// sibling's own notification — it was already captured.
    fn notify_destruction(&self) {
        loop {
            let snapshot: Vec<_> = self
                .registry
                .borrow()
                .keys()
                .into_iter()
                .filter_map(|key| {
                    self.registry
                        .borrow()
                        .get(key)
                        .map(|record| (key, Rc::clone(&record.handler), record.handle.clone()))
                })
                .collect();
            if snapshot.is_empty() {
                break;
            }
            for (key, handler, handle) in snapshot {
                self.invoke_handler(key, |h| h.on_error(self, &handle, Status::LoopGone), &*handler);
                self.registry.borrow_mut().force_remove(key);
            }
        }
    }
}

impl std::fmt::Debug for MessageLoop {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MessageLoop").field("state", &self.state.get()).finish_non_exhaustive()
    }
}

/// A cloneable handle producers use to post tasks to a loop, possibly from
/// a different thread, and possibly after the loop itself has been
/// destroyed (in which case posting is a no-op that still drops the
/// closure on the posting thread).
#[derive(Clone)]
pub struct TaskRunner {
    queue: Arc<IncomingTaskQueue>,
}

impl TaskRunner {
    /// Posts `task` to run as soon as possible.
    pub fn post(&self, task: impl FnOnce() + Send + 'static) {
        self.post_for_time(task, TimeBase::now());
    }

    /// Posts `task` to run at or after `absolute_time`.
    pub fn post_for_time(&self, task: impl FnOnce() + Send + 'static, absolute_time: Instant) {
        self.queue.post(Box::new(task) as TaskFn, Deadline::At(absolute_time));
    }

    /// Posts `task` to run at or after `delta` from now.
    pub fn post_delayed(&self, task: impl FnOnce() + Send + 'static, delta: Duration) {
        self.post_for_time(task, TimeBase::now() + delta);
    }

    /// Whether the calling thread is the loop's owning thread.
    #[must_use]
    pub fn runs_on_current_thread(&self) -> bool {
        self.queue.runs_on_current_thread()
    }
}

impl std::fmt::Debug for TaskRunner {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TaskRunner").finish_non_exhaustive()
    }
}
