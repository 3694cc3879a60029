// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The queue producers push tasks into. Detachable from any loop so tasks
//! may be preloaded before the loop exists, and safe to post to from any
//! thread while the loop runs or after it has stopped.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Mutex;
use std::thread::ThreadId;

use crate::time::Deadline;
use crate::waker::LoopWaker;

/// A closure posted to the loop, to be run on the owning thread.
pub type TaskFn = Box<dyn FnOnce() + Send>;

pub(crate) struct TaskRecord {
    pub(crate) target_time: Deadline,
    pub(crate) sequence: u64,
    pub(crate) task: TaskFn,
}

/// A thread-safe, multi-producer, single-consumer queue of (closure,
/// target-time) records. Ordering among tasks with equal target-times
/// follows submission order.
pub struct IncomingTaskQueue {
    tasks: Mutex<VecDeque<TaskRecord>>,
    next_sequence: AtomicU64,
    owner: Mutex<Option<ThreadId>>,
    waker: LoopWaker,
}

impl IncomingTaskQueue {
    /// Creates an empty queue, detached from any loop.
    #[must_use]
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(VecDeque::new()),
            next_sequence: AtomicU64::new(0),
            owner: Mutex::new(None),
            waker: LoopWaker::new(),
        }
    }

    /// Appends a task for dispatch once `target_time` has been reached.
    /// Safe to call before the loop exists, while it is running, or after
    /// it has stopped.
    pub fn post(&self, task: TaskFn, target_time: Deadline) {
        let sequence = self.next_sequence.fetch_add(1, Ordering::Relaxed);
        self.tasks
            .lock()
            .expect("task queue poisoned")
            .push_back(TaskRecord { target_time, sequence, task });
        self.waker.notify();
    }

    /// Whether the calling thread is the loop's owning thread. Returns
    /// false before the queue has been attached to a loop.
    #[must_use]
    pub fn runs_on_current_thread(&self) -> bool {
        *self.owner.lock().expect("task queue poisoned")
            == Some(std::thread::current().id())
    }

    /// Binds this queue to the calling thread; invoked by the loop during
    /// construction.
    pub(crate) fn attach(&self) {
        *self.owner.lock().expect("task queue poisoned") = Some(std::thread::current().id());
    }

    /// Unbinds this queue from its owning thread; invoked by the loop
    /// during destruction.
    pub(crate) fn detach(&self) {
        *self.owner.lock().expect("task queue poisoned") = None;
    }

    pub(crate) fn waker(&self) -> LoopWaker {
        self.waker.clone()
    }

    /// The earliest target-time among queued tasks, or `Deadline::Never`
    /// if the queue is empty.
    pub(crate) fn earliest_target_time(&self) -> Deadline {
        self.tasks
            .lock()
            .expect("task queue poisoned")
            .iter()
            .map(|record| record.target_time)
            .fold(Deadline::Never, Deadline::min)
    }

    /// Removes and returns every task due at or before `now`, ordered by
    /// target-time then submission sequence.
    pub(crate) fn drain_due(&self, now: std::time::Instant) -> Vec<TaskRecord> {
        let mut tasks = self.tasks.lock().expect("task queue poisoned");
        let mut due = Vec::new();
        let mut remaining = VecDeque::with_capacity(tasks.len());
        for record in tasks.drain(..) {
            if record.target_time.has_elapsed(now) {
                due.push(record);
            } else {
                remaining.push_back(record);
            }
        }
        *tasks = remaining;
        due.sort_by_key(|record| (deadline_sort_key(record.target_time), record.sequence));
        due
    }

    /// Removes and returns every still-queued task, regardless of
    /// target-time, for destruction without dispatch.
    pub(crate) fn drain_all(&self) -> Vec<TaskRecord> {
        self.tasks.lock().expect("task queue poisoned").drain(..).collect()
    }
}

fn deadline_sort_key(deadline: Deadline) -> std::time::Instant {
    match deadline {
        Deadline::At(at) => at,
        Deadline::Never => {
            // Never-due tasks are never returned by `drain_due`, so this key
            // is only ever compared against other concrete instants within
            // `drain_all`'s caller, which does not sort; `now()` is a safe
            // placeholder.
            crate::time::TimeBase::now()
        }
    }
}

impl Default for IncomingTaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn fifo_among_equal_target_times() {
        let queue = IncomingTaskQueue::new();
        let (tx, rx) = mpsc::channel();
        for i in 0..3 {
            let tx = tx.clone();
            queue.post(Box::new(move || tx.send(i).unwrap()), Deadline::now());
        }
        let due = queue.drain_due(crate::time::TimeBase::now());
        for record in due {
            (record.task)();
        }
        drop(tx);
        let received: Vec<_> = rx.iter().collect();
        assert_eq!(received, vec![0, 1, 2]);
    }

    #[test]
    fn not_yet_due_tasks_stay_queued() {
        let queue = IncomingTaskQueue::new();
        let far_future = Deadline::At(crate::time::TimeBase::now() + std::time::Duration::from_secs(3600));
        queue.post(Box::new(|| {}), far_future);
        let due = queue.drain_due(crate::time::TimeBase::now());
        assert!(due.is_empty());
        assert_eq!(queue.earliest_target_time(), far_future);
    }
}
