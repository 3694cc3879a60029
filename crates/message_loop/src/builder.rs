// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Configuration surface for constructing a [`MessageLoop`]. A per-thread
//! loop has no persistent configuration (no files, no environment) — the
//! builder exists purely to let a caller supply a pre-built task queue so
//! producers can post before the loop exists, and a name used in log spans.

use std::rc::Rc;
use std::sync::Arc;

use crate::dispatcher::MessageLoop;
use crate::error::Result;
use crate::task_queue::IncomingTaskQueue;

/// Builds a [`MessageLoop`] with optional pre-construction configuration.
#[derive(Debug, Default)]
pub struct MessageLoopBuilder {
    queue: Option<Arc<IncomingTaskQueue>>,
    name: Option<String>,
    registry_capacity: Option<usize>,
}

impl MessageLoopBuilder {
    /// Creates a builder with no configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Supplies a task queue constructed ahead of time, so producers on
    /// other threads can start posting to it before this loop is built.
    #[must_use]
    pub fn with_queue(mut self, queue: Arc<IncomingTaskQueue>) -> Self {
        self.queue = Some(queue);
        self
    }

    /// Names the loop for diagnostic log spans. Purely cosmetic.
    #[must_use]
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Pre-sizes the handler registry for `capacity` registrations, to
    /// avoid rehashing early on a loop the caller knows will host many
    /// handlers. Purely an allocation hint; has no effect on behavior.
    #[must_use]
    pub fn with_registry_capacity_hint(mut self, capacity: usize) -> Self {
        self.registry_capacity = Some(capacity);
        self
    }

    /// Constructs the loop on the calling thread, consuming the builder.
    /// Fails if a loop is already current on this thread.
    pub fn build(self) -> Result<Rc<MessageLoop>> {
        let queue = self.queue.unwrap_or_default();
        let name = self.name.unwrap_or_else(|| "message_loop".to_owned());
        let span = tracing::info_span!("message_loop", name = %name);
        let _entered = span.enter();
        MessageLoop::with_queue_and_registry_capacity(queue, self.registry_capacity.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn build_with_defaults_constructs_a_loop() {
        let message_loop = MessageLoopBuilder::new().with_name("test").build().expect("builds");
        drop(message_loop);
    }

    #[test]
    fn build_with_a_registry_capacity_hint_still_constructs_a_loop() {
        let message_loop =
            MessageLoopBuilder::new().with_registry_capacity_hint(64).build().expect("builds");
        drop(message_loop);
    }

    #[test]
    fn build_with_preexisting_queue_lets_it_preload_tasks() {
        let queue = Arc::new(IncomingTaskQueue::new());
        queue.post(Box::new(|| {}), crate::time::Deadline::now());
        let message_loop =
            MessageLoopBuilder::new().with_queue(Arc::clone(&queue)).build().expect("builds");
        drop(message_loop);
    }
}
