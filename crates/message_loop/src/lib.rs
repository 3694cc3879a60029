// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! A per-thread cooperative event loop multiplexing two kinds of work:
//! closures posted to a task queue, and asynchronous waits on handles
//! watching sets of signal bits with optional deadlines.
//!
//! The loop itself ([`MessageLoop`]) is the foundation other components
//! (socket/pipe drainers, file-descriptor waiters, virtual-filesystem
//! channel handlers, thread factories) build on; those live in the sibling
//! `message_loop_io` crate.

mod builder;
mod current;
mod dispatcher;
mod error;
mod handle;
mod registry;
mod task_queue;
mod time;
mod waker;

pub use builder::MessageLoopBuilder;
pub use current::current;
pub use dispatcher::{MessageLoop, TaskRunner};
pub use error::{Error, Result};
pub use handle::{Channel, Handle, HandleId, Signals};
pub use registry::{Handler, HandlerKey, Status};
pub use task_queue::{IncomingTaskQueue, TaskFn};
pub use time::{Deadline, TimeBase};
