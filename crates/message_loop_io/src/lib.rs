// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The external collaborators built on `message_loop`'s public surface:
//! the file-descriptor waiter, the byte- and message-oriented drainers,
//! the virtual-filesystem request dispatcher, shared-memory helpers, the
//! vector/string wire codec, and the loop-owning thread factory.
//!
//! None of these modules touch `message_loop`'s internals; they are thin
//! adapters over `add_handler`/`remove_handler` and the task runner, which
//! is why the core crate treats them as out of scope for its own
//! correctness burden.

pub mod codec;
pub mod data_pipe_drainer;
pub mod fd_waiter;
pub mod shared_vmo;
pub mod socket_drainer;
pub mod thread_factory;
pub mod vfs_dispatcher;
