// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Spawns an OS thread that constructs and runs a [`MessageLoop`],
//! blocking the caller only until the new thread has published its
//! [`TaskRunner`] back — not until the loop itself exits.

use std::io;
use std::sync::mpsc;
use std::thread::{self, JoinHandle};

use message_loop::{MessageLoop, TaskRunner};

/// Spawns a named thread running its own message loop for its entire
/// lifetime, returning a join handle and a runner for posting work to it.
pub fn spawn_loop_thread(name: impl Into<String>) -> io::Result<(JoinHandle<()>, TaskRunner)> {
    let name = name.into();
    let (publish, published) = mpsc::channel();
    let join_handle = thread::Builder::new().name(name).spawn(move || {
        let message_loop = MessageLoop::new().expect("a freshly spawned thread owns no loop yet");
        let runner = message_loop.task_runner();
        if publish.send(runner).is_err() {
            // The caller gave up waiting; still run so any tasks posted via
            // a runner obtained some other way are serviced.
        }
        message_loop.run();
    })?;
    let runner = published.recv().map_err(|_| {
        io::Error::other("loop thread exited before publishing its task runner")
    })?;
    Ok((join_handle, runner))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::{Arc, Mutex};

    #[test]
    fn spawned_loop_runs_posted_tasks() {
        let (join_handle, runner) = spawn_loop_thread("test-loop").expect("spawn succeeds");
        let result = Arc::new(Mutex::new(0));
        let captured = Arc::clone(&result);
        runner.post(move || *captured.lock().unwrap() = 42);
        runner.post(|| {
            if let Some(current) = message_loop::current() {
                current.quit_now();
            }
        });
        join_handle.join().expect("loop thread does not panic");
        assert_eq!(*result.lock().unwrap(), 42);
    }
}
