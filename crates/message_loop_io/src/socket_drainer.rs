// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Byte-oriented drainer: on each readable signal, reads in a loop until
//! the source reports it would block (re-arm) or that the peer has closed
//! (deliver completion to the client exactly once).

use std::cell::{Cell, RefCell};
use std::io;
use std::rc::Rc;

use message_loop::{Handle, Handler, HandlerKey, MessageLoop, Signals, Status};

/// A byte source a [`SocketDrainer`] pumps. Mirrors a non-blocking socket
/// read: `Ok(0)` means the peer closed, `Err(WouldBlock)` means there is
/// nothing more to read right now.
pub trait ByteSource {
    /// Reads into `buf`, returning the number of bytes read.
    fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize>;
}

/// Delivered to a [`SocketDrainer`]'s client.
pub trait SocketDrainerClient {
    /// Invoked for each chunk read, in order.
    fn on_data(&self, chunk: &[u8]);

    /// Invoked exactly once, when the peer closes or the loop is torn down.
    fn on_data_complete(&self);
}

/// Pumps a [`ByteSource`] every time its handle signals readable, until the
/// peer closes or the drainer's loop is destroyed.
pub struct SocketDrainer<S, C> {
    source: RefCell<S>,
    client: Rc<C>,
    /// The destruction sentinel: set to `true` by the drainer itself once
    /// it tears down (peer closed, a read failed, or the loop was
    /// destroyed), so a caller holding a clone from [`Self::destruction_sentinel`]
    /// can tell, even from inside its own callback, whether this drainer
    /// already finished.
    destroyed: Rc<Cell<bool>>,
    handle: Handle,
    key: Cell<Option<HandlerKey>>,
}

impl<S, C> SocketDrainer<S, C>
where
    S: ByteSource + 'static,
    C: SocketDrainerClient + 'static,
{
    /// Registers a drainer for `handle` on `message_loop`, delivering data
    /// to `client` as it arrives.
    pub fn new(message_loop: &MessageLoop, handle: Handle, source: S, client: Rc<C>) -> Rc<Self> {
        let this = Rc::new(Self {
            source: RefCell::new(source),
            client,
            destroyed: Rc::new(Cell::new(false)),
            handle: handle.clone(),
            key: Cell::new(None),
        });
        let key = message_loop
            .add_handler(Rc::clone(&this) as Rc<dyn Handler>, handle, Signals::READABLE, message_loop::Deadline::Never)
            .expect("READABLE is never an empty mask");
        this.key.set(Some(key));
        this
    }

    fn drain(&self, message_loop: &MessageLoop) {
        let mut buf = [0_u8; 4096];
        loop {
            let read = self.source.borrow_mut().try_read(&mut buf);
            match read {
                Ok(0) => {
                    self.complete(message_loop);
                    return;
                }
                Ok(n) => self.client.on_data(&buf[..n]),
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) => {
                    let error = message_loop::Error::Io(error);
                    tracing::warn!(%error, "socket drainer read failed");
                    self.complete(message_loop);
                    return;
                }
            }
        }
    }

    fn complete(&self, message_loop: &MessageLoop) {
        if let Some(key) = self.key.take() {
            let _ = message_loop.remove_handler(key);
        }
        self.destroyed.set(true);
        self.client.on_data_complete();
    }
}

impl<S, C> SocketDrainer<S, C> {
    /// A sentinel the owner of this drainer can hand to its own container:
    /// once this drainer completes (peer close, read error, or loop
    /// destruction), the sentinel flips to `true`, so a callback still on
    /// the stack can check it afterward to tell whether the drainer already
    /// tore itself down.
    #[must_use]
    pub fn destruction_sentinel(&self) -> Rc<Cell<bool>> {
        Rc::clone(&self.destroyed)
    }
}

impl<S, C> Handler for SocketDrainer<S, C>
where
    S: ByteSource + 'static,
    C: SocketDrainerClient + 'static,
{
    fn on_ready(&self, message_loop: &MessageLoop, _handle: &Handle, _pending_bits: Signals, _count: usize) {
        self.drain(message_loop);
    }

    fn on_error(&self, message_loop: &MessageLoop, _handle: &Handle, status: Status) {
        if status == Status::LoopGone {
            self.complete(message_loop);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_loop::Channel;
    use std::cell::RefCell as StdRefCell;

    struct FixedSource {
        chunks: Vec<Vec<u8>>,
    }

    impl ByteSource for FixedSource {
        fn try_read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
            if let Some(chunk) = self.chunks.first().cloned() {
                self.chunks.remove(0);
                buf[..chunk.len()].copy_from_slice(&chunk);
                Ok(chunk.len())
            } else {
                Err(io::Error::from(io::ErrorKind::WouldBlock))
            }
        }
    }

    struct RecordingClient {
        received: StdRefCell<Vec<u8>>,
        completed: Cell<bool>,
    }

    impl SocketDrainerClient for RecordingClient {
        fn on_data(&self, chunk: &[u8]) {
            self.received.borrow_mut().extend_from_slice(chunk);
        }

        fn on_data_complete(&self) {
            self.completed.set(true);
        }
    }

    #[test]
    fn drains_until_would_block() {
        let message_loop = MessageLoop::new().expect("loop");
        let (a, b) = Channel::pair();
        let client = Rc::new(RecordingClient {
            received: StdRefCell::new(Vec::new()),
            completed: Cell::new(false),
        });
        let source = FixedSource { chunks: vec![b"hel".to_vec(), b"lo".to_vec()] };
        let _drainer = SocketDrainer::new(&message_loop, b.handle.clone(), source, Rc::clone(&client));
        a.write_empty();
        message_loop.post_quit_task();
        message_loop.run();
        assert_eq!(&*client.received.borrow(), b"hello");
        assert!(!client.completed.get());
    }

    #[test]
    fn destruction_sentinel_flips_once_the_drainer_completes() {
        let message_loop = MessageLoop::new().expect("loop");
        let (_a, b) = Channel::pair();
        let client = Rc::new(RecordingClient {
            received: StdRefCell::new(Vec::new()),
            completed: Cell::new(false),
        });
        let source = FixedSource { chunks: Vec::new() };
        let drainer = SocketDrainer::new(&message_loop, b.handle.clone(), source, Rc::clone(&client));
        let sentinel = drainer.destruction_sentinel();
        assert!(!sentinel.get());

        drop(message_loop);

        assert!(sentinel.get(), "the sentinel must flip once the loop's destruction completes the drainer");
        assert!(client.completed.get());
    }
}
