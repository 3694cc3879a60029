// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Datagram-oriented drainer: like [`crate::socket_drainer::SocketDrainer`]
//! but delivers whole messages, never splitting or coalescing one.

use std::cell::Cell;
use std::io;
use std::rc::Rc;

use message_loop::{Handle, Handler, HandlerKey, MessageLoop, Signals, Status};

/// A message source a [`DataPipeDrainer`] pumps. `Ok(None)` means there is
/// nothing more to read right now (the datagram equivalent of would-block).
pub trait MessageSource {
    /// Reads the next whole message, if one is available.
    fn try_read_message(&mut self) -> io::Result<Option<Vec<u8>>>;
}

/// Delivered to a [`DataPipeDrainer`]'s client.
pub trait DataPipeDrainerClient {
    /// Invoked once per message, in arrival order.
    fn on_message(&self, message: Vec<u8>);

    /// Invoked exactly once, when the peer closes or the loop is torn down.
    fn on_message_stream_complete(&self);
}

/// Pumps a [`MessageSource`] every time its handle signals readable, until
/// the peer closes or the drainer's loop is destroyed.
pub struct DataPipeDrainer<S, C> {
    source: std::cell::RefCell<S>,
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

impl<S, C> DataPipeDrainer<S, C>
where
    S: MessageSource + 'static,
    C: DataPipeDrainerClient + 'static,
{
    /// Registers a drainer for `handle` on `message_loop`, delivering
    /// messages to `client` as they arrive.
    pub fn new(message_loop: &MessageLoop, handle: Handle, source: S, client: Rc<C>) -> Rc<Self> {
        let this = Rc::new(Self {
            source: std::cell::RefCell::new(source),
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
        loop {
            match self.source.borrow_mut().try_read_message() {
                Ok(Some(message)) => self.client.on_message(message),
                Ok(None) => return,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) => {
                    let error = message_loop::Error::Io(error);
                    tracing::warn!(%error, "data pipe drainer read failed");
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
        self.client.on_message_stream_complete();
    }
}

impl<S, C> DataPipeDrainer<S, C> {
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

impl<S, C> Handler for DataPipeDrainer<S, C>
where
    S: MessageSource + 'static,
    C: DataPipeDrainerClient + 'static,
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
    use std::cell::RefCell;

    struct FixedMessages {
        messages: Vec<Vec<u8>>,
    }

    impl MessageSource for FixedMessages {
        fn try_read_message(&mut self) -> io::Result<Option<Vec<u8>>> {
            if self.messages.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.messages.remove(0)))
            }
        }
    }

    struct RecordingClient {
        messages: RefCell<Vec<Vec<u8>>>,
    }

    impl DataPipeDrainerClient for RecordingClient {
        fn on_message(&self, message: Vec<u8>) {
            self.messages.borrow_mut().push(message);
        }

        fn on_message_stream_complete(&self) {}
    }

    #[test]
    fn delivers_whole_messages_without_coalescing() {
        let message_loop = MessageLoop::new().expect("loop");
        let (a, b) = Channel::pair();
        let client = Rc::new(RecordingClient { messages: RefCell::new(Vec::new()) });
        let source = FixedMessages { messages: vec![b"one".to_vec(), b"two".to_vec()] };
        let _drainer = DataPipeDrainer::new(&message_loop, b.handle.clone(), source, Rc::clone(&client));
        a.write_empty();
        message_loop.post_quit_task();
        message_loop.run();
        assert_eq!(&*client.messages.borrow(), &[b"one".to_vec(), b"two".to_vec()]);
    }

    #[test]
    fn destruction_sentinel_flips_once_the_drainer_completes() {
        let message_loop = MessageLoop::new().expect("loop");
        let (_a, b) = Channel::pair();
        let client = Rc::new(RecordingClient { messages: RefCell::new(Vec::new()) });
        let source = FixedMessages { messages: Vec::new() };
        let drainer = DataPipeDrainer::new(&message_loop, b.handle.clone(), source, Rc::clone(&client));
        let sentinel = drainer.destruction_sentinel();
        assert!(!sentinel.get());

        drop(message_loop);

        assert!(sentinel.get(), "the sentinel must flip once the loop's destruction completes the drainer");
    }
}
