// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! Routes requests arriving on a single handle to one of a small table of
//! named request handlers, the way a virtual filesystem channel dispatches
//! an incoming open/read/write request to the handler registered for its
//! path.

use std::cell::{Cell, RefCell};
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use message_loop::{Handle, Handler, HandlerKey, MessageLoop, Signals, Status};

/// A source of incoming `(route name, payload)` requests.
pub trait VfsRequestSource {
    /// Reads the next request, if one is available.
    fn try_read_request(&mut self) -> io::Result<Option<(String, Vec<u8>)>>;
}

/// Where a [`VfsDispatcher`] sends a handler's response.
pub trait VfsResponder {
    /// Delivers `response` for the request that was routed to `name`.
    fn respond(&self, name: &str, response: Vec<u8>);
}

/// A single named route's handler.
pub trait VfsRequestHandler {
    /// Produces a response for `payload`.
    fn handle(&self, payload: &[u8]) -> Vec<u8>;
}

/// Dispatches requests arriving on one handle to per-route handlers.
pub struct VfsDispatcher<S, R> {
    source: RefCell<S>,
    responder: Rc<R>,
    routes: RefCell<HashMap<String, Rc<dyn VfsRequestHandler>>>,
    key: Cell<Option<HandlerKey>>,
}

impl<S, R> VfsDispatcher<S, R>
where
    S: VfsRequestSource + 'static,
    R: VfsResponder + 'static,
{
    /// Registers a dispatcher for `handle` on `message_loop`, with no
    /// routes yet — add them with [`Self::add_route`] before requests for
    /// them arrive.
    pub fn new(message_loop: &MessageLoop, handle: Handle, source: S, responder: Rc<R>) -> Rc<Self> {
        let this = Rc::new(Self {
            source: RefCell::new(source),
            responder,
            routes: RefCell::new(HashMap::new()),
            key: Cell::new(None),
        });
        let key = message_loop
            .add_handler(Rc::clone(&this) as Rc<dyn Handler>, handle, Signals::READABLE, message_loop::Deadline::Never)
            .expect("READABLE is never an empty mask");
        this.key.set(Some(key));
        this
    }

    /// Registers `handler` to serve requests routed to `name`.
    pub fn add_route(&self, name: impl Into<String>, handler: Rc<dyn VfsRequestHandler>) {
        self.routes.borrow_mut().insert(name.into(), handler);
    }

    fn drain(&self) {
        loop {
            match self.source.borrow_mut().try_read_request() {
                Ok(Some((name, payload))) => {
                    let handler = self.routes.borrow().get(&name).cloned();
                    match handler {
                        Some(handler) => {
                            let response = handler.handle(&payload);
                            self.responder.respond(&name, response);
                        }
                        None => tracing::warn!(route = %name, "no handler registered for route"),
                    }
                }
                Ok(None) => return,
                Err(error) if error.kind() == io::ErrorKind::WouldBlock => return,
                Err(error) => {
                    tracing::warn!(%error, "vfs dispatcher read failed");
                    return;
                }
            }
        }
    }
}

impl<S, R> Handler for VfsDispatcher<S, R>
where
    S: VfsRequestSource + 'static,
    R: VfsResponder + 'static,
{
    fn on_ready(&self, _message_loop: &MessageLoop, _handle: &Handle, _pending_bits: Signals, _count: usize) {
        self.drain();
    }

    fn on_error(&self, message_loop: &MessageLoop, _handle: &Handle, status: Status) {
        if status == Status::LoopGone {
            if let Some(key) = self.key.take() {
                let _ = message_loop.remove_handler(key);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use message_loop::Channel;
    use std::cell::RefCell as StdRefCell;

    struct FixedRequests {
        requests: Vec<(String, Vec<u8>)>,
    }

    impl VfsRequestSource for FixedRequests {
        fn try_read_request(&mut self) -> io::Result<Option<(String, Vec<u8>)>> {
            if self.requests.is_empty() {
                Ok(None)
            } else {
                Ok(Some(self.requests.remove(0)))
            }
        }
    }

    struct RecordingResponder {
        responses: StdRefCell<Vec<(String, Vec<u8>)>>,
    }

    impl VfsResponder for RecordingResponder {
        fn respond(&self, name: &str, response: Vec<u8>) {
            self.responses.borrow_mut().push((name.to_owned(), response));
        }
    }

    struct Echo;
    impl VfsRequestHandler for Echo {
        fn handle(&self, payload: &[u8]) -> Vec<u8> {
            payload.to_vec()
        }
    }

    #[test]
    fn routes_requests_to_the_matching_handler() {
        let message_loop = MessageLoop::new().expect("loop");
        let (a, b) = Channel::pair();
        let responder = Rc::new(RecordingResponder { responses: StdRefCell::new(Vec::new()) });
        let source = FixedRequests { requests: vec![("echo".to_owned(), b"hi".to_vec())] };
        let dispatcher = VfsDispatcher::new(&message_loop, b.handle.clone(), source, Rc::clone(&responder));
        dispatcher.add_route("echo", Rc::new(Echo));
        a.write_empty();
        message_loop.post_quit_task();
        message_loop.run();
        assert_eq!(&*responder.responses.borrow(), &[("echo".to_owned(), b"hi".to_vec())]);
    }
}
