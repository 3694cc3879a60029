// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

use thiserror::Error;

/// A specialized `Result` type for message loop operations that return a
/// message loop [`Error`][enum@Error] on failure.
pub type Result<T> = std::result::Result<T, Error>;

/// An error originating in the message loop.
///
/// This is an umbrella type for the small set of contract violations and
/// recoverable conditions the loop itself can observe. Future versions may
/// add additional variants.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// `remove_handler` (or an internal lookup) was given a key that is not
    /// currently registered, either because it never was or because it was
    /// already removed.
    #[error("handler key {0} is not registered")]
    BadKey(u64),

    /// A second loop was constructed on a thread that already has one.
    #[error("a message loop is already current on this thread")]
    AlreadyRunning,

    /// `add_handler` was called with an empty signal mask, which can never
    /// be satisfied.
    #[error("cannot register a handler with an empty signal mask")]
    EmptySignalMask,

    /// We are re-packaging an error from the platform's I/O or wait
    /// primitive without adding further detail in the message loop layer.
    #[error(transparent)]
    Io(#[from] std::io::Error),
}
