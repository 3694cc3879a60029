// Copyright (c) Microsoft Corporation.
// Licensed under the MIT License.

//! The loop's notion of time: a monotonic clock producing absolute time
//! points, plus a [`Deadline`] type with a sentinel "never" value so the
//! dispatcher can treat "no timeout" and "a timeout far in the future" the
//! same way without resorting to a magic duration.

use std::time::{Duration, Instant};

/// The monotonic clock the loop uses for task target-times and handler
/// deadlines. A thin wrapper so call sites read `TimeBase::now()` rather
/// than reaching for `Instant::now()` directly, matching the rest of the
/// public surface.
#[derive(Debug, Clone, Copy)]
pub struct TimeBase;

impl TimeBase {
    /// Returns the current monotonic time point.
    #[must_use]
    pub fn now() -> Instant {
        Instant::now()
    }
}

/// An absolute point in time, or the sentinel meaning "never."
///
/// Ordering treats `Never` as greater than any concrete instant, so taking
/// the minimum of several deadlines behaves as expected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Deadline {
    /// A concrete point in time.
    At(Instant),
    /// No deadline at all.
    Never,
}

impl Deadline {
    /// A deadline that has already elapsed, useful for "due now" tasks.
    #[must_use]
    pub fn now() -> Self {
        Self::At(TimeBase::now())
    }

    /// Whether this deadline is at or before `now`.
    #[must_use]
    pub fn has_elapsed(self, now: Instant) -> bool {
        match self {
            Self::At(at) => at <= now,
            Self::Never => false,
        }
    }

    /// The smaller of two deadlines, treating `Never` as larger than any
    /// concrete instant.
    #[must_use]
    pub fn min(self, other: Self) -> Self {
        match (self, other) {
            (Self::Never, other) => other,
            (this, Self::Never) => this,
            (Self::At(a), Self::At(b)) => Self::At(a.min(b)),
        }
    }

    /// The duration from `now` until this deadline, or `None` if it never
    /// elapses (the caller should wait indefinitely).
    #[must_use]
    pub fn duration_since(self, now: Instant) -> Option<Duration> {
        match self {
            Self::At(at) => Some(at.saturating_duration_since(now)),
            Self::Never => None,
        }
    }
}

impl From<Instant> for Deadline {
    fn from(at: Instant) -> Self {
        Self::At(at)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn never_loses_to_any_instant() {
        let at = Deadline::At(TimeBase::now());
        assert_eq!(at.min(Deadline::Never), at);
        assert_eq!(Deadline::Never.min(at), at);
    }

    #[test]
    fn never_never_elapses() {
        assert!(!Deadline::Never.has_elapsed(TimeBase::now()));
    }

    #[test]
    fn past_instant_has_elapsed() {
        let past = Deadline::At(TimeBase::now());
        std::thread::sleep(Duration::from_millis(1));
        assert!(past.has_elapsed(TimeBase::now()));
    }
}
