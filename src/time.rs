//! C2: the monotonic time source used for scheduling.
//!
//! Spec §4.2 calls for `time()` returning monotonic seconds and for all
//! scheduling to happen against absolute deadlines internally. We use
//! `std::time::Instant` as the monotonic clock and a zero-cost `Deadline`
//! newtype so the timer heap (`event_loop.rs`) never has to reason about
//! `Duration` arithmetic directly.

use std::time::{Duration, Instant};

/// An absolute point on the monotonic clock, used as a `TimerHandle`'s
/// `when` per spec §3.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Debug, Hash)]
pub struct Deadline(Instant);

impl Deadline {
    pub fn now() -> Deadline {
        Deadline(Instant::now())
    }

    pub fn after(delay: Duration) -> Deadline {
        Deadline(Instant::now() + delay)
    }

    pub fn at(instant: Instant) -> Deadline {
        Deadline(instant)
    }

    /// How long remains until this deadline, `Duration::ZERO` if it has
    /// already passed.
    pub fn remaining(self) -> Duration {
        self.0.saturating_duration_since(Instant::now())
    }

    pub fn has_elapsed(self) -> bool {
        self.0 <= Instant::now()
    }

    pub fn plus(self, delay: Duration) -> Deadline {
        Deadline(self.0 + delay)
    }

    pub(crate) fn instant(self) -> Instant {
        self.0
    }
}
