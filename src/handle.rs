//! C_data: `Handle` and `TimerHandle` from spec §3.

use std::cell::RefCell;
use std::cmp::Ordering;
use std::fmt;
use std::rc::Rc;

use crate::time::Deadline;

struct Inner {
    callback: RefCell<Option<Box<dyn FnOnce()>>>,
    cancelled: std::cell::Cell<bool>,
}

/// A scheduled callback. Created by `call_soon`/`call_later`/`call_at`;
/// immutable apart from `cancelled` (spec §3).
#[derive(Clone)]
pub struct Handle {
    inner: Rc<Inner>,
}

impl Handle {
    pub(crate) fn new(callback: Box<dyn FnOnce()>) -> Handle {
        Handle {
            inner: Rc::new(Inner {
                callback: RefCell::new(Some(callback)),
                cancelled: std::cell::Cell::new(false),
            }),
        }
    }

    /// Marks this handle cancelled. A cancelled handle still occupies its
    /// slot on the ready-queue or timer heap but is skipped when dispatched
    /// (spec §4.2 step 1 and step 4).
    pub fn cancel(&self) {
        self.inner.cancelled.set(true);
        // Drop the closure eagerly so anything it captured is released
        // without waiting for the (possibly long-lived) queue slot to drain.
        self.inner.callback.borrow_mut().take();
    }

    pub fn cancelled(&self) -> bool {
        self.inner.cancelled.get()
    }

    /// Runs the callback exactly once, if it hasn't been cancelled.
    pub(crate) fn run(&self) {
        if let Some(cb) = self.inner.callback.borrow_mut().take() {
            cb();
        }
    }
}

impl fmt::Debug for Handle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Handle")
            .field("cancelled", &self.cancelled())
            .finish()
    }
}

/// A `Handle` plus an absolute monotonic deadline, ordered by `when`
/// (earlier first), ties broken by insertion order (spec §3).
pub struct TimerHandle {
    pub(crate) when: Deadline,
    pub(crate) seq: u64,
    pub(crate) handle: Handle,
}

impl TimerHandle {
    pub fn cancel(&self) {
        self.handle.cancel();
    }

    pub fn cancelled(&self) -> bool {
        self.handle.cancelled()
    }

    pub fn when(&self) -> Deadline {
        self.when
    }
}

impl Clone for TimerHandle {
    fn clone(&self) -> Self {
        TimerHandle {
            when: self.when,
            seq: self.seq,
            handle: self.handle.clone(),
        }
    }
}

impl PartialEq for TimerHandle {
    fn eq(&self, other: &Self) -> bool {
        self.when == other.when && self.seq == other.seq
    }
}
impl Eq for TimerHandle {}

impl Ord for TimerHandle {
    /// Earlier deadlines first, ties by insertion order, for use in a
    /// `BinaryHeap` (a max-heap) via `Reverse`.
    fn cmp(&self, other: &Self) -> Ordering {
        self.when.cmp(&other.when).then(self.seq.cmp(&other.seq))
    }
}

impl PartialOrd for TimerHandle {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::Cell;
    use std::rc::Rc;
    use std::time::Duration;

    #[test]
    fn run_invokes_callback_exactly_once() {
        let count = Rc::new(Cell::new(0));
        let count_cb = Rc::clone(&count);
        let handle = Handle::new(Box::new(move || count_cb.set(count_cb.get() + 1)));
        handle.run();
        handle.run();
        assert_eq!(count.get(), 1);
    }

    #[test]
    fn cancel_prevents_the_callback_from_running() {
        let count = Rc::new(Cell::new(0));
        let count_cb = Rc::clone(&count);
        let handle = Handle::new(Box::new(move || count_cb.set(count_cb.get() + 1)));
        handle.cancel();
        handle.run();
        assert_eq!(count.get(), 0);
        assert!(handle.cancelled());
    }

    #[test]
    fn clone_shares_cancellation_state() {
        let handle = Handle::new(Box::new(|| {}));
        let clone = handle.clone();
        clone.cancel();
        assert!(handle.cancelled());
    }

    #[test]
    fn timer_handles_order_earlier_deadline_first() {
        let now = Deadline::now();
        let a = TimerHandle {
            when: now,
            seq: 0,
            handle: Handle::new(Box::new(|| {})),
        };
        let b = TimerHandle {
            when: now.plus(Duration::from_secs(1)),
            seq: 1,
            handle: Handle::new(Box::new(|| {})),
        };
        assert!(a < b);
    }

    #[test]
    fn timer_handles_break_ties_by_sequence() {
        let now = Deadline::now();
        let a = TimerHandle {
            when: now,
            seq: 0,
            handle: Handle::new(Box::new(|| {})),
        };
        let b = TimerHandle {
            when: now,
            seq: 1,
            handle: Handle::new(Box::new(|| {})),
        };
        assert!(a < b);
        assert_ne!(a, b);
    }
}
