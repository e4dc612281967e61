//! Spec §4.9's `Lock`: exclusive, non-reentrant, FIFO-fair.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::Result;
use crate::event_loop::EventLoop;
use crate::future::Future;

struct Inner {
    locked: bool,
    waiters: VecDeque<Future<()>>,
    event_loop: EventLoop,
}

/// A mutual-exclusion primitive. `acquire()` suspends until the lock is
/// free; `release()` hands it directly to the next waiter rather than
/// reopening a race for it (spec §4.9: "`release()` resolves the head
/// waiter").
#[derive(Clone)]
pub struct Lock {
    inner: Rc<RefCell<Inner>>,
}

impl Lock {
    pub fn new(event_loop: &EventLoop) -> Lock {
        Lock {
            inner: Rc::new(RefCell::new(Inner {
                locked: false,
                waiters: VecDeque::new(),
                event_loop: event_loop.clone(),
            })),
        }
    }

    pub fn locked(&self) -> bool {
        self.inner.borrow().locked
    }

    /// Returns immediately if the lock was free; otherwise parks behind
    /// whoever is already waiting (spec §4.9).
    pub async fn acquire(&self) -> Result<()> {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            if !inner.locked {
                inner.locked = true;
                None
            } else {
                let fut = inner.event_loop.create_future::<()>();
                inner.waiters.push_back(fut.clone());
                Some(fut)
            }
        };
        if let Some(fut) = waiter {
            fut.await?;
        }
        Ok(())
    }

    /// Hands the lock to the next waiter, if any, or marks it free.
    /// Spec §4.9: "the release path must run on every exit from the
    /// protected region" — callers are expected to pair this with
    /// `acquire` via a scope guard of their own (e.g. a `defer`-style
    /// helper or `Drop` wrapper), since `corral` has no generic RAII guard
    /// to hand back without committing to a lifetime shape.
    pub fn release(&self) {
        let mut inner = self.inner.borrow_mut();
        assert!(inner.locked, "release() called on an unlocked Lock");
        match inner.waiters.pop_front() {
            Some(waiter) => {
                // Ownership passes straight to the next waiter; `locked`
                // stays `true` the whole time, so nobody else can slip in
                // between `release` and the waiter's resumption.
                drop(inner);
                waiter.set_result(());
            }
            None => {
                inner.locked = false;
            }
        }
    }
}
