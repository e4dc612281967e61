//! Spec §4.9's `Condition`: a `Lock` plus a separate waiter queue.
//! `wait()` atomically releases the lock, suspends, and reacquires it
//! before returning — "atomically" here means the release and the park
//! happen with nothing else able to run on this single-threaded loop in
//! between, not that any OS-level atomicity is involved.

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::event_loop::EventLoop;
use crate::future::Future;
use crate::sync::lock::Lock;

struct Inner {
    waiters: Vec<Future<()>>,
    event_loop: EventLoop,
}

#[derive(Clone)]
pub struct Condition {
    lock: Lock,
    inner: Rc<RefCell<Inner>>,
}

impl Condition {
    pub fn new(event_loop: &EventLoop) -> Condition {
        Condition::with_lock(event_loop, Lock::new(event_loop))
    }

    /// Builds a `Condition` around an already-existing `Lock`, the way
    /// `asyncio.Condition(lock=...)` lets several conditions share one
    /// lock.
    pub fn with_lock(event_loop: &EventLoop, lock: Lock) -> Condition {
        Condition {
            lock,
            inner: Rc::new(RefCell::new(Inner {
                waiters: Vec::new(),
                event_loop: event_loop.clone(),
            })),
        }
    }

    pub fn lock(&self) -> &Lock {
        &self.lock
    }

    pub fn locked(&self) -> bool {
        self.lock.locked()
    }

    pub async fn acquire(&self) -> Result<()> {
        self.lock.acquire().await
    }

    pub fn release(&self) {
        self.lock.release();
    }

    /// Releases the held lock, suspends until `notify`/`notify_all` wakes
    /// this waiter, then reacquires the lock before returning. Caller must
    /// hold the lock when calling this (spec §4.9); not enforced at
    /// runtime since `Lock` carries no owner identity to check against.
    pub async fn wait(&self) -> Result<()> {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            let fut = inner.event_loop.create_future::<()>();
            inner.waiters.push(fut.clone());
            fut
        };
        self.lock.release();
        let result = waiter.await;
        self.lock.acquire().await?;
        result
    }

    /// Loops `wait()` until `predicate` holds, re-checking under the lock
    /// each time (spec §4.9).
    pub async fn wait_for<F>(&self, mut predicate: F) -> Result<()>
    where
        F: FnMut() -> bool,
    {
        while !predicate() {
            self.wait().await?;
        }
        Ok(())
    }

    /// Wakes up to `n` waiters. They still have to reacquire the lock
    /// before `wait()` returns to them (spec §4.9).
    pub fn notify(&self, n: usize) {
        let mut inner = self.inner.borrow_mut();
        let woken: Vec<_> = inner.waiters.drain(..n.min(inner.waiters.len())).collect();
        drop(inner);
        for waiter in woken {
            if !waiter.done() {
                waiter.set_result(());
            }
        }
    }

    pub fn notify_all(&self) {
        let count = self.inner.borrow().waiters.len();
        self.notify(count);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::task::Task;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn wait_releases_the_lock_and_reacquires_it_before_returning() {
        let event_loop = EventLoop::new().unwrap();
        let cond = Condition::new(&event_loop);
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let o1 = Rc::clone(&order);
        let waiter: Task<()> = Task::spawn(&event_loop, "waiter", {
            let cond = cond.clone();
            async move {
                cond.acquire().await?;
                o1.borrow_mut().push("acquired");
                cond.wait().await?;
                o1.borrow_mut().push("resumed");
                assert!(cond.locked());
                cond.release();
                Ok(())
            }
        });

        let o2 = Rc::clone(&order);
        let notifier: Task<()> = Task::spawn(&event_loop, "notifier", {
            let cond = cond.clone();
            async move {
                cond.acquire().await?;
                o2.borrow_mut().push("notifier has lock");
                cond.notify(1);
                cond.release();
                Ok(())
            }
        });

        event_loop.run_until_complete(&waiter.as_future()).unwrap();
        event_loop.run_until_complete(&notifier.as_future()).unwrap();
        assert_eq!(*order.borrow(), vec!["acquired", "notifier has lock", "resumed"]);
    }

    #[test]
    fn wait_for_loops_until_the_predicate_holds() {
        let event_loop = EventLoop::new().unwrap();
        let cond = Condition::new(&event_loop);
        let flag = Rc::new(StdRefCell::new(false));

        let flag_waiter = Rc::clone(&flag);
        let waiter: Task<()> = Task::spawn(&event_loop, "waiter", {
            let cond = cond.clone();
            async move {
                cond.acquire().await?;
                cond.wait_for(|| *flag_waiter.borrow()).await?;
                cond.release();
                Ok(())
            }
        });

        let flag_setter = Rc::clone(&flag);
        let setter: Task<()> = Task::spawn(&event_loop, "setter", {
            let cond = cond.clone();
            async move {
                cond.acquire().await?;
                *flag_setter.borrow_mut() = true;
                cond.notify_all();
                cond.release();
                Ok(())
            }
        });

        event_loop.run_until_complete(&waiter.as_future()).unwrap();
        event_loop.run_until_complete(&setter.as_future()).unwrap();
        assert!(*flag.borrow());
    }

    #[test]
    fn notify_with_no_waiters_is_a_no_op() {
        let event_loop = EventLoop::new().unwrap();
        let cond = Condition::new(&event_loop);
        cond.notify(5);
        cond.notify_all();
    }
}
