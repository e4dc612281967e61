//! Spec §4.9's `Semaphore` and its bounded variant.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::future::Future;

struct Inner {
    value: usize,
    bound: Option<usize>,
    waiters: VecDeque<Future<()>>,
    event_loop: EventLoop,
}

/// A counting semaphore: `acquire` parks once the counter hits zero,
/// `release` always increments and wakes the longest-waiting parked task.
#[derive(Clone)]
pub struct Semaphore {
    inner: Rc<RefCell<Inner>>,
}

impl Semaphore {
    pub fn new(event_loop: &EventLoop, initial: usize) -> Semaphore {
        Semaphore {
            inner: Rc::new(RefCell::new(Inner {
                value: initial,
                bound: None,
                waiters: VecDeque::new(),
                event_loop: event_loop.clone(),
            })),
        }
    }

    pub fn locked(&self) -> bool {
        self.inner.borrow().value == 0
    }

    pub async fn acquire(&self) -> Result<()> {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            if inner.value > 0 {
                inner.value -= 1;
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

    /// Increments the counter and, if anyone is parked, hands the permit
    /// straight to the head of the queue instead of letting it go back
    /// through `value`.
    pub fn release(&self) -> Result<()> {
        let mut inner = self.inner.borrow_mut();
        if let Some(bound) = inner.bound {
            if inner.value >= bound && inner.waiters.is_empty() {
                return Err(Error::SemaphoreOverRelease);
            }
        }
        match inner.waiters.pop_front() {
            Some(waiter) => {
                drop(inner);
                waiter.set_result(());
            }
            None => {
                inner.value += 1;
            }
        }
        Ok(())
    }
}

/// A `Semaphore` that rejects a `release()` past its initial value, the
/// way `asyncio.BoundedSemaphore` catches the "released more than
/// acquired" programming error instead of letting the counter run away
/// (spec §4.9, §7).
#[derive(Clone)]
pub struct BoundedSemaphore {
    inner: Semaphore,
}

impl BoundedSemaphore {
    pub fn new(event_loop: &EventLoop, initial: usize) -> BoundedSemaphore {
        let sem = Semaphore::new(event_loop, initial);
        sem.inner.borrow_mut().bound = Some(initial);
        BoundedSemaphore { inner: sem }
    }

    pub fn locked(&self) -> bool {
        self.inner.locked()
    }

    pub async fn acquire(&self) -> Result<()> {
        self.inner.acquire().await
    }

    pub fn release(&self) -> Result<()> {
        self.inner.release()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::task::Task;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn acquire_below_the_initial_value_does_not_suspend() {
        let event_loop = EventLoop::new().unwrap();
        let sem = Semaphore::new(&event_loop, 2);
        let task: Task<()> = Task::spawn(&event_loop, "t", {
            let sem = sem.clone();
            async move { sem.acquire().await }
        });
        event_loop.run_until_complete(&task.as_future()).unwrap();
        assert!(!sem.locked());
    }

    #[test]
    fn acquire_at_zero_parks_until_a_release() {
        let event_loop = EventLoop::new().unwrap();
        let sem = Semaphore::new(&event_loop, 1);
        let first: Task<()> = Task::spawn(&event_loop, "first", {
            let sem = sem.clone();
            async move { sem.acquire().await }
        });
        event_loop.run_until_complete(&first.as_future()).unwrap();
        assert!(sem.locked());

        let second: Task<()> = Task::spawn(&event_loop, "second", {
            let sem = sem.clone();
            async move { sem.acquire().await }
        });
        event_loop.call_soon({
            let sem = sem.clone();
            move || sem.release().unwrap()
        });
        event_loop.run_until_complete(&second.as_future()).unwrap();
    }

    #[test]
    fn bounded_semaphore_rejects_an_over_release() {
        let event_loop = EventLoop::new().unwrap();
        let sem = BoundedSemaphore::new(&event_loop, 1);
        assert!(sem.release().is_err());
    }

    #[test]
    fn bounded_semaphore_allows_release_matching_each_acquire() {
        let event_loop = EventLoop::new().unwrap();
        let sem = BoundedSemaphore::new(&event_loop, 2);
        let task: Task<()> = Task::spawn(&event_loop, "t", {
            let sem = sem.clone();
            async move { sem.acquire().await }
        });
        event_loop.run_until_complete(&task.as_future()).unwrap();
        assert!(sem.release().is_ok());
    }

    #[test]
    fn release_hands_the_permit_to_the_longest_waiting_task() {
        let event_loop = EventLoop::new().unwrap();
        let sem = Semaphore::new(&event_loop, 0);
        let order = Rc::new(StdRefCell::new(Vec::new()));

        let o1 = Rc::clone(&order);
        let t1: Task<()> = Task::spawn(&event_loop, "t1", {
            let sem = sem.clone();
            async move {
                sem.acquire().await?;
                o1.borrow_mut().push(1);
                Ok(())
            }
        });
        let o2 = Rc::clone(&order);
        let t2: Task<()> = Task::spawn(&event_loop, "t2", {
            let sem = sem.clone();
            async move {
                sem.acquire().await?;
                o2.borrow_mut().push(2);
                Ok(())
            }
        });

        sem.release().unwrap();
        event_loop.run_until_complete(&t1.as_future()).unwrap();
        sem.release().unwrap();
        event_loop.run_until_complete(&t2.as_future()).unwrap();
        assert_eq!(*order.borrow(), vec![1, 2]);
    }
}
