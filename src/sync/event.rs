//! Spec §4.9's `Event`: a sticky flag. `set()` is idempotent — calling it
//! twice in a row behaves exactly like calling it once (spec §8).

use std::cell::RefCell;
use std::rc::Rc;

use crate::error::Result;
use crate::event_loop::EventLoop;
use crate::future::Future;

struct Inner {
    flag: bool,
    waiters: Vec<Future<()>>,
    event_loop: EventLoop,
}

#[derive(Clone)]
pub struct Event {
    inner: Rc<RefCell<Inner>>,
}

impl Event {
    pub fn new(event_loop: &EventLoop) -> Event {
        Event {
            inner: Rc::new(RefCell::new(Inner {
                flag: false,
                waiters: Vec::new(),
                event_loop: event_loop.clone(),
            })),
        }
    }

    pub fn is_set(&self) -> bool {
        self.inner.borrow().flag
    }

    /// Sets the flag and releases every current waiter. A `set()` on an
    /// already-set `Event` is a no-op past the flag write (spec §8).
    pub fn set(&self) {
        let waiters = {
            let mut inner = self.inner.borrow_mut();
            inner.flag = true;
            std::mem::take(&mut inner.waiters)
        };
        for waiter in waiters {
            if !waiter.done() {
                waiter.set_result(());
            }
        }
    }

    pub fn clear(&self) {
        self.inner.borrow_mut().flag = false;
    }

    /// Returns immediately if already set; otherwise parks until the next
    /// `set()`.
    pub async fn wait(&self) -> Result<()> {
        let waiter = {
            let mut inner = self.inner.borrow_mut();
            if inner.flag {
                None
            } else {
                let fut = inner.event_loop.create_future::<()>();
                inner.waiters.push(fut.clone());
                Some(fut)
            }
        };
        if let Some(fut) = waiter {
            fut.await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event_loop::EventLoop;
    use crate::task::Task;

    #[test]
    fn wait_on_an_already_set_event_does_not_suspend() {
        let event_loop = EventLoop::new().unwrap();
        let event = Event::new(&event_loop);
        event.set();
        let task: Task<()> = Task::spawn(&event_loop, "t", {
            let event = event.clone();
            async move { event.wait().await }
        });
        event_loop.run_until_complete(&task.as_future()).unwrap();
    }

    #[test]
    fn set_releases_every_current_waiter() {
        let event_loop = EventLoop::new().unwrap();
        let event = Event::new(&event_loop);
        let t1: Task<()> = Task::spawn(&event_loop, "w1", {
            let event = event.clone();
            async move { event.wait().await }
        });
        let t2: Task<()> = Task::spawn(&event_loop, "w2", {
            let event = event.clone();
            async move { event.wait().await }
        });
        event_loop.call_soon({
            let event = event.clone();
            move || event.set()
        });
        event_loop.run_until_complete(&t1.as_future()).unwrap();
        event_loop.run_until_complete(&t2.as_future()).unwrap();
        assert!(event.is_set());
    }

    #[test]
    fn clear_after_set_makes_the_next_wait_suspend_again() {
        let event_loop = EventLoop::new().unwrap();
        let event = Event::new(&event_loop);
        event.set();
        event.clear();
        assert!(!event.is_set());
    }

    #[test]
    fn set_is_idempotent() {
        let event_loop = EventLoop::new().unwrap();
        let event = Event::new(&event_loop);
        event.set();
        event.set();
        assert!(event.is_set());
    }
}
