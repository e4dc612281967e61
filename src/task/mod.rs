//! C5: `Task`, the coroutine driver from spec §4.4.
//!
//! A `Task` owns a real `Pin<Box<dyn std::future::Future>>` built from user
//! `async`/`.await` code and steps it via a hand-rolled single-threaded
//! `Waker` (`RawWaker`/`RawWakerVTable` over an `Rc`), exactly the way a
//! no-std executor would — the difference from a generic executor is that
//! every wakeup re-enters through the owning loop's `call_soon` rather than
//! stepping inline (spec §4.4 step 2: "a task never runs except as a
//! callback"), and that each step records which sub-future it suspended on
//! into `fut_waiter` so `cancel()` has something concrete to forward to.

pub mod helpers;

use std::cell::RefCell;
use std::future::Future as StdFuture;
use std::panic::Location;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker as StdWaker};

use crate::debug;
use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::future::{AnyFuture, Future, WaiterSink, CURRENT_WAITER_SINK};

type Coroutine<T> = Pin<Box<dyn StdFuture<Output = Result<T, Error>>>>;

struct Inner<T> {
    coroutine: RefCell<Option<Coroutine<T>>>,
    fut_waiter: RefCell<Option<AnyFuture>>,
    must_cancel: std::cell::Cell<bool>,
    cancel_message: RefCell<Option<String>>,
    done: Future<T>,
    event_loop: EventLoop,
    name: RefCell<String>,
    /// Only populated when [`debug::enabled`]; used by `Drop` to report
    /// where a task that never finished was created (spec §6).
    created_at: Option<&'static Location<'static>>,
}

/// A scheduled unit of work driving a single `async` body to completion.
/// Cloning a `Task` clones the handle, not the underlying work (spec §4.4:
/// a `Task` is the `Future`-shaped result of scheduling a coroutine).
pub struct Task<T> {
    inner: Rc<Inner<T>>,
}

impl<T> Clone for Task<T> {
    fn clone(&self) -> Self {
        Task {
            inner: Rc::clone(&self.inner),
        }
    }
}

impl<T: Clone + 'static> Task<T> {
    /// Wraps a coroutine and schedules its first step via `call_soon`
    /// (spec §4.4 step 1: a `Task` never runs synchronously at creation).
    #[track_caller]
    pub fn spawn<F>(event_loop: &EventLoop, name: impl Into<String>, fut: F) -> Task<T>
    where
        F: StdFuture<Output = Result<T, Error>> + 'static,
    {
        let task = Task {
            inner: Rc::new(Inner {
                coroutine: RefCell::new(Some(Box::pin(fut))),
                fut_waiter: RefCell::new(None),
                must_cancel: std::cell::Cell::new(false),
                cancel_message: RefCell::new(None),
                done: Future::new(event_loop),
                event_loop: event_loop.clone(),
                name: RefCell::new(name.into()),
                created_at: debug::enabled().then(Location::caller),
            }),
        };
        task.schedule_step();
        task
    }

    pub fn name(&self) -> String {
        self.inner.name.borrow().clone()
    }

    pub fn set_name(&self, name: impl Into<String>) {
        *self.inner.name.borrow_mut() = name.into();
    }

    pub fn done(&self) -> bool {
        self.inner.done.done()
    }

    pub fn cancelled(&self) -> bool {
        self.inner.done.cancelled()
    }

    pub fn result(&self) -> Result<T, Error> {
        self.inner.done.result()
    }

    /// Exposes the underlying `Future<T>` a `Task` resolves, the way spec
    /// §4.4 describes a `Task` as "the `Future`-shaped result of scheduling
    /// a coroutine" — useful to pass a `Task` anywhere a plain `Future` is
    /// expected, e.g. `EventLoop::run_until_complete`.
    pub fn as_future(&self) -> Future<T> {
        self.inner.done.clone()
    }

    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Task<T>) + 'static,
    {
        let this = self.clone();
        self.inner.done.add_done_callback(move |_| callback(&this));
    }

    /// Requests cancellation. If the task is currently suspended on a known
    /// sub-future, that future is cancelled directly; otherwise a
    /// `must_cancel` flag is set and honoured on the next step (spec §4.4
    /// step 5 / cancellation invariant).
    pub fn cancel(&self, message: Option<String>) -> bool {
        if self.done() {
            return false;
        }
        *self.inner.cancel_message.borrow_mut() = message;
        if let Some(waiter) = self.inner.fut_waiter.borrow().clone() {
            if waiter.cancel() {
                return true;
            }
        }
        self.inner.must_cancel.set(true);
        true
    }

    fn schedule_step(&self) {
        let this = self.clone();
        self.inner.event_loop.call_soon(move || this.step());
    }

    fn waker(&self) -> StdWaker {
        let raw = Rc::into_raw(Rc::clone(&self.inner)) as *const ();
        unsafe { StdWaker::from_raw(RawWaker::new(raw, vtable::<T>())) }
    }

    fn step(&self) {
        if self.done() {
            return;
        }

        // spec §4.4 step 1: a cancellation requested while the task had no
        // `fut_waiter` to forward it to (e.g. between `spawn` and its first
        // `step`) is honoured here instead of resuming the coroutine — the
        // nearest equivalent, without generator `throw`, to injecting
        // `CancelledError` at the next suspension point.
        if self.inner.must_cancel.get() {
            self.inner.must_cancel.set(false);
            self.inner.coroutine.borrow_mut().take();
            self.inner.fut_waiter.borrow_mut().take();
            self.inner.done.cancel();
            return;
        }

        let waiter_sink: Weak<dyn WaiterSink> = Rc::downgrade(&self.inner) as Weak<dyn WaiterSink>;
        CURRENT_WAITER_SINK.with(|stack| stack.borrow_mut().push(waiter_sink));
        let waker = self.waker();
        let mut cx = Context::from_waker(&waker);

        let poll_result = {
            let mut slot = self.inner.coroutine.borrow_mut();
            match slot.as_mut() {
                Some(coro) => coro.as_mut().poll(&mut cx),
                None => return,
            }
        };

        CURRENT_WAITER_SINK.with(|stack| {
            stack.borrow_mut().pop();
        });

        match poll_result {
            Poll::Pending => {
                // The sub-future registered itself via `fut_waiter` during
                // `poll`; nothing more to do until its waker fires, which
                // re-enters through `call_soon` (spec §4.4 step 2).
            }
            Poll::Ready(result) => {
                self.inner.coroutine.borrow_mut().take();
                self.inner.fut_waiter.borrow_mut().take();
                match result {
                    Ok(value) => self.inner.done.set_result(value),
                    Err(Error::Cancelled) => {
                        self.inner.done.cancel();
                    }
                    Err(err) => self.inner.done.set_exception(err),
                }
            }
        }
    }
}

impl<T: Clone + 'static> WaiterSink for Inner<T> {
    fn set_waiter(&self, waiter: AnyFuture) {
        *self.fut_waiter.borrow_mut() = Some(waiter);
    }
}

impl<T: Clone + 'static> Drop for Inner<T> {
    /// Debug-mode echo of asyncio's "Task was destroyed but it is pending!"
    /// warning: fires only when `RUST_CORRAL_DEBUG` was set at `spawn` time,
    /// since that's the only case `created_at` was captured at all.
    fn drop(&mut self) {
        if self.done.done() {
            return;
        }
        if let Some(_loc) = self.created_at {
            #[cfg(feature = "log")]
            log::warn!(
                "corral: task {:?} was destroyed while still pending (created at {_loc})",
                self.name.borrow()
            );
        }
    }
}

fn vtable<T: Clone + 'static>() -> &'static RawWakerVTable {
    &RawWakerVTable::new(clone::<T>, wake::<T>, wake_by_ref::<T>, drop::<T>)
}

unsafe fn clone<T: Clone + 'static>(data: *const ()) -> RawWaker {
    let inner = data as *const Inner<T>;
    Rc::increment_strong_count(inner);
    RawWaker::new(data, vtable::<T>())
}

unsafe fn wake<T: Clone + 'static>(data: *const ()) {
    let inner = Rc::from_raw(data as *const Inner<T>);
    schedule_from_inner(&inner);
}

unsafe fn wake_by_ref<T: Clone + 'static>(data: *const ()) {
    let inner = Rc::from_raw(data as *const Inner<T>);
    schedule_from_inner(&inner);
    std::mem::forget(inner);
}

unsafe fn drop<T: Clone + 'static>(data: *const ()) {
    std::mem::drop(Rc::from_raw(data as *const Inner<T>));
}

fn schedule_from_inner<T: Clone + 'static>(inner: &Rc<Inner<T>>) {
    let task = Task {
        inner: Rc::clone(inner),
    };
    task.schedule_step();
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::helpers::sleep;
    use std::time::Duration;

    #[test]
    fn a_task_never_runs_synchronously_at_spawn() {
        let event_loop = EventLoop::new().unwrap();
        let ran = Rc::new(RefCell::new(false));
        let ran_cb = Rc::clone(&ran);
        let _task: Task<()> = Task::spawn(&event_loop, "t", async move {
            *ran_cb.borrow_mut() = true;
            Ok(())
        });
        assert!(!*ran.borrow());
    }

    #[test]
    fn run_until_complete_returns_the_coroutines_value() {
        let event_loop = EventLoop::new().unwrap();
        let task: Task<u32> = Task::spawn(&event_loop, "t", async { Ok(21 * 2) });
        let result = event_loop.run_until_complete(&task.as_future()).unwrap();
        assert_eq!(result, 42);
    }

    #[test]
    fn a_returned_error_surfaces_through_result() {
        let event_loop = EventLoop::new().unwrap();
        let task: Task<()> = Task::spawn(&event_loop, "t", async { Err(Error::Parse("boom".into())) });
        let err = event_loop.run_until_complete(&task.as_future()).unwrap_err();
        assert!(matches!(err, Error::Parse(_)));
    }

    #[test]
    fn awaiting_a_future_suspends_and_resumes_on_the_next_iteration() {
        let event_loop = EventLoop::new().unwrap();
        let inner_fut: Future<i32> = event_loop.create_future();
        let resolver = inner_fut.clone();
        event_loop.call_soon(move || resolver.set_result(99));

        let task: Task<i32> = Task::spawn(&event_loop, "t", async move { inner_fut.await });
        let result = event_loop.run_until_complete(&task.as_future()).unwrap();
        assert_eq!(result, 99);
    }

    #[test]
    fn cancel_before_first_step_is_honoured_at_the_next_step() {
        let event_loop = EventLoop::new().unwrap();
        let task: Task<()> = Task::spawn(&event_loop, "t", async {
            std::future::pending::<()>().await;
            Ok(())
        });
        assert!(task.cancel(None));
        let result = event_loop.run_until_complete(&task.as_future());
        assert!(matches!(result, Err(Error::Cancelled)));
        assert!(task.cancelled());
    }

    #[test]
    fn cancel_while_suspended_on_a_sub_future_forwards_to_it() {
        let event_loop = EventLoop::new().unwrap();
        let event_loop_for_task = event_loop.clone();
        let task: Task<i32> = Task::spawn(&event_loop, "t", async move {
            sleep(&event_loop_for_task, Duration::from_secs(10), 0).await
        });

        // Let the task reach its first suspension point before cancelling.
        event_loop.call_soon({
            let task = task.clone();
            move || {
                task.cancel(None);
            }
        });
        let result = event_loop.run_until_complete(&task.as_future());
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[test]
    fn done_callback_observes_completion() {
        let event_loop = EventLoop::new().unwrap();
        let task: Task<u32> = Task::spawn(&event_loop, "t", async { Ok(1) });
        let observed = Rc::new(RefCell::new(false));
        let observed_cb = Rc::clone(&observed);
        task.add_done_callback(move |_| *observed_cb.borrow_mut() = true);
        event_loop.run_until_complete(&task.as_future()).unwrap();
        assert!(*observed.borrow());
    }
}
