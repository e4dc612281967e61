//! Spec §4.4 "Helpers built on the driver", grounded on `tulip/tasks.py`'s
//! `sleep`/`wait`/`wait_for`/`as_completed`/`gather` (the `asyncio`
//! ancestor this crate's event model is distilled from — see
//! `examples/original_source/tulip/tasks.py`). `shield` additionally
//! grounds on the same module's `async()` wrapping behaviour.
//!
//! Everything here is generic over an [`Awaitable`] rather than hard-coded
//! to `Task<T>`, since spec §4.4 describes these helpers operating over a
//! mix of bare `Future`s and `Task`s ("Coroutines will be wrapped in
//! Tasks").

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::future::Future;
use crate::task::Task;

/// Narrow capability `wait`/`gather`/`as_completed` need: something that
/// completes once, can be cancelled, and notifies a callback on
/// completion. Implemented for both `Future<T>` and `Task<T>` so callers
/// can mix bare futures (e.g. `sleep`) with spawned tasks in one `gather`,
/// matching `tulip.tasks.async()`'s "wrap coroutines, pass futures through"
/// behaviour.
pub trait Awaitable<T>: Clone + 'static {
    fn is_done(&self) -> bool;
    fn is_cancelled(&self) -> bool;
    fn request_cancel(&self) -> bool;
    fn take_result(&self) -> Result<T>;
    fn on_done(&self, callback: impl FnOnce() + 'static);
}

impl<T: Clone + 'static> Awaitable<T> for Future<T> {
    fn is_done(&self) -> bool {
        self.done()
    }
    fn is_cancelled(&self) -> bool {
        self.cancelled()
    }
    fn request_cancel(&self) -> bool {
        self.cancel()
    }
    fn take_result(&self) -> Result<T> {
        self.result()
    }
    fn on_done(&self, callback: impl FnOnce() + 'static) {
        self.add_done_callback(move |_| callback());
    }
}

impl<T: Clone + 'static> Awaitable<T> for Task<T> {
    fn is_done(&self) -> bool {
        self.done()
    }
    fn is_cancelled(&self) -> bool {
        self.cancelled()
    }
    fn request_cancel(&self) -> bool {
        self.cancel(None)
    }
    fn take_result(&self) -> Result<T> {
        self.result()
    }
    fn on_done(&self, callback: impl FnOnce() + 'static) {
        self.add_done_callback(move |_| callback());
    }
}

/// Completes after `delay`, with `value` — spec §4.4's `sleep`, grounded on
/// `tulip.tasks.sleep`. Cancelling the returned future cancels the
/// underlying timer handle too, so a `wait_for`/`shield` wrapper that
/// abandons this early doesn't leave a dangling callback on the heap.
pub fn sleep<T: Clone + 'static>(event_loop: &EventLoop, delay: Duration, value: T) -> Future<T> {
    let fut = event_loop.create_future::<T>();
    let handle = {
        let fut = fut.clone();
        event_loop.call_later(delay, move || {
            if !fut.done() {
                fut.set_result(value);
            }
        })
    };
    fut.add_done_callback(move |_| handle.cancel());
    fut
}

/// Which completion condition `wait`/`_wait` stops on (spec §4.4).
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub enum ReturnWhen {
    AllCompleted,
    FirstCompleted,
    FirstException,
}

/// Spec §4.4's `wait`: waits on `items` until `return_when` is satisfied or
/// `timeout` elapses, returning `(done, pending)` without raising on
/// timeout — unlike `wait_for`, a timeout here is not an error (spec:
/// "the overall timeout cancels the gate (not the children)").
pub async fn wait<T, A>(
    event_loop: &EventLoop,
    items: Vec<A>,
    timeout: Option<Duration>,
    return_when: ReturnWhen,
) -> Result<(Vec<A>, Vec<A>)>
where
    T: Clone + 'static,
    A: Awaitable<T>,
{
    if items.is_empty() {
        return Err(Error::EmptyWaitSet);
    }

    let gate = event_loop.create_future::<()>();
    let timeout_handle = timeout.map(|d| {
        let gate = gate.clone();
        event_loop.call_later(d, move || {
            if !gate.done() {
                gate.cancel();
            }
        })
    });

    let counter = Rc::new(RefCell::new(items.len()));
    for item in &items {
        let gate = gate.clone();
        let counter = Rc::clone(&counter);
        let item_for_check = item.clone();
        let return_when = return_when;
        item.on_done(move || {
            *counter.borrow_mut() -= 1;
            let satisfied = *counter.borrow() == 0
                || return_when == ReturnWhen::FirstCompleted
                || (return_when == ReturnWhen::FirstException
                    && !item_for_check.is_cancelled()
                    && item_for_check.take_result().is_err());
            if satisfied && !gate.done() {
                gate.cancel();
            }
        });
    }

    // The gate only ever finishes via cancellation (it is never resolved
    // with a value); a pending `CancelledError` here just means "stop
    // waiting", not "the wait itself failed" (spec §4.4, `tulip._wait`).
    let _ = gate.await;
    if let Some(h) = timeout_handle {
        h.cancel();
    }

    let mut done = Vec::new();
    let mut pending = Vec::new();
    for item in items {
        if item.is_done() {
            done.push(item);
        } else {
            pending.push(item);
        }
    }
    Ok((done, pending))
}

/// Spec §4.4's `wait_for`: cancels `item` on timeout and raises
/// `Error::Timeout`; otherwise returns its result.
pub async fn wait_for<T, A>(event_loop: &EventLoop, item: A, timeout: Duration) -> Result<T>
where
    T: Clone + 'static,
    A: Awaitable<T>,
{
    let (done, _pending) = wait(event_loop, vec![item.clone()], Some(timeout), ReturnWhen::FirstCompleted).await?;
    if !done.is_empty() {
        return item.take_result();
    }
    item.request_cancel();
    // Give the cancellation one more loop iteration to land before giving
    // up on ever observing it (mirrors `_wait`'s own single settle pass).
    let settle = event_loop.create_future::<()>();
    {
        let settle = settle.clone();
        event_loop.call_soon(move || {
            if !settle.done() {
                settle.set_result(());
            }
        });
    }
    let _ = settle.await;
    Err(Error::Timeout)
}

/// Spec §4.4's `gather`: aggregates results from `items` in their original
/// order. When `return_exceptions` is `false`, the first exception (or
/// cancellation) cancels every other item and propagates immediately;
/// otherwise every outcome is collected as `Result<T>`.
pub async fn gather<T, A>(event_loop: &EventLoop, items: Vec<A>, return_exceptions: bool) -> Result<Vec<Result<T>>>
where
    T: Clone + 'static,
    A: Awaitable<T>,
{
    if items.is_empty() {
        return Ok(Vec::new());
    }

    if return_exceptions {
        let (done, _pending) = wait(event_loop, items, None, ReturnWhen::AllCompleted).await?;
        return Ok(done.iter().map(|i| i.take_result()).collect());
    }

    // `_wait`'s gate fires either when every item is done or, with
    // `FirstException`, the moment one item finishes with an exception —
    // in the latter case `pending` is exactly the siblings still running
    // (spec §4.4: "the first exception cancels siblings and propagates").
    let (done, pending) = wait(event_loop, items, None, ReturnWhen::FirstException).await?;
    let results: Vec<Result<T>> = done.iter().map(|i| i.take_result()).collect();
    if let Some(err) = results.iter().find_map(|r| r.as_ref().err().cloned()) {
        for item in &pending {
            item.request_cancel();
        }
        return Err(err);
    }
    Ok(results)
}

/// Spec §4.4's `shield`: cancelling the returned future does not cancel
/// `item`; cancellation of `item` itself still propagates out through the
/// returned future.
pub fn shield<T, A>(event_loop: &EventLoop, item: A) -> Future<T>
where
    T: Clone + 'static,
    A: Awaitable<T>,
{
    let outer = event_loop.create_future::<T>();
    let outer_for_cb = outer.clone();
    item.on_done(move || {
        if outer_for_cb.done() {
            return;
        }
        match item.take_result() {
            Ok(v) => outer_for_cb.set_result(v),
            Err(e) => outer_for_cb.set_exception(e),
        }
    });
    outer
}

/// Spec §4.4's `as_completed`: yields outcomes in completion order rather
/// than input order. Since corral has no async-generator protocol, this is
/// a pull-style cursor: call [`AsCompleted::next`] in a loop until it
/// returns `None`.
pub struct AsCompleted<T, A: Awaitable<T>> {
    event_loop: EventLoop,
    remaining: Vec<A>,
    completed: VecDeque<A>,
    deadline: Option<crate::time::Deadline>,
    _marker: std::marker::PhantomData<T>,
}

pub fn as_completed<T, A>(event_loop: &EventLoop, items: Vec<A>, timeout: Option<Duration>) -> AsCompleted<T, A>
where
    T: Clone + 'static,
    A: Awaitable<T>,
{
    AsCompleted {
        event_loop: event_loop.clone(),
        remaining: items,
        completed: VecDeque::new(),
        deadline: timeout.map(crate::time::Deadline::after),
        _marker: std::marker::PhantomData,
    }
}


impl<T: Clone + 'static, A: Awaitable<T>> AsCompleted<T, A> {
    /// Returns the next completed item's result, or `None` once every item
    /// has been yielded. Raises `Error::Timeout` if the deadline (if any)
    /// passes before the next item completes.
    pub async fn next(&mut self) -> Option<Result<T>> {
        while self.completed.is_empty() {
            if self.remaining.is_empty() {
                return None;
            }
            let per_call_timeout = match self.deadline {
                Some(d) => {
                    if d.has_elapsed() {
                        return Some(Err(Error::Timeout));
                    }
                    Some(d.remaining())
                }
                None => None,
            };
            let batch = std::mem::take(&mut self.remaining);
            let outcome = wait(&self.event_loop, batch, per_call_timeout, ReturnWhen::FirstCompleted).await;
            let (done, pending) = match outcome {
                Ok(v) => v,
                Err(e) => return Some(Err(e)),
            };
            self.remaining = pending;
            if done.is_empty() && self.deadline.is_some() {
                return Some(Err(Error::Timeout));
            }
            self.completed.extend(done);
        }
        let item = self.completed.pop_front()?;
        Some(item.take_result())
    }
}
