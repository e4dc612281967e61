//! C3: `Future<T>`, a single-assignment result cell that is also
//! `.await`-able. This is the translation of spec §4.3's `Future`: unlike
//! `std::future::Future`, instances here are driven externally (`set_result`/
//! `set_exception`/`cancel` are called by whoever produced the value — a
//! transport callback, a `Task`, another primitive), and the *trait* impl
//! below is just a thin adapter so `corral::Future<T>` can sit on the
//! right-hand side of `.await` inside a `Task`'s driven coroutine.
//!
//! The adapter also closes spec §9's open question: native `async`/`.await`
//! normally erases which sub-future a task is suspended on. Each `poll()`
//! call below, while pending, records itself as the `fut_waiter` of whichever
//! `Task` is currently stepping (tracked in a thread-local stack), giving
//! `Task::cancel()` something concrete to forward to.

use std::cell::RefCell;
use std::fmt;
use std::pin::Pin;
use std::rc::{Rc, Weak};
use std::task::{Context, Poll, Waker as StdWaker};

use crate::error::Error;
use crate::event_loop::EventLoop;

#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum State {
    Pending,
    Cancelled,
    Finished,
}

struct Inner<T> {
    state: State,
    result: Option<Result<T, Error>>,
    callbacks: Vec<Box<dyn FnOnce(&Future<T>)>>,
    std_waker: Option<StdWaker>,
    retrieved: bool,
    loop_handle: EventLoop,
}

/// A value that will become available later, set at most once.
///
/// `T` must be `Clone` because, like `asyncio.Future`, `result()` can be
/// called any number of times after completion and must return the same
/// value each time rather than consuming it.
pub struct Future<T> {
    inner: Rc<RefCell<Inner<T>>>,
}

impl<T> Clone for Future<T> {
    fn clone(&self) -> Self {
        Future {
            inner: Rc::clone(&self.inner),
        }
    }
}

thread_local! {
    /// Stack of weak self-references to whichever `Task` is currently
    /// stepping its driven future on this thread. `corral::Future::poll`
    /// consults the top of this stack to register itself as that task's
    /// `fut_waiter`. Pushed/popped by `Task::step` around the `poll` call.
    pub(crate) static CURRENT_WAITER_SINK: RefCell<Vec<Weak<dyn WaiterSink>>> =
        const { RefCell::new(Vec::new()) };
}

/// Narrow interface a `Task` exposes so `Future::poll` can record itself as
/// that task's suspension point without `future.rs` depending on `task.rs`'s
/// concrete type.
pub trait WaiterSink {
    fn set_waiter(&self, waiter: AnyFuture);
}

/// A type-erased handle to a `Future<T>`, used only so a `Task` can hold
/// "whatever future I'm currently suspended on" without itself being generic.
#[derive(Clone)]
pub struct AnyFuture {
    cancel: Rc<dyn Fn()>,
    cancelled: Rc<dyn Fn() -> bool>,
}

impl AnyFuture {
    pub fn cancel(&self) -> bool {
        if (self.cancelled)() {
            return false;
        }
        (self.cancel)();
        true
    }
}

impl<T: Clone + 'static> Future<T> {
    pub fn new(event_loop: &EventLoop) -> Future<T> {
        Future {
            inner: Rc::new(RefCell::new(Inner {
                state: State::Pending,
                result: None,
                callbacks: Vec::new(),
                std_waker: None,
                retrieved: false,
                loop_handle: event_loop.clone(),
            })),
        }
    }

    fn as_any(&self) -> AnyFuture {
        let this_cancel = self.clone();
        let this_cancelled = self.clone();
        AnyFuture {
            cancel: Rc::new(move || {
                this_cancel.cancel();
            }),
            cancelled: Rc::new(move || this_cancelled.cancelled()),
        }
    }

    pub fn done(&self) -> bool {
        !matches!(self.inner.borrow().state, State::Pending)
    }

    pub fn cancelled(&self) -> bool {
        self.inner.borrow().state == State::Cancelled
    }

    /// Requests cancellation. Returns `false` if the future is already done
    /// (spec §4.3: cancelling a finished future is a no-op, not an error).
    pub fn cancel(&self) -> bool {
        {
            let mut inner = self.inner.borrow_mut();
            if inner.state != State::Pending {
                return false;
            }
            inner.state = State::Cancelled;
            inner.retrieved = true;
        }
        self.schedule_callbacks();
        true
    }

    /// Resolves the future with a value. Panics if already done, matching
    /// `asyncio.Future.set_result` raising `InvalidStateError`.
    pub fn set_result(&self, value: T) {
        self.complete(Ok(value));
    }

    pub fn set_exception(&self, err: Error) {
        self.complete(Err(err));
    }

    fn complete(&self, result: Result<T, Error>) {
        {
            let mut inner = self.inner.borrow_mut();
            assert!(
                inner.state == State::Pending,
                "corral::Future: result already set"
            );
            inner.state = State::Finished;
            inner.result = Some(result);
        }
        self.schedule_callbacks();
    }

    /// Returns the result, cloned out. Errors with `Error::Cancelled` if the
    /// future was cancelled, or `Error::InvalidState` if still pending.
    pub fn result(&self) -> Result<T, Error> {
        let mut inner = self.inner.borrow_mut();
        inner.retrieved = true;
        match inner.state {
            State::Pending => Err(Error::InvalidState),
            State::Cancelled => Err(Error::Cancelled),
            State::Finished => inner.result.clone().expect("finished future has a result"),
        }
    }

    /// Registers a callback to run on the owning loop (via `call_soon`, never
    /// inline) once this future is done. If it's already done, the callback
    /// is scheduled immediately rather than run synchronously, so callers
    /// never observe reentrant completion (spec §4.3).
    pub fn add_done_callback<F>(&self, callback: F)
    where
        F: FnOnce(&Future<T>) + 'static,
    {
        let done = self.done();
        if done {
            let this = self.clone();
            self.inner
                .borrow()
                .loop_handle
                .call_soon(move || callback(&this));
        } else {
            self.inner.borrow_mut().callbacks.push(Box::new(callback));
        }
    }

    fn schedule_callbacks(&self) {
        let callbacks: Vec<_> = std::mem::take(&mut self.inner.borrow_mut().callbacks);
        if callbacks.is_empty() {
            return;
        }
        let loop_handle = self.inner.borrow().loop_handle.clone();
        for cb in callbacks {
            let this = self.clone();
            loop_handle.call_soon(move || cb(&this));
        }
        if let Some(waker) = self.inner.borrow_mut().std_waker.take() {
            waker.wake();
        }
    }
}

impl<T: Clone + 'static> std::future::Future for Future<T> {
    type Output = Result<T, Error>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        CURRENT_WAITER_SINK.with(|stack| {
            if let Some(top) = stack.borrow().last().and_then(|w| w.upgrade()) {
                top.set_waiter(self.as_any());
            }
        });

        let mut inner = self.inner.borrow_mut();
        match inner.state {
            State::Pending => {
                inner.std_waker = Some(cx.waker().clone());
                Poll::Pending
            }
            State::Cancelled => Poll::Ready(Err(Error::Cancelled)),
            State::Finished => {
                inner.retrieved = true;
                Poll::Ready(inner.result.clone().expect("finished future has a result"))
            }
        }
    }
}

impl<T> fmt::Debug for Future<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Future").field("state", &self.inner.borrow().state).finish()
    }
}


impl<T> Drop for Inner<T> {
    /// Replaces the GC-sidecar "exception was never retrieved" diagnostic
    /// that CPython's asyncio relies on: since we have no finalizer cycle to
    /// route through, a plain `Drop` on the cell is enough to log an error
    /// the moment the last handle goes away with a stored exception nobody
    /// ever looked at.
    fn drop(&mut self) {
        if self.retrieved {
            return;
        }
        if let Some(Err(_err)) = &self.result {
            #[cfg(feature = "log")]
            log::error!("corral: Future exception was never retrieved: {_err}");
        }
    }
}
