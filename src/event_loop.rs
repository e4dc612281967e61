//! C4: the event loop core from spec §4.2, grounded on `mio::Poll`'s
//! register/reregister/deregister shape layered under a ready-queue + timer
//! heap driver, the same two data structures `trollius`/`tulip`'s
//! `BaseEventLoop` runs on (see `examples/original_source`).

use std::cell::RefCell;
use std::collections::{BinaryHeap, HashMap, VecDeque};
use std::cmp::Reverse;
use std::io;
use std::os::fd::RawFd;
use std::rc::Rc;
use std::time::Duration;

use crate::error::{Error, Result};
use crate::executor::Executor;
use crate::future::Future;
use crate::handle::{Handle, TimerHandle};
use crate::interest::Interest;
use crate::selector::Selector;
use crate::task::Task;
use crate::time::Deadline;
use crate::waker::{Waker, WakerPipe};

/// Per-fd bookkeeping the selector hands back on each `select()`: at most
/// one reader and one writer callback, matching spec §4.1's
/// "(fd, events, data)" triples.
#[derive(Clone, Default)]
struct FdState {
    reader: Option<Handle>,
    writer: Option<Handle>,
}

struct Inner {
    selector: Selector<Rc<RefCell<FdState>>>,
    fd_state: HashMap<RawFd, Rc<RefCell<FdState>>>,
    ready: VecDeque<Handle>,
    timers: BinaryHeap<Reverse<TimerHandle>>,
    timer_seq: u64,
    closed: bool,
    running: bool,
    stopping: bool,
    waker_pipe: WakerPipe,
    threadsafe_ready: crossbeam_channel::Receiver<Box<dyn FnOnce() + Send>>,
    threadsafe_sender: crossbeam_channel::Sender<Box<dyn FnOnce() + Send>>,
    executor: Executor,
    /// Pollers for outstanding `run_in_executor` results. Each one lives
    /// entirely on the loop thread (it holds the `Rc`-based `Future` it will
    /// complete); only the `Sender` half of its channel ever crosses into
    /// the worker thread. Checked once per `run_once` iteration; a poller
    /// returning `true` has completed and is dropped.
    executor_pending: Vec<Box<dyn FnMut() -> bool>>,
}

/// Construction-time options, the ambient "configuration" concern spec.md
/// has no file-based layer for — `corral` is a library, so this is an
/// options-struct builder the way `mio::Events::with_capacity` or
/// `Poll::new` take shape, not a config-file reader (SPEC_FULL.md §1.3).
#[derive(Clone, Copy, Debug)]
pub struct Config {
    pub ready_capacity: usize,
    pub executor_threads: usize,
}

impl Default for Config {
    fn default() -> Config {
        Config {
            ready_capacity: 64,
            executor_threads: crate::executor::default_thread_count(),
        }
    }
}

/// A single-threaded, `Rc`-based event loop. Cloning a loop handle clones a
/// reference to the same loop, never a second loop (spec §4.2: exactly one
/// loop per thread is expected to drive it).
#[derive(Clone)]
pub struct EventLoop {
    inner: Rc<RefCell<Inner>>,
}

impl EventLoop {
    pub fn new() -> io::Result<EventLoop> {
        EventLoop::with_config(Config::default())
    }

    pub fn with_config(config: Config) -> io::Result<EventLoop> {
        let mut selector = Selector::new()?;
        let waker_pipe = WakerPipe::new()?;
        let waker_state = Rc::new(RefCell::new(FdState::default()));
        selector.register(waker_pipe.fd(), Interest::READABLE, Rc::clone(&waker_state))?;

        let (tx, rx) = crossbeam_channel::unbounded();

        Ok(EventLoop {
            inner: Rc::new(RefCell::new(Inner {
                selector,
                fd_state: {
                    let mut m = HashMap::new();
                    m.insert(waker_pipe.fd(), waker_state);
                    m
                },
                ready: VecDeque::with_capacity(config.ready_capacity),
                timers: BinaryHeap::new(),
                timer_seq: 0,
                closed: false,
                running: false,
                stopping: false,
                waker_pipe,
                threadsafe_ready: rx,
                threadsafe_sender: tx,
                executor: Executor::with_threads(config.executor_threads),
                executor_pending: Vec::new(),
            })),
        })
    }

    /// A cloneable, `Send + Sync` handle that can interrupt this loop's
    /// blocked `select()` from another thread (spec §4.2's self-pipe).
    pub fn waker(&self) -> Waker {
        self.inner.borrow().waker_pipe.waker()
    }

    // -- scheduling -----------------------------------------------------

    pub fn call_soon<F>(&self, callback: F) -> Handle
    where
        F: FnOnce() + 'static,
    {
        let handle = Handle::new(Box::new(callback));
        self.inner.borrow_mut().ready.push_back(handle.clone());
        handle
    }

    pub fn call_later<F>(&self, delay: Duration, callback: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        self.call_at(Deadline::after(delay), callback)
    }

    pub fn call_at<F>(&self, when: Deadline, callback: F) -> TimerHandle
    where
        F: FnOnce() + 'static,
    {
        let mut inner = self.inner.borrow_mut();
        let seq = inner.timer_seq;
        inner.timer_seq += 1;
        let th = TimerHandle {
            when,
            seq,
            handle: Handle::new(Box::new(callback)),
        };
        inner.timers.push(Reverse(th.clone()));
        th
    }

    /// The only scheduling entry point safe to call from a thread other
    /// than the one driving this loop (spec §4.2, §9). Rejects with
    /// `Error::LoopClosed` rather than silently enqueueing into a dead loop
    /// (an explicit resolution of an open question left unspecified).
    pub fn call_soon_threadsafe<F>(&self, callback: F) -> Result<()>
    where
        F: FnOnce() + Send + 'static,
    {
        let inner = self.inner.borrow();
        if inner.closed {
            return Err(Error::LoopClosed);
        }
        inner
            .threadsafe_sender
            .send(Box::new(callback))
            .map_err(|_| Error::LoopClosed)?;
        inner.waker_pipe.waker().wake().ok();
        Ok(())
    }

    // -- fd readiness -----------------------------------------------------

    fn fd_state(&self, fd: RawFd) -> Rc<RefCell<FdState>> {
        let mut inner = self.inner.borrow_mut();
        Rc::clone(
            inner
                .fd_state
                .entry(fd)
                .or_insert_with(|| Rc::new(RefCell::new(FdState::default()))),
        )
    }

    fn sync_interest(&self, fd: RawFd) -> io::Result<()> {
        let state = self.fd_state(fd);
        let (reader, writer) = {
            let s = state.borrow();
            (s.reader.is_some(), s.writer.is_some())
        };
        let mut inner = self.inner.borrow_mut();
        let mut interest = Interest::from_u8(0);
        if reader {
            interest |= Interest::READABLE;
        }
        if writer {
            interest |= Interest::WRITABLE;
        }
        if !reader && !writer {
            inner.fd_state.remove(&fd);
            return inner.selector.unregister(fd).map(|_| ());
        }
        if inner.selector.is_registered(fd) {
            inner.selector.modify(fd, interest, state)
        } else {
            inner.selector.register(fd, interest, state)
        }
    }

    pub fn add_reader<F>(&self, fd: RawFd, callback: F) -> io::Result<()>
    where
        F: FnOnce() + 'static,
    {
        let state = self.fd_state(fd);
        state.borrow_mut().reader = Some(Handle::new(Box::new(callback)));
        self.sync_interest(fd)
    }

    pub fn remove_reader(&self, fd: RawFd) -> io::Result<bool> {
        let state = self.fd_state(fd);
        let had = state.borrow_mut().reader.take().is_some();
        self.sync_interest(fd)?;
        Ok(had)
    }

    pub fn add_writer<F>(&self, fd: RawFd, callback: F) -> io::Result<()>
    where
        F: FnOnce() + 'static,
    {
        let state = self.fd_state(fd);
        state.borrow_mut().writer = Some(Handle::new(Box::new(callback)));
        self.sync_interest(fd)
    }

    pub fn remove_writer(&self, fd: RawFd) -> io::Result<bool> {
        let state = self.fd_state(fd);
        let had = state.borrow_mut().writer.take().is_some();
        self.sync_interest(fd)?;
        Ok(had)
    }

    // -- spawning ---------------------------------------------------------

    pub fn spawn<T, F>(&self, name: impl Into<String>, fut: F) -> Task<T>
    where
        T: Clone + 'static,
        F: std::future::Future<Output = Result<T>> + 'static,
    {
        Task::spawn(self, name, fut)
    }

    pub fn create_future<T: Clone + 'static>(&self) -> Future<T> {
        Future::new(self)
    }

    // -- running ----------------------------------------------------------

    pub fn is_running(&self) -> bool {
        self.inner.borrow().running
    }

    pub fn is_closed(&self) -> bool {
        self.inner.borrow().closed
    }

    pub fn stop(&self) {
        self.inner.borrow_mut().stopping = true;
    }

    pub fn close(&self) {
        let mut inner = self.inner.borrow_mut();
        assert!(!inner.running, "cannot close a running loop");
        inner.closed = true;
        inner.ready.clear();
        inner.timers.clear();
    }

    pub fn run_forever(&self) -> io::Result<()> {
        {
            let mut inner = self.inner.borrow_mut();
            assert!(!inner.closed, "event loop is closed");
            assert!(!inner.running, "event loop already running");
            inner.running = true;
            inner.stopping = false;
        }
        loop {
            self.run_once()?;
            if self.inner.borrow().stopping {
                break;
            }
        }
        self.inner.borrow_mut().running = false;
        Ok(())
    }

    /// Drives the loop until `future` completes, then returns its result.
    /// Spec §4.2's most common entry point.
    pub fn run_until_complete<T: Clone + 'static>(&self, future: &Future<T>) -> Result<T> {
        let done = Rc::new(RefCell::new(false));
        {
            let done = Rc::clone(&done);
            let self_clone = self.clone();
            future.add_done_callback(move |_| {
                *done.borrow_mut() = true;
                self_clone.stop();
            });
        }

        {
            let mut inner = self.inner.borrow_mut();
            assert!(!inner.closed, "event loop is closed");
            assert!(!inner.running, "event loop already running");
            inner.running = true;
            inner.stopping = false;
        }
        loop {
            self.run_once().map_err(Error::Io)?;
            if self.inner.borrow().stopping {
                break;
            }
        }
        self.inner.borrow_mut().running = false;

        future.result()
    }

    /// One iteration: fire due timers, compute a selector timeout, poll,
    /// dispatch ready fds, then drain and run a *snapshot* of the
    /// ready-queue (spec §4.2 steps 1-5; callbacks scheduled during this
    /// iteration run on the next one, never the current one).
    fn run_once(&self) -> io::Result<()> {
        self.drain_threadsafe();
        self.poll_executor_pending();
        self.expire_timers();

        let timeout = self.compute_timeout();
        let events = {
            let mut inner = self.inner.borrow_mut();
            inner.selector.select(timeout)?
        };

        for event in events {
            if event.fd == self.inner.borrow().waker_pipe.fd() {
                self.inner.borrow_mut().waker_pipe.drain();
                continue;
            }
            let state = event.data;
            let (reader, writer) = {
                let s = state.borrow();
                (s.reader.clone(), s.writer.clone())
            };
            if event.events.is_readable() {
                if let Some(h) = reader {
                    self.inner.borrow_mut().ready.push_back(h);
                }
            }
            if event.events.is_writable() {
                if let Some(h) = writer {
                    self.inner.borrow_mut().ready.push_back(h);
                }
            }
        }

        self.drain_threadsafe();

        let batch: Vec<Handle> = {
            let mut inner = self.inner.borrow_mut();
            inner.ready.drain(..).collect()
        };
        for handle in batch {
            if !handle.cancelled() {
                handle.run();
            }
        }
        Ok(())
    }

    fn drain_threadsafe(&self) {
        let callbacks: Vec<_> = {
            let inner = self.inner.borrow();
            inner.threadsafe_ready.try_iter().collect()
        };
        for cb in callbacks {
            self.call_soon(cb);
        }
    }

    fn poll_executor_pending(&self) {
        let mut inner = self.inner.borrow_mut();
        inner.executor_pending.retain_mut(|poller| !poller());
    }

    fn expire_timers(&self) {
        let now = Deadline::now();
        let mut inner = self.inner.borrow_mut();
        let mut due = Vec::new();
        while let Some(Reverse(top)) = inner.timers.peek() {
            if top.cancelled() {
                inner.timers.pop();
                continue;
            }
            if top.when() > now {
                break;
            }
            if let Some(Reverse(th)) = inner.timers.pop() {
                due.push(th);
            }
        }
        for th in due {
            inner.ready.push_back(th.handle);
        }
    }

    fn compute_timeout(&self) -> Option<Duration> {
        let inner = self.inner.borrow();
        if !inner.ready.is_empty() {
            return Some(Duration::ZERO);
        }
        match inner.timers.peek() {
            Some(Reverse(th)) => Some(th.when().remaining()),
            None => None,
        }
    }

    // -- executor bridge ----------------------------------------------------

    /// Runs a blocking closure on the shared thread pool, returning a
    /// `Future` that resolves on this loop once it finishes (spec §6).
    ///
    /// The worker thread never touches the `Rc`-based `Future` directly —
    /// it only owns the `Sender` half of a dedicated one-shot channel,
    /// which is `Send` as long as `T` is. The receiving half, paired with
    /// the `Future` it will complete, stays on the loop thread and is
    /// polled once per iteration after the waker fires.
    pub fn run_in_executor<T, F>(&self, work: F) -> Future<T>
    where
        T: Clone + Send + 'static,
        F: FnOnce() -> T + Send + 'static,
    {
        let fut = self.create_future::<T>();
        let (tx, rx) = crossbeam_channel::bounded(1);
        let loop_waker = self.waker();
        self.inner.borrow().executor.spawn(move || {
            let value = work();
            let _ = tx.send(value);
            let _ = loop_waker.wake();
        });

        let fut_for_poll = fut.clone();
        self.inner.borrow_mut().executor_pending.push(Box::new(move || {
            match rx.try_recv() {
                Ok(value) => {
                    fut_for_poll.set_result(value);
                    true
                }
                Err(_) => false,
            }
        }));
        fut
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell as StdRefCell;

    #[test]
    fn call_soon_runs_callbacks_in_fifo_order() {
        let event_loop = EventLoop::new().unwrap();
        let order = Rc::new(StdRefCell::new(Vec::new()));
        for i in 0..3 {
            let order = Rc::clone(&order);
            event_loop.call_soon(move || order.borrow_mut().push(i));
        }
        event_loop.run_once().unwrap();
        assert_eq!(*order.borrow(), vec![0, 1, 2]);
    }

    #[test]
    fn a_callback_scheduled_during_an_iteration_runs_on_the_next_one() {
        let event_loop = EventLoop::new().unwrap();
        let order = Rc::new(StdRefCell::new(Vec::new()));
        let order_cb = Rc::clone(&order);
        let loop_for_cb = event_loop.clone();
        event_loop.call_soon(move || {
            order_cb.borrow_mut().push(1);
            let order_cb2 = Rc::clone(&order_cb);
            loop_for_cb.call_soon(move || order_cb2.borrow_mut().push(2));
        });
        event_loop.run_once().unwrap();
        assert_eq!(*order.borrow(), vec![1]);
        event_loop.run_once().unwrap();
        assert_eq!(*order.borrow(), vec![1, 2]);
    }

    #[test]
    fn call_later_fires_only_once_its_deadline_has_passed() {
        let event_loop = EventLoop::new().unwrap();
        let fired = Rc::new(StdRefCell::new(false));
        let fired_cb = Rc::clone(&fired);
        event_loop.call_later(Duration::from_millis(20), move || {
            *fired_cb.borrow_mut() = true;
        });
        event_loop.run_once().unwrap();
        assert!(!*fired.borrow());
        std::thread::sleep(Duration::from_millis(30));
        event_loop.run_once().unwrap();
        assert!(*fired.borrow());
    }

    #[test]
    fn cancelled_call_soon_handle_does_not_run() {
        let event_loop = EventLoop::new().unwrap();
        let ran = Rc::new(StdRefCell::new(false));
        let ran_cb = Rc::clone(&ran);
        let handle = event_loop.call_soon(move || *ran_cb.borrow_mut() = true);
        handle.cancel();
        event_loop.run_once().unwrap();
        assert!(!*ran.borrow());
    }

    #[test]
    fn call_soon_threadsafe_rejects_on_a_closed_loop() {
        let event_loop = EventLoop::new().unwrap();
        event_loop.close();
        let result = event_loop.call_soon_threadsafe(|| {});
        assert!(matches!(result, Err(Error::LoopClosed)));
    }

    #[test]
    fn run_until_complete_returns_the_futures_result() {
        let event_loop = EventLoop::new().unwrap();
        let fut: Future<i32> = event_loop.create_future();
        let fut_for_cb = fut.clone();
        event_loop.call_soon(move || fut_for_cb.set_result(5));
        let result = event_loop.run_until_complete(&fut).unwrap();
        assert_eq!(result, 5);
    }

    #[test]
    fn add_reader_and_remove_reader_track_registration() {
        use std::os::fd::AsRawFd;
        use std::os::unix::net::UnixStream;

        let event_loop = EventLoop::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        event_loop.add_reader(fd, || {}).unwrap();
        assert!(event_loop.remove_reader(fd).unwrap());
        // A second remove on an fd with no reader registered reports false.
        assert!(!event_loop.remove_reader(fd).unwrap());
    }
}
