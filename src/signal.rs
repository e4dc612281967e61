//! C11: UNIX signal dispatch, spec §4.10.
//!
//! POSIX only allows a short list of async-signal-safe calls inside a
//! signal handler, so the real handler installed via `sigaction` does
//! nothing but `write(2)` the signal number to one end of a self-pipe —
//! exactly `trollius.unix_events._sighandler_noop` plus its self-pipe, one
//! level lower since we write the raw signum instead of relying on a
//! GIL-synchronized Python callback list. The pipe's read end is registered
//! with the owning loop like any other fd; the actual handler closures run
//! as ordinary `call_soon` callbacks once bytes show up there, never from
//! inside the signal handler itself.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io::{self, Read, Write};
use std::os::fd::{AsRawFd, RawFd};
use std::os::unix::net::UnixStream;
use std::sync::atomic::{AtomicI32, Ordering};

use crate::event_loop::EventLoop;

static SIGNAL_WRITE_FD: AtomicI32 = AtomicI32::new(-1);

extern "C" fn trampoline(signum: libc::c_int) {
    let fd = SIGNAL_WRITE_FD.load(Ordering::Relaxed);
    if fd < 0 {
        return;
    }
    let byte = signum as u8;
    unsafe {
        libc::write(fd, &byte as *const u8 as *const libc::c_void, 1);
    }
}

/// Signals `asyncio`/`trollius` also refuse to let you hook (`SIGKILL`,
/// `SIGSTOP` cannot be caught at all; `SIGPIPE` handling is reserved for
/// event loops that want writes to misbehaving peers to surface as `EPIPE`
/// rather than terminate the process, not for user handlers).
fn is_reserved(signum: i32) -> bool {
    matches!(signum, libc::SIGKILL | libc::SIGSTOP)
}

struct Handler {
    callback: Box<dyn FnMut()>,
}

/// Owns the process-wide self-pipe and the table of installed handlers for
/// whichever loop first calls `add_signal_handler`. Only one loop per
/// process may usefully own this, matching the single global `sigaction`
/// table the underlying OS actually has.
pub struct SignalDispatcher {
    write_end: UnixStream,
    handlers: RefCell<HashMap<i32, Handler>>,
}

impl SignalDispatcher {
    fn new(event_loop: &EventLoop) -> io::Result<SignalDispatcher> {
        let (read_end, write_end) = UnixStream::pair()?;
        read_end.set_nonblocking(true)?;
        write_end.set_nonblocking(true)?;

        SIGNAL_WRITE_FD.store(write_end.as_raw_fd(), Ordering::Relaxed);

        let dispatcher = SignalDispatcher {
            write_end,
            handlers: RefCell::new(HashMap::new()),
        };

        let fd = read_end.as_raw_fd();
        let event_loop = event_loop.clone();
        // `read_end` must outlive the reader callback; it's moved into the
        // closure and never touched again from outside it.
        let read_end = RefCell::new(read_end);
        event_loop.add_reader(fd, move || {
            Self::drain_and_dispatch(&event_loop, &read_end);
        })?;

        Ok(dispatcher)
    }

    fn drain_and_dispatch(event_loop: &EventLoop, read_end: &RefCell<UnixStream>) {
        let mut buf = [0u8; 64];
        loop {
            let n = match read_end.borrow_mut().read(&mut buf) {
                Ok(0) => break,
                Ok(n) => n,
                Err(ref e) if e.kind() == io::ErrorKind::WouldBlock => break,
                Err(ref e) if e.kind() == io::ErrorKind::Interrupted => continue,
                Err(_) => break,
            };
            for &signum in &buf[..n] {
                let event_loop = event_loop.clone();
                event_loop.call_soon(move || {
                    // The dispatcher lives as long as the loop it belongs
                    // to; pulled out of thin air here only because the
                    // callback has to be `'static`.
                    if let Some(dispatcher) = current_dispatcher() {
                        dispatcher.run_handler(signum as i32);
                    }
                });
            }
        }
    }

    fn run_handler(&self, signum: i32) {
        if let Some(handler) = self.handlers.borrow_mut().get_mut(&signum) {
            (handler.callback)();
        }
    }

    fn install(&self, signum: i32, callback: Box<dyn FnMut()>) -> io::Result<()> {
        if is_reserved(signum) {
            return Err(io::Error::new(
                io::ErrorKind::InvalidInput,
                format!("signal {signum} cannot be caught"),
            ));
        }
        unsafe {
            let mut action: libc::sigaction = std::mem::zeroed();
            action.sa_sigaction = trampoline as usize;
            libc::sigemptyset(&mut action.sa_mask);
            action.sa_flags = libc::SA_RESTART;
            if libc::sigaction(signum, &action, std::ptr::null_mut()) != 0 {
                return Err(io::Error::last_os_error());
            }
        }
        self.handlers.borrow_mut().insert(signum, Handler { callback });
        Ok(())
    }

    fn uninstall(&self, signum: i32) -> bool {
        let removed = self.handlers.borrow_mut().remove(&signum).is_some();
        if removed {
            unsafe {
                libc::signal(signum, libc::SIG_DFL);
            }
        }
        removed
    }
}

thread_local! {
    static DISPATCHER: RefCell<Option<std::rc::Rc<SignalDispatcher>>> = const { RefCell::new(None) };
}

fn current_dispatcher() -> Option<std::rc::Rc<SignalDispatcher>> {
    DISPATCHER.with(|d| d.borrow().clone())
}

/// Registers `callback` to run (via `call_soon`, on `event_loop`) whenever
/// `signum` is delivered to this process. Rejects `SIGKILL`/`SIGSTOP`.
pub fn add_signal_handler<F>(event_loop: &EventLoop, signum: i32, callback: F) -> io::Result<()>
where
    F: FnMut() + 'static,
{
    let dispatcher = DISPATCHER.with(|d| {
        let mut slot = d.borrow_mut();
        if slot.is_none() {
            *slot = Some(std::rc::Rc::new(SignalDispatcher::new(event_loop)?));
        }
        Ok::<_, io::Error>(slot.as_ref().unwrap().clone())
    })?;
    dispatcher.install(signum, Box::new(callback))
}

/// Removes a previously installed handler, restoring `SIG_DFL`. Returns
/// `false` if no handler was installed for `signum`.
pub fn remove_signal_handler(signum: i32) -> bool {
    current_dispatcher().map(|d| d.uninstall(signum)).unwrap_or(false)
}

impl Drop for SignalDispatcher {
    fn drop(&mut self) {
        SIGNAL_WRITE_FD.store(-1, Ordering::Relaxed);
        let _ = self.write_end.flush();
    }
}
