//! C12: subprocess reaping, spec §4.9's "SIGCHLD-driven" requirement.
//!
//! A `ChildWatcher` is notified once when its pid exits and never again;
//! `SigchldWatcher` does this the way `trollius.unix_events.SafeChildWatcher`
//! does, by hooking `SIGCHLD` (through `signal::add_signal_handler`) and
//! reaping with a non-blocking, targeted `waitpid(pid, WNOHANG)` per
//! registered child rather than a single wildcard reap, so it never steals
//! an exit status some other part of the process (or process group) is
//! also waiting on.

use std::cell::RefCell;
use std::collections::HashMap;
use std::io;
use std::rc::Rc;

use crate::event_loop::EventLoop;
use crate::signal;

/// How a child process ended.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ExitStatus {
    Exited(i32),
    Signaled(i32),
}

pub trait ChildWatcher {
    /// Registers interest in `pid`'s termination. `callback` runs exactly
    /// once, via `call_soon`, with the reaped status.
    fn add_child_handler<F>(&self, pid: libc::pid_t, callback: F)
    where
        F: FnOnce(ExitStatus) + 'static;

    fn remove_child_handler(&self, pid: libc::pid_t) -> bool;
}

struct Inner {
    event_loop: EventLoop,
    pending: HashMap<libc::pid_t, Box<dyn FnOnce(ExitStatus)>>,
}

/// The default `ChildWatcher`: one `SIGCHLD` handler shared by every tracked
/// pid on a given loop.
#[derive(Clone)]
pub struct SigchldWatcher {
    inner: Rc<RefCell<Inner>>,
}

impl SigchldWatcher {
    pub fn new(event_loop: &EventLoop) -> io::Result<SigchldWatcher> {
        let watcher = SigchldWatcher {
            inner: Rc::new(RefCell::new(Inner {
                event_loop: event_loop.clone(),
                pending: HashMap::new(),
            })),
        };
        let handler_watcher = watcher.clone();
        signal::add_signal_handler(event_loop, libc::SIGCHLD, move || {
            handler_watcher.reap_all();
        })?;
        Ok(watcher)
    }

    fn reap_all(&self) {
        let pids: Vec<libc::pid_t> = self.inner.borrow().pending.keys().copied().collect();
        for pid in pids {
            self.try_reap(pid);
        }
    }

    fn try_reap(&self, pid: libc::pid_t) {
        let mut status: libc::c_int = 0;
        let ret = unsafe { libc::waitpid(pid, &mut status, libc::WNOHANG) };
        if ret == 0 {
            return; // still running
        }
        if ret < 0 {
            // ECHILD: already reaped by someone else, or never existed.
            self.inner.borrow_mut().pending.remove(&pid);
            return;
        }
        let exit_status = if libc::WIFEXITED(status) {
            ExitStatus::Exited(libc::WEXITSTATUS(status))
        } else {
            ExitStatus::Signaled(libc::WTERMSIG(status))
        };
        if let Some(callback) = self.inner.borrow_mut().pending.remove(&pid) {
            self.inner.borrow().event_loop.call_soon(move || callback(exit_status));
        }
    }
}

impl ChildWatcher for SigchldWatcher {
    fn add_child_handler<F>(&self, pid: libc::pid_t, callback: F)
    where
        F: FnOnce(ExitStatus) + 'static,
    {
        self.inner.borrow_mut().pending.insert(pid, Box::new(callback));
        // The child may already have exited between `fork`/`posix_spawn`
        // and this call; catch that race with an immediate opportunistic
        // reap instead of waiting for the next `SIGCHLD`.
        self.try_reap(pid);
    }

    fn remove_child_handler(&self, pid: libc::pid_t) -> bool {
        self.inner.borrow_mut().pending.remove(&pid).is_some()
    }
}
