//! epoll(7) backend, grounded on `mio::sys::unix::selector::epoll`.
//!
//! Registrations are level-triggered (no `EPOLLET`), matching CPython's
//! `selectors.EpollSelector` default and spec §4.1's "spurious wakeups are
//! permitted" contract: we never rely on edge-triggered drain-to-exhaustion
//! semantics, so a caller that doesn't read/write to completion simply sees
//! the fd ready again next `select`.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::time::Duration;

use libc::{EPOLLHUP, EPOLLIN, EPOLLOUT, EPOLLERR};

use crate::interest::Interest;

pub(crate) struct Selector {
    ep: OwnedFd,
}

impl Selector {
    pub(crate) const NAME: &'static str = "epoll";

    pub(crate) fn new() -> io::Result<Selector> {
        let ep = unsafe { libc::epoll_create1(libc::EPOLL_CLOEXEC) };
        if ep < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(Selector {
            ep: unsafe { OwnedFd::from_raw_fd(ep) },
        })
    }

    fn ctl(&self, op: i32, fd: RawFd, interest: Option<Interest>) -> io::Result<()> {
        let mut event = libc::epoll_event {
            events: interest.map(to_epoll_bits).unwrap_or(0),
            u64: fd as u64,
        };
        let ret = unsafe { libc::epoll_ctl(self.ep.as_raw_fd(), op, fd, &mut event) };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    pub(crate) fn register(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_ADD, fd, Some(interest))
    }

    pub(crate) fn reregister(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_MOD, fd, Some(interest))
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        self.ctl(libc::EPOLL_CTL_DEL, fd, None)
    }

    pub(crate) fn select(&self, buf: &mut EventBuf, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|d| {
                d.checked_add(Duration::from_nanos(999_999))
                    .unwrap_or(d)
                    .as_millis()
                    .min(i32::MAX as u128) as i32
            })
            .unwrap_or(-1);

        let n = unsafe {
            libc::epoll_wait(
                self.ep.as_raw_fd(),
                buf.events.as_mut_ptr(),
                buf.events.capacity() as i32,
                timeout_ms,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        // SAFETY: epoll_wait just initialized the first `n` slots.
        unsafe { buf.events.set_len(n as usize) };
        Ok(())
    }
}

fn to_epoll_bits(interest: Interest) -> u32 {
    let mut bits = 0u32;
    if interest.is_readable() {
        bits |= EPOLLIN as u32;
    }
    if interest.is_writable() {
        bits |= EPOLLOUT as u32;
    }
    bits
}

pub(crate) struct EventBuf {
    events: Vec<libc::epoll_event>,
}

impl EventBuf {
    pub(crate) fn with_capacity(cap: usize) -> EventBuf {
        EventBuf {
            events: Vec::with_capacity(cap),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.events.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (RawFd, Interest)> + '_ {
        self.events.iter().map(|ev| {
            let mut interest = Interest::from_u8(0);
            if ev.events & (EPOLLIN as u32 | EPOLLHUP as u32 | EPOLLERR as u32) != 0 {
                interest |= Interest::READABLE;
            }
            if ev.events & (EPOLLOUT as u32 | EPOLLERR as u32) != 0 {
                interest |= Interest::WRITABLE;
            }
            (ev.u64 as RawFd, interest)
        })
    }
}
