//! poll(2) fallback backend, used on platforms with neither epoll nor
//! kqueue. This is the bottom rung of spec §4.1's
//! "kqueue > epoll > poll > select" preference order; a raw `select(2)`
//! backend below it is not implemented (see `DESIGN.md`).
//!
//! Unlike epoll/kqueue, poll(2) has no separate "registry" syscall — the
//! full interest set is rebuilt into a flat `pollfd` array on every call.
//! We keep that array as our own registration table instead of a second
//! `HashMap`, trading O(n) rebuild-on-change for a dependency-free
//! implementation on the platforms that actually need this path.

use std::io;
use std::os::fd::RawFd;
use std::time::Duration;

use crate::interest::Interest;

pub(crate) struct Selector {
    fds: Vec<libc::pollfd>,
}

impl Selector {
    pub(crate) const NAME: &'static str = "poll";

    pub(crate) fn new() -> io::Result<Selector> {
        Ok(Selector { fds: Vec::new() })
    }

    fn index_of(&self, fd: RawFd) -> Option<usize> {
        self.fds.iter().position(|p| p.fd == fd)
    }

    pub(crate) fn register(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        if self.index_of(fd).is_some() {
            return Err(io::Error::new(io::ErrorKind::AlreadyExists, "fd already registered"));
        }
        self.fds.push(libc::pollfd {
            fd,
            events: to_poll_bits(interest),
            revents: 0,
        });
        Ok(())
    }

    pub(crate) fn reregister(&mut self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let idx = self
            .index_of(fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "fd not registered"))?;
        self.fds[idx].events = to_poll_bits(interest);
        Ok(())
    }

    pub(crate) fn deregister(&mut self, fd: RawFd) -> io::Result<()> {
        let idx = self
            .index_of(fd)
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "fd not registered"))?;
        self.fds.swap_remove(idx);
        Ok(())
    }

    pub(crate) fn select(&mut self, buf: &mut EventBuf, timeout: Option<Duration>) -> io::Result<()> {
        let timeout_ms = timeout
            .map(|d| d.as_millis().min(i32::MAX as u128) as i32)
            .unwrap_or(-1);

        let ret = unsafe {
            libc::poll(self.fds.as_mut_ptr(), self.fds.len() as libc::nfds_t, timeout_ms)
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }

        buf.ready.clear();
        if ret > 0 {
            for pfd in &mut self.fds {
                if pfd.revents != 0 {
                    buf.ready.push((pfd.fd, pfd.revents));
                    pfd.revents = 0;
                }
            }
        }
        Ok(())
    }
}

fn to_poll_bits(interest: Interest) -> libc::c_short {
    let mut bits = 0;
    if interest.is_readable() {
        bits |= libc::POLLIN;
    }
    if interest.is_writable() {
        bits |= libc::POLLOUT;
    }
    bits
}

pub(crate) struct EventBuf {
    ready: Vec<(RawFd, libc::c_short)>,
}

impl EventBuf {
    pub(crate) fn with_capacity(cap: usize) -> EventBuf {
        EventBuf {
            ready: Vec::with_capacity(cap),
        }
    }

    pub(crate) fn len(&self) -> usize {
        self.ready.len()
    }

    pub(crate) fn iter(&self) -> impl Iterator<Item = (RawFd, Interest)> + '_ {
        self.ready.iter().map(|&(fd, revents)| {
            let mut interest = Interest::from_u8(0);
            if revents & (libc::POLLIN | libc::POLLHUP | libc::POLLERR) != 0 {
                interest |= Interest::READABLE;
            }
            if revents & (libc::POLLOUT | libc::POLLERR) != 0 {
                interest |= Interest::WRITABLE;
            }
            (fd, interest)
        })
    }
}
