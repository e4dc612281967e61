//! kqueue(2) backend, grounded on `mio::sys::unix::selector::kqueue`.
//!
//! Each readable/writable interest maps to its own `EVFILT_READ`/
//! `EVFILT_WRITE` filter registration, `EV_ADD | EV_ENABLE` to add,
//! `EV_DELETE` to remove — mirroring how mio drives kqueue one filter at a
//! time rather than folding both directions into a single `kevent`.

use std::io;
use std::os::fd::{AsRawFd, FromRawFd, OwnedFd, RawFd};
use std::ptr;
use std::time::Duration;

use crate::interest::Interest;

pub(crate) struct Selector {
    kq: OwnedFd,
}

impl Selector {
    pub(crate) const NAME: &'static str = "kqueue";

    pub(crate) fn new() -> io::Result<Selector> {
        let kq = unsafe { libc::kqueue() };
        if kq < 0 {
            return Err(io::Error::last_os_error());
        }
        // Close-on-exec, matching epoll's EPOLL_CLOEXEC default.
        unsafe {
            libc::fcntl(kq, libc::F_SETFD, libc::FD_CLOEXEC);
        }
        Ok(Selector {
            kq: unsafe { OwnedFd::from_raw_fd(kq) },
        })
    }

    fn apply(&self, changes: &[libc::kevent]) -> io::Result<()> {
        if changes.is_empty() {
            return Ok(());
        }
        let ret = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                changes.as_ptr(),
                changes.len() as i32,
                ptr::null_mut(),
                0,
                ptr::null(),
            )
        };
        if ret < 0 {
            return Err(io::Error::last_os_error());
        }
        Ok(())
    }

    fn change(fd: RawFd, filter: i16, flags: u16) -> libc::kevent {
        libc::kevent {
            ident: fd as usize,
            filter,
            flags,
            fflags: 0,
            data: 0,
            udata: ptr::null_mut(),
        }
    }

    pub(crate) fn register(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        self.reregister(fd, interest)
    }

    pub(crate) fn reregister(&self, fd: RawFd, interest: Interest) -> io::Result<()> {
        let mut changes = Vec::with_capacity(2);
        let read_flags = if interest.is_readable() {
            libc::EV_ADD | libc::EV_ENABLE
        } else {
            libc::EV_DELETE
        };
        changes.push(Self::change(fd, libc::EVFILT_READ, read_flags));
        let write_flags = if interest.is_writable() {
            libc::EV_ADD | libc::EV_ENABLE
        } else {
            libc::EV_DELETE
        };
        changes.push(Self::change(fd, libc::EVFILT_WRITE, write_flags));
        // EV_DELETE on a filter that was never added returns ENOENT; that's
        // expected whenever a registration only ever used one direction.
        for change in changes {
            if let Err(err) = self.apply(std::slice::from_ref(&change)) {
                let deleting = change.flags & libc::EV_DELETE != 0;
                if !(deleting && err.raw_os_error() == Some(libc::ENOENT)) {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn deregister(&self, fd: RawFd) -> io::Result<()> {
        for filter in [libc::EVFILT_READ, libc::EVFILT_WRITE] {
            let change = Self::change(fd, filter, libc::EV_DELETE);
            if let Err(err) = self.apply(std::slice::from_ref(&change)) {
                if err.raw_os_error() != Some(libc::ENOENT) {
                    return Err(err);
                }
            }
        }
        Ok(())
    }

    pub(crate) fn select(&self, buf: &mut EventBuf, timeout: Option<Duration>) -> io::Result<()> {
        let ts = timeout.map(|d| libc::timespec {
            tv_sec: d.as_secs() as libc::time_t,
            tv_nsec: d.subsec_nanos() as libc::c_long,
        });
        let ts_ptr = ts.as_ref().map(|t| t as *const _).unwrap_or(ptr::null());

        let n = unsafe {
            libc::kevent(
                self.kq.as_raw_fd(),
                ptr::null(),
                0,
                buf.events.as_mut_ptr(),
                buf.events.capacity() as i32,
                ts_ptr,
            )
        };
        if n < 0 {
            return Err(io::Error::last_os_error());
        }
        unsafe { buf.events.set_len(n as usize) };
        Ok(())
    }
}

pub(crate) struct EventBuf {
    events: Vec<libc::kevent>,
}

impl EventBuf {
    pub(crate) fn with_capacity(cap: usize) -> EventBuf {
        // `kevent(2)` writes directly into the spare capacity of this
        // buffer; `select` calls `set_len` afterwards once it knows how
        // many entries came back, so there is no need to pre-initialize.
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
            match ev.filter {
                libc::EVFILT_READ => interest |= Interest::READABLE,
                libc::EVFILT_WRITE => interest |= Interest::WRITABLE,
                _ => {}
            }
            if ev.flags & libc::EV_EOF != 0 {
                interest |= Interest::READABLE;
            }
            (ev.ident as RawFd, interest)
        })
    }
}
