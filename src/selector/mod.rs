//! C1: the readiness multiplexer.
//!
//! Mirrors `mio`'s own `sys/` dispatch (`sys/unix/mod.rs` picks epoll,
//! kqueue, or poll as `sys::Selector` depending on target OS) but exposes
//! the narrower, data-carrying front end spec §4.1 describes: `register`,
//! `modify`, `unregister`, `get_info`, and `select(timeout)` returning
//! `(fd, ready_events, data)` triples, the same shape as CPython's
//! `selectors` module that `tulip/selectors.py` wraps.
//!
//! Platform priority follows spec §4.1: kqueue > epoll > poll. A raw
//! `select(2)` fallback is intentionally not implemented — see
//! `DESIGN.md` for why poll(2) already covers that role without the
//! `FD_SETSIZE` ceiling.

mod unix;

use std::collections::HashMap;
use std::os::unix::io::RawFd;
use std::time::Duration;
use std::{fmt, io};

use crate::interest::Interest;

/// One readiness notification returned from [`Selector::select`].
#[derive(Debug)]
pub struct ReadyEvent<T> {
    pub fd: RawFd,
    pub events: Interest,
    pub data: T,
}

struct Registration<T> {
    interest: Interest,
    data: T,
}

/// Registers file descriptors for read/write readiness and blocks until
/// some are ready or a timeout elapses (spec §4.1).
pub struct Selector<T> {
    sys: unix::PlatformSelector,
    registrations: HashMap<RawFd, Registration<T>>,
    raw_buf: unix::RawEventBuf,
}

impl<T: Clone> Selector<T> {
    pub fn new() -> io::Result<Selector<T>> {
        Ok(Selector {
            sys: unix::PlatformSelector::new()?,
            registrations: HashMap::new(),
            raw_buf: unix::RawEventBuf::with_capacity(1024),
        })
    }

    pub fn backend_name(&self) -> &'static str {
        unix::PlatformSelector::NAME
    }

    /// Registers `fd` for `interest`. Fails if `fd` is already registered,
    /// matching spec §4.1.
    pub fn register(&mut self, fd: RawFd, interest: Interest, data: T) -> io::Result<()> {
        if self.registrations.contains_key(&fd) {
            return Err(io::Error::new(
                io::ErrorKind::AlreadyExists,
                format!("fd {fd} is already registered"),
            ));
        }
        self.sys.register(fd, interest)?;
        self.registrations.insert(fd, Registration { interest, data });
        Ok(())
    }

    /// Changes the interest set and/or data for an already-registered `fd`.
    pub fn modify(&mut self, fd: RawFd, interest: Interest, data: T) -> io::Result<()> {
        let reg = self.registrations.get_mut(&fd).ok_or_else(unknown_fd)?;
        self.sys.reregister(fd, interest)?;
        reg.interest = interest;
        reg.data = data;
        Ok(())
    }

    /// Removes `fd`. Fails if `fd` is unknown, matching spec §4.1.
    pub fn unregister(&mut self, fd: RawFd) -> io::Result<T> {
        let reg = self.registrations.remove(&fd).ok_or_else(unknown_fd)?;
        self.sys.deregister(fd)?;
        Ok(reg.data)
    }

    pub fn get_info(&self, fd: RawFd) -> Option<(Interest, &T)> {
        self.registrations.get(&fd).map(|r| (r.interest, &r.data))
    }

    pub fn is_registered(&self, fd: RawFd) -> bool {
        self.registrations.contains_key(&fd)
    }

    /// Blocks until one or more registered descriptors are ready, or
    /// `timeout` elapses. `None` blocks indefinitely, `Some(Duration::ZERO)`
    /// polls. EINTR is retried transparently (spec §4.1); any other error
    /// is returned to the caller, who treats it as fatal for the loop.
    pub fn select(&mut self, timeout: Option<Duration>) -> io::Result<Vec<ReadyEvent<T>>> {
        loop {
            match self.sys.select(&mut self.raw_buf, timeout) {
                Ok(()) => break,
                Err(ref err) if err.kind() == io::ErrorKind::Interrupted => continue,
                Err(err) => return Err(err),
            }
        }

        let mut ready = Vec::with_capacity(self.raw_buf.len());
        for (fd, events) in self.raw_buf.iter() {
            if let Some(reg) = self.registrations.get(&fd) {
                ready.push(ReadyEvent {
                    fd,
                    events,
                    data: reg.data.clone(),
                });
            }
            // A spurious event for an fd that was unregistered between
            // the syscall and this point is silently dropped.
        }
        Ok(ready)
    }
}

impl<T> fmt::Debug for Selector<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Selector")
            .field("backend", &unix::PlatformSelector::NAME)
            .field("registered", &self.registrations.len())
            .finish()
    }
}

fn unknown_fd() -> io::Error {
    io::Error::new(io::ErrorKind::NotFound, "fd is not registered with this selector")
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::os::unix::io::AsRawFd;
    use std::os::unix::net::UnixStream;

    #[test]
    fn registering_an_already_registered_fd_fails() {
        let mut sel: Selector<u32> = Selector::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        sel.register(fd, Interest::READABLE, 1).unwrap();
        assert!(sel.register(fd, Interest::READABLE, 2).is_err());
    }

    #[test]
    fn unregistering_an_unknown_fd_fails() {
        let mut sel: Selector<u32> = Selector::new().unwrap();
        assert!(sel.unregister(12345).is_err());
    }

    #[test]
    fn select_reports_a_writable_socket_immediately() {
        let mut sel: Selector<u32> = Selector::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        sel.register(fd, Interest::WRITABLE, 42).unwrap();

        let events = sel.select(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].fd, fd);
        assert!(events[0].events.is_writable());
        assert_eq!(events[0].data, 42);
    }

    #[test]
    fn select_reports_a_readable_socket_once_data_arrives() {
        use std::io::Write;

        let mut sel: Selector<u32> = Selector::new().unwrap();
        let (mut a, b) = UnixStream::pair().unwrap();
        let fd = b.as_raw_fd();
        sel.register(fd, Interest::READABLE, 7).unwrap();

        let empty = sel.select(Some(Duration::ZERO)).unwrap();
        assert!(empty.is_empty());

        a.write_all(b"x").unwrap();
        let events = sel.select(Some(Duration::from_secs(1))).unwrap();
        assert_eq!(events.len(), 1);
        assert!(events[0].events.is_readable());
    }

    #[test]
    fn select_with_zero_timeout_does_not_block() {
        let mut sel: Selector<u32> = Selector::new().unwrap();
        let start = std::time::Instant::now();
        let events = sel.select(Some(Duration::ZERO)).unwrap();
        assert!(events.is_empty());
        assert!(start.elapsed() < Duration::from_millis(500));
    }

    #[test]
    fn get_info_reflects_the_current_interest_and_modify_updates_it() {
        let mut sel: Selector<u32> = Selector::new().unwrap();
        let (a, _b) = UnixStream::pair().unwrap();
        let fd = a.as_raw_fd();
        sel.register(fd, Interest::READABLE, 1).unwrap();
        assert_eq!(sel.get_info(fd).unwrap().0, Interest::READABLE);

        sel.modify(fd, Interest::READABLE | Interest::WRITABLE, 2).unwrap();
        let (interest, data) = sel.get_info(fd).unwrap();
        assert!(interest.is_readable() && interest.is_writable());
        assert_eq!(*data, 2);
    }
}
