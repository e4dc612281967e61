//! The error taxonomy from spec §7.
//!
//! `mio` has no taxonomy of its own — it returns `std::io::Error` straight
//! from the syscalls it wraps. `corral` needs the richer vocabulary the
//! core's contracts are written in terms of (`Cancelled`, `InvalidState`,
//! `Timeout`, the normalised connection errors, parser errors, …), so this
//! enum is layered on top using `thiserror`, the way `r3bl-open-core`'s
//! crates define their error enums.

use std::io;

/// Errors surfaced across Future/Task boundaries, transports, and parsers.
#[derive(thiserror::Error, Debug)]
pub enum Error {
    /// Cooperative termination, surfaced into user code at suspension
    /// points (spec §7, §3 Future invariant (i)).
    #[error("operation was cancelled")]
    Cancelled,

    /// Misuse of a `Future`: `set_result`/`set_exception` called twice, or
    /// `result()` observed before the future is done.
    #[error("future is not in a valid state for this operation")]
    InvalidState,

    /// Produced by `wait_for` and time-limited `wait`.
    #[error("operation timed out")]
    Timeout,

    /// The loop observed the transport had already finished tearing down.
    #[error("transport is closed")]
    TransportClosed,

    #[error("connection reset by peer")]
    ConnectionReset,

    #[error("connection refused")]
    ConnectionRefused,

    #[error("connection aborted")]
    ConnectionAborted,

    #[error("broken pipe")]
    BrokenPipe,

    /// `readexactly(n)` hit EOF before `n` bytes were available; carries
    /// whatever was read so far (spec §8 Boundary behaviours).
    #[error("incomplete read: expected {expected} bytes, got {}", partial.len())]
    Incomplete { partial: Vec<u8>, expected: usize },

    /// A parser placed this on its `DataBuffer` via `set_exception` (spec
    /// §4.7), e.g. "line too long".
    #[error("parse error: {0}")]
    Parse(String),

    /// `call_soon_threadsafe` (or any scheduling call) observed a loop that
    /// has already been closed. Spec §9 leaves this unspecified; we resolve
    /// it by rejecting rather than silently enqueueing into a dead queue.
    #[error("event loop is closed")]
    LoopClosed,

    /// A coroutine awaited a `Future` owned by a different loop, or one
    /// that was not properly marked as awaited (spec §4.4 step 3, §9
    /// "yield from future" misuse detection).
    #[error("future awaited across event loops, or without going through .await")]
    WrongLoop,

    /// `wait([])` — an empty set of futures was rejected (spec §8 Boundary
    /// behaviours).
    #[error("wait() requires at least one future")]
    EmptyWaitSet,

    /// `Queue::put_nowait`/`get_nowait` on a full/empty bounded queue.
    #[error("queue is full")]
    QueueFull,
    #[error("queue is empty")]
    QueueEmpty,

    /// A bounded `Semaphore` was released more times than it was acquired.
    #[error("semaphore released too many times")]
    SemaphoreOverRelease,

    #[error(transparent)]
    Io(#[from] io::Error),
}

impl Clone for Error {
    /// `io::Error` itself isn't `Clone`, so the `Io` variant is rebuilt from
    /// its kind and message. This only matters for `Future::result()`, which
    /// needs to hand the same outcome back on every call.
    fn clone(&self) -> Error {
        match self {
            Error::Cancelled => Error::Cancelled,
            Error::InvalidState => Error::InvalidState,
            Error::Timeout => Error::Timeout,
            Error::TransportClosed => Error::TransportClosed,
            Error::ConnectionReset => Error::ConnectionReset,
            Error::ConnectionRefused => Error::ConnectionRefused,
            Error::ConnectionAborted => Error::ConnectionAborted,
            Error::BrokenPipe => Error::BrokenPipe,
            Error::Incomplete { partial, expected } => Error::Incomplete {
                partial: partial.clone(),
                expected: *expected,
            },
            Error::Parse(msg) => Error::Parse(msg.clone()),
            Error::LoopClosed => Error::LoopClosed,
            Error::WrongLoop => Error::WrongLoop,
            Error::EmptyWaitSet => Error::EmptyWaitSet,
            Error::QueueFull => Error::QueueFull,
            Error::QueueEmpty => Error::QueueEmpty,
            Error::SemaphoreOverRelease => Error::SemaphoreOverRelease,
            Error::Io(err) => Error::Io(io::Error::new(err.kind(), err.to_string())),
        }
    }
}

impl Error {
    /// Translates a raw I/O error the way spec §4.5 does for transports:
    /// `ConnectionReset` force-closes, other `OSError`s are fatal as-is.
    pub fn from_io_for_transport(err: io::Error) -> Error {
        match err.kind() {
            io::ErrorKind::ConnectionReset => Error::ConnectionReset,
            io::ErrorKind::ConnectionRefused => Error::ConnectionRefused,
            io::ErrorKind::ConnectionAborted => Error::ConnectionAborted,
            io::ErrorKind::BrokenPipe => Error::BrokenPipe,
            _ => Error::Io(err),
        }
    }

    pub fn is_would_block(err: &io::Error) -> bool {
        matches!(err.kind(), io::ErrorKind::WouldBlock | io::ErrorKind::Interrupted)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn from_io_for_transport_normalises_connection_errors() {
        let reset = io::Error::from(io::ErrorKind::ConnectionReset);
        assert!(matches!(Error::from_io_for_transport(reset), Error::ConnectionReset));

        let refused = io::Error::from(io::ErrorKind::ConnectionRefused);
        assert!(matches!(Error::from_io_for_transport(refused), Error::ConnectionRefused));

        let aborted = io::Error::from(io::ErrorKind::ConnectionAborted);
        assert!(matches!(Error::from_io_for_transport(aborted), Error::ConnectionAborted));

        let broken_pipe = io::Error::from(io::ErrorKind::BrokenPipe);
        assert!(matches!(Error::from_io_for_transport(broken_pipe), Error::BrokenPipe));
    }

    #[test]
    fn from_io_for_transport_passes_through_other_kinds() {
        let other = io::Error::from(io::ErrorKind::NotFound);
        assert!(matches!(Error::from_io_for_transport(other), Error::Io(_)));
    }

    #[test]
    fn is_would_block_covers_eagain_and_eintr() {
        assert!(Error::is_would_block(&io::Error::from(io::ErrorKind::WouldBlock)));
        assert!(Error::is_would_block(&io::Error::from(io::ErrorKind::Interrupted)));
        assert!(!Error::is_would_block(&io::Error::from(io::ErrorKind::NotFound)));
    }

    #[test]
    fn clone_preserves_incomplete_payload() {
        let err = Error::Incomplete {
            partial: vec![1, 2, 3],
            expected: 10,
        };
        let cloned = err.clone();
        match cloned {
            Error::Incomplete { partial, expected } => {
                assert_eq!(partial, vec![1, 2, 3]);
                assert_eq!(expected, 10);
            }
            _ => panic!("expected Incomplete"),
        }
    }

    #[test]
    fn clone_rebuilds_io_variant_from_kind() {
        let err = Error::Io(io::Error::new(io::ErrorKind::TimedOut, "slow"));
        let cloned = err.clone();
        match cloned {
            Error::Io(e) => assert_eq!(e.kind(), io::ErrorKind::TimedOut),
            _ => panic!("expected Io"),
        }
    }
}
