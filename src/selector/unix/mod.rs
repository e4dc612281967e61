//! Per-platform selector backends, picked at compile time the way
//! `mio::sys::unix::mod.rs` picks between its `selector/{epoll,kqueue,poll}`
//! implementations.

#[cfg(any(target_os = "linux", target_os = "android"))]
mod epoll;
#[cfg(any(
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
))]
mod kqueue;
mod poll;

#[cfg(any(target_os = "linux", target_os = "android"))]
pub(crate) use epoll::{EventBuf as RawEventBuf, Selector as PlatformSelector};

#[cfg(all(
    any(
        target_os = "macos",
        target_os = "ios",
        target_os = "freebsd",
        target_os = "netbsd",
        target_os = "openbsd",
        target_os = "dragonfly",
    ),
    not(any(target_os = "linux", target_os = "android"))
))]
pub(crate) use kqueue::{EventBuf as RawEventBuf, Selector as PlatformSelector};

#[cfg(not(any(
    target_os = "linux",
    target_os = "android",
    target_os = "macos",
    target_os = "ios",
    target_os = "freebsd",
    target_os = "netbsd",
    target_os = "openbsd",
    target_os = "dragonfly",
)))]
pub(crate) use poll::{EventBuf as RawEventBuf, Selector as PlatformSelector};
