//! `corral` is a single-threaded, non-`Send` asynchronous I/O runtime: one
//! event loop per thread drives a readiness-based selector, a future/task
//! scheduler, selector-backed transports, and the synchronization
//! primitives built on top of them.
//!
//! Unlike `tokio`, nothing here is safe to move across threads mid-flight —
//! `EventLoop`, `Future<T>`, `Task<T>`, and every transport hold `Rc`/
//! `RefCell` state and assume a single driving thread, the way CPython's
//! `asyncio`/`tulip` assumes the GIL-serialized loop thread. Talking to
//! other threads goes through [`EventLoop::call_soon_threadsafe`] and the
//! self-pipe [`Waker`], never through `Send`.
//!
//! # Layout
//!
//! - [`selector`] — C1: the readiness multiplexer (epoll/kqueue/poll).
//! - [`event_loop`] — C2: the loop itself: timers, ready callbacks, fd
//!   bookkeeping, and the public scheduling API.
//! - [`future`] and [`task`] — C3/C4: the single-assignment `Future<T>` and
//!   the coroutine-driving `Task<T>`, plus the `wait`/`gather`/`as_completed`
//!   family in [`task::helpers`].
//! - [`transport`] — C6/C7: TCP, UDP, TLS (feature `tls`), pipe, and
//!   subprocess transports sharing one `Protocol` callback interface.
//! - [`net`] — the `EventLoop`-level connection factories and socket-level
//!   async I/O (`sock_connect`/`sock_recv`/`sock_sendall`/`sock_accept`,
//!   `create_connection`/`create_datagram_endpoint`/`start_serving`,
//!   `getaddrinfo`/`getnameinfo`) that assemble [`transport`]'s pieces.
//! - [`stream`] — C8/C9: the parser-driven byte stream layer and the
//!   higher-level `StreamReader`/`StreamWriter` pair.
//! - [`sync`] — C10: `Lock`, `Event`, `Condition`, `Semaphore`, `Queue`.
//! - [`signal`] — C11: self-pipe signal dispatch.
//! - [`child_watcher`] — C12: SIGCHLD-driven subprocess reaping.
//! - [`error`] — the crate-wide `Error`/`Result` taxonomy.
//! - [`policy`] — the thread-local "current event loop" the way
//!   `asyncio.get_event_loop()` resolves one without the caller threading it
//!   through every call.

pub mod child_watcher;
pub mod debug;
pub mod error;
pub mod event_loop;
pub mod executor;
pub mod features;
pub mod future;
pub mod handle;
pub mod interest;
pub mod net;
pub mod policy;
pub mod selector;
pub mod signal;
pub mod stream;
pub mod sync;
pub mod task;
pub mod time;
pub mod token;
pub mod transport;
pub mod waker;

pub use error::{Error, Result};
pub use event_loop::{Config, EventLoop};
pub use future::Future;
pub use handle::{Handle, TimerHandle};
pub use interest::Interest;
pub use policy::{get_event_loop, new_event_loop, set_event_loop};
pub use task::Task;
pub use time::Deadline;
pub use token::Token;
pub use waker::Waker;
