//! C10: synchronization primitives, spec §4.9. Every primitive here is
//! built on the same shape — a FIFO of waiter [`Future`](crate::future::Future)s
//! living on the owning loop — and is single-thread safe only: correctness
//! depends on the loop's FIFO callback ordering (spec §5), not on any
//! cross-thread synchronization.

pub mod condition;
pub mod event;
pub mod lock;
pub mod queue;
pub mod semaphore;

pub use condition::Condition;
pub use event::Event;
pub use lock::Lock;
pub use queue::{LifoQueue, PriorityQueue, Queue};
pub use semaphore::{BoundedSemaphore, Semaphore};
