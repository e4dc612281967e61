//! §6: process-wide event-loop policy, mirroring `asyncio`'s
//! `get_event_loop`/`set_event_loop`/`new_event_loop` trio. Since `EventLoop`
//! is `Rc`-based and therefore thread-local by construction, the "policy" is
//! just a `thread_local!` slot holding the current thread's default loop —
//! there is no cross-thread registry to guard.

use std::cell::RefCell;

use crate::event_loop::EventLoop;

thread_local! {
    static CURRENT: RefCell<Option<EventLoop>> = const { RefCell::new(None) };
}

/// Returns this thread's event loop, creating one on first use.
pub fn get_event_loop() -> std::io::Result<EventLoop> {
    CURRENT.with(|cell| {
        let mut slot = cell.borrow_mut();
        if let Some(existing) = slot.as_ref() {
            return Ok(existing.clone());
        }
        let fresh = EventLoop::new()?;
        *slot = Some(fresh.clone());
        Ok(fresh)
    })
}

/// Installs `event_loop` as this thread's default.
pub fn set_event_loop(event_loop: EventLoop) {
    CURRENT.with(|cell| *cell.borrow_mut() = Some(event_loop));
}

/// Creates a fresh loop without installing it as the thread default.
pub fn new_event_loop() -> std::io::Result<EventLoop> {
    EventLoop::new()
}
