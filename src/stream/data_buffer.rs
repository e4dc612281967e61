//! Spec §4.7: the output side of a parser. Items a parser emits via
//! `feed_data` land here; `feed_eof`/`set_exception` mark the terminal
//! state. A `DataBuffer<T>` has at most one waiter at a time, mirroring the
//! "at most one task may read from a DataBuffer" invariant from spec §5.

use std::collections::VecDeque;

use crate::error::Error;
use crate::event_loop::EventLoop;
use crate::future::Future;

enum Terminal {
    None,
    Eof,
    Exception(Error),
}

pub struct DataBuffer<T> {
    items: VecDeque<T>,
    terminal: Terminal,
    waiter: Option<Future<()>>,
    event_loop: EventLoop,
}

impl<T> DataBuffer<T> {
    pub fn new(event_loop: &EventLoop) -> DataBuffer<T> {
        DataBuffer {
            items: VecDeque::new(),
            terminal: Terminal::None,
            waiter: None,
            event_loop: event_loop.clone(),
        }
    }

    /// A parser calls this to emit one framed item.
    pub fn feed_data(&mut self, item: T) {
        self.items.push_back(item);
        self.wake_waiter();
    }

    pub fn feed_eof(&mut self) {
        self.terminal = Terminal::Eof;
        self.wake_waiter();
    }

    pub fn set_exception(&mut self, err: Error) {
        self.terminal = Terminal::Exception(err);
        self.wake_waiter();
    }

    fn wake_waiter(&mut self) {
        if let Some(waiter) = self.waiter.take() {
            if !waiter.done() {
                waiter.set_result(());
            }
        }
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    /// Pops one item if available without suspending.
    pub fn try_next(&mut self) -> Option<T> {
        self.items.pop_front()
    }

    /// Returns a `Future` that resolves once an item, EOF, or an exception
    /// is available — the single reusable waiter per spec §5.
    pub fn wait_ready(&mut self) -> Future<()> {
        if !self.items.is_empty() || !matches!(self.terminal, Terminal::None) {
            let fut = self.event_loop.create_future();
            fut.set_result(());
            return fut;
        }
        let fut = self.event_loop.create_future();
        self.waiter = Some(fut.clone());
        fut
    }

    pub fn exception(&self) -> Option<&Error> {
        match &self.terminal {
            Terminal::Exception(e) => Some(e),
            _ => None,
        }
    }

    pub fn at_eof(&self) -> bool {
        matches!(self.terminal, Terminal::Eof) && self.items.is_empty()
    }
}
