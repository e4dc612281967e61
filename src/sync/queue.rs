//! Spec §4.9's `Queue` and its LIFO/priority/joinable variants. All four
//! share one waiter-queue core (`Core<T>`); the variants differ only in
//! how they pick the next item to hand out.

use std::cell::RefCell;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, VecDeque};
use std::rc::Rc;

use crate::error::{Error, Result};
use crate::event_loop::EventLoop;
use crate::future::Future;

/// Backing storage strategy for a queue variant. `push`/`pop` are plain,
/// synchronous operations; all suspension lives in `Core`.
trait Storage<T> {
    fn push(&mut self, item: T);
    fn pop(&mut self) -> Option<T>;
    fn len(&self) -> usize;
}

#[derive(Default)]
struct Fifo<T>(VecDeque<T>);
impl<T> Storage<T> for Fifo<T> {
    fn push(&mut self, item: T) {
        self.0.push_back(item);
    }
    fn pop(&mut self) -> Option<T> {
        self.0.pop_front()
    }
    fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Default)]
struct Lifo<T>(Vec<T>);
impl<T> Storage<T> for Lifo<T> {
    fn push(&mut self, item: T) {
        self.0.push(item);
    }
    fn pop(&mut self) -> Option<T> {
        self.0.pop()
    }
    fn len(&self) -> usize {
        self.0.len()
    }
}

#[derive(Default)]
struct Priority<T: Ord>(BinaryHeap<Reverse<T>>);
impl<T: Ord> Storage<T> for Priority<T> {
    fn push(&mut self, item: T) {
        self.0.push(Reverse(item));
    }
    fn pop(&mut self) -> Option<T> {
        self.0.pop().map(|Reverse(item)| item)
    }
    fn len(&self) -> usize {
        self.0.len()
    }
}

struct Core<T, S: Storage<T>> {
    items: S,
    maxsize: usize,
    put_waiters: VecDeque<Future<()>>,
    get_waiters: VecDeque<Future<()>>,
    unfinished: usize,
    join_waiters: Vec<Future<()>>,
    event_loop: EventLoop,
    _marker: std::marker::PhantomData<T>,
}

impl<T, S: Storage<T> + Default> Core<T, S> {
    fn new(event_loop: &EventLoop, maxsize: usize) -> Core<T, S> {
        Core {
            items: S::default(),
            maxsize,
            put_waiters: VecDeque::new(),
            get_waiters: VecDeque::new(),
            unfinished: 0,
            join_waiters: Vec::new(),
            event_loop: event_loop.clone(),
            _marker: std::marker::PhantomData,
        }
    }

    fn full(&self) -> bool {
        self.maxsize > 0 && self.items.len() >= self.maxsize
    }

    fn wake_one(queue: &mut VecDeque<Future<()>>) {
        while let Some(waiter) = queue.pop_front() {
            if !waiter.done() {
                waiter.set_result(());
                return;
            }
        }
    }
}

macro_rules! queue_impl {
    ($name:ident, $storage:ident $(, $bound:ident)?) => {
        /// See [module docs](self) for the shared contract.
        pub struct $name<T $(: $bound)?> {
            core: Rc<RefCell<Core<T, $storage<T>>>>,
        }

        impl<T $(: $bound)?> Clone for $name<T> {
            fn clone(&self) -> Self {
                $name { core: Rc::clone(&self.core) }
            }
        }

        impl<T: Clone + 'static $(+ $bound)?> $name<T> {
            /// `maxsize == 0` means unbounded, matching `asyncio.Queue`.
            pub fn new(event_loop: &EventLoop, maxsize: usize) -> $name<T> {
                $name { core: Rc::new(RefCell::new(Core::new(event_loop, maxsize))) }
            }

            pub fn qsize(&self) -> usize {
                self.core.borrow().items.len()
            }

            pub fn empty(&self) -> bool {
                self.qsize() == 0
            }

            pub fn full(&self) -> bool {
                self.core.borrow().full()
            }

            /// Suspends if the queue is at `maxsize`, otherwise enqueues
            /// immediately.
            pub async fn put(&self, item: T) -> Result<()> {
                loop {
                    let waiter = {
                        let mut core = self.core.borrow_mut();
                        if !core.full() {
                            core.items.push(item.clone());
                            core.unfinished += 1;
                            Core::wake_one(&mut core.get_waiters);
                            None
                        } else {
                            let fut = core.event_loop.create_future::<()>();
                            core.put_waiters.push_back(fut.clone());
                            Some(fut)
                        }
                    };
                    match waiter {
                        None => return Ok(()),
                        Some(fut) => fut.await?,
                    }
                }
            }

            /// Fails with `Error::QueueFull` instead of suspending.
            pub fn put_nowait(&self, item: T) -> Result<()> {
                let mut core = self.core.borrow_mut();
                if core.full() {
                    return Err(Error::QueueFull);
                }
                core.items.push(item);
                core.unfinished += 1;
                Core::wake_one(&mut core.get_waiters);
                Ok(())
            }

            /// Suspends if the queue is empty, otherwise dequeues
            /// immediately.
            pub async fn get(&self) -> Result<T> {
                loop {
                    let ready = {
                        let mut core = self.core.borrow_mut();
                        match core.items.pop() {
                            Some(item) => {
                                Core::wake_one(&mut core.put_waiters);
                                Some(item)
                            }
                            None => None,
                        }
                    };
                    if let Some(item) = ready {
                        return Ok(item);
                    }
                    let fut = {
                        let mut core = self.core.borrow_mut();
                        let fut = core.event_loop.create_future::<()>();
                        core.get_waiters.push_back(fut.clone());
                        fut
                    };
                    fut.await?;
                }
            }

            /// Fails with `Error::QueueEmpty` instead of suspending.
            pub fn get_nowait(&self) -> Result<T> {
                let mut core = self.core.borrow_mut();
                match core.items.pop() {
                    Some(item) => {
                        Core::wake_one(&mut core.put_waiters);
                        Ok(item)
                    }
                    None => Err(Error::QueueEmpty),
                }
            }

            /// Marks one previously-`get`-ten item as processed; once
            /// `unfinished` reaches zero, every `join()` waiter resolves
            /// (spec §4.9's joinable variant).
            pub fn task_done(&self) {
                let woken = {
                    let mut core = self.core.borrow_mut();
                    assert!(core.unfinished > 0, "task_done() called more times than items were put");
                    core.unfinished -= 1;
                    if core.unfinished == 0 {
                        std::mem::take(&mut core.join_waiters)
                    } else {
                        Vec::new()
                    }
                };
                for waiter in woken {
                    if !waiter.done() {
                        waiter.set_result(());
                    }
                }
            }

            /// Suspends until every item ever `put` has had a matching
            /// `task_done()`.
            pub async fn join(&self) -> Result<()> {
                let waiter = {
                    let mut core = self.core.borrow_mut();
                    if core.unfinished == 0 {
                        None
                    } else {
                        let fut = core.event_loop.create_future::<()>();
                        core.join_waiters.push(fut.clone());
                        Some(fut)
                    }
                };
                if let Some(fut) = waiter {
                    fut.await?;
                }
                Ok(())
            }
        }
    };
}

queue_impl!(Queue, Fifo);
queue_impl!(LifoQueue, Lifo);
queue_impl!(PriorityQueue, Priority, Ord);
