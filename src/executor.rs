//! §6 thread-pool bridge backing `EventLoop::run_in_executor`, the
//! `concurrent.futures`-style default executor spec §6 calls for (DNS
//! lookups, blocking subprocess setup, anything the caller hands off rather
//! than doing on the loop thread). Built on `crossbeam-channel`, the same
//! crate `AidanWoolley-catnip` pulls in for cross-thread handoff.

use std::thread;

use crossbeam_channel::{Receiver, Sender};

type Job = Box<dyn FnOnce() + Send + 'static>;

/// A small fixed-size worker pool. Workers park on a shared channel and run
/// whatever closures the loop hands them; results are communicated back out
/// of band (see `EventLoop::run_in_executor`), never returned through here.
pub struct Executor {
    sender: Sender<Job>,
    _workers: Vec<thread::JoinHandle<()>>,
}

impl Executor {
    pub fn new() -> Executor {
        Self::with_threads(default_thread_count())
    }

    pub fn with_threads(threads: usize) -> Executor {
        let (sender, receiver): (Sender<Job>, Receiver<Job>) = crossbeam_channel::unbounded();
        let workers = (0..threads.max(1))
            .map(|n| {
                let receiver = receiver.clone();
                thread::Builder::new()
                    .name(format!("corral-executor-{n}"))
                    .spawn(move || {
                        for job in receiver.iter() {
                            job();
                        }
                    })
                    .expect("failed to spawn executor worker thread")
            })
            .collect();
        Executor {
            sender,
            _workers: workers,
        }
    }

    pub fn spawn<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        // The pool is unbounded and workers never exit while `self.sender`
        // is alive, so a send failure here would mean every worker panicked.
        let _ = self.sender.send(Box::new(job));
    }
}

impl Default for Executor {
    fn default() -> Executor {
        Executor::new()
    }
}

pub(crate) fn default_thread_count() -> usize {
    thread::available_parallelism().map(|n| n.get()).unwrap_or(4).min(8)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn spawn_runs_the_job_on_a_worker_thread() {
        let executor = Executor::with_threads(2);
        let (tx, rx) = mpsc::channel();
        executor.spawn(move || {
            tx.send(40 + 2).unwrap();
        });
        assert_eq!(rx.recv_timeout(std::time::Duration::from_secs(1)).unwrap(), 42);
    }

    #[test]
    fn with_threads_zero_still_spawns_at_least_one_worker() {
        let executor = Executor::with_threads(0);
        let (tx, rx) = mpsc::channel();
        executor.spawn(move || tx.send(()).unwrap());
        assert!(rx.recv_timeout(std::time::Duration::from_secs(1)).is_ok());
    }

    #[test]
    fn jobs_submitted_concurrently_all_complete() {
        let executor = Executor::with_threads(4);
        let (tx, rx) = mpsc::channel();
        for i in 0..8 {
            let tx = tx.clone();
            executor.spawn(move || tx.send(i).unwrap());
        }
        drop(tx);
        let mut results: Vec<i32> = rx.iter().collect();
        results.sort_unstable();
        assert_eq!(results, (0..8).collect::<Vec<_>>());
    }
}
