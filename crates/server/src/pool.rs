//! Fixed-size worker pool over a shared FIFO queue.
//!
//! Workers are spawned once and live until [`WorkerPool::shutdown`]. Tasks are
//! taken in submission order, but several workers run concurrently so completion
//! order is not guaranteed. Shutdown lets the workers drain whatever is queued
//! and then joins them.

use std::any::Any;
use std::collections::VecDeque;
use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;
use std::thread::{self, JoinHandle};

use parking_lot::{Condvar, Mutex};
use tracing::{debug, error, info};

use crate::error::PoolError;

type Job = Box<dyn FnOnce() + Send + 'static>;

#[derive(Default)]
struct State {
    queue: VecDeque<Job>,
    closed: bool,
}

#[derive(Default)]
struct Shared {
    state: Mutex<State>,
    available: Condvar,
}

pub struct WorkerPool {
    shared: Arc<Shared>,
    workers: Vec<JoinHandle<()>>,
    size: usize,
}

impl std::fmt::Debug for WorkerPool {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerPool").field("size", &self.size).field("running", &self.workers.len()).finish()
    }
}

impl WorkerPool {
    /// Spawns `size` workers named `reactor-worker-{i}`.
    pub fn new(size: usize) -> Result<Self, PoolError> {
        if size == 0 {
            return Err(PoolError::NoWorkers);
        }

        let mut pool = Self { shared: Arc::new(Shared::default()), workers: Vec::with_capacity(size), size };
        for index in 0..size {
            let shared = Arc::clone(&pool.shared);
            // on error `pool` is dropped here, which joins the workers already spawned
            let handle = thread::Builder::new()
                .name(format!("reactor-worker-{index}"))
                .spawn(move || work(&shared, index))
                .map_err(|source| PoolError::Spawn { index, source })?;
            pool.workers.push(handle);
        }

        info!(workers = size, "worker pool started");
        Ok(pool)
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Queues `task` and wakes one idle worker; never blocks on the queue.
    ///
    /// Only fails once the pool has been shut down.
    pub fn submit<F>(&self, task: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock();
            if state.closed {
                return Err(PoolError::Closed);
            }
            state.queue.push_back(Box::new(task));
        }
        self.shared.available.notify_one();
        Ok(())
    }

    /// Number of tasks waiting for a worker.
    pub fn queued(&self) -> usize {
        self.shared.state.lock().queue.len()
    }

    /// Closes the queue, lets workers finish the tasks already queued and joins them.
    ///
    /// Calling it again is a no-op.
    pub fn shutdown(&mut self) {
        if self.workers.is_empty() {
            return;
        }

        self.shared.state.lock().closed = true;
        self.shared.available.notify_all();

        for handle in self.workers.drain(..) {
            let name = handle.thread().name().unwrap_or("reactor-worker").to_string();
            if handle.join().is_err() {
                error!(worker = %name, "worker thread terminated abnormally");
            }
        }
        info!(workers = self.size, "worker pool stopped");
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn work(shared: &Shared, index: usize) {
    debug!(worker = index, "worker started");
    loop {
        let job = {
            let mut state = shared.state.lock();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    break job;
                }
                // closed is only honoured once the queue is empty
                if state.closed {
                    debug!(worker = index, "worker exiting");
                    return;
                }
                shared.available.wait(&mut state);
            }
        };

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(job)) {
            error!(worker = index, cause = panic_message(payload.as_ref()), "task panicked");
        }
    }
}

pub(crate) fn panic_message(payload: &(dyn Any + Send)) -> &str {
    if let Some(message) = payload.downcast_ref::<&'static str>() {
        message
    } else if let Some(message) = payload.downcast_ref::<String>() {
        message.as_str()
    } else {
        "unknown panic payload"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parking_lot::Mutex;
    use std::sync::Barrier;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn zero_workers_is_rejected() {
        assert!(matches!(WorkerPool::new(0), Err(PoolError::NoWorkers)));
    }

    #[test]
    fn shutdown_drains_queued_tasks() {
        for workers in [1, 4] {
            let mut pool = WorkerPool::new(workers).unwrap();
            let gate = Arc::new(Barrier::new(workers + 1));
            let counter = Arc::new(AtomicUsize::new(0));

            // park every worker so the tasks below pile up in the queue
            for _ in 0..workers {
                let gate = Arc::clone(&gate);
                pool.submit(move || {
                    gate.wait();
                })
                .unwrap();
            }
            for _ in 0..100 {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }

            gate.wait();
            pool.shutdown();
            assert_eq!(counter.load(Ordering::SeqCst), 100);
        }
    }

    #[test]
    fn queue_is_fifo_with_one_worker() {
        let mut pool = WorkerPool::new(1).unwrap();
        let seen = Arc::new(Mutex::new(Vec::new()));
        for i in 0..20 {
            let seen = Arc::clone(&seen);
            pool.submit(move || seen.lock().push(i)).unwrap();
        }
        pool.shutdown();
        assert_eq!(*seen.lock(), (0..20).collect::<Vec<_>>());
    }

    #[test]
    fn panicking_task_does_not_kill_worker() {
        let mut pool = WorkerPool::new(1).unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        pool.submit(|| panic!("boom")).unwrap();
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        })
        .unwrap();

        pool.shutdown();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_after_shutdown_fails() {
        let mut pool = WorkerPool::new(2).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert!(matches!(pool.submit(|| {}), Err(PoolError::Closed)));
    }

    #[test]
    fn workers_are_named() {
        let mut pool = WorkerPool::new(1).unwrap();
        let name = Arc::new(Mutex::new(None));
        let n = Arc::clone(&name);
        pool.submit(move || *n.lock() = thread::current().name().map(str::to_string)).unwrap();
        pool.shutdown();
        assert_eq!(name.lock().as_deref(), Some("reactor-worker-0"));
    }

    #[test]
    fn panic_message_extracts_payload() {
        let payload = panic::catch_unwind(|| panic!("static message")).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "static message");

        let payload = panic::catch_unwind(|| panic!("formatted {}", 42)).unwrap_err();
        assert_eq!(panic_message(payload.as_ref()), "formatted 42");
    }
}
