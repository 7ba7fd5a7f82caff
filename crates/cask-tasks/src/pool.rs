//! Fixed-size worker pool over a bounded job channel.
//!
//! Workers pull boxed jobs off one shared queue; a full queue applies
//! backpressure to the submitter. Dropping the pool (or calling
//! [`shutdown`](WorkerPool::shutdown)) closes the queue, lets the workers
//! drain what was already accepted, and joins them; no job that was
//! accepted is abandoned.

use std::sync::mpsc::{self, Receiver, SyncSender};
use std::sync::{Arc, Mutex};
use std::thread::JoinHandle;

use tracing::debug;

use crate::error::TaskError;

type Job = Box<dyn FnOnce() + Send + 'static>;

/// Bounded thread pool for per-store maintenance jobs.
pub struct WorkerPool {
    tx: Option<SyncSender<Job>>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `workers` threads behind a queue of `queue_capacity` pending
    /// jobs. Both are clamped to at least 1.
    pub fn new(workers: usize, queue_capacity: usize) -> Self {
        let (tx, rx) = mpsc::sync_channel::<Job>(queue_capacity.max(1));
        let rx = Arc::new(Mutex::new(rx));
        let workers = (0..workers.max(1))
            .map(|index| {
                let rx = Arc::clone(&rx);
                std::thread::spawn(move || worker_loop(index, rx))
            })
            .collect();
        Self {
            tx: Some(tx),
            workers,
        }
    }

    /// Queue a job. Blocks while the queue is full.
    pub fn submit(&self, job: impl FnOnce() + Send + 'static) -> Result<(), TaskError> {
        match &self.tx {
            Some(tx) => tx
                .send(Box::new(job))
                .map_err(|_| TaskError::PoolClosed),
            None => Err(TaskError::PoolClosed),
        }
    }

    /// Close the queue, drain the accepted jobs, and join the workers.
    pub fn shutdown(mut self) {
        self.drain();
    }

    fn drain(&mut self) {
        self.tx.take();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.drain();
    }
}

fn worker_loop(index: usize, rx: Arc<Mutex<Receiver<Job>>>) {
    debug!(worker = index, "pool worker started");
    loop {
        let job = {
            let guard = rx.lock().expect("lock poisoned");
            guard.recv()
        };
        match job {
            Ok(job) => job(),
            Err(_) => break,
        }
    }
    debug!(worker = index, "pool worker exited");
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn jobs_run_to_completion_on_shutdown() {
        let pool = WorkerPool::new(2, 8);
        let done = Arc::new(AtomicUsize::new(0));
        for _ in 0..20 {
            let done = Arc::clone(&done);
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 20);
    }

    #[test]
    fn concurrency_never_exceeds_the_worker_count() {
        let pool = WorkerPool::new(3, 16);
        let active = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));
        for _ in 0..12 {
            let active = Arc::clone(&active);
            let peak = Arc::clone(&peak);
            pool.submit(move || {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                std::thread::sleep(Duration::from_millis(10));
                active.fetch_sub(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        assert!(peak.load(Ordering::SeqCst) <= 3);
    }

    #[test]
    fn dropping_the_pool_drains_it() {
        let done = Arc::new(AtomicUsize::new(0));
        {
            let pool = WorkerPool::new(1, 4);
            for _ in 0..4 {
                let done = Arc::clone(&done);
                pool.submit(move || {
                    done.fetch_add(1, Ordering::SeqCst);
                })
                .unwrap();
            }
        }
        assert_eq!(done.load(Ordering::SeqCst), 4);
    }

    #[test]
    fn zero_sizes_are_clamped() {
        let pool = WorkerPool::new(0, 0);
        let done = Arc::new(AtomicUsize::new(0));
        {
            let done = Arc::clone(&done);
            pool.submit(move || {
                done.fetch_add(1, Ordering::SeqCst);
            })
            .unwrap();
        }
        pool.shutdown();
        assert_eq!(done.load(Ordering::SeqCst), 1);
    }
}
