//! Fixed-size worker pool with a bounded job queue.
//!
//! Threads are created once at pool construction and reused across
//! frames. `submit` enqueues a boxed closure, blocking while the queue
//! is full; `wait_all` blocks until every submitted job has finished.
//! Workers never submit jobs themselves. Shutdown drains the queue,
//! joins all threads, and is idempotent; dropping the pool shuts it
//! down.

use std::collections::VecDeque;
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    jobs: VecDeque<Job>,
    active: usize,
    shutdown: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    /// Signaled when a job is queued or shutdown begins.
    job_ready: Condvar,
    /// Signaled when queue space frees up.
    space_ready: Condvar,
    /// Signaled when a job finishes and nothing is left running.
    all_idle: Condvar,
    queue_cap: usize,
}

/// A fixed pool of worker threads.
pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawn `threads` workers (at least one) with room for `queue_cap`
    /// queued jobs.
    pub fn new(threads: usize, queue_cap: usize) -> Self {
        let threads = threads.max(1);
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                jobs: VecDeque::new(),
                active: 0,
                shutdown: false,
            }),
            job_ready: Condvar::new(),
            space_ready: Condvar::new(),
            all_idle: Condvar::new(),
            queue_cap: queue_cap.max(1),
        });

        let workers = (0..threads)
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        WorkerPool { shared, workers }
    }

    /// Number of worker threads.
    pub fn thread_count(&self) -> usize {
        self.workers.len()
    }

    /// Enqueue a job, blocking while the queue is full.
    pub fn submit<F>(&self, job: F)
    where
        F: FnOnce() + Send + 'static,
    {
        let mut state = self.shared.state.lock().unwrap();
        while state.jobs.len() >= self.shared.queue_cap {
            state = self.shared.space_ready.wait(state).unwrap();
        }
        debug_assert!(!state.shutdown, "submit after shutdown");
        state.jobs.push_back(Box::new(job));
        drop(state);
        self.shared.job_ready.notify_one();
    }

    /// Block until every submitted job has completed.
    pub fn wait_all(&self) {
        let mut state = self.shared.state.lock().unwrap();
        while !state.jobs.is_empty() || state.active > 0 {
            state = self.shared.all_idle.wait(state).unwrap();
        }
    }

    /// Drain outstanding work and join every thread. Safe to call more
    /// than once.
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.shutdown {
                return;
            }
            state.shutdown = true;
        }
        self.shared.job_ready.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(job) = state.jobs.pop_front() {
                    state.active += 1;
                    break job;
                }
                if state.shutdown {
                    return;
                }
                state = shared.job_ready.wait(state).unwrap();
            }
        };
        shared.space_ready.notify_one();

        // A panicking job must not wedge wait_all; the failure surfaces
        // as a missing result on the orchestrator side.
        let _ = std::panic::catch_unwind(std::panic::AssertUnwindSafe(job));

        let mut state = shared.state.lock().unwrap();
        state.active -= 1;
        if state.jobs.is_empty() && state.active == 0 {
            shared.all_idle.notify_all();
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::mpsc;

    #[test]
    fn test_runs_all_jobs() {
        let pool = WorkerPool::new(4, 8);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..100 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait_all();
        assert_eq!(counter.load(Ordering::Relaxed), 100);
    }

    #[test]
    fn test_wait_all_on_idle_pool() {
        let pool = WorkerPool::new(2, 4);
        pool.wait_all();
        pool.wait_all();
    }

    #[test]
    fn test_results_via_channel() {
        let pool = WorkerPool::new(3, 4);
        let (tx, rx) = mpsc::channel();
        for i in 0..20usize {
            let tx = tx.clone();
            pool.submit(move || {
                tx.send((i, i * i)).unwrap();
            });
        }
        pool.wait_all();
        drop(tx);
        let mut results: Vec<_> = rx.into_iter().collect();
        results.sort_unstable();
        assert_eq!(results.len(), 20);
        for (i, sq) in results {
            assert_eq!(sq, i * i);
        }
    }

    #[test]
    fn test_bounded_queue_applies_backpressure() {
        // A single slow worker with a tiny queue forces submit to block;
        // all jobs must still complete.
        let pool = WorkerPool::new(1, 1);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..10 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                std::thread::sleep(std::time::Duration::from_millis(1));
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait_all();
        assert_eq!(counter.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut pool = WorkerPool::new(2, 4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..8 {
            let counter = Arc::clone(&counter);
            pool.submit(move || {
                counter.fetch_add(1, Ordering::Relaxed);
            });
        }
        pool.wait_all();
        pool.shutdown();
        pool.shutdown();
        assert_eq!(counter.load(Ordering::Relaxed), 8);
    }

    #[test]
    fn test_pool_reuse_across_batches() {
        let pool = WorkerPool::new(4, 4);
        for batch in 0..5usize {
            let counter = Arc::new(AtomicUsize::new(0));
            for _ in 0..batch + 1 {
                let counter = Arc::clone(&counter);
                pool.submit(move || {
                    counter.fetch_add(1, Ordering::Relaxed);
                });
            }
            pool.wait_all();
            assert_eq!(counter.load(Ordering::Relaxed), batch + 1);
        }
    }
}
