//! Fixed-size worker pool executing handler invocations.
//!
//! Jobs are boxed closures consumed from a mutex-guarded queue. `wait`
//! blocks until the queue is empty and no job is running; dropping the
//! pool signals shutdown and joins the workers.

use std::collections::VecDeque;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::{Arc, Condvar, Mutex};
use std::thread::JoinHandle;

type Job = Box<dyn FnOnce() + Send + 'static>;

struct PoolState {
    queue: VecDeque<Job>,
    active: usize,
    stopped: bool,
}

struct PoolShared {
    state: Mutex<PoolState>,
    work_available: Condvar,
    idle: Condvar,
}

pub struct WorkerPool {
    shared: Arc<PoolShared>,
    workers: Vec<JoinHandle<()>>,
}

impl WorkerPool {
    /// Spawns `size` worker threads (at least one).
    pub fn new(size: usize) -> Self {
        let shared = Arc::new(PoolShared {
            state: Mutex::new(PoolState {
                queue: VecDeque::new(),
                active: 0,
                stopped: false,
            }),
            work_available: Condvar::new(),
            idle: Condvar::new(),
        });

        let workers = (0..size.max(1))
            .map(|_| {
                let shared = Arc::clone(&shared);
                std::thread::spawn(move || worker_loop(&shared))
            })
            .collect();

        Self { shared, workers }
    }

    /// Enqueues a job. Returns false if the pool has been shut down.
    pub fn submit<F>(&self, job: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        {
            let mut state = self.shared.state.lock().unwrap();
            if state.stopped {
                return false;
            }
            state.queue.push_back(Box::new(job));
        }
        self.shared.work_available.notify_one();
        true
    }

    pub fn size(&self) -> usize {
        self.workers.len()
    }

    pub fn pending(&self) -> usize {
        self.shared.state.lock().unwrap().queue.len()
    }

    /// Blocks until every submitted job has finished.
    pub fn wait(&self) {
        let state = self.shared.state.lock().unwrap();
        let _guard = self
            .shared
            .idle
            .wait_while(state, |s| !s.queue.is_empty() || s.active > 0)
            .unwrap();
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shared.state.lock().unwrap().stopped = true;
        self.shared.work_available.notify_all();
        for handle in self.workers.drain(..) {
            let _ = handle.join();
        }
    }
}

fn worker_loop(shared: &PoolShared) {
    loop {
        let job = {
            let mut state = shared.state.lock().unwrap();
            loop {
                if let Some(job) = state.queue.pop_front() {
                    state.active += 1;
                    break job;
                }
                if state.stopped {
                    return;
                }
                state = shared.work_available.wait(state).unwrap();
            }
        };

        // A panicking job must not take the worker down with it; the engine
        // projects handler failures into task status before this point.
        if catch_unwind(AssertUnwindSafe(job)).is_err() {
            tracing::warn!("worker pool job panicked");
        }

        let mut state = shared.state.lock().unwrap();
        state.active -= 1;
        if state.queue.is_empty() && state.active == 0 {
            shared.idle.notify_all();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    #[test]
    fn executes_all_submitted_jobs() {
        let pool = WorkerPool::new(4);
        let counter = Arc::new(AtomicUsize::new(0));
        for _ in 0..32 {
            let counter = Arc::clone(&counter);
            assert!(pool.submit(move || {
                counter.fetch_add(1, Ordering::SeqCst);
            }));
        }
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 32);
    }

    #[test]
    fn wait_blocks_until_running_jobs_finish() {
        let pool = WorkerPool::new(1);
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(move || {
            std::thread::sleep(Duration::from_millis(50));
            c.fetch_add(1, Ordering::SeqCst);
        });
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn panicking_job_does_not_kill_worker() {
        let pool = WorkerPool::new(1);
        pool.submit(|| panic!("job bug"));
        let counter = Arc::new(AtomicUsize::new(0));
        let c = Arc::clone(&counter);
        pool.submit(move || {
            c.fetch_add(1, Ordering::SeqCst);
        });
        pool.wait();
        assert_eq!(counter.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn submit_after_drop_signal_is_rejected() {
        let pool = WorkerPool::new(1);
        pool.shared.state.lock().unwrap().stopped = true;
        assert!(!pool.submit(|| {}));
    }
}
