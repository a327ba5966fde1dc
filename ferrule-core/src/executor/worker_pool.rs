//! Fixed-size worker pool over the MPSC task queue
//!
//! Submitters are the queue's producers. The workers share its single
//! consumer: whichever worker wins `try_lock` pops one task, releases the
//! lock, and runs the task outside it. No worker ever blocks on the lock; a
//! worker that loses simply backs off and tries again.
//!
//! Every task runs inside `catch_unwind`. A panic is logged and counted and
//! the worker carries on.

use anyhow::{Context, Result};
use crossbeam_utils::Backoff;
use parking_lot::Mutex;
use serde::Serialize;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{error, info, warn};

use super::task::{panic_message, with_result, Executable, Task, TaskHandle};
use crate::config::{ShutdownPolicy, WorkerPoolConfig};
use crate::core::PoolError;
use crate::perf::cpu;
use crate::queue::mpsc;

/// Counters since the pool started
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct WorkerPoolStats {
    /// Tasks accepted into the queue
    pub submitted: u64,
    /// Tasks that ran to completion
    pub completed: u64,
    /// Tasks that panicked
    pub failed: u64,
    /// Submissions refused (queue full or shut down)
    pub rejected: u64,
    /// Tasks dropped unexecuted by an abandoning shutdown
    pub abandoned: u64,
}

enum Poll {
    Task(Task),
    Empty,
    /// Another worker holds the consumer
    Busy,
}

struct Inner {
    producer: mpsc::Producer<Task>,
    consumer: Mutex<mpsc::Consumer<Task>>,

    /// Cleared when shutdown begins; no submission starts after that
    accepting: AtomicBool,
    /// Submissions between their `accepting` check and their push
    submitting: AtomicUsize,
    /// Checked by workers between tasks
    stop: AtomicBool,
    /// Keep popping after `stop` until the queue is empty
    drain: AtomicBool,

    submitted: AtomicU64,
    completed: AtomicU64,
    failed: AtomicU64,
    rejected: AtomicU64,
    abandoned: AtomicU64,
}

impl Inner {
    fn try_pop(&self) -> Poll {
        match self.consumer.try_lock() {
            Some(mut consumer) => match consumer.pop() {
                Some(task) => Poll::Task(task),
                None => Poll::Empty,
            },
            None => Poll::Busy,
        }
    }

    fn run(&self, worker: usize, task: Task) {
        match panic::catch_unwind(AssertUnwindSafe(|| task.execute())) {
            Ok(()) => {
                self.completed.fetch_add(1, Ordering::Relaxed);
            }
            Err(payload) => {
                self.failed.fetch_add(1, Ordering::Relaxed);
                error!(
                    worker,
                    message = %panic_message(payload.as_ref()),
                    "Task panicked; worker continues"
                );
            }
        }
    }

    fn enqueue(&self, task: Task) -> Result<(), PoolError> {
        // SeqCst pairs with shutdown(): either shutdown sees us in
        // `submitting`, or we see `accepting == false`.
        self.submitting.fetch_add(1, Ordering::SeqCst);

        let result = if self.accepting.load(Ordering::SeqCst) {
            self.producer
                .push(task)
                .map_err(|_rejected| PoolError::QueueFull {
                    capacity: self.producer.capacity(),
                })
        } else {
            Err(PoolError::ShutDown)
        };

        self.submitting.fetch_sub(1, Ordering::SeqCst);

        match result {
            Ok(()) => self.submitted.fetch_add(1, Ordering::Relaxed),
            Err(_) => self.rejected.fetch_add(1, Ordering::Relaxed),
        };
        result
    }

    fn stats(&self) -> WorkerPoolStats {
        WorkerPoolStats {
            submitted: self.submitted.load(Ordering::Relaxed),
            completed: self.completed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
            rejected: self.rejected.load(Ordering::Relaxed),
            abandoned: self.abandoned.load(Ordering::Relaxed),
        }
    }
}

/// Fixed set of OS threads draining a bounded task queue
///
/// # Example
/// ```
/// use ferrule_core::executor::WorkerPool;
///
/// let pool = WorkerPool::new(2).unwrap();
/// let handle = pool.submit(|| 6 * 7).unwrap();
/// assert_eq!(handle.wait(), Ok(42));
/// ```
pub struct WorkerPool {
    inner: Arc<Inner>,
    workers: Vec<JoinHandle<()>>,
    config: WorkerPoolConfig,
}

impl WorkerPool {
    /// Start `num_workers` threads with default settings
    pub fn new(num_workers: usize) -> Result<Self> {
        Self::with_config(WorkerPoolConfig::with_workers(num_workers))
    }

    /// Validate `config` and start the workers
    pub fn with_config(config: WorkerPoolConfig) -> Result<Self> {
        config.validate()?;

        let (producer, consumer) = mpsc::bounded::<Task>(config.queue_capacity);
        let inner = Arc::new(Inner {
            producer,
            consumer: Mutex::new(consumer),
            accepting: AtomicBool::new(true),
            submitting: AtomicUsize::new(0),
            stop: AtomicBool::new(false),
            drain: AtomicBool::new(config.shutdown_policy == ShutdownPolicy::Drain),
            submitted: AtomicU64::new(0),
            completed: AtomicU64::new(0),
            failed: AtomicU64::new(0),
            rejected: AtomicU64::new(0),
            abandoned: AtomicU64::new(0),
        });

        let cores = if config.pin_workers {
            let cores = cpu::available_cores();
            if cores.is_empty() {
                warn!("Worker pinning requested but no CPU cores are visible; running unpinned");
            }
            cores
        } else {
            Vec::new()
        };

        let mut pool = Self {
            inner,
            workers: Vec::with_capacity(config.num_workers),
            config,
        };

        for worker in 0..pool.config.num_workers {
            let inner = Arc::clone(&pool.inner);
            let core = (!cores.is_empty())
                .then(|| cores[(pool.config.first_core + worker) % cores.len()]);

            let spawned = thread::Builder::new()
                .name(format!("{}-{}", pool.config.thread_name_prefix, worker))
                .spawn(move || worker_loop(&inner, worker, core))
                .with_context(|| format!("Failed to spawn worker thread {}", worker));

            match spawned {
                Ok(handle) => pool.workers.push(handle),
                Err(e) => {
                    // Dropping `pool` stops and joins what did start
                    pool.shutdown_with(ShutdownPolicy::Abandon);
                    return Err(e);
                }
            }
        }

        info!(
            workers = pool.config.num_workers,
            queue_capacity = pool.inner.producer.capacity(),
            shutdown_policy = ?pool.config.shutdown_policy,
            pinned = !cores.is_empty(),
            "Worker pool started"
        );

        Ok(pool)
    }

    /// Queue a fire-and-forget task
    pub fn submit_detached<F>(&self, f: F) -> Result<(), PoolError>
    where
        F: FnOnce() + Send + 'static,
    {
        self.inner.enqueue(Box::new(f))
    }

    /// Queue an already boxed executable
    pub fn execute(&self, task: Box<dyn Executable>) -> Result<(), PoolError> {
        self.inner.enqueue(task)
    }

    /// Queue a task and get a handle to its result
    ///
    /// Arguments are passed by capturing them in the closure.
    pub fn submit<F, R>(&self, f: F) -> Result<TaskHandle<R>, PoolError>
    where
        F: FnOnce() -> R + Send + 'static,
        R: Send + 'static,
    {
        let (task, handle) = with_result(f);
        self.inner.enqueue(task)?;
        Ok(handle)
    }

    /// Stop using the configured [`ShutdownPolicy`] and join all workers
    pub fn shutdown(&mut self) {
        let policy = self.config.shutdown_policy;
        self.shutdown_with(policy);
    }

    /// Stop using `policy` and join all workers
    ///
    /// Idempotent. A task that blocks forever stalls this call.
    pub fn shutdown_with(&mut self, policy: ShutdownPolicy) {
        if self.workers.is_empty() {
            return;
        }

        let inner = &*self.inner;
        inner.accepting.store(false, Ordering::SeqCst);

        // Let submissions that passed the `accepting` check finish their push
        let backoff = Backoff::new();
        while inner.submitting.load(Ordering::SeqCst) != 0 {
            backoff.snooze();
        }

        inner
            .drain
            .store(policy == ShutdownPolicy::Drain, Ordering::Release);
        inner.stop.store(true, Ordering::Release);

        for handle in self.workers.drain(..) {
            if handle.join().is_err() {
                error!("Worker thread terminated abnormally");
            }
        }

        // Drop leftovers now so their handles resolve as abandoned
        let mut abandoned = 0u64;
        {
            let mut consumer = inner.consumer.lock();
            while let Some(task) = consumer.pop() {
                drop(task);
                abandoned += 1;
            }
        }
        inner.abandoned.fetch_add(abandoned, Ordering::Relaxed);

        let stats = inner.stats();
        info!(
            policy = ?policy,
            completed = stats.completed,
            failed = stats.failed,
            abandoned = stats.abandoned,
            "Worker pool stopped"
        );
    }

    pub fn num_workers(&self) -> usize {
        self.config.num_workers
    }

    /// True until shutdown begins
    pub fn is_running(&self) -> bool {
        self.inner.accepting.load(Ordering::Acquire)
    }

    /// Advisory count of queued tasks
    pub fn queued(&self) -> usize {
        self.inner.producer.len()
    }

    /// Task queue capacity (after power-of-two rounding)
    pub fn queue_capacity(&self) -> usize {
        self.inner.producer.capacity()
    }

    pub fn stats(&self) -> WorkerPoolStats {
        self.inner.stats()
    }

    pub fn config(&self) -> &WorkerPoolConfig {
        &self.config
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        self.shutdown();
    }
}

fn worker_loop(inner: &Inner, worker: usize, core: Option<usize>) {
    if let Some(core) = core {
        cpu::pin_worker_best_effort(worker, core);
    }

    let backoff = Backoff::new();

    loop {
        let stopping = inner.stop.load(Ordering::Acquire);
        if stopping && !inner.drain.load(Ordering::Acquire) {
            break;
        }

        match inner.try_pop() {
            Poll::Task(task) => {
                backoff.reset();
                inner.run(worker, task);
            }
            // No submissions are in flight once `stop` is set, so empty is final
            Poll::Empty if stopping => break,
            Poll::Empty | Poll::Busy => {
                if backoff.is_completed() {
                    thread::yield_now();
                } else {
                    backoff.snooze();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::TaskError;
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    #[test]
    fn test_pool_reports_shape() {
        let pool = WorkerPool::new(2).unwrap();
        assert_eq!(pool.num_workers(), 2);
        assert!(pool.is_running());
        assert_eq!(pool.queue_capacity(), 16_384);
    }

    #[test]
    fn test_zero_workers_rejected() {
        assert!(WorkerPool::new(0).is_err());
    }

    #[test]
    fn test_submit_returns_value() {
        let pool = WorkerPool::new(2).unwrap();
        let a = 20;
        let b = 22;
        let handle = pool.submit(move || a + b).unwrap();
        assert_eq!(handle.wait(), Ok(42));
    }

    #[test]
    fn test_shutdown_is_idempotent_and_rejects() {
        let mut pool = WorkerPool::new(1).unwrap();
        pool.shutdown();
        pool.shutdown();
        assert!(!pool.is_running());
        assert_eq!(pool.submit_detached(|| {}), Err(PoolError::ShutDown));
        assert!(matches!(pool.submit(|| 1), Err(PoolError::ShutDown)));
        assert_eq!(pool.stats().rejected, 2);
    }

    #[test]
    fn test_panic_does_not_kill_worker() {
        let pool = WorkerPool::new(1).unwrap();

        let bad = pool.submit(|| -> u8 { panic!("task failure") }).unwrap();
        assert_eq!(
            bad.wait(),
            Err(TaskError::Panicked("task failure".to_string()))
        );

        // The only worker must still be alive
        let good = pool.submit(|| 7u8).unwrap();
        assert_eq!(good.wait_timeout(Duration::from_secs(5)), Ok(7));

        let stats = pool.stats();
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
    }

    #[test]
    fn test_boxed_executable() {
        let pool = WorkerPool::new(1).unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);

        let task: Box<dyn Executable> = Box::new(move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });
        pool.execute(task).unwrap();

        let done = pool.submit(|| ()).unwrap();
        done.wait().unwrap();
        // Single worker: FIFO, so the executable ran first
        assert_eq!(hits.load(Ordering::Relaxed), 1);
    }
}
