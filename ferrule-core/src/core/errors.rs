//! Error types for the concurrency substrate
//!
//! Capacity exhaustion on the raw queues and the object pool is not an error
//! type at all: queues hand the item back (`Err(item)`) and the pool returns
//! `None`. The types here cover the worker pool, where a submission can be
//! rejected and a deferred result can fail to materialize.

use thiserror::Error;

/// Why a submission to the worker pool was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum PoolError {
    /// The task queue had no free slot
    #[error("task queue is full (capacity {capacity})")]
    QueueFull {
        /// Task queue capacity
        capacity: usize,
    },

    /// Shutdown has begun; no new work is accepted
    #[error("worker pool is shut down")]
    ShutDown,
}

/// Why a [`TaskHandle`](crate::executor::TaskHandle) did not yield a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TaskError {
    /// The task panicked; the worker survived and logged it
    #[error("task panicked: {0}")]
    Panicked(String),

    /// The task was dropped without running (abandon-on-shutdown)
    #[error("task was abandoned before it ran")]
    Abandoned,

    /// `wait_timeout` elapsed before the task finished
    #[error("timed out waiting for task result")]
    Timeout,
}

impl TaskError {
    /// True if the task may still complete later
    pub fn is_timeout(&self) -> bool {
        matches!(self, TaskError::Timeout)
    }
}
