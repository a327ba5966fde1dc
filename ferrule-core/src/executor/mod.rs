//! Task execution on a fixed set of worker threads
//!
//! - [`WorkerPool`]: workers draining the MPSC task queue
//! - [`TaskHandle`]: deferred result of a submitted task
//! - [`Executable`]: what the queue carries; closures implement it

pub mod task;
pub mod worker_pool;

pub use task::{panic_message, Executable, Task, TaskHandle};
pub use worker_pool::{WorkerPool, WorkerPoolStats};
