//! Ferrule Core - Low-Latency Concurrency Substrate
//!
//! Building blocks for latency-sensitive pipelines where a thread hands work
//! to another thread in well under a microsecond.
//!
//! ## Architecture
//! - **Bounded lock-free queues**: SPSC and MPSC rings, fixed capacity, no
//!   allocation after construction
//! - **Cache-line padded** cursors so producers and consumers never share a line
//! - **Worker pool** draining the MPSC queue, with per-task result handles
//! - **Fixed object pool** with lock-free slot claim and release
//! - **Latency monitor** reporting min/max/mean/p99 and throughput
//!
//! ## Core Modules
//! - `queue`: SPSC and MPSC ring buffers
//! - `executor`: worker pool and task handles
//! - `perf`: object pool, latency monitor, CPU affinity, interval timer
//! - `config`: serde configuration and compile-time defaults
//! - `core`: error types
//! - `utils`: tracing setup

pub mod config;
pub mod core;
pub mod executor;
pub mod perf;
pub mod queue;
pub mod utils;

// Re-export core types
pub use crate::core::{PoolError, TaskError};

pub use config::{Config, ShutdownPolicy, WorkerPoolConfig};
pub use executor::{Executable, TaskHandle, WorkerPool, WorkerPoolStats};
pub use perf::{IntervalTimer, LatencyMonitor, LatencyStats, ObjectPool, PoolBox, ThroughputStats};

// Re-export error types
pub use anyhow::{Error, Result};

/// Prelude for convenient imports
pub mod prelude {
    // Queues
    pub use crate::queue::{mpsc, spsc};

    // Executor
    pub use crate::executor::{TaskHandle, WorkerPool};
    pub use crate::config::{ShutdownPolicy, WorkerPoolConfig};

    // Performance utilities
    pub use crate::perf::{pin_to_core, LatencyMonitor, ObjectPool, PoolBox};

    // Error types
    pub use crate::core::{PoolError, TaskError};
    pub use crate::{Error, Result};
}
