//! Compile-time defaults
//!
//! Runtime configuration (`Config`) falls back to these values when a field
//! is omitted.

// ===== WORKER POOL =====

/// Default number of worker threads
pub const DEFAULT_NUM_WORKERS: usize = 4;

/// Default task queue capacity (rounded up to 16_384 by the MPSC ring)
#[cfg(not(feature = "large-task-queue"))]
pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 10_000;
#[cfg(feature = "large-task-queue")]
pub const DEFAULT_TASK_QUEUE_CAPACITY: usize = 100_000;

/// Worker thread name prefix; threads are named `<prefix>-<index>`
pub const DEFAULT_WORKER_THREAD_PREFIX: &str = "ferrule-worker";

// ===== LATENCY MONITOR =====

/// Sample history cap; exceeding it discards the oldest half
pub const DEFAULT_MAX_LATENCY_SAMPLES: usize = 100_000;

/// Samples pre-allocated at construction
pub const INITIAL_LATENCY_SAMPLE_CAPACITY: usize = 10_000;

/// Percentile reported as `p99` in latency stats
pub const DEFAULT_TAIL_PERCENTILE: f64 = 0.99;

// ===== OBJECT POOL =====

/// Utilization above which a pool counts as near exhaustion
pub const POOL_NEAR_EXHAUSTION_THRESHOLD: f64 = 0.9;

/// Prefix for environment overrides, e.g. `FERRULE__WORKER_POOL__NUM_WORKERS=8`
pub const ENV_PREFIX: &str = "FERRULE";
