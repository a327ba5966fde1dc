//! Performance Utilities
//!
//! - **Object pools**: fixed slot pools with lock-free claim and release
//! - **Latency monitor**: percentile and throughput statistics
//! - **CPU affinity**: pin threads to cores, real-time priority
//! - **Interval timer**: fixed-cadence callback thread

pub mod cpu;
pub mod monitor;
pub mod pools;
pub mod timer;

pub use cpu::{
    available_cores, flush_cache_line, num_cores, pin_to_core, prefetch_range, prefetch_read,
    set_realtime_priority,
};
pub use monitor::{LatencyMonitor, LatencyStats, ThroughputStats};
pub use pools::{ObjectPool, PoolBox, PoolStats};
pub use timer::IntervalTimer;
