use serde::{Deserialize, Serialize};

use super::constants::*;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub worker_pool: WorkerPoolConfig,

    #[serde(default)]
    pub monitor: MonitorConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// What happens to queued-but-unexecuted tasks at shutdown
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ShutdownPolicy {
    /// Workers keep popping until the queue is empty, then exit
    #[default]
    Drain,

    /// Workers exit at the next task boundary; queued tasks are dropped
    Abandon,
}

/// Worker pool configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerPoolConfig {
    /// Number of worker threads
    #[serde(default = "default_num_workers")]
    pub num_workers: usize,

    /// Task queue capacity (rounded up to a power of two)
    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Drain or abandon queued tasks on shutdown
    #[serde(default)]
    pub shutdown_policy: ShutdownPolicy,

    /// Worker threads are named `<prefix>-<index>`
    #[serde(default = "default_thread_prefix")]
    pub thread_name_prefix: String,

    /// Pin worker `i` to core `(first_core + i) % num_cores` (best effort)
    #[serde(default)]
    pub pin_workers: bool,

    /// First core used when `pin_workers` is set
    #[serde(default)]
    pub first_core: usize,
}

/// Latency monitor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorConfig {
    /// History cap; the oldest half is discarded when exceeded
    #[serde(default = "default_max_samples")]
    pub max_samples: usize,

    /// Percentile reported as the tail latency (0.0 to 1.0)
    #[serde(default = "default_tail_percentile")]
    pub tail_percentile: f64,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error"
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Enable JSON logging
    #[serde(default)]
    pub json_logs: bool,
}

// Default value functions
fn default_num_workers() -> usize {
    DEFAULT_NUM_WORKERS
}

fn default_queue_capacity() -> usize {
    DEFAULT_TASK_QUEUE_CAPACITY
}

fn default_thread_prefix() -> String {
    DEFAULT_WORKER_THREAD_PREFIX.to_string()
}

fn default_max_samples() -> usize {
    DEFAULT_MAX_LATENCY_SAMPLES
}

fn default_tail_percentile() -> f64 {
    DEFAULT_TAIL_PERCENTILE
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for WorkerPoolConfig {
    fn default() -> Self {
        Self {
            num_workers: default_num_workers(),
            queue_capacity: default_queue_capacity(),
            shutdown_policy: ShutdownPolicy::default(),
            thread_name_prefix: default_thread_prefix(),
            pin_workers: false,
            first_core: 0,
        }
    }
}

impl WorkerPoolConfig {
    /// Config with `num_workers` threads and defaults elsewhere
    pub fn with_workers(num_workers: usize) -> Self {
        Self {
            num_workers,
            ..Default::default()
        }
    }
}

impl Default for MonitorConfig {
    fn default() -> Self {
        Self {
            max_samples: default_max_samples(),
            tail_percentile: default_tail_percentile(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            json_logs: false,
        }
    }
}
