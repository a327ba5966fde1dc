//! Latency and Throughput Monitor
//!
//! Latency samples go into a mutex-guarded history because percentiles need
//! a sorted view. The monitor sits beside the hot path, not on it: queues and
//! pools never touch it. Throughput counters are plain relaxed atomics.

use parking_lot::Mutex;
use serde::Serialize;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{Duration, Instant};

use crate::config::{MonitorConfig, INITIAL_LATENCY_SAMPLE_CAPACITY};

/// Latency summary over the retained sample history
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct LatencyStats {
    pub min: Duration,
    pub max: Duration,
    pub avg: Duration,
    /// Tail latency at the configured percentile (0.99 by default)
    pub p99: Duration,
    pub count: u64,
}

/// Throughput since `start_monitoring()`
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct ThroughputStats {
    pub messages_per_second: f64,
    pub bytes_per_second: f64,
    pub total_messages: u64,
    pub total_bytes: u64,
}

pub struct LatencyMonitor {
    samples: Mutex<Vec<Duration>>,
    total_operations: AtomicU64,
    total_bytes: AtomicU64,
    started_at: Mutex<Instant>,
    max_samples: usize,
    tail_percentile: f64,
}

impl LatencyMonitor {
    pub fn new() -> Self {
        Self::with_config(MonitorConfig::default())
    }

    /// `config` is assumed valid (see [`MonitorConfig::validate`]); a cap
    /// below 2 is raised to 2.
    pub fn with_config(config: MonitorConfig) -> Self {
        let max_samples = config.max_samples.max(2);

        Self {
            samples: Mutex::new(Vec::with_capacity(
                INITIAL_LATENCY_SAMPLE_CAPACITY.min(max_samples),
            )),
            total_operations: AtomicU64::new(0),
            total_bytes: AtomicU64::new(0),
            started_at: Mutex::new(Instant::now()),
            max_samples,
            tail_percentile: config.tail_percentile.clamp(0.0, 1.0),
        }
    }

    /// Append one latency sample
    ///
    /// Once the history exceeds the cap, the oldest `cap / 2` samples are
    /// discarded.
    pub fn record_latency(&self, latency: Duration) {
        let mut samples = self.samples.lock();
        samples.push(latency);

        if samples.len() > self.max_samples {
            samples.drain(..self.max_samples / 2);
        }
    }

    /// Record the time elapsed since `start`
    #[inline]
    pub fn record_since(&self, start: Instant) {
        self.record_latency(start.elapsed());
    }

    /// Count one operation of `bytes` bytes
    #[inline(always)]
    pub fn record_operation(&self, bytes: u64) {
        self.total_operations.fetch_add(1, Ordering::Relaxed);
        self.total_bytes.fetch_add(bytes, Ordering::Relaxed);
    }

    /// Min, max, mean, tail percentile and count; all zero with no samples
    pub fn latency_stats(&self) -> LatencyStats {
        let sorted = self.sorted_snapshot();

        let (Some(&min), Some(&max)) = (sorted.first(), sorted.last()) else {
            return LatencyStats::default();
        };

        let count = sorted.len();
        let total_nanos: u128 = sorted.iter().map(Duration::as_nanos).sum();
        let avg_nanos = total_nanos / count as u128;

        LatencyStats {
            min,
            max,
            avg: Duration::from_nanos(u64::try_from(avg_nanos).unwrap_or(u64::MAX)),
            p99: percentile_of_sorted(&sorted, self.tail_percentile),
            count: count as u64,
        }
    }

    /// Sample at index `floor(p * n)`, clamped to the last sample
    pub fn percentile(&self, p: f64) -> Duration {
        percentile_of_sorted(&self.sorted_snapshot(), p)
    }

    pub fn throughput_stats(&self) -> ThroughputStats {
        let elapsed = self.started_at.lock().elapsed();
        throughput_over(
            self.total_operations.load(Ordering::Relaxed),
            self.total_bytes.load(Ordering::Relaxed),
            elapsed,
        )
    }

    /// Restart the throughput clock
    pub fn start_monitoring(&self) {
        *self.started_at.lock() = Instant::now();
    }

    /// Clear samples, zero counters, restart the clock
    pub fn reset(&self) {
        let mut samples = self.samples.lock();
        samples.clear();
        self.total_operations.store(0, Ordering::Relaxed);
        self.total_bytes.store(0, Ordering::Relaxed);
        *self.started_at.lock() = Instant::now();
    }

    /// Number of retained samples
    pub fn sample_count(&self) -> usize {
        self.samples.lock().len()
    }

    fn sorted_snapshot(&self) -> Vec<Duration> {
        // Copy under the lock, sort outside it
        let mut sorted = self.samples.lock().clone();
        sorted.sort_unstable();
        sorted
    }
}

impl Default for LatencyMonitor {
    fn default() -> Self {
        Self::new()
    }
}

/// Rates over `elapsed`; zero when no time has passed
fn throughput_over(total_messages: u64, total_bytes: u64, elapsed: Duration) -> ThroughputStats {
    let secs = elapsed.as_secs_f64();

    let (messages_per_second, bytes_per_second) = if secs > 0.0 {
        (total_messages as f64 / secs, total_bytes as f64 / secs)
    } else {
        (0.0, 0.0)
    };

    ThroughputStats {
        messages_per_second,
        bytes_per_second,
        total_messages,
        total_bytes,
    }
}

fn percentile_of_sorted(sorted: &[Duration], p: f64) -> Duration {
    if sorted.is_empty() {
        return Duration::ZERO;
    }

    let index = (p.max(0.0) * sorted.len() as f64) as usize;
    sorted[index.min(sorted.len() - 1)]
}
