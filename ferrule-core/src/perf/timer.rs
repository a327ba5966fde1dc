//! Fixed-cadence timer thread
//!
//! Runs a callback on a dedicated thread every `interval`. Deadlines advance
//! by exactly one interval per tick (`next += interval`), so a callback that
//! runs a little long does not shift the schedule. If the thread falls more
//! than a full interval behind, missed ticks are skipped rather than fired
//! back-to-back.

use anyhow::{Context, Result};
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use tracing::{debug, error};

use crate::executor::panic_message;

struct Shared {
    running: AtomicBool,
    interval_nanos: AtomicU64,
    ticks: AtomicU64,
    callback: Box<dyn Fn() + Send + Sync>,
}

impl Shared {
    fn interval(&self) -> Duration {
        Duration::from_nanos(self.interval_nanos.load(Ordering::Relaxed))
    }
}

/// Periodic callback runner
///
/// # Example
/// ```
/// use ferrule_core::perf::timer::IntervalTimer;
/// use std::sync::atomic::{AtomicU64, Ordering};
/// use std::sync::Arc;
/// use std::time::Duration;
///
/// let fired = Arc::new(AtomicU64::new(0));
/// let counter = Arc::clone(&fired);
/// let mut timer = IntervalTimer::new(Duration::from_millis(1), move || {
///     counter.fetch_add(1, Ordering::Relaxed);
/// });
/// timer.start().unwrap();
/// std::thread::sleep(Duration::from_millis(20));
/// timer.stop();
/// assert!(fired.load(Ordering::Relaxed) > 0);
/// ```
pub struct IntervalTimer {
    shared: Arc<Shared>,
    handle: Option<JoinHandle<()>>,
}

impl IntervalTimer {
    pub fn new<F>(interval: Duration, callback: F) -> Self
    where
        F: Fn() + Send + Sync + 'static,
    {
        Self {
            shared: Arc::new(Shared {
                running: AtomicBool::new(false),
                interval_nanos: AtomicU64::new(duration_nanos(interval)),
                ticks: AtomicU64::new(0),
                callback: Box::new(callback),
            }),
            handle: None,
        }
    }

    /// Spawn the timer thread. Does nothing if already running.
    pub fn start(&mut self) -> Result<()> {
        if self.shared.running.swap(true, Ordering::AcqRel) {
            return Ok(());
        }

        let shared = Arc::clone(&self.shared);
        let spawned = thread::Builder::new()
            .name("ferrule-timer".to_string())
            .spawn(move || timer_loop(&shared))
            .context("Failed to spawn timer thread");

        match spawned {
            Ok(handle) => {
                self.handle = Some(handle);
                Ok(())
            }
            Err(e) => {
                self.shared.running.store(false, Ordering::Release);
                Err(e)
            }
        }
    }

    /// Stop and join the timer thread. Does nothing if not running.
    ///
    /// Returns after the in-flight callback, if any, completes.
    pub fn stop(&mut self) {
        self.shared.running.store(false, Ordering::Release);

        if let Some(handle) = self.handle.take() {
            handle.thread().unpark();
            if handle.join().is_err() {
                error!("Timer thread terminated abnormally");
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::Acquire)
    }

    /// Takes effect from the next deadline
    pub fn set_interval(&self, interval: Duration) {
        self.shared
            .interval_nanos
            .store(duration_nanos(interval), Ordering::Relaxed);
    }

    pub fn interval(&self) -> Duration {
        self.shared.interval()
    }

    /// Callbacks fired so far
    pub fn ticks(&self) -> u64 {
        self.shared.ticks.load(Ordering::Relaxed)
    }
}

impl Drop for IntervalTimer {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Longest supported interval; keeps deadline arithmetic far from overflow
const MAX_INTERVAL: Duration = Duration::from_secs(24 * 60 * 60);

fn duration_nanos(interval: Duration) -> u64 {
    // A zero interval would spin the thread flat out
    interval.min(MAX_INTERVAL).as_nanos().max(1) as u64
}

fn timer_loop(shared: &Shared) {
    let mut next_tick = Instant::now();

    while shared.running.load(Ordering::Acquire) {
        let interval = shared.interval();
        next_tick += interval;

        if let Err(payload) = panic::catch_unwind(AssertUnwindSafe(|| (*shared.callback)())) {
            error!(
                message = %panic_message(payload.as_ref()),
                "Timer callback panicked"
            );
        }
        shared.ticks.fetch_add(1, Ordering::Relaxed);

        let now = Instant::now();
        if now > next_tick + interval {
            debug!("Timer fell behind by more than one interval; skipping missed ticks");
            next_tick = now;
        }

        // park_timeout so stop() can wake us before the deadline
        while shared.running.load(Ordering::Acquire) {
            let now = Instant::now();
            if now >= next_tick {
                break;
            }
            thread::park_timeout(next_tick - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_start_stop_idempotent() {
        let mut timer = IntervalTimer::new(Duration::from_millis(5), || {});
        assert!(!timer.is_running());

        timer.start().unwrap();
        timer.start().unwrap();
        assert!(timer.is_running());

        timer.stop();
        timer.stop();
        assert!(!timer.is_running());
    }

    #[test]
    fn test_fires_repeatedly() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut timer = IntervalTimer::new(Duration::from_millis(1), move || {
            counter.fetch_add(1, Ordering::Relaxed);
        });

        timer.start().unwrap();
        thread::sleep(Duration::from_millis(50));
        timer.stop();

        let fired = hits.load(Ordering::Relaxed);
        assert!(fired >= 2, "expected several ticks, got {}", fired);
        assert_eq!(timer.ticks(), fired as u64);

        // No ticks after stop
        thread::sleep(Duration::from_millis(10));
        assert_eq!(hits.load(Ordering::Relaxed), fired);
    }

    #[test]
    fn test_stop_does_not_wait_for_long_interval() {
        let mut timer = IntervalTimer::new(Duration::from_secs(3600), || {});
        timer.start().unwrap();
        thread::sleep(Duration::from_millis(5));

        let started = Instant::now();
        timer.stop();
        assert!(started.elapsed() < Duration::from_secs(5));
    }

    #[test]
    fn test_set_interval() {
        let timer = IntervalTimer::new(Duration::from_millis(10), || {});
        timer.set_interval(Duration::from_millis(3));
        assert_eq!(timer.interval(), Duration::from_millis(3));

        timer.set_interval(Duration::ZERO);
        assert_eq!(timer.interval(), Duration::from_nanos(1));

        timer.set_interval(Duration::MAX);
        assert_eq!(timer.interval(), MAX_INTERVAL);
    }

    #[test]
    fn test_panicking_callback_keeps_timer_alive() {
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let mut timer = IntervalTimer::new(Duration::from_millis(1), move || {
            if counter.fetch_add(1, Ordering::Relaxed) == 0 {
                panic!("first tick fails");
            }
        });

        timer.start().unwrap();
        thread::sleep(Duration::from_millis(30));
        timer.stop();
        assert!(hits.load(Ordering::Relaxed) >= 2);
    }
}
