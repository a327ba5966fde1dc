//! CPU Affinity and Thread Priority Utilities
//!
//! Best-effort tuning for threads on the hot path. Nothing in the queues or
//! pools depends on these succeeding; a failure only costs latency variance.

use anyhow::Result;
use core_affinity::CoreId;
use std::mem;

/// Pin the current thread to a specific CPU core
///
/// # Example
/// ```no_run
/// use ferrule_core::perf::cpu::pin_to_core;
/// pin_to_core(2).expect("Failed to pin to core 2");
/// ```
pub fn pin_to_core(core: usize) -> Result<()> {
    if !available_cores().contains(&core) {
        anyhow::bail!("CPU core {} is not available to this process", core);
    }

    let core_id = CoreId { id: core };

    if core_affinity::set_for_current(core_id) {
        tracing::debug!("Pinned thread to CPU core {}", core);
        Ok(())
    } else {
        anyhow::bail!("Failed to pin thread to core {}", core)
    }
}

/// Set real-time thread priority (Linux only)
///
/// Requires CAP_SYS_NICE capability or root privileges. Applies SCHED_FIFO
/// to the calling thread.
#[cfg(target_os = "linux")]
pub fn set_realtime_priority(priority: i32) -> Result<()> {
    use libc::{sched_param, sched_setscheduler, SCHED_FIFO};

    let param = sched_param {
        sched_priority: priority,
    };

    // SAFETY: pid 0 targets the calling thread; `param` outlives the call.
    let rc = unsafe { sched_setscheduler(0, SCHED_FIFO, &param) };
    if rc == 0 {
        tracing::debug!("Set thread priority to SCHED_FIFO:{}", priority);
        Ok(())
    } else {
        anyhow::bail!("Failed to set thread priority (may need CAP_SYS_NICE or root)")
    }
}

/// Set real-time thread priority (non-Linux platforms)
#[cfg(not(target_os = "linux"))]
pub fn set_realtime_priority(_priority: i32) -> Result<()> {
    anyhow::bail!("Real-time priority setting not supported on this platform")
}

/// Get the number of available CPU cores
pub fn num_cores() -> usize {
    core_affinity::get_core_ids()
        .map(|ids| ids.len())
        .unwrap_or(1)
        .max(1)
}

/// Core ids the current process may run on
pub fn available_cores() -> Vec<usize> {
    core_affinity::get_core_ids()
        .map(|ids| ids.into_iter().map(|core| core.id).collect())
        .unwrap_or_default()
}

/// Hint the CPU to pull `data` into cache for reading
///
/// A no-op on targets without a prefetch instruction.
#[inline(always)]
pub fn prefetch_read<T>(data: &T) {
    prefetch_addr(data as *const T as *const u8);
}

#[inline(always)]
fn prefetch_addr(addr: *const u8) {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::{_mm_prefetch, _MM_HINT_T0};
        // SAFETY: prefetch never faults, even on invalid addresses.
        unsafe { _mm_prefetch::<_MM_HINT_T0>(addr as *const i8) };
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = addr;
    }
}

/// Cache line size assumed by the range hints
pub const CACHE_LINE_SIZE: usize = 64;

/// Hint the CPU to pull every cache line of `data` into cache
///
/// Issues one prefetch per 64-byte line, so large structures and slices are
/// covered end to end. A no-op for empty slices.
#[inline]
pub fn prefetch_range<T>(data: &[T]) {
    let start = data.as_ptr() as *const u8;
    let len = mem::size_of_val(data);

    for offset in (0..len).step_by(CACHE_LINE_SIZE) {
        prefetch_addr(start.wrapping_add(offset));
    }
}

/// Evict the cache line holding `data` from every cache level
///
/// Useful before timing a cold access. A no-op on targets without a flush
/// instruction.
#[inline]
pub fn flush_cache_line<T>(data: &T) {
    #[cfg(target_arch = "x86_64")]
    {
        use std::arch::x86_64::_mm_clflush;
        // SAFETY: `data` is a live reference, so the line is mapped; clflush
        // does not modify memory contents.
        unsafe { _mm_clflush(data as *const T as *const u8) };
    }

    #[cfg(not(target_arch = "x86_64"))]
    {
        let _ = data;
    }
}

/// Pin the calling worker thread to `core`, logging instead of failing
///
/// Returns whether pinning took effect.
pub(crate) fn pin_worker_best_effort(worker: usize, core: usize) -> bool {
    match pin_to_core(core) {
        Ok(()) => true,
        Err(e) => {
            tracing::warn!(
                worker,
                core,
                error = %e,
                "Worker CPU pinning failed; continuing unpinned"
            );
            false
        }
    }
}
