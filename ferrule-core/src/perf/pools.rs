//! Lock-Free Fixed-Capacity Object Pool
//!
//! Objects are pre-allocated at creation time in a flat slab. Each slot has
//! an atomic `allocated` flag; allocation probes slots with a shared cursor
//! and claims one with a compare-and-swap.
//!
//! Allocation makes at most `capacity` probe attempts and returns `None` if
//! all of them fail, so `allocate` is wait-bounded rather than retrying
//! forever. Under contention other threads advance the same cursor, so a
//! single call may miss a slot freed concurrently.

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::marker::PhantomData;
use std::mem;
use std::ops::{Deref, DerefMut};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tracing::{debug, warn};

use crate::config::POOL_NEAR_EXHAUSTION_THRESHOLD;

/// Lock-free object pool
///
/// # Example
/// ```
/// use ferrule_core::perf::pools::ObjectPool;
///
/// struct OrderBuf {
///     bytes: [u8; 64],
///     len: usize,
/// }
///
/// impl Default for OrderBuf {
///     fn default() -> Self {
///         Self { bytes: [0; 64], len: 0 }
///     }
/// }
///
/// let pool = ObjectPool::<OrderBuf>::new(1024);
/// let mut buf = pool.allocate().expect("Pool exhausted");
/// buf.len = 3;
/// // Slot goes back to the pool when `buf` is dropped
/// ```
pub struct ObjectPool<T> {
    slots: Box<[UnsafeCell<T>]>,
    allocated: Box<[AtomicBool]>,
    cursor: CachePadded<AtomicUsize>,
}

// A slot's value is only reachable through the single PoolBox (or raw
// pointer) that won its CAS.
unsafe impl<T: Send> Send for ObjectPool<T> {}
unsafe impl<T: Send> Sync for ObjectPool<T> {}

impl<T: Default> ObjectPool<T> {
    /// Create new pool with specified capacity
    ///
    /// All objects are pre-allocated using T::default().
    /// This should be done once at startup, not in the hot path.
    pub fn new(capacity: usize) -> Self {
        Self::with_init(capacity, |_| T::default())
    }
}

impl<T> ObjectPool<T> {
    /// Create a pool whose slot `i` starts as `init(i)`
    ///
    /// # Panics
    /// Panics if `capacity` is zero or `T` is zero-sized (slots could not be
    /// told apart by address).
    pub fn with_init(capacity: usize, mut init: impl FnMut(usize) -> T) -> Self {
        assert!(capacity > 0, "object pool capacity must be positive");
        assert!(
            mem::size_of::<T>() > 0,
            "object pool does not support zero-sized types"
        );

        Self {
            slots: (0..capacity).map(|i| UnsafeCell::new(init(i))).collect(),
            allocated: (0..capacity).map(|_| AtomicBool::new(false)).collect(),
            cursor: CachePadded::new(AtomicUsize::new(0)),
        }
    }

    /// Claim a free slot
    ///
    /// Returns None if `capacity` probes all found occupied slots.
    #[inline]
    pub fn allocate(&self) -> Option<PoolBox<'_, T>> {
        let capacity = self.capacity();

        for _ in 0..capacity {
            let index = self.cursor.fetch_add(1, Ordering::Relaxed) % capacity;

            if self.allocated[index]
                .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
                .is_ok()
            {
                return Some(PoolBox {
                    pool: self,
                    index,
                    _owns: PhantomData,
                });
            }
        }

        None
    }

    /// Return a slot obtained from [`PoolBox::into_raw`]
    ///
    /// Pointers outside this pool's storage, or not on a slot boundary, are
    /// ignored and `false` is returned. Releasing a slot that is already free
    /// also returns `false` and is logged.
    ///
    /// # Safety
    /// `ptr` must not be used after this call. If `ptr` points into this
    /// pool, the caller must own that slot (it came from `into_raw` and was
    /// not returned since).
    pub unsafe fn deallocate(&self, ptr: NonNull<T>) -> bool {
        match self.index_of(ptr.as_ptr()) {
            Some(index) => self.release_checked(index),
            None => {
                debug!(ptr = ?ptr, "Ignoring deallocate of pointer outside pool storage");
                false
            }
        }
    }

    /// Re-wrap a pointer from [`PoolBox::into_raw`] in a guard
    ///
    /// Returns None for pointers that do not address an allocated slot.
    ///
    /// # Safety
    /// Same ownership requirement as [`ObjectPool::deallocate`].
    pub unsafe fn from_raw(&self, ptr: NonNull<T>) -> Option<PoolBox<'_, T>> {
        let index = self.index_of(ptr.as_ptr())?;
        if !self.allocated[index].load(Ordering::Acquire) {
            return None;
        }
        Some(PoolBox {
            pool: self,
            index,
            _owns: PhantomData,
        })
    }

    fn index_of(&self, ptr: *const T) -> Option<usize> {
        let size = mem::size_of::<T>();
        // UnsafeCell<T> has the same layout as T
        let base = self.slots.as_ptr() as usize;
        let end = base + size * self.capacity();
        let addr = ptr as usize;

        if addr < base || addr >= end {
            return None;
        }

        let offset = addr - base;
        if offset % size != 0 {
            return None;
        }

        Some(offset / size)
    }

    fn release_checked(&self, index: usize) -> bool {
        let was_allocated = self.allocated[index].swap(false, Ordering::Release);
        if !was_allocated {
            warn!(index, "Deallocate of a pool slot that is not allocated");
        }
        was_allocated
    }

    /// Get pool capacity
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Number of slots currently allocated (advisory under concurrency)
    pub fn allocated_count(&self) -> usize {
        self.allocated
            .iter()
            .filter(|flag| flag.load(Ordering::Acquire))
            .count()
    }

    /// Number of free slots (advisory under concurrency)
    pub fn available(&self) -> usize {
        self.capacity() - self.allocated_count()
    }

    /// Check if pool is exhausted
    pub fn is_exhausted(&self) -> bool {
        self.available() == 0
    }

    pub fn stats(&self) -> PoolStats {
        PoolStats::from_pool(self)
    }
}

impl<T> fmt::Debug for ObjectPool<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectPool")
            .field("capacity", &self.capacity())
            .field("allocated", &self.allocated_count())
            .finish()
    }
}

/// RAII guard for one allocated slot
///
/// Derefs to the pooled object and returns the slot when dropped.
pub struct PoolBox<'a, T> {
    pool: &'a ObjectPool<T>,
    index: usize,
    // Send/Sync follow exclusive ownership of a T
    _owns: PhantomData<&'a mut T>,
}

impl<'a, T> PoolBox<'a, T> {
    /// Slot index within the pool
    pub fn index(&self) -> usize {
        self.index
    }

    /// Give up the guard and keep the slot allocated
    ///
    /// The slot stays owned by the caller until passed to
    /// [`ObjectPool::deallocate`] (or re-wrapped with [`ObjectPool::from_raw`]).
    pub fn into_raw(self) -> NonNull<T> {
        let ptr = self.slot_ptr();
        mem::forget(self);
        ptr
    }

    fn slot_ptr(&self) -> NonNull<T> {
        // SAFETY: UnsafeCell::get never returns null
        unsafe { NonNull::new_unchecked(self.pool.slots[self.index].get()) }
    }
}

impl<T> Deref for PoolBox<'_, T> {
    type Target = T;

    fn deref(&self) -> &Self::Target {
        // SAFETY: this guard won the CAS for `index`
        unsafe { &*self.pool.slots[self.index].get() }
    }
}

impl<T> DerefMut for PoolBox<'_, T> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        // SAFETY: this guard won the CAS for `index`
        unsafe { &mut *self.pool.slots[self.index].get() }
    }
}

impl<T> Drop for PoolBox<'_, T> {
    fn drop(&mut self) {
        self.pool.allocated[self.index].store(false, Ordering::Release);
    }
}

impl<T: fmt::Debug> fmt::Debug for PoolBox<'_, T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PoolBox")
            .field("index", &self.index)
            .field("value", &**self)
            .finish()
    }
}

/// Pool statistics for monitoring
#[derive(Debug, Clone, Copy, serde::Serialize)]
pub struct PoolStats {
    pub capacity: usize,
    pub allocated: usize,
    pub utilization: f64,
}

impl PoolStats {
    /// Create stats from pool
    pub fn from_pool<T>(pool: &ObjectPool<T>) -> Self {
        let capacity = pool.capacity();
        let allocated = pool.allocated_count();
        let utilization = allocated as f64 / capacity as f64;

        Self {
            capacity,
            allocated,
            utilization,
        }
    }

    /// Check if pool is near exhaustion (>90% utilized)
    pub fn is_near_exhaustion(&self) -> bool {
        self.utilization > POOL_NEAR_EXHAUSTION_THRESHOLD
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default, Debug, PartialEq)]
    struct TestObject {
        value: u64,
    }

    #[test]
    fn test_pool_creation() {
        let pool = ObjectPool::<TestObject>::new(10);
        assert_eq!(pool.capacity(), 10);
        assert_eq!(pool.available(), 10);
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_allocate_release() {
        let pool = ObjectPool::<TestObject>::new(5);

        let mut obj1 = pool.allocate().unwrap();
        obj1.value = 42;
        assert_eq!(pool.available(), 4);

        let obj2 = pool.allocate().unwrap();
        assert_ne!(obj1.index(), obj2.index());
        assert_eq!(pool.available(), 3);

        drop(obj1);
        assert_eq!(pool.available(), 4);

        drop(obj2);
        assert_eq!(pool.available(), 5);
    }

    #[test]
    fn test_pool_exhaustion() {
        let pool = ObjectPool::<TestObject>::new(2);

        let _obj1 = pool.allocate().unwrap();
        let _obj2 = pool.allocate().unwrap();

        assert!(pool.is_exhausted());
        assert!(pool.allocate().is_none());
    }

    #[test]
    fn test_values_survive_reuse() {
        let pool = ObjectPool::<TestObject>::new(1);
        {
            let mut obj = pool.allocate().unwrap();
            obj.value = 99;
        }
        // Slots are not reset between allocations
        assert_eq!(pool.allocate().unwrap().value, 99);
    }

    #[test]
    fn test_with_init() {
        let pool = ObjectPool::with_init(3, |i| TestObject { value: i as u64 * 10 });
        let objs: Vec<_> = (0..3).map(|_| pool.allocate().unwrap()).collect();
        for obj in &objs {
            assert_eq!(obj.value, obj.index() as u64 * 10);
        }
    }

    #[test]
    fn test_into_raw_and_deallocate() {
        let pool = ObjectPool::<TestObject>::new(1);
        let ptr = pool.allocate().unwrap().into_raw();
        assert!(pool.is_exhausted());

        assert!(unsafe { pool.deallocate(ptr) });
        assert_eq!(pool.available(), 1);

        // Same slot comes back
        let again = pool.allocate().unwrap().into_raw();
        assert_eq!(again, ptr);
        assert!(unsafe { pool.deallocate(again) });
    }

    #[test]
    fn test_deallocate_foreign_pointer_ignored() {
        let pool = ObjectPool::<TestObject>::new(2);
        let _held = pool.allocate().unwrap();

        let mut outside = TestObject::default();
        assert!(!unsafe { pool.deallocate(NonNull::from(&mut outside)) });
        assert_eq!(pool.allocated_count(), 1);
    }

    #[test]
    fn test_deallocate_misaligned_pointer_ignored() {
        let pool = ObjectPool::<TestObject>::new(2);
        let ptr = pool.allocate().unwrap().into_raw();

        let off_boundary = (ptr.as_ptr() as *mut u8).wrapping_add(1) as *mut TestObject;
        let inside = NonNull::new(off_boundary).unwrap();
        assert!(!unsafe { pool.deallocate(inside) });
        assert_eq!(pool.allocated_count(), 1);

        assert!(unsafe { pool.deallocate(ptr) });
    }

    #[test]
    fn test_double_deallocate_reported() {
        let pool = ObjectPool::<TestObject>::new(1);
        let ptr = pool.allocate().unwrap().into_raw();
        assert!(unsafe { pool.deallocate(ptr) });
        assert!(!unsafe { pool.deallocate(ptr) });
        assert_eq!(pool.allocated_count(), 0);
    }

    #[test]
    fn test_from_raw_round_trip() {
        let pool = ObjectPool::<TestObject>::new(2);
        let mut guard = pool.allocate().unwrap();
        guard.value = 7;
        let ptr = guard.into_raw();

        let guard = unsafe { pool.from_raw(ptr) }.unwrap();
        assert_eq!(guard.value, 7);
        drop(guard);

        assert!(unsafe { pool.from_raw(ptr) }.is_none());
        assert_eq!(pool.available(), 2);
    }

    #[test]
    fn test_pool_stats() {
        let pool = ObjectPool::<TestObject>::new(10);

        let _obj1 = pool.allocate();
        let _obj2 = pool.allocate();

        let stats = pool.stats();
        assert_eq!(stats.capacity, 10);
        assert_eq!(stats.allocated, 2);
        assert!((stats.utilization - 0.2).abs() < 0.001);
        assert!(!stats.is_near_exhaustion());
    }

    #[test]
    fn test_pool_stats_near_exhaustion() {
        let pool = ObjectPool::<TestObject>::new(10);

        let _objs: Vec<_> = (0..10).map(|_| pool.allocate().unwrap()).collect();

        let stats = PoolStats::from_pool(&pool);
        assert!(stats.is_near_exhaustion());
    }

    #[test]
    #[should_panic(expected = "capacity must be positive")]
    fn test_zero_capacity_rejected() {
        let _ = ObjectPool::<TestObject>::new(0);
    }
}
