//! Bounded Single-Producer Single-Consumer Ring Buffer
//!
//! Wait-free on both sides: `push` and `pop` are a handful of loads and one
//! release store each. The queue is split into a [`Producer`] and a
//! [`Consumer`] handle; neither is `Clone` and both mutate through `&mut self`,
//! so "exactly one producer thread, exactly one consumer thread" holds by
//! construction.
//!
//! ## Protocol
//! - Producer writes the payload into `buffer[tail]` with a plain store, then
//!   publishes `tail` with `Release`.
//! - Consumer loads `tail` with `Acquire` before reading the payload, then
//!   publishes `head` with `Release`.
//! - Producer loads `head` with `Acquire` before the fullness check, so a slot
//!   is never rewritten while the consumer may still be reading it.
//!
//! One slot is kept empty to tell "full" from "empty": a queue of capacity `C`
//! holds at most `C - 1` items.
//!
//! # Example
//! ```
//! use ferrule_core::queue::spsc;
//!
//! let (mut tx, mut rx) = spsc::bounded::<u64>(4);
//! tx.push(1).unwrap();
//! tx.push(2).unwrap();
//! assert_eq!(rx.pop(), Some(1));
//! assert_eq!(rx.pop(), Some(2));
//! assert_eq!(rx.pop(), None);
//! ```

use crossbeam_utils::CachePadded;
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

/// Shared ring storage. Indices are kept in `[0, capacity)`.
struct Ring<T> {
    /// Next slot to consume. Written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Next slot to produce. Written only by the producer.
    tail: CachePadded<AtomicUsize>,
    buffer: Box<[UnsafeCell<MaybeUninit<T>>]>,
}

// Slots in [head, tail) belong to the consumer, the rest to the producer.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn with_capacity(capacity: usize) -> Self {
        let buffer = (0..capacity)
            .map(|_| UnsafeCell::new(MaybeUninit::uninit()))
            .collect();

        Self {
            head: CachePadded::new(AtomicUsize::new(0)),
            tail: CachePadded::new(AtomicUsize::new(0)),
            buffer,
        }
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.buffer.len()
    }

    #[inline(always)]
    fn next(&self, index: usize) -> usize {
        let next = index + 1;
        if next == self.capacity() {
            0
        } else {
            next
        }
    }

    #[inline(always)]
    fn slot(&self, index: usize) -> *mut MaybeUninit<T> {
        self.buffer[index].get()
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        if tail >= head {
            tail - head
        } else {
            self.capacity() - head + tail
        }
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let mut head = *self.head.get_mut();
        let tail = *self.tail.get_mut();

        while head != tail {
            // SAFETY: [head, tail) holds initialized items and we are the last owner.
            unsafe { self.buffer[head].get_mut().assume_init_drop() };
            head = self.next(head);
        }
    }
}

/// Create a bounded SPSC queue with `capacity` slots (`capacity - 1` usable).
///
/// # Panics
/// Panics if `capacity < 2`.
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    assert!(
        capacity >= 2,
        "SPSC capacity must be at least 2 (one slot is reserved), got {}",
        capacity
    );

    let ring = Arc::new(Ring::with_capacity(capacity));
    (
        Producer {
            ring: Arc::clone(&ring),
        },
        Consumer { ring },
    )
}

/// Writing half of an SPSC queue.
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Producer<T> {
    /// Push an item, handing it back if the queue is full.
    ///
    /// Never blocks and never overwrites. Retry, spin or drop is up to the caller.
    #[inline]
    pub fn push(&mut self, item: T) -> Result<(), T> {
        let ring = &*self.ring;
        let tail = ring.tail.load(Ordering::Relaxed);
        let next = ring.next(tail);

        if next == ring.head.load(Ordering::Acquire) {
            return Err(item);
        }

        // SAFETY: the slot at `tail` is outside [head, tail), so the consumer
        // does not touch it until the release store below.
        unsafe { (*ring.slot(tail)).write(item) };
        ring.tail.store(next, Ordering::Release);
        Ok(())
    }

    /// Total slots, including the reserved one.
    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Advisory item count.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advisory: true when the next `push` would fail.
    pub fn is_full(&self) -> bool {
        let ring = &*self.ring;
        ring.next(ring.tail.load(Ordering::Relaxed)) == ring.head.load(Ordering::Acquire)
    }
}

/// Reading half of an SPSC queue.
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Consumer<T> {
    /// Pop the oldest item, or `None` if the queue is empty.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);

        if head == ring.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: the acquire load of `tail` makes the producer's write of
        // this slot visible, and the producer will not reuse it until `head`
        // moves past it.
        let item = unsafe { (*ring.slot(head)).assume_init_read() };
        ring.head.store(ring.next(head), Ordering::Release);
        Some(item)
    }

    /// Borrow the oldest item without consuming it.
    ///
    /// Takes `&mut self` like `pop`: a shared `&Consumer` may be visible to
    /// several threads, and handing each of them `&T` would require `T: Sync`.
    ///
    /// ```compile_fail
    /// use ferrule_core::queue::spsc;
    ///
    /// let (_tx, rx) = spsc::bounded::<std::cell::Cell<u64>>(4);
    /// let shared = &rx;
    /// let _ = shared.peek();
    /// ```
    #[inline]
    pub fn peek(&mut self) -> Option<&T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);

        if head == ring.tail.load(Ordering::Acquire) {
            return None;
        }

        // SAFETY: same visibility argument as `pop`; `head` cannot advance
        // while the returned borrow holds `&mut self`.
        Some(unsafe { (*ring.slot(head)).assume_init_ref() })
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Advisory item count.
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        let ring = &*self.ring;
        ring.head.load(Ordering::Relaxed) == ring.tail.load(Ordering::Acquire)
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("spsc::Producer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("spsc::Consumer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}
