//! Bounded Multi-Producer Single-Consumer Ring Buffer
//!
//! Producers claim a slot with a single `fetch_add` on `tail` (the ticket),
//! write the payload, and publish the slot. The consumer walks `head` in
//! ticket order and only moves past a slot once it has been published.
//!
//! ## Slot stamps
//! Each slot carries a stamp instead of a plain occupied flag:
//! - `stamp == ticket`: free, writable by the producer holding `ticket`
//! - `stamp == ticket + 1`: published, readable by the consumer
//! - `stamp == ticket + capacity`: consumed, writable on the next lap
//!
//! Tickets are wrapping `usize` counters and the capacity is a power of two,
//! so `ticket & mask` stays continuous across `usize::MAX -> 0` and stamps are
//! compared with wrapping arithmetic. Two producers a full lap apart can
//! never both see the slot as theirs.
//!
//! ## Ordering
//! FIFO per producer, ticket-ordered globally. Two producers racing for
//! adjacent tickets may finish writing in either order; the consumer still
//! sees them in ticket order and waits at an unpublished ticket.
//!
//! ## Backpressure
//! `push` fails immediately when the queue is observed full. The fullness
//! check is a snapshot, so several producers can pass it at once; a producer
//! whose ticket lands on a slot from the previous lap spins with
//! [`Backoff::snooze`] until the consumer frees it. If the consumer is
//! dropped during that wait, the push gives the item back instead.

use crossbeam_utils::{Backoff, CachePadded};
use std::cell::UnsafeCell;
use std::fmt;
use std::mem::MaybeUninit;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

struct Slot<T> {
    stamp: AtomicUsize,
    value: UnsafeCell<MaybeUninit<T>>,
}

struct Ring<T> {
    /// Next ticket to consume. Written only by the consumer.
    head: CachePadded<AtomicUsize>,
    /// Next ticket to hand out.
    tail: CachePadded<AtomicUsize>,
    slots: Box<[Slot<T>]>,
    mask: usize,
    /// Cleared when the consumer is dropped; ends producers' lap waits.
    consumer_alive: AtomicBool,
}

// A slot's value is only touched by the ticket holder whose stamp matches.
unsafe impl<T: Send> Send for Ring<T> {}
unsafe impl<T: Send> Sync for Ring<T> {}

impl<T> Ring<T> {
    fn new(capacity: usize, first_ticket: usize) -> Self {
        let capacity = capacity.max(2).next_power_of_two();
        let mask = capacity - 1;

        let mut slots: Box<[Slot<T>]> = (0..capacity)
            .map(|_| Slot {
                stamp: AtomicUsize::new(0),
                value: UnsafeCell::new(MaybeUninit::uninit()),
            })
            .collect();

        for lap_offset in 0..capacity {
            let ticket = first_ticket.wrapping_add(lap_offset);
            *slots[ticket & mask].stamp.get_mut() = ticket;
        }

        Self {
            head: CachePadded::new(AtomicUsize::new(first_ticket)),
            tail: CachePadded::new(AtomicUsize::new(first_ticket)),
            slots,
            mask,
            consumer_alive: AtomicBool::new(true),
        }
    }

    #[inline(always)]
    fn capacity(&self) -> usize {
        self.slots.len()
    }

    #[inline(always)]
    fn slot(&self, ticket: usize) -> &Slot<T> {
        &self.slots[ticket & self.mask]
    }

    fn len(&self) -> usize {
        let head = self.head.load(Ordering::Acquire);
        let tail = self.tail.load(Ordering::Acquire);
        // Producers spinning on a full lap may have claimed tickets past capacity
        tail.wrapping_sub(head).min(self.capacity())
    }
}

impl<T> Drop for Ring<T> {
    fn drop(&mut self) {
        let mut ticket = *self.head.get_mut();
        let tail = *self.tail.get_mut();

        while ticket != tail {
            let slot = &mut self.slots[ticket & self.mask];
            if *slot.stamp.get_mut() == ticket.wrapping_add(1) {
                // SAFETY: a published stamp means the value was written and
                // never read; we are the last owner.
                unsafe { slot.value.get_mut().assume_init_drop() };
            }
            ticket = ticket.wrapping_add(1);
        }
    }
}

/// Create a bounded MPSC queue. `capacity` is rounded up to a power of two
/// (minimum 2).
pub fn bounded<T>(capacity: usize) -> (Producer<T>, Consumer<T>) {
    from_ring(Ring::new(capacity, 0))
}

fn from_ring<T>(ring: Ring<T>) -> (Producer<T>, Consumer<T>) {
    let ring = Arc::new(ring);
    (
        Producer {
            ring: Arc::clone(&ring),
        },
        Consumer { ring },
    )
}

/// Writing half of an MPSC queue. Clone it to add producers.
pub struct Producer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Producer<T> {
    /// Push an item, handing it back if the queue is full.
    ///
    /// Once a ticket is claimed the push completes; it may spin briefly if
    /// the consumer has not yet freed the slot from the previous lap. The
    /// one exception is a consumer dropped during that spin, which hands the
    /// item back since nothing will ever free the slot.
    pub fn push(&self, item: T) -> Result<(), T> {
        let ring = &*self.ring;

        // head first: head only grows and never passes tail, so this
        // difference cannot underflow.
        let head = ring.head.load(Ordering::Acquire);
        let tail = ring.tail.load(Ordering::Relaxed);
        if tail.wrapping_sub(head) >= ring.capacity() {
            return Err(item);
        }

        let ticket = ring.tail.fetch_add(1, Ordering::Relaxed);
        let slot = ring.slot(ticket);

        let backoff = Backoff::new();
        while slot.stamp.load(Ordering::Acquire) != ticket {
            if !ring.consumer_alive.load(Ordering::Acquire) {
                return Err(item);
            }
            backoff.snooze();
        }

        // SAFETY: the stamp matches our ticket, so the consumer is done with
        // this slot and no other producer holds this ticket.
        unsafe { (*slot.value.get()).write(item) };
        slot.stamp.store(ticket.wrapping_add(1), Ordering::Release);
        Ok(())
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Advisory item count (claimed tickets, capped at capacity).
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Advisory: true when the next `push` would be rejected.
    pub fn is_full(&self) -> bool {
        self.len() >= self.capacity()
    }
}

impl<T> Clone for Producer<T> {
    fn clone(&self) -> Self {
        Self {
            ring: Arc::clone(&self.ring),
        }
    }
}

/// Reading half of an MPSC queue. There is exactly one.
pub struct Consumer<T> {
    ring: Arc<Ring<T>>,
}

impl<T> Consumer<T> {
    /// Pop the item at the next ticket.
    ///
    /// Returns `None` when the queue is empty or when the producer holding the
    /// next ticket has not published yet.
    #[inline]
    pub fn pop(&mut self) -> Option<T> {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        let slot = ring.slot(head);

        if slot.stamp.load(Ordering::Acquire) != head.wrapping_add(1) {
            return None;
        }

        // SAFETY: the acquire load of the published stamp makes the payload
        // visible; no producer writes the slot until it is re-stamped below.
        let item = unsafe { (*slot.value.get()).assume_init_read() };
        slot.stamp
            .store(head.wrapping_add(ring.capacity()), Ordering::Release);
        ring.head.store(head.wrapping_add(1), Ordering::Release);
        Some(item)
    }

    pub fn capacity(&self) -> usize {
        self.ring.capacity()
    }

    /// Advisory item count (claimed tickets, capped at capacity).
    pub fn len(&self) -> usize {
        self.ring.len()
    }

    /// True when the next ticket has not been published.
    pub fn is_empty(&self) -> bool {
        let ring = &*self.ring;
        let head = ring.head.load(Ordering::Relaxed);
        ring.slot(head).stamp.load(Ordering::Acquire) != head.wrapping_add(1)
    }

    /// A producer attached to the same ring.
    pub fn producer(&self) -> Producer<T> {
        Producer {
            ring: Arc::clone(&self.ring),
        }
    }
}

impl<T> Drop for Consumer<T> {
    fn drop(&mut self) {
        self.ring.consumer_alive.store(false, Ordering::Release);
    }
}

impl<T> fmt::Debug for Producer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("mpsc::Producer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

impl<T> fmt::Debug for Consumer<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("mpsc::Consumer")
            .field("capacity", &self.capacity())
            .field("len", &self.len())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    #[test]
    fn test_capacity_rounds_to_power_of_two() {
        let (tx, _rx) = bounded::<u8>(10_000);
        assert_eq!(tx.capacity(), 16_384);

        let (tx, _rx) = bounded::<u8>(0);
        assert_eq!(tx.capacity(), 2);

        let (tx, _rx) = bounded::<u8>(8);
        assert_eq!(tx.capacity(), 8);
    }

    #[test]
    fn test_push_pop_single_thread() {
        let (tx, mut rx) = bounded::<u32>(4);
        assert!(rx.is_empty());
        assert_eq!(rx.pop(), None);

        for i in 0..4 {
            tx.push(i).unwrap();
        }
        assert!(tx.is_full());
        assert_eq!(tx.push(42), Err(42));
        assert_eq!(tx.len(), 4);

        for i in 0..4 {
            assert_eq!(rx.pop(), Some(i));
        }
        assert_eq!(rx.pop(), None);
        assert!(rx.is_empty());
    }

    #[test]
    fn test_ticket_wraparound() {
        // Start a few tickets before usize::MAX so the counter wraps mid-test
        let (tx, mut rx) = from_ring(Ring::<usize>::new(4, usize::MAX - 5));

        for round in 0..10 {
            for i in 0..3 {
                tx.push(round * 10 + i).unwrap();
            }
            for i in 0..3 {
                assert_eq!(rx.pop(), Some(round * 10 + i));
            }
        }
        assert!(rx.is_empty());
        assert_eq!(tx.len(), 0);
    }

    #[test]
    fn test_full_across_wraparound() {
        let (tx, mut rx) = from_ring(Ring::<u8>::new(2, usize::MAX));
        tx.push(1).unwrap();
        tx.push(2).unwrap();
        assert_eq!(tx.push(3), Err(3));
        assert_eq!(rx.pop(), Some(1));
        tx.push(3).unwrap();
        assert_eq!(rx.pop(), Some(2));
        assert_eq!(rx.pop(), Some(3));
    }

    #[test]
    fn test_unconsumed_items_dropped() {
        static DROPS: AtomicUsize = AtomicUsize::new(0);

        struct Counted;
        impl Drop for Counted {
            fn drop(&mut self) {
                DROPS.fetch_add(1, Ordering::Relaxed);
            }
        }

        let (tx, mut rx) = bounded::<Counted>(8);
        for _ in 0..6 {
            assert!(tx.push(Counted).is_ok());
        }
        drop(rx.pop());
        drop(rx.pop());
        assert_eq!(DROPS.load(Ordering::Relaxed), 2);

        drop(tx);
        drop(rx);
        assert_eq!(DROPS.load(Ordering::Relaxed), 6);
    }

    #[test]
    fn test_lap_wait_ends_when_consumer_dropped() {
        let (tx, rx) = from_ring(Ring::<u64>::new(2, 0));
        tx.push(10).unwrap();
        tx.push(11).unwrap();

        // Pretend ticket 0 was consumed without freeing its slot, so the next
        // ticket passes the fullness check but must wait on slot 0's lap.
        rx.ring.head.store(1, Ordering::Release);

        let dropper = std::thread::spawn(move || {
            std::thread::sleep(std::time::Duration::from_millis(50));
            drop(rx);
        });

        assert_eq!(tx.push(12), Err(12));
        dropper.join().unwrap();
    }

    #[test]
    fn test_consumer_hands_out_producers() {
        let (_tx, mut rx) = bounded::<&'static str>(4);
        let extra = rx.producer();
        extra.push("late").unwrap();
        assert_eq!(rx.pop(), Some("late"));
    }
}
