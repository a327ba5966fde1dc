//! Bounded lock-free ring-buffer queues
//!
//! - [`spsc`]: one producer, one consumer, strict FIFO
//! - [`mpsc`]: many producers, one consumer, FIFO per producer
//!
//! Both are fixed-capacity and never block: a full queue hands the item back
//! to the caller, an empty queue returns `None`. Backoff policy (spin, yield,
//! sleep, drop) belongs to the caller.

pub mod mpsc;
pub mod spsc;
