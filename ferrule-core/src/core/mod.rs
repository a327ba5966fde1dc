//! Shared error taxonomy
//!
//! - `PoolError`: submission rejected (queue full, shut down)
//! - `TaskError`: deferred result unavailable (panicked, abandoned, timed out)

pub mod errors;

pub use errors::{PoolError, TaskError};
