//! Synchronization primitives.
//!
//! - [`Semaphore`]: Counting semaphore with drop-released permits
//!
//! Waiting is cancel-safe: dropping a pending acquire leaves no waiter
//! behind, and a dropped permit returns its count.

mod semaphore;

pub use semaphore::{
    AcquireError, AcquireFuture, OwnedAcquireFuture, OwnedSemaphorePermit, Semaphore,
    SemaphorePermit, TryAcquireError,
};
