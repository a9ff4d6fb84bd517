//! Common functionality for lock-free queues
//!
//! This module provides the shared traits and memory ordering aliases used
//! by the queue implementation, the benches and the integration tests.

use std::time::{Duration, Instant};

use crossbeam_utils::Backoff;

/// Memory ordering constants for atomic operations
///
/// Short aliases for the standard library's `Ordering` values, so the
/// CAS sites in the algorithm stay on one line.
pub mod ordering {
    pub use std::sync::atomic::Ordering::Acquire as A;
    pub use std::sync::atomic::Ordering::AcqRel as AR;
    pub use std::sync::atomic::Ordering::Relaxed as X;
}

/// Trait for unbounded FIFO queue operations
///
/// Implemented by [`ConcurrentQueue`](crate::ConcurrentQueue). Anything
/// else offering the same two operations (a lock-based baseline, for
/// instance) can implement it to be driven by the same code.
pub trait QueueOps<T> {
    /// Appends an element to the back of the queue
    ///
    /// The queue is unbounded, so this always succeeds.
    fn enqueue(&self, element: T);

    /// Removes the element at the front of the queue
    ///
    /// Returns `None` if the queue was empty.
    fn dequeue(&self) -> Option<T>;

    /// Checks if the queue was empty during this call
    ///
    /// The answer may already be stale when it is returned if other threads
    /// are operating on the queue.
    fn was_empty(&self) -> bool;
}

/// Helper trait for callers that want to wait for an element
///
/// The queue itself never blocks; these methods poll [`QueueOps::dequeue`]
/// with an exponential backoff that eventually yields the thread.
pub trait PollingQueueOps<T>: QueueOps<T> {
    /// Pops an element, busy-waiting until one is available
    fn dequeue_spin(&self) -> T {
        let backoff = Backoff::new();
        loop {
            if let Some(element) = self.dequeue() {
                return element;
            }
            backoff.snooze();
        }
    }

    /// Pops an element, giving up once `timeout` has elapsed
    fn dequeue_timeout(&self, timeout: Duration) -> Option<T> {
        let deadline = Instant::now() + timeout;
        let backoff = Backoff::new();
        loop {
            if let Some(element) = self.dequeue() {
                return Some(element);
            }
            if Instant::now() >= deadline {
                return None;
            }
            backoff.snooze();
        }
    }
}

impl<T, Q: QueueOps<T> + ?Sized> PollingQueueOps<T> for Q {}
