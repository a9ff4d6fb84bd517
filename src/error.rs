//! Error types for queue operations

use std::alloc::Layout;

use thiserror::Error;

/// A queue node could not be allocated
///
/// Returned by [`ConcurrentQueue::try_enqueue`](crate::ConcurrentQueue::try_enqueue).
/// The value that was being enqueued is dropped.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[error("failed to allocate a queue node of {} bytes (align {})", .layout.size(), .layout.align())]
pub struct AllocError {
    layout: Layout,
}

impl AllocError {
    pub(crate) fn new(layout: Layout) -> Self {
        Self { layout }
    }

    /// The layout of the node allocation that failed
    pub fn layout(&self) -> Layout {
        self.layout
    }
}
