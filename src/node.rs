//! Linked-list node shared by producers and consumers

use std::alloc::{self, Layout};
use std::mem::MaybeUninit;
use std::ptr;

use crossbeam_epoch::{Atomic, Owned};

use crate::error::AllocError;

/// One link of the queue
///
/// `data` is initialised for every node created by an enqueue and left
/// uninitialised for the sentinel built by the constructor. Once a node
/// becomes the sentinel its payload has been moved out by the consumer
/// that advanced `head` onto it, so dropping a `Node` never drops `data`.
pub(crate) struct Node<T> {
    /// The payload slot
    pub(crate) data: MaybeUninit<T>,

    /// Successor, set exactly once from null to a node
    pub(crate) next: Atomic<Node<T>>,
}

impl<T> Node<T> {
    /// Creates the payload-less node a fresh queue starts with
    #[inline]
    pub(crate) fn sentinel() -> Self {
        Self {
            data: MaybeUninit::uninit(),
            next: Atomic::null(),
        }
    }

    /// Heap-allocates a node holding `value` without aborting on OOM
    ///
    /// The allocation uses the same layout `Box<Node<T>>` would, so the
    /// result can be handed to the epoch collector and freed as a box.
    pub(crate) fn try_alloc(value: T) -> Result<Owned<Self>, AllocError> {
        let layout = Layout::new::<Self>();

        // SAFETY: `Node<T>` always contains an `Atomic`, so the layout is
        // never zero-sized.
        let raw = unsafe { alloc::alloc(layout) as *mut Self };
        if raw.is_null() {
            tracing::error!(size = layout.size(), "queue node allocation failed");
            return Err(AllocError::new(layout));
        }

        // SAFETY: `raw` is non-null, properly aligned for `Self` and was
        // allocated with the global allocator using `Layout::new::<Self>()`.
        unsafe {
            ptr::write(
                raw,
                Self {
                    data: MaybeUninit::new(value),
                    next: Atomic::null(),
                },
            );
            Ok(Owned::from_raw(raw))
        }
    }
}
