//! # msqueue_rs
//!
//! A Rust implementation of the Michael-Scott lock-free
//! multiple-producer-multiple-consumer queue: an unbounded linked list
//! updated exclusively through compare-and-swap, with epoch-based memory
//! reclamation so that nodes are never freed while another thread may
//! still be reading them.
//!
//! ```
//! use msqueue_rs::ConcurrentQueue;
//! use std::sync::Arc;
//! use std::thread;
//!
//! let q = Arc::new(ConcurrentQueue::new());
//!
//! let producer = {
//!     let q = q.clone();
//!     thread::spawn(move || {
//!         for i in 0..100 {
//!             q.enqueue(i);
//!         }
//!     })
//! };
//! producer.join().unwrap();
//!
//! let drained: Vec<_> = std::iter::from_fn(|| q.dequeue()).collect();
//! assert_eq!(drained, (0..100).collect::<Vec<_>>());
//! ```

mod node;

pub mod common;
pub mod error;
pub mod queue;

// Re-exports for convenience
pub use common::{PollingQueueOps, QueueOps};
pub use error::AllocError;
pub use queue::ConcurrentQueue;
