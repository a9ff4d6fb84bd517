//! Unbounded lock-free MPMC queue
//!
//! This module implements the Michael-Scott queue: a singly linked list
//! with a sentinel node at the front, an atomic `head` pointing at the
//! sentinel and an atomic `tail` pointing at (or just behind) the last
//! node. Every update of a shared pointer is a single CAS. A thread that
//! finds `tail` lagging behind the real last node moves it forward before
//! retrying its own operation.
//!
//! Nodes are reclaimed with `crossbeam-epoch`: each operation pins the
//! calling thread, and a node unlinked by a consumer is only freed once no
//! thread pinned at that time can still be reading it.

use std::fmt;
use std::marker::PhantomData;

use crossbeam_epoch::{self as epoch, Atomic, Guard, Shared};
use crossbeam_utils::{Backoff, CachePadded};

use crate::common::{ordering, QueueOps};
use crate::error::AllocError;
use crate::node::Node;

/// A lock-free unbounded multi-producer multi-consumer FIFO queue
///
/// Both operations are lock-free: under contention some thread always
/// completes, though an individual call may retry arbitrarily often.
///
/// # Examples
///
/// ```
/// use msqueue_rs::ConcurrentQueue;
///
/// let q = ConcurrentQueue::new();
/// q.enqueue(1);
/// q.enqueue(2);
///
/// assert_eq!(q.dequeue(), Some(1));
/// assert_eq!(q.dequeue(), Some(2));
/// assert_eq!(q.dequeue(), None);
/// ```
pub struct ConcurrentQueue<T> {
    /// The sentinel; the front element lives in `head.next`
    ///
    /// Placed on its own cache line to avoid false sharing with tail
    head: CachePadded<Atomic<Node<T>>>,

    /// The last node, or a node behind it while a producer is mid-enqueue
    ///
    /// Placed on its own cache line to avoid false sharing with head
    tail: CachePadded<Atomic<Node<T>>>,

    /// The queue owns the payloads it holds
    _marker: PhantomData<T>,
}

// Safety: values are moved in by one thread and out by another, never
// shared, so `T: Send` is enough for both.
unsafe impl<T: Send> Send for ConcurrentQueue<T> {}
unsafe impl<T: Send> Sync for ConcurrentQueue<T> {}

impl<T> ConcurrentQueue<T> {
    /// Creates a new empty queue
    pub fn new() -> Self {
        let sentinel = Box::into_raw(Box::new(Node::sentinel())) as *const Node<T>;

        Self {
            head: CachePadded::new(Atomic::from(sentinel)),
            tail: CachePadded::new(Atomic::from(sentinel)),
            _marker: PhantomData,
        }
    }

    /// Appends `value` to the back of the queue
    ///
    /// Aborts through [`std::alloc::handle_alloc_error`] if the node cannot
    /// be allocated; use [`try_enqueue`](Self::try_enqueue) to observe that
    /// failure instead.
    pub fn enqueue(&self, value: T) {
        if let Err(err) = self.try_enqueue(value) {
            std::alloc::handle_alloc_error(err.layout());
        }
    }

    /// Appends `value` to the back of the queue, reporting allocation failure
    pub fn try_enqueue(&self, value: T) -> Result<(), AllocError> {
        let guard = &epoch::pin();
        let node = Node::try_alloc(value)?.into_shared(guard);
        let backoff = Backoff::new();

        loop {
            let tail = self.tail.load(ordering::A, guard);
            // SAFETY: `tail` is never null, and the guard keeps the node
            // alive even if consumers retire it meanwhile.
            let tail_ref = unsafe { tail.deref() };
            let next = tail_ref.next.load(ordering::A, guard);

            if tail != self.tail.load(ordering::A, guard) {
                backoff.spin();
                continue;
            }

            if !next.is_null() {
                self.help_advance_tail(tail, next, guard);
                continue;
            }

            if tail_ref
                .next
                .compare_exchange(Shared::null(), node, ordering::AR, ordering::X, guard)
                .is_ok()
            {
                // Failure means another thread already helped.
                let _ = self
                    .tail
                    .compare_exchange(tail, node, ordering::AR, ordering::X, guard);
                return Ok(());
            }

            backoff.spin();
        }
    }

    /// Removes the element at the front of the queue
    ///
    /// Returns `None` if the queue was empty.
    pub fn dequeue(&self) -> Option<T> {
        self.dequeue_with(&epoch::pin())
    }

    /// Checks if the queue was empty during this call
    ///
    /// Note that this may produce stale results when called concurrently
    /// with enqueue/dequeue operations.
    pub fn is_empty(&self) -> bool {
        let guard = &epoch::pin();
        let head = self.head.load(ordering::A, guard);
        // SAFETY: `head` is never null and is protected by the guard.
        let head_ref = unsafe { head.deref() };
        head_ref.next.load(ordering::A, guard).is_null()
    }

    fn dequeue_with(&self, guard: &Guard) -> Option<T> {
        let backoff = Backoff::new();

        loop {
            let head = self.head.load(ordering::A, guard);
            let tail = self.tail.load(ordering::A, guard);
            // SAFETY: `head` is never null and is protected by the guard.
            let next = unsafe { head.deref() }.next.load(ordering::A, guard);

            if head != self.head.load(ordering::A, guard) {
                backoff.spin();
                continue;
            }

            if head == tail {
                if next.is_null() {
                    return None;
                }
                self.help_advance_tail(tail, next, guard);
                continue;
            }

            // `head != tail` while `head` is unchanged means at least one node
            // follows `head`.
            debug_assert!(!next.is_null());

            if self
                .head
                .compare_exchange(head, next, ordering::AR, ordering::X, guard)
                .is_ok()
            {
                // SAFETY: winning the CAS makes this thread the only one
                // allowed to take the payload of `next`, which is now the
                // sentinel and is never read again. The old sentinel is
                // unreachable from `head`, and the collector only frees it
                // after every thread that might hold a snapshot has unpinned.
                unsafe {
                    let value = next.deref().data.assume_init_read();
                    guard.defer_destroy(head);
                    return Some(value);
                }
            }

            backoff.spin();
        }
    }

    /// Moves a lagging `tail` from `tail` to its successor `next`
    #[inline]
    fn help_advance_tail<'g>(&self, tail: Shared<'g, Node<T>>, next: Shared<'g, Node<T>>, guard: &'g Guard) {
        if self
            .tail
            .compare_exchange(tail, next, ordering::AR, ordering::X, guard)
            .is_ok()
        {
            tracing::trace!("advanced lagging tail");
        }
    }
}

impl<T> Drop for ConcurrentQueue<T> {
    fn drop(&mut self) {
        // SAFETY: `&mut self` rules out any operation in flight, so nodes can
        // be freed immediately.
        unsafe {
            let guard = epoch::unprotected();

            let mut drained = 0usize;
            while self.dequeue_with(guard).is_some() {
                drained += 1;
            }

            let sentinel = self.head.load(ordering::X, guard);
            drop(sentinel.into_owned());

            if drained > 0 {
                tracing::trace!(drained, "dropped queue with pending elements");
            }
        }
    }
}

impl<T> Default for ConcurrentQueue<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> fmt::Debug for ConcurrentQueue<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConcurrentQueue")
            .field("is_empty", &self.is_empty())
            .finish_non_exhaustive()
    }
}

impl<T> FromIterator<T> for ConcurrentQueue<T> {
    fn from_iter<I: IntoIterator<Item = T>>(iter: I) -> Self {
        let mut q = Self::new();
        q.extend(iter);
        q
    }
}

impl<T> Extend<T> for ConcurrentQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.enqueue(value);
        }
    }
}

impl<'a, T> Extend<T> for &'a ConcurrentQueue<T> {
    fn extend<I: IntoIterator<Item = T>>(&mut self, iter: I) {
        for value in iter {
            self.enqueue(value);
        }
    }
}

impl<T> QueueOps<T> for ConcurrentQueue<T> {
    #[inline]
    fn enqueue(&self, element: T) {
        ConcurrentQueue::enqueue(self, element);
    }

    #[inline]
    fn dequeue(&self) -> Option<T> {
        ConcurrentQueue::dequeue(self)
    }

    #[inline]
    fn was_empty(&self) -> bool {
        self.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    /// Performs only the linking CAS of an enqueue, leaving `tail` one node
    /// behind, as if the producer were preempted right after linking.
    fn enqueue_without_advancing_tail<T>(q: &ConcurrentQueue<T>, value: T) {
        let guard = &epoch::pin();
        let node = Node::try_alloc(value).unwrap().into_shared(guard);
        let tail = q.tail.load(ordering::A, guard);
        let tail_ref = unsafe { tail.deref() };
        assert!(tail_ref
            .next
            .compare_exchange(Shared::null(), node, ordering::AR, ordering::X, guard)
            .is_ok());
    }

    /// Whether `tail` points at the real last node
    fn tail_is_last<T>(q: &ConcurrentQueue<T>) -> bool {
        let guard = &epoch::pin();
        let tail = q.tail.load(ordering::A, guard);
        let tail_ref = unsafe { tail.deref() };
        tail_ref.next.load(ordering::A, guard).is_null()
    }

    struct DropCounter(Arc<AtomicUsize>);

    impl Drop for DropCounter {
        fn drop(&mut self) {
            self.0.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_queue_basic() {
        let q = ConcurrentQueue::new();

        q.enqueue(1);
        q.enqueue(2);
        q.enqueue(3);

        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), Some(3));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn test_empty_queue() {
        let q = ConcurrentQueue::new();
        assert!(q.is_empty());
        assert_eq!(q.dequeue(), None);

        q.enqueue("x");
        assert!(!q.is_empty());
        assert_eq!(q.dequeue(), Some("x"));
        assert_eq!(q.dequeue(), None);
        assert!(q.is_empty());
    }

    #[test]
    fn test_reuse_after_drain() {
        let q = ConcurrentQueue::new();

        for round in 0..10 {
            for i in 0..round {
                q.enqueue(i);
            }
            for i in 0..round {
                assert_eq!(q.dequeue(), Some(i));
            }
            assert_eq!(q.dequeue(), None);
        }
    }

    #[test]
    fn test_owned_payloads() {
        let q = ConcurrentQueue::new();

        q.enqueue("hello".to_string());
        q.enqueue("world".to_string());

        assert_eq!(q.dequeue().unwrap(), "hello");
        assert_eq!(q.dequeue().unwrap(), "world");
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn test_try_enqueue() {
        let q = ConcurrentQueue::new();

        assert!(q.try_enqueue(vec![1u8, 2, 3]).is_ok());
        assert_eq!(q.dequeue(), Some(vec![1, 2, 3]));
    }

    #[test]
    fn test_lagging_tail_enqueue_helps() {
        let q = ConcurrentQueue::new();

        enqueue_without_advancing_tail(&q, 1);
        assert!(!tail_is_last(&q));

        q.enqueue(2);
        assert!(tail_is_last(&q));

        assert_eq!(q.dequeue(), Some(1));
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), None);
    }

    #[test]
    fn test_lagging_tail_dequeue_helps() {
        let q = ConcurrentQueue::new();

        // head == tail, but a node already follows them
        enqueue_without_advancing_tail(&q, 1);
        assert!(!q.is_empty());

        assert_eq!(q.dequeue(), Some(1));
        assert!(tail_is_last(&q));
        assert_eq!(q.dequeue(), None);

        // Lagging behind a non-empty queue
        q.enqueue(2);
        enqueue_without_advancing_tail(&q, 3);
        assert_eq!(q.dequeue(), Some(2));
        assert_eq!(q.dequeue(), Some(3));
        assert_eq!(q.dequeue(), None);
        assert!(tail_is_last(&q));
    }

    #[test]
    fn test_lagging_tail_concurrent_recovery() {
        let q = Arc::new(ConcurrentQueue::new());
        enqueue_without_advancing_tail(&*q, 0usize);

        let barrier = Arc::new(Barrier::new(4));
        let mut handles = Vec::new();

        for t in 0..2 {
            let q = q.clone();
            let barrier = barrier.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for i in 0..500 {
                    q.enqueue(1 + t * 500 + i);
                }
            }));
        }

        let dequeued = Arc::new(AtomicUsize::new(0));
        for _ in 0..2 {
            let q = q.clone();
            let barrier = barrier.clone();
            let dequeued = dequeued.clone();
            handles.push(thread::spawn(move || {
                barrier.wait();
                for _ in 0..1000 {
                    if q.dequeue().is_some() {
                        dequeued.fetch_add(1, Ordering::SeqCst);
                    }
                }
            }));
        }

        for handle in handles {
            handle.join().unwrap();
        }

        let mut remaining = 0;
        while q.dequeue().is_some() {
            remaining += 1;
        }

        assert_eq!(dequeued.load(Ordering::SeqCst) + remaining, 1001);
        assert!(tail_is_last(&q));
    }

    #[test]
    fn test_drop_releases_pending_payloads() {
        let drops = Arc::new(AtomicUsize::new(0));

        {
            let q = ConcurrentQueue::new();
            for _ in 0..10 {
                q.enqueue(DropCounter(drops.clone()));
            }

            // Dequeued payloads belong to the caller
            let taken: Vec<_> = (0..4).map(|_| q.dequeue().unwrap()).collect();
            assert_eq!(drops.load(Ordering::SeqCst), 0);

            drop(taken);
            assert_eq!(drops.load(Ordering::SeqCst), 4);
        }

        assert_eq!(drops.load(Ordering::SeqCst), 10);
    }

    #[test]
    fn test_drop_after_full_drain() {
        let drops = Arc::new(AtomicUsize::new(0));

        {
            let q = ConcurrentQueue::new();
            q.enqueue(DropCounter(drops.clone()));
            q.enqueue(DropCounter(drops.clone()));
            assert!(q.dequeue().is_some());
            assert!(q.dequeue().is_some());
            assert!(q.dequeue().is_none());
            assert_eq!(drops.load(Ordering::SeqCst), 2);
        }

        // Sentinels carry no payload
        assert_eq!(drops.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_from_iter_and_extend() {
        let mut q: ConcurrentQueue<u32> = (1..=3).collect();
        q.extend(4..=5);

        let mut handle = &q;
        handle.extend([6, 7]);

        let drained: Vec<_> = std::iter::from_fn(|| q.dequeue()).collect();
        assert_eq!(drained, vec![1, 2, 3, 4, 5, 6, 7]);
    }

    #[test]
    fn test_debug() {
        let q = ConcurrentQueue::new();
        assert_eq!(format!("{q:?}"), "ConcurrentQueue { is_empty: true, .. }");
        q.enqueue(1);
        assert_eq!(format!("{q:?}"), "ConcurrentQueue { is_empty: false, .. }");
    }

    #[test]
    fn test_queue_threaded() {
        const NUM_PRODUCERS: usize = 4;
        const NUM_CONSUMERS: usize = 4;
        const ITEMS_PER_PRODUCER: usize = 1000;

        let q = Arc::new(ConcurrentQueue::new());

        // Track expected sum
        let expected_sum = (0..ITEMS_PER_PRODUCER).sum::<usize>() * NUM_PRODUCERS;

        let mut producer_threads = Vec::new();
        for _ in 0..NUM_PRODUCERS {
            let q2 = q.clone();
            producer_threads.push(thread::spawn(move || {
                for i in 0..ITEMS_PER_PRODUCER {
                    q2.enqueue(i);
                }
            }));
        }

        let results = Arc::new(std::sync::Mutex::new(Vec::new()));
        let mut consumer_threads = Vec::new();
        for _ in 0..NUM_CONSUMERS {
            let q2 = q.clone();
            let results2 = results.clone();
            consumer_threads.push(thread::spawn(move || {
                let mut local_sum = 0;
                let mut count = 0;

                while count < (ITEMS_PER_PRODUCER * NUM_PRODUCERS) / NUM_CONSUMERS {
                    if let Some(value) = q2.dequeue() {
                        local_sum += value;
                        count += 1;
                    }
                }

                let mut results = results2.lock().unwrap();
                results.push(local_sum);
            }));
        }

        for handle in producer_threads {
            handle.join().unwrap();
        }

        for handle in consumer_threads {
            handle.join().unwrap();
        }

        let results = results.lock().unwrap();
        let total_sum: usize = results.iter().sum();

        assert_eq!(total_sum, expected_sum);
        assert!(q.is_empty());
    }
}
