//! Bounded multi-producer, multi-consumer FIFO.
//!
//! Items live in a mutex-protected `VecDeque`. A `Semaphore` tracks free
//! capacity (producers wait on it when the queue is full) and a `Notify`
//! wakes consumers when an item arrives or the queue completes.

use std::collections::VecDeque;
use std::sync::{Mutex, MutexGuard};

use tokio::sync::{Notify, Semaphore, TryAcquireError};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::error::QueueError;

struct QueueInner<T> {
    items: VecDeque<T>,
    completed: bool,
}

/// A bounded FIFO shared between submitters and workers.
pub struct RequestQueue<T> {
    inner: Mutex<QueueInner<T>>,
    /// One permit per free slot.
    slots: Semaphore,
    ready: Notify,
    capacity: usize,
}

impl<T> RequestQueue<T> {
    /// Create a queue holding at most `capacity` items (minimum 1).
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.clamp(1, Semaphore::MAX_PERMITS);
        Self {
            inner: Mutex::new(QueueInner {
                items: VecDeque::new(),
                completed: false,
            }),
            slots: Semaphore::new(capacity),
            ready: Notify::new(),
            capacity,
        }
    }

    /// A queue with no practical bound.
    pub fn unbounded() -> Self {
        Self::new(Semaphore::MAX_PERMITS)
    }

    /// Append `item`, waiting for space if the queue is full.
    pub async fn enqueue(&self, item: T) -> Result<(), QueueError> {
        let permit = self
            .slots
            .acquire()
            .await
            .map_err(|_| QueueError::Completed)?;
        permit.forget();
        self.push(item)
    }

    /// Append `item` only if there is space right now.
    pub fn try_enqueue(&self, item: T) -> Result<(), QueueError> {
        match self.slots.try_acquire() {
            Ok(permit) => permit.forget(),
            Err(TryAcquireError::Closed) => return Err(QueueError::Completed),
            Err(TryAcquireError::NoPermits) => return Err(QueueError::Full),
        }
        self.push(item)
    }

    fn push(&self, item: T) -> Result<(), QueueError> {
        {
            let mut inner = self.lock();
            if inner.completed {
                return Err(QueueError::Completed);
            }
            inner.items.push_back(item);
        }
        self.ready.notify_one();
        Ok(())
    }

    /// Take the oldest item.
    ///
    /// Waits until an item arrives. Returns `None` once the queue is
    /// completed and drained, or as soon as `cancel` fires.
    pub async fn dequeue(&self, cancel: &CancellationToken) -> Option<T> {
        loop {
            if cancel.is_cancelled() {
                return None;
            }

            // Register interest before checking, so a push or complete()
            // landing between the check and the await is not missed.
            let notified = self.ready.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();

            {
                let mut inner = self.lock();
                let popped = inner.items.pop_front();
                if let Some(item) = popped {
                    drop(inner);
                    self.slots.add_permits(1);
                    return Some(item);
                }
                if inner.completed {
                    return None;
                }
            }

            tokio::select! {
                biased;
                _ = cancel.cancelled() => return None,
                _ = &mut notified => {}
            }
        }
    }

    /// Stop accepting work. Queued items still drain; waiting consumers
    /// return `None` once the queue is empty. Idempotent.
    pub fn complete(&self) {
        {
            let mut inner = self.lock();
            if inner.completed {
                return;
            }
            inner.completed = true;
            debug!(remaining = inner.items.len(), "request queue completed");
        }
        self.slots.close();
        self.ready.notify_waiters();
    }

    /// Current depth.
    pub fn count(&self) -> usize {
        self.lock().items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.count() == 0
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn is_completed(&self) -> bool {
        self.lock().completed
    }

    fn lock(&self) -> MutexGuard<'_, QueueInner<T>> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::time::Duration;

    #[tokio::test]
    async fn fifo_order() {
        let queue = RequestQueue::new(10);
        let cancel = CancellationToken::new();

        queue.enqueue("A").await.unwrap();
        queue.enqueue("B").await.unwrap();
        queue.enqueue("C").await.unwrap();
        assert_eq!(queue.count(), 3);

        assert_eq!(queue.dequeue(&cancel).await, Some("A"));
        assert_eq!(queue.dequeue(&cancel).await, Some("B"));
        assert_eq!(queue.dequeue(&cancel).await, Some("C"));
        assert!(queue.is_empty());
    }

    #[tokio::test]
    async fn cancelled_dequeue_returns_none_immediately() {
        let queue = RequestQueue::<u32>::new(10);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = tokio::time::timeout(Duration::from_millis(100), queue.dequeue(&cancel))
            .await
            .expect("dequeue should not block");
        assert_eq!(result, None);
    }

    #[tokio::test]
    async fn cancel_wakes_blocked_consumer() {
        let queue = Arc::new(RequestQueue::<u32>::new(10));
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        cancel.cancel();
        assert_eq!(consumer.await.unwrap(), None);
    }

    #[tokio::test]
    async fn blocked_consumer_receives_later_item() {
        let queue = Arc::new(RequestQueue::<i32>::new(10));
        let cancel = CancellationToken::new();

        let consumer = {
            let queue = queue.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { queue.dequeue(&cancel).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.enqueue(42).await.unwrap();
        assert_eq!(consumer.await.unwrap(), Some(42));
    }

    #[tokio::test]
    async fn completed_queue_drains_then_returns_none() {
        let queue = RequestQueue::new(10);
        let cancel = CancellationToken::new();

        queue.enqueue(1).await.unwrap();
        queue.complete();

        assert_eq!(queue.enqueue(2).await, Err(QueueError::Completed));
        assert_eq!(queue.try_enqueue(3), Err(QueueError::Completed));
        assert_eq!(queue.dequeue(&cancel).await, Some(1));
        assert_eq!(queue.dequeue(&cancel).await, None);
    }

    #[tokio::test]
    async fn complete_wakes_blocked_consumers() {
        let queue = Arc::new(RequestQueue::<u32>::new(10));
        let cancel = CancellationToken::new();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move { queue.dequeue(&cancel).await })
            })
            .collect();

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.complete();
        queue.complete();

        for c in consumers {
            assert_eq!(c.await.unwrap(), None);
        }
    }

    #[tokio::test]
    async fn try_enqueue_reports_full() {
        let queue = RequestQueue::new(2);
        let cancel = CancellationToken::new();

        queue.try_enqueue(1).unwrap();
        queue.try_enqueue(2).unwrap();
        assert_eq!(queue.try_enqueue(3), Err(QueueError::Full));

        // Dequeuing frees a slot.
        assert_eq!(queue.dequeue(&cancel).await, Some(1));
        queue.try_enqueue(3).unwrap();
        assert_eq!(queue.count(), 2);
    }

    #[tokio::test]
    async fn enqueue_waits_for_capacity() {
        let queue = Arc::new(RequestQueue::<i32>::new(1));
        let cancel = CancellationToken::new();
        queue.enqueue(1).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        assert!(!producer.is_finished());

        assert_eq!(queue.dequeue(&cancel).await, Some(1));
        producer.await.unwrap().unwrap();
        assert_eq!(queue.dequeue(&cancel).await, Some(2));
    }

    #[tokio::test]
    async fn complete_fails_waiting_producers() {
        let queue = Arc::new(RequestQueue::<i32>::new(1));
        queue.enqueue(1).await.unwrap();

        let producer = {
            let queue = queue.clone();
            tokio::spawn(async move { queue.enqueue(2).await })
        };

        tokio::time::sleep(Duration::from_millis(20)).await;
        queue.complete();
        assert_eq!(producer.await.unwrap(), Err(QueueError::Completed));
    }

    #[test]
    fn capacity_is_at_least_one() {
        assert_eq!(RequestQueue::<()>::new(0).capacity(), 1);
        assert_eq!(RequestQueue::<()>::new(16).capacity(), 16);
    }

    #[tokio::test]
    async fn concurrent_producers_and_consumers_lose_nothing() {
        let queue = Arc::new(RequestQueue::<i32>::new(8));
        let cancel = CancellationToken::new();

        let producers: Vec<_> = (0..4)
            .map(|p| {
                let queue = queue.clone();
                tokio::spawn(async move {
                    for i in 0..50 {
                        queue.enqueue(p * 1000 + i).await.unwrap();
                    }
                })
            })
            .collect();

        let consumers: Vec<_> = (0..3)
            .map(|_| {
                let queue = queue.clone();
                let cancel = cancel.clone();
                tokio::spawn(async move {
                    let mut seen = Vec::new();
                    while let Some(v) = queue.dequeue(&cancel).await {
                        seen.push(v);
                    }
                    seen
                })
            })
            .collect();

        for p in producers {
            p.await.unwrap();
        }
        queue.complete();

        let mut all = Vec::new();
        for c in consumers {
            all.extend(c.await.unwrap());
        }
        all.sort();
        assert_eq!(all.len(), 200);
        all.dedup();
        assert_eq!(all.len(), 200);
    }
}
