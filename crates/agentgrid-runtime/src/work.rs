//! Work items and their single-assignment result slots.

use std::time::Instant;

use tokio::sync::oneshot;
use uuid::Uuid;

use crate::error::WorkError;

/// One queued unit of work.
///
/// `priority` travels with the item but the queue does not reorder on it.
#[derive(Debug)]
pub struct WorkItem<I, O> {
    pub id: String,
    pub input: I,
    pub priority: i32,
    pub enqueued_at: Instant,
    slot: ResultSlot<O>,
}

impl<I, O> WorkItem<I, O> {
    /// Create an item and the ticket its submitter awaits.
    pub fn new(input: I, priority: i32) -> (Self, WorkTicket<O>) {
        let id = Uuid::new_v4().to_string();
        let (tx, rx) = oneshot::channel();
        let item = Self {
            id: id.clone(),
            input,
            priority,
            enqueued_at: Instant::now(),
            slot: ResultSlot { tx },
        };
        (item, WorkTicket { id, rx })
    }

    /// Split into the input and the slot that must receive its result.
    pub fn take(self) -> (I, ResultSlot<O>) {
        (self.input, self.slot)
    }

    /// Resolve without running, e.g. when rejecting queued work.
    pub fn resolve(self, result: Result<O, WorkError>) -> bool {
        self.slot.resolve(result)
    }
}

/// Write half of a work item's result. Consumed on resolution, so an item
/// can only be resolved once.
#[derive(Debug)]
pub struct ResultSlot<O> {
    tx: oneshot::Sender<Result<O, WorkError>>,
}

impl<O> ResultSlot<O> {
    /// Deliver the result. Returns `false` if the ticket was already dropped.
    pub fn resolve(self, result: Result<O, WorkError>) -> bool {
        self.tx.send(result).is_ok()
    }

    /// Whether the submitter stopped waiting.
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Read half of a work item's result, held by the submitter.
#[derive(Debug)]
pub struct WorkTicket<O> {
    id: String,
    rx: oneshot::Receiver<Result<O, WorkError>>,
}

impl<O> WorkTicket<O> {
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Wait for the worker to resolve the item.
    ///
    /// If the item is dropped unresolved (its pool was aborted, or the
    /// queue was discarded) this returns `WorkError::Abandoned`.
    pub async fn wait(self) -> Result<O, WorkError> {
        self.rx.await.unwrap_or(Err(WorkError::Abandoned))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ticket_receives_success() {
        let (item, ticket) = WorkItem::<&str, usize>::new("hello", 0);
        assert_eq!(item.id, ticket.id());

        let (input, slot) = item.take();
        assert!(slot.resolve(Ok(input.len())));
        assert_eq!(ticket.wait().await.unwrap(), 5);
    }

    #[tokio::test]
    async fn ticket_receives_failure() {
        let (item, ticket) = WorkItem::<(), ()>::new((), 0);
        item.resolve(Err(WorkError::Agent(anyhow::anyhow!("rate limited"))));

        let err = ticket.wait().await.unwrap_err();
        assert!(matches!(err, WorkError::Agent(_)));
        assert!(err.to_string().contains("rate limited"));
    }

    #[tokio::test]
    async fn dropped_item_abandons_ticket() {
        let (item, ticket) = WorkItem::<(), ()>::new((), 0);
        drop(item);
        assert!(matches!(ticket.wait().await, Err(WorkError::Abandoned)));
    }

    #[test]
    fn resolve_after_ticket_dropped_reports_false() {
        let (item, ticket) = WorkItem::<(), ()>::new((), 0);
        drop(ticket);
        let (_, slot) = item.take();
        assert!(slot.is_abandoned());
        assert!(!slot.resolve(Ok(())));
    }

    #[test]
    fn ids_are_unique() {
        let (a, _ta) = WorkItem::<(), ()>::new((), 0);
        let (b, _tb) = WorkItem::<(), ()>::new((), 0);
        assert_ne!(a.id, b.id);
    }
}
