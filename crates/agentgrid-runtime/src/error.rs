//! Runtime error types.

use thiserror::Error;

/// Errors returned when adding work to a `RequestQueue`.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum QueueError {
    #[error("request queue is completed and accepts no more work")]
    Completed,

    #[error("request queue is full")]
    Full,
}

/// Failure delivered on a `WorkTicket`.
#[derive(Debug, Error)]
pub enum WorkError {
    #[error("agent failed: {0}")]
    Agent(#[source] anyhow::Error),

    #[error("agent panicked: {0}")]
    Panicked(String),

    #[error("work item was dropped before it was resolved")]
    Abandoned,
}
