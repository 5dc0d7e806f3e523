//! agentgrid-runtime — queued execution of agent work.
//!
//! # Architecture
//!
//! ```text
//! submit(input) ──▶ RequestQueue (bounded FIFO) ──▶ WorkerPool
//!      │                                               ├── worker 0 ─┐
//!      │                                               ├── worker 1 ─┼─▶ Agent::execute
//!      ▼                                               └── worker N ─┘
//!  WorkTicket ◀──────────── ResultSlot::resolve ◀──────────┘
//! ```
//!
//! Each `WorkItem` carries the sending half of a one-shot channel; the
//! submitter keeps the `WorkTicket`. Agent errors and panics are delivered
//! on the ticket as `WorkError`, never unwound through the worker.

pub mod agent;
pub mod error;
pub mod pool;
pub mod queue;
pub mod work;

pub use agent::{Agent, FnAgent, agent_fn};
pub use error::{QueueError, WorkError};
pub use pool::{AgentQueue, WorkerPool, default_worker_count};
pub use queue::RequestQueue;
pub use work::{ResultSlot, WorkItem, WorkTicket};
