//! agentgrid-balancer — routes calls across agent instances.
//!
//! # Architecture
//!
//! ```text
//! LoadBalancer
//!   ├── Registry (RwLock)
//!   │   ├── instances in registration order
//!   │   └── HashRing (rebuilt when the instance set changes)
//!   ├── RoundRobinCursor (lock-free index selection)
//!   ├── SmoothWeighted (per-instance running weights)
//!   ├── Option<BreakerRegistry> (one breaker per instance id)
//!   └── Option<ServiceRegistry> (polled by sync_from_service_registry)
//! ```
//!
//! Selection only ever returns healthy instances. The failover executor
//! tracks `active_requests` on the chosen instance for the duration of the
//! call and moves to a different instance on failure.

pub mod balancer;
pub mod discovery;
pub mod error;
pub mod ring;
pub mod strategy;

pub use balancer::{LoadBalancer, RequestGuard};
pub use discovery::{RegistryEntry, ServiceRegistry, SyncStats};
pub use error::{BalancerError, BalancerResult};
pub use ring::HashRing;
pub use strategy::{RoundRobinCursor, SmoothWeighted};
