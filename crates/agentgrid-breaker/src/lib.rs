//! agentgrid-breaker — circuit breakers for calls into agent instances.
//!
//! # State Machine
//!
//! ```text
//! Closed   ── failure_count reaches threshold ──▶ Open
//! Open     ── reset_timeout elapsed, next call ─▶ HalfOpen (probe)
//! HalfOpen ── probe succeeds ───────────────────▶ Closed (count = 0)
//! HalfOpen ── probe fails ──────────────────────▶ Open (timer restarts)
//! ```
//!
//! While open, calls fail with `BreakerError::Open` without running the
//! wrapped operation, so callers can tell "rejected" apart from "attempted
//! and failed". A success while closed clears the failure count.
//!
//! `BreakerRegistry` hands out one named breaker per dependency (the load
//! balancer keys them by instance id).

pub mod breaker;
pub mod error;
pub mod registry;

pub use breaker::{BreakerStats, CircuitBreaker, CircuitState};
pub use error::BreakerError;
pub use registry::BreakerRegistry;
