//! agentgrid-autoscale — metrics-driven instance scaling.
//!
//! Pulls a `ScalingMetrics` snapshot from a `MetricsProvider`, compares it
//! against `ScalingOptions`, and drives a scaling callback.
//!
//! # Scaling Algorithm
//!
//! ```text
//! cpu_ratio   = cpu_percent / target_cpu_percent
//! mem_ratio   = memory_percent / target_memory_percent
//! queue_ratio = queue_length / (current * 10)
//! pressure    = max(cpu_ratio, mem_ratio, queue_ratio)
//!
//! if cpu > target_cpu or memory > target_memory or queue > current * 10:
//!     desired = max(ceil(current * pressure), current + 1)
//!     ScaleUp to min(desired, max_instances)
//!
//! if cpu < target_cpu * 0.5 and memory < target_memory * 0.5 and current > min:
//!     desired = min(ceil(current * pressure), current - 1)
//!     ScaleDown to max(desired, min_instances)
//! ```
//!
//! Cooldown windows (`scale_up_cooldown_seconds`,
//! `scale_down_cooldown_seconds`) suppress repeated moves in the same
//! direction.

pub mod error;
pub mod metrics;
pub mod scaler;

pub use error::AutoscaleError;
pub use metrics::MetricsProvider;
pub use scaler::{Autoscaler, BoxFuture, QUEUE_ITEMS_PER_INSTANCE, ScaleCallback, scale_callback};
