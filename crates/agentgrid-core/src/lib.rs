//! agentgrid-core — shared types for the agentgrid scaling core.
//!
//! Holds the value types every other crate passes around (`Instance`,
//! `ScalingMetrics`, `ScalingOptions`, `ScalingDecision`), the injectable
//! `Clock` used for cooldowns and breaker timeouts, and the `GridConfig`
//! TOML loader consumed by the daemon.

pub mod clock;
pub mod config;
pub mod error;
pub mod types;

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{
    BalancerConfig, BreakerConfig, DaemonConfig, GridConfig, ScalingOptions, parse_duration,
};
pub use error::{ConfigError, ConfigResult};
pub use types::*;
