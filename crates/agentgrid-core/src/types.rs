//! Domain types shared across the agentgrid crates.
//!
//! These are plain values: the balancer owns the live `Instance` registry,
//! the autoscaler consumes `ScalingMetrics` snapshots and produces
//! `ScalingDecision`s.

use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Unique identifier for an instance within a registry.
pub type InstanceId = String;

/// Weight given to instances that don't specify one.
pub const DEFAULT_WEIGHT: u32 = 100;

// ── Instance ──────────────────────────────────────────────────────

/// One routable unit of agent capacity.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Instance {
    pub id: InstanceId,
    pub service_name: String,
    /// Address string (host:port, URL, or anything the caller routes on).
    pub endpoint: String,
    /// Relative share for weighted strategies. Always positive.
    pub weight: u32,
    pub is_healthy: bool,
    /// Live load gauge, maintained by whoever dispatches to the instance.
    pub active_requests: u32,
    #[serde(default)]
    pub tags: HashMap<String, String>,
}

impl Instance {
    /// A healthy, idle instance with the default weight.
    pub fn new(
        id: impl Into<String>,
        service_name: impl Into<String>,
        endpoint: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            service_name: service_name.into(),
            endpoint: endpoint.into(),
            weight: DEFAULT_WEIGHT,
            is_healthy: true,
            active_requests: 0,
            tags: HashMap::new(),
        }
    }

    /// Set the weight. Zero is bumped to 1 so weighted strategies never
    /// starve an instance entirely.
    pub fn with_weight(mut self, weight: u32) -> Self {
        self.weight = weight.max(1);
        self
    }

    pub fn with_health(mut self, is_healthy: bool) -> Self {
        self.is_healthy = is_healthy;
        self
    }

    pub fn with_tag(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.insert(key.into(), value.into());
        self
    }
}

// ── Load balancing ────────────────────────────────────────────────

/// Instance selection algorithm, chosen once at balancer construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Strategy {
    #[default]
    RoundRobin,
    LeastConnections,
    Random,
    WeightedRoundRobin,
    ConsistentHash,
}

impl Strategy {
    pub fn as_str(&self) -> &'static str {
        match self {
            Strategy::RoundRobin => "round_robin",
            Strategy::LeastConnections => "least_connections",
            Strategy::Random => "random",
            Strategy::WeightedRoundRobin => "weighted_round_robin",
            Strategy::ConsistentHash => "consistent_hash",
        }
    }
}

impl fmt::Display for Strategy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Strategy {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().replace('-', "_").as_str() {
            "round_robin" => Ok(Strategy::RoundRobin),
            "least_connections" => Ok(Strategy::LeastConnections),
            "random" => Ok(Strategy::Random),
            "weighted_round_robin" => Ok(Strategy::WeightedRoundRobin),
            "consistent_hash" => Ok(Strategy::ConsistentHash),
            other => Err(ConfigError::UnknownStrategy(other.to_string())),
        }
    }
}

// ── Scaling ───────────────────────────────────────────────────────

/// Point-in-time load snapshot handed to the autoscaler by its provider.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ScalingMetrics {
    /// CPU utilization, 0–100.
    pub cpu_percent: f64,
    /// Memory utilization, 0–100.
    pub memory_percent: f64,
    pub queue_length: u64,
    pub active_requests: u64,
    pub avg_latency_ms: f64,
    /// Unix timestamp (milliseconds) when the snapshot was taken.
    pub timestamp: u64,
}

/// Direction of a scaling decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScalingAction {
    None,
    ScaleUp,
    ScaleDown,
}

/// Outcome of one autoscaler evaluation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScalingDecision {
    pub action: ScalingAction,
    /// Signed change in instance count (`new - old`). Zero for `None`.
    pub delta: i32,
    pub reason: String,
}

impl ScalingDecision {
    pub fn none(reason: impl Into<String>) -> Self {
        Self {
            action: ScalingAction::None,
            delta: 0,
            reason: reason.into(),
        }
    }

    pub fn scale_up(delta: u32, reason: impl Into<String>) -> Self {
        Self {
            action: ScalingAction::ScaleUp,
            delta: delta as i32,
            reason: reason.into(),
        }
    }

    pub fn scale_down(delta: u32, reason: impl Into<String>) -> Self {
        Self {
            action: ScalingAction::ScaleDown,
            delta: -(delta as i32),
            reason: reason.into(),
        }
    }

    pub fn is_none(&self) -> bool {
        self.action == ScalingAction::None
    }
}
