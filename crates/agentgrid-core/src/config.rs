//! agentgrid.toml configuration parser.
//!
//! Every section and field has a default, so an empty file (or no file at
//! all) yields a usable config. Durations are written as strings like
//! `"30s"`, `"250ms"`, or `"5m"`.

use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{ConfigError, ConfigResult};
use crate::types::Strategy;

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct GridConfig {
    pub scaling: ScalingOptions,
    pub balancer: BalancerConfig,
    pub breaker: BreakerConfig,
    pub daemon: DaemonConfig,
}

/// Autoscaler, queue, and pool sizing.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct ScalingOptions {
    pub min_instances: u32,
    pub max_instances: u32,
    pub target_cpu_percent: f64,
    pub target_memory_percent: f64,
    pub scale_up_cooldown_seconds: u64,
    pub scale_down_cooldown_seconds: u64,
    pub queue_capacity: usize,
    /// Worker tasks in the pool. Zero means auto-detect.
    pub worker_count: usize,
}

impl Default for ScalingOptions {
    fn default() -> Self {
        Self {
            min_instances: 1,
            max_instances: 10,
            target_cpu_percent: 70.0,
            target_memory_percent: 80.0,
            scale_up_cooldown_seconds: 60,
            scale_down_cooldown_seconds: 300,
            queue_capacity: 1000,
            worker_count: 0,
        }
    }
}

impl ScalingOptions {
    pub fn validate(&self) -> ConfigResult<()> {
        if self.min_instances < 1 {
            return Err(ConfigError::MinInstances(self.min_instances));
        }
        if self.max_instances < self.min_instances {
            return Err(ConfigError::MaxBelowMin {
                min: self.min_instances,
                max: self.max_instances,
            });
        }
        check_percent("target_cpu_percent", self.target_cpu_percent)?;
        check_percent("target_memory_percent", self.target_memory_percent)?;
        if self.queue_capacity == 0 {
            return Err(ConfigError::Zero("queue_capacity"));
        }
        Ok(())
    }

    pub fn scale_up_cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_up_cooldown_seconds)
    }

    pub fn scale_down_cooldown(&self) -> Duration {
        Duration::from_secs(self.scale_down_cooldown_seconds)
    }
}

fn check_percent(field: &'static str, value: f64) -> ConfigResult<()> {
    // NaN fails the range check too.
    if (1.0..=100.0).contains(&value) {
        Ok(())
    } else {
        Err(ConfigError::PercentOutOfRange { field, value })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BalancerConfig {
    /// Service whose instances the balancer tracks and syncs.
    pub service_name: String,
    pub strategy: Strategy,
    /// Ring positions per instance for consistent hashing.
    pub virtual_nodes: usize,
    /// Total attempts `execute_with_failover` makes, first try included.
    pub failover_retries: u32,
}

impl Default for BalancerConfig {
    fn default() -> Self {
        Self {
            service_name: "agents".to_string(),
            strategy: Strategy::RoundRobin,
            virtual_nodes: 150,
            failover_retries: 3,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct BreakerConfig {
    /// Consecutive failures that open the circuit.
    pub failure_threshold: u32,
    /// How long the circuit stays open before a probe is let through.
    #[serde(with = "duration_str")]
    pub reset_timeout: Duration,
}

impl Default for BreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
        }
    }
}

/// Settings only the daemon binary reads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct DaemonConfig {
    /// Simulated instances registered at startup. Clamped into the
    /// scaling bounds.
    pub initial_instances: u32,
    #[serde(with = "duration_str")]
    pub autoscale_interval: Duration,
    /// How often the balancer re-reads the service registry.
    #[serde(with = "duration_str")]
    pub sync_interval: Duration,
    #[serde(with = "duration_str")]
    pub shutdown_timeout: Duration,
}

impl Default for DaemonConfig {
    fn default() -> Self {
        Self {
            initial_instances: 1,
            autoscale_interval: Duration::from_secs(15),
            sync_interval: Duration::from_secs(5),
            shutdown_timeout: Duration::from_secs(10),
        }
    }
}

impl GridConfig {
    pub fn from_file(path: &Path) -> ConfigResult<Self> {
        let content = std::fs::read_to_string(path)?;
        let config = Self::from_toml_str(&content)?;
        debug!(path = %path.display(), "loaded grid config");
        Ok(config)
    }

    pub fn from_toml_str(s: &str) -> ConfigResult<Self> {
        let config: GridConfig = toml::from_str(s)?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        self.scaling.validate()?;
        if self.balancer.virtual_nodes == 0 {
            return Err(ConfigError::Zero("balancer.virtual_nodes"));
        }
        if self.balancer.failover_retries == 0 {
            return Err(ConfigError::Zero("balancer.failover_retries"));
        }
        if self.breaker.failure_threshold == 0 {
            return Err(ConfigError::Zero("breaker.failure_threshold"));
        }
        if self.daemon.autoscale_interval.is_zero() {
            return Err(ConfigError::Zero("daemon.autoscale_interval"));
        }
        if self.daemon.sync_interval.is_zero() {
            return Err(ConfigError::Zero("daemon.sync_interval"));
        }
        Ok(())
    }
}

/// Parse a duration string like "250ms", "30s", "5m", or bare seconds.
pub fn parse_duration(s: &str) -> ConfigResult<Duration> {
    let s = s.trim();
    let bad = || ConfigError::Duration(s.to_string());

    if let Some(ms) = s.strip_suffix("ms") {
        ms.trim().parse::<u64>().map(Duration::from_millis).map_err(|_| bad())
    } else if let Some(secs) = s.strip_suffix('s') {
        secs.trim().parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    } else if let Some(mins) = s.strip_suffix('m') {
        mins.trim()
            .parse::<u64>()
            .map(|m| Duration::from_secs(m * 60))
            .map_err(|_| bad())
    } else {
        s.parse::<u64>().map(Duration::from_secs).map_err(|_| bad())
    }
}

fn format_duration(d: &Duration) -> String {
    if d.subsec_millis() != 0 || (d.as_secs() == 0 && !d.is_zero()) {
        format!("{}ms", d.as_millis())
    } else {
        format!("{}s", d.as_secs())
    }
}

mod duration_str {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_str(&super::format_duration(d))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let raw = String::deserialize(d)?;
        super::parse_duration(&raw).map_err(serde::de::Error::custom)
    }
}
