//! Metrics source consumed by the autoscaler.

use async_trait::async_trait;

use agentgrid_core::ScalingMetrics;

/// Supplies the load snapshot each evaluation is based on.
#[async_trait]
pub trait MetricsProvider: Send + Sync {
    async fn get_metrics(&self) -> anyhow::Result<ScalingMetrics>;
}
