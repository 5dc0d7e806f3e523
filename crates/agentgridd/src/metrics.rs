//! Feeds the autoscaler from the live pool, queue and balancer.

use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};

use async_trait::async_trait;

use agentgrid_autoscale::MetricsProvider;
use agentgrid_balancer::LoadBalancer;
use agentgrid_core::ScalingMetrics;
use agentgrid_runtime::WorkerPool;

use crate::agent::{LatencyStats, RoutedAgent};

/// Worker utilization stands in for CPU; queue fill stands in for memory.
pub struct PoolMetrics {
    pool: Arc<WorkerPool<RoutedAgent>>,
    balancer: Arc<LoadBalancer>,
    latency: Arc<LatencyStats>,
}

impl PoolMetrics {
    pub fn new(
        pool: Arc<WorkerPool<RoutedAgent>>,
        balancer: Arc<LoadBalancer>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            pool,
            balancer,
            latency,
        }
    }

    pub fn snapshot(&self) -> ScalingMetrics {
        let queue = self.pool.queue();
        let depth = queue.count();
        ScalingMetrics {
            cpu_percent: percent(self.pool.busy_workers(), self.pool.worker_count()),
            memory_percent: percent(depth, queue.capacity()),
            queue_length: depth as u64,
            active_requests: self
                .balancer
                .instances()
                .iter()
                .map(|i| u64::from(i.active_requests))
                .sum(),
            avg_latency_ms: self.latency.take_average_ms(),
            timestamp: epoch_millis(),
        }
    }
}

#[async_trait]
impl MetricsProvider for PoolMetrics {
    async fn get_metrics(&self) -> anyhow::Result<ScalingMetrics> {
        Ok(self.snapshot())
    }
}

fn percent(part: usize, whole: usize) -> f64 {
    if whole == 0 {
        return 0.0;
    }
    (part as f64 / whole as f64 * 100.0).min(100.0)
}

fn epoch_millis() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgrid_core::BalancerConfig;
    use agentgrid_runtime::RequestQueue;

    use crate::agent::Request;
    use crate::fleet::SimulatedFleet;

    #[test]
    fn percent_handles_empty_whole() {
        assert_eq!(percent(3, 0), 0.0);
        assert_eq!(percent(1, 4), 25.0);
        assert_eq!(percent(9, 4), 100.0);
    }

    #[tokio::test]
    async fn idle_pool_reports_queue_depth() {
        let fleet = Arc::new(SimulatedFleet::new("agents", 0.0));
        let balancer = Arc::new(LoadBalancer::new(BalancerConfig::default()));
        let latency = Arc::new(LatencyStats::default());
        let agent = Arc::new(RoutedAgent::new(balancer.clone(), fleet, latency.clone()));
        let pool = Arc::new(WorkerPool::new(agent, Arc::new(RequestQueue::new(10)), 2));

        // Not started, so submitted work just sits in the queue.
        for i in 0..4 {
            let _ticket = pool
                .submit(
                    Request {
                        session: None,
                        prompt: format!("p{i}"),
                    },
                    0,
                )
                .await
                .unwrap();
        }

        let metrics = PoolMetrics::new(pool, balancer, latency).get_metrics().await.unwrap();
        assert_eq!(metrics.queue_length, 4);
        assert_eq!(metrics.memory_percent, 40.0);
        assert_eq!(metrics.cpu_percent, 0.0);
        assert_eq!(metrics.active_requests, 0);
        assert!(metrics.timestamp > 0);
    }
}
