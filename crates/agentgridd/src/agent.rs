//! The agent the worker pool runs: every request is routed through the
//! load balancer's failover executor to the simulated fleet.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

use agentgrid_balancer::LoadBalancer;
use agentgrid_runtime::Agent;

use crate::fleet::SimulatedFleet;

#[derive(Debug, Clone)]
pub struct Request {
    /// Sticky-routing key; requests sharing it prefer the same instance.
    pub session: Option<String>,
    pub prompt: String,
}

/// Running mean of request latency, reset each time it is read.
#[derive(Debug, Default)]
pub struct LatencyStats {
    window: Mutex<(Duration, u32)>,
}

impl LatencyStats {
    pub fn record(&self, elapsed: Duration) {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        window.0 += elapsed;
        window.1 = window.1.saturating_add(1);
    }

    /// Mean latency in milliseconds since the last call, or 0 if idle.
    pub fn take_average_ms(&self) -> f64 {
        let mut window = self.window.lock().unwrap_or_else(|e| e.into_inner());
        let (total, count) = std::mem::take(&mut *window);
        if count == 0 {
            return 0.0;
        }
        total.as_micros() as f64 / 1000.0 / f64::from(count)
    }
}

pub struct RoutedAgent {
    balancer: Arc<LoadBalancer>,
    fleet: Arc<SimulatedFleet>,
    latency: Arc<LatencyStats>,
}

impl RoutedAgent {
    pub fn new(
        balancer: Arc<LoadBalancer>,
        fleet: Arc<SimulatedFleet>,
        latency: Arc<LatencyStats>,
    ) -> Self {
        Self {
            balancer,
            fleet,
            latency,
        }
    }
}

#[async_trait]
impl Agent for RoutedAgent {
    type Input = Request;
    type Output = String;

    async fn execute(&self, request: Request) -> anyhow::Result<String> {
        let started = Instant::now();
        let result = self
            .balancer
            .execute_with_failover_for_key(request.session.as_deref(), |instance| {
                self.fleet.call(instance, request.prompt.clone())
            })
            .await;
        self.latency.record(started.elapsed());
        Ok(result?)
    }
}
