//! Simulated agent instances.
//!
//! The fleet plays two roles: it is the service registry the balancer
//! syncs from, and it answers calls routed to its instances with random
//! latency and a configurable failure rate.

use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use agentgrid_balancer::{RegistryEntry, ServiceRegistry};
use agentgrid_core::{DEFAULT_WEIGHT, Instance};

const BASE_PORT: u16 = 9100;

struct FleetState {
    entries: Vec<RegistryEntry>,
    next_id: u32,
}

pub struct SimulatedFleet {
    service_name: String,
    failure_rate: f64,
    state: Mutex<FleetState>,
}

impl SimulatedFleet {
    /// `failure_rate` is the chance (0.0 to 1.0) that a call fails.
    pub fn new(service_name: impl Into<String>, failure_rate: f64) -> Self {
        let failure_rate = if failure_rate.is_nan() {
            0.0
        } else {
            failure_rate.clamp(0.0, 1.0)
        };
        Self {
            service_name: service_name.into(),
            failure_rate,
            state: Mutex::new(FleetState {
                entries: Vec::new(),
                next_id: 1,
            }),
        }
    }

    /// Grow or shrink to `target` instances. New instances get fresh ids;
    /// shrinking retires the newest first.
    pub fn resize(&self, target: u32) {
        let mut state = self.lock();
        let target = target as usize;

        while state.entries.len() < target {
            let n = state.next_id;
            state.next_id += 1;
            state.entries.push(RegistryEntry {
                id: format!("agent-{n}"),
                host: "127.0.0.1".to_string(),
                port: BASE_PORT.saturating_add(n as u16),
                weight: DEFAULT_WEIGHT,
                is_healthy: true,
            });
        }
        if state.entries.len() > target {
            let retired: Vec<String> = state.entries.drain(target..).map(|e| e.id).collect();
            debug!(?retired, "retired simulated instances");
        }
    }

    pub fn ids(&self) -> Vec<String> {
        self.lock().entries.iter().map(|e| e.id.clone()).collect()
    }

    /// Serve one prompt on `instance`.
    pub async fn call(&self, instance: Instance, prompt: String) -> anyhow::Result<String> {
        let (latency_ms, fails) = {
            let mut rng = rand::thread_rng();
            (rng.gen_range(10..60), rng.gen_bool(self.failure_rate))
        };
        tokio::time::sleep(Duration::from_millis(latency_ms)).await;

        if fails {
            anyhow::bail!("{} timed out after {latency_ms}ms", instance.id);
        }
        Ok(format!(
            "{} ({}) answered {} chars",
            instance.id,
            instance.endpoint,
            prompt.len()
        ))
    }

    fn lock(&self) -> MutexGuard<'_, FleetState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl ServiceRegistry for SimulatedFleet {
    async fn get_instances(&self, service_name: &str) -> anyhow::Result<Vec<RegistryEntry>> {
        if service_name != self.service_name {
            return Ok(Vec::new());
        }
        Ok(self.lock().entries.clone())
    }
}
