//! Service registry collaborator used to keep the balancer's instance set
//! in step with an external source of truth.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use agentgrid_core::Instance;

/// One instance as reported by a service registry.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegistryEntry {
    pub id: String,
    pub host: String,
    pub port: u16,
    pub weight: u32,
    pub is_healthy: bool,
}

impl RegistryEntry {
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// A fresh instance for `service_name` built from this entry.
    pub fn to_instance(&self, service_name: &str) -> Instance {
        Instance::new(&self.id, service_name, self.endpoint())
            .with_weight(self.weight)
            .with_health(self.is_healthy)
            .with_tag("source", "registry")
    }
}

/// Source of the authoritative instance list for a service.
#[async_trait]
pub trait ServiceRegistry: Send + Sync {
    async fn get_instances(&self, service_name: &str) -> anyhow::Result<Vec<RegistryEntry>>;
}

/// Outcome of one reconciliation pass.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SyncStats {
    pub added: u32,
    pub updated: u32,
    pub removed: u32,
}

impl SyncStats {
    /// Whether the pass changed the set of instance ids.
    pub fn membership_changed(&self) -> bool {
        self.added > 0 || self.removed > 0
    }
}
