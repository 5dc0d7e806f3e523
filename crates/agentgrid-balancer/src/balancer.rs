//! Instance registry, strategy dispatch, and the failover executor.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::time::Duration;

use rand::Rng;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use agentgrid_breaker::BreakerRegistry;
use agentgrid_core::{BalancerConfig, Instance, Strategy};

use crate::discovery::{RegistryEntry, ServiceRegistry, SyncStats};
use crate::error::{BalancerError, BalancerResult};
use crate::ring::HashRing;
use crate::strategy::{RoundRobinCursor, SmoothWeighted};

/// Instances in registration order, plus the ring derived from their ids.
struct Registry {
    instances: Vec<Instance>,
    ring: HashRing,
}

impl Registry {
    fn position(&self, id: &str) -> Option<usize> {
        self.instances.iter().position(|i| i.id == id)
    }

    fn find_mut(&mut self, id: &str) -> Option<&mut Instance> {
        self.instances.iter_mut().find(|i| i.id == id)
    }

    fn is_healthy(&self, id: &str) -> bool {
        self.instances.iter().any(|i| i.id == id && i.is_healthy)
    }

    fn rebuild_ring(&mut self) {
        let ids: Vec<&str> = self.instances.iter().map(|i| i.id.as_str()).collect();
        self.ring.rebuild(ids);
    }
}

/// Routes calls across registered instances.
///
/// Cheap to share behind an `Arc`; every method takes `&self`.
pub struct LoadBalancer {
    config: BalancerConfig,
    registry: RwLock<Registry>,
    cursor: RoundRobinCursor,
    weighted: Mutex<SmoothWeighted>,
    discovery: Option<Arc<dyn ServiceRegistry>>,
    breakers: Option<BreakerRegistry>,
}

impl LoadBalancer {
    pub fn new(config: BalancerConfig) -> Self {
        let ring = HashRing::new(config.virtual_nodes);
        Self {
            config,
            registry: RwLock::new(Registry {
                instances: Vec::new(),
                ring,
            }),
            cursor: RoundRobinCursor::new(),
            weighted: Mutex::new(SmoothWeighted::new()),
            discovery: None,
            breakers: None,
        }
    }

    /// Attach the collaborator `sync_from_service_registry` pulls from.
    pub fn with_service_registry(mut self, registry: Arc<dyn ServiceRegistry>) -> Self {
        self.discovery = Some(registry);
        self
    }

    /// Guard every failover attempt with a per-instance circuit breaker.
    pub fn with_breakers(mut self, breakers: BreakerRegistry) -> Self {
        self.breakers = Some(breakers);
        self
    }

    pub fn config(&self) -> &BalancerConfig {
        &self.config
    }

    pub fn strategy(&self) -> Strategy {
        self.config.strategy
    }

    pub fn breakers(&self) -> Option<&BreakerRegistry> {
        self.breakers.as_ref()
    }

    // ── Registry ─────────────────────────────────────────────────

    /// Insert or replace the instance with `instance.id`.
    ///
    /// A replaced instance keeps its registration position.
    pub fn register(&self, instance: Instance) {
        let mut registry = self.write();
        match registry.position(&instance.id) {
            Some(pos) => {
                debug!(instance = %instance.id, "instance re-registered");
                registry.instances[pos] = instance;
            }
            None => {
                info!(
                    instance = %instance.id,
                    endpoint = %instance.endpoint,
                    weight = instance.weight,
                    "instance registered"
                );
                registry.instances.push(instance);
                registry.rebuild_ring();
            }
        }
    }

    /// Remove the instance with `id`. Returns whether it was present.
    pub fn unregister(&self, id: &str) -> bool {
        let removed = {
            let mut registry = self.write();
            match registry.position(id) {
                Some(pos) => {
                    registry.instances.remove(pos);
                    registry.rebuild_ring();
                    true
                }
                None => false,
            }
        };

        if removed {
            self.weighted().forget(id);
            if let Some(breakers) = &self.breakers {
                breakers.remove(id);
            }
            info!(instance = id, "instance unregistered");
        }
        removed
    }

    pub fn update_health(&self, id: &str, is_healthy: bool) -> bool {
        let mut registry = self.write();
        let Some(instance) = registry.find_mut(id) else {
            return false;
        };
        if instance.is_healthy != is_healthy {
            if is_healthy {
                info!(instance = id, "instance marked healthy");
            } else {
                warn!(instance = id, "instance marked unhealthy");
            }
        }
        instance.is_healthy = is_healthy;
        true
    }

    pub fn update_load(&self, id: &str, active_requests: u32) -> bool {
        let mut registry = self.write();
        match registry.find_mut(id) {
            Some(instance) => {
                instance.active_requests = active_requests;
                true
            }
            None => false,
        }
    }

    pub fn get(&self, id: &str) -> Option<Instance> {
        let registry = self.read();
        registry.instances.iter().find(|i| i.id == id).cloned()
    }

    /// Snapshot of every instance in registration order.
    pub fn instances(&self) -> Vec<Instance> {
        self.read().instances.clone()
    }

    pub fn healthy_count(&self) -> usize {
        self.read().instances.iter().filter(|i| i.is_healthy).count()
    }

    pub fn len(&self) -> usize {
        self.read().instances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Track one in-flight request on `id` until the guard drops.
    pub fn track_request(&self, id: &str) -> RequestGuard<'_> {
        RequestGuard::enter(self, id)
    }

    // ── Selection ────────────────────────────────────────────────

    /// One healthy instance chosen by the configured strategy.
    ///
    /// Consistent hashing needs a key; without one it behaves like round
    /// robin.
    pub fn select_next(&self) -> Option<Instance> {
        self.select_excluding(&[])
    }

    /// The healthy instance with the fewest active requests. Ties go to
    /// the earliest registered.
    pub fn select_least_loaded(&self) -> Option<Instance> {
        let registry = self.read();
        registry
            .instances
            .iter()
            .filter(|i| i.is_healthy)
            .min_by_key(|i| i.active_requests)
            .cloned()
    }

    /// The healthy instance owning `key` on the hash ring.
    ///
    /// Works under every strategy. A `None` or empty key falls back to
    /// [`select_next`](Self::select_next).
    pub fn select_by_key(&self, key: Option<&str>) -> Option<Instance> {
        let Some(key) = key.filter(|k| !k.is_empty()) else {
            return self.select_next();
        };

        let registry = self.read();
        let owner = registry.ring.lookup(key, |id| registry.is_healthy(id))?;
        registry.instances.iter().find(|i| i.id == owner).cloned()
    }

    fn select_excluding(&self, tried: &[String]) -> Option<Instance> {
        let registry = self.read();
        let candidates: Vec<&Instance> = registry
            .instances
            .iter()
            .filter(|i| i.is_healthy && !tried.contains(&i.id))
            .collect();
        if candidates.is_empty() {
            return None;
        }

        let idx = match self.config.strategy {
            Strategy::RoundRobin | Strategy::ConsistentHash => self.cursor.next(candidates.len())?,
            Strategy::LeastConnections => candidates
                .iter()
                .enumerate()
                .min_by_key(|(_, i)| i.active_requests)
                .map(|(idx, _)| idx)?,
            Strategy::Random => rand::thread_rng().gen_range(0..candidates.len()),
            Strategy::WeightedRoundRobin => self.weighted().pick(&candidates)?,
        };
        Some(candidates[idx].clone())
    }

    // ── Failover ─────────────────────────────────────────────────

    /// Run `op` against a selected instance, moving to a different healthy
    /// instance on failure.
    ///
    /// At most `failover_retries` invocations are made, each against a
    /// distinct instance. Instances whose circuit is open are skipped
    /// without consuming an attempt. The chosen instance's
    /// `active_requests` is raised for the duration of each invocation,
    /// and restored even if the returned future is dropped.
    pub async fn execute_with_failover<T, F, Fut>(&self, op: F) -> BalancerResult<T>
    where
        F: FnMut(Instance) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.execute_with_failover_for_key(None, op).await
    }

    /// Like [`execute_with_failover`](Self::execute_with_failover), but
    /// the first instance is the ring owner of `key`, so requests for the
    /// same session land on the same instance while it is healthy.
    pub async fn execute_with_failover_for_key<T, F, Fut>(
        &self,
        key: Option<&str>,
        mut op: F,
    ) -> BalancerResult<T>
    where
        F: FnMut(Instance) -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        let max_attempts = self.config.failover_retries.max(1);
        let mut attempts: u32 = 0;
        let mut tried: Vec<String> = Vec::new();
        let mut last_error: Option<anyhow::Error> = None;

        while attempts < max_attempts {
            let candidate = match key {
                Some(key) if tried.is_empty() && !key.is_empty() => self.select_by_key(Some(key)),
                _ => self.select_excluding(&tried),
            };
            let Some(instance) = candidate else {
                break;
            };
            tried.push(instance.id.clone());

            let breaker = self
                .breakers
                .as_ref()
                .map(|b| b.get_or_create(&instance.id));
            if let Some(breaker) = &breaker {
                if let Err(e) = breaker.try_acquire() {
                    debug!(instance = %instance.id, "circuit open, skipping instance");
                    last_error = Some(e.into_anyhow());
                    continue;
                }
            }

            attempts += 1;
            let result = {
                let _load = self.track_request(&instance.id);
                op(instance.clone()).await
            };

            if let Some(breaker) = &breaker {
                match &result {
                    Ok(_) => breaker.record_success(),
                    Err(_) => breaker.record_failure(),
                }
            }

            match result {
                Ok(value) => {
                    if attempts > 1 {
                        info!(instance = %instance.id, attempts, "request succeeded after failover");
                    }
                    return Ok(value);
                }
                Err(e) => {
                    warn!(
                        instance = %instance.id,
                        attempt = attempts,
                        max_attempts,
                        error = %e,
                        "instance call failed"
                    );
                    last_error = Some(e);
                }
            }
        }

        match last_error {
            None => Err(BalancerError::NoHealthyInstances),
            Some(source) => Err(BalancerError::FailoverExhausted { attempts, source }),
        }
    }

    // ── Discovery ────────────────────────────────────────────────

    /// Pull the instance list for `service_name` and reconcile.
    ///
    /// Without a configured collaborator this does nothing and returns
    /// empty stats.
    pub async fn sync_from_service_registry(&self, service_name: &str) -> BalancerResult<SyncStats> {
        let Some(discovery) = &self.discovery else {
            debug!(service = service_name, "no service registry configured, skipping sync");
            return Ok(SyncStats::default());
        };

        let entries = discovery
            .get_instances(service_name)
            .await
            .map_err(BalancerError::Discovery)?;
        Ok(self.apply_registry_snapshot(service_name, &entries))
    }

    /// Reconcile instances of `service_name` against `entries`.
    ///
    /// Entries not yet registered are added, known ones have their
    /// endpoint, weight and health refreshed (load and tags are kept), and
    /// instances of that service missing from `entries` are removed.
    /// Instances of other services are left alone.
    pub fn apply_registry_snapshot(&self, service_name: &str, entries: &[RegistryEntry]) -> SyncStats {
        let mut stats = SyncStats::default();
        let removed_ids: Vec<String> = {
            let mut registry = self.write();

            for entry in entries {
                match registry.find_mut(&entry.id) {
                    Some(existing) => {
                        let endpoint = entry.endpoint();
                        let weight = entry.weight.max(1);
                        let changed = existing.endpoint != endpoint
                            || existing.weight != weight
                            || existing.is_healthy != entry.is_healthy
                            || existing.service_name != service_name;
                        if changed {
                            existing.endpoint = endpoint;
                            existing.weight = weight;
                            existing.is_healthy = entry.is_healthy;
                            existing.service_name = service_name.to_string();
                            stats.updated += 1;
                        }
                    }
                    None => {
                        registry.instances.push(entry.to_instance(service_name));
                        stats.added += 1;
                    }
                }
            }

            let (stale, kept): (Vec<Instance>, Vec<Instance>) =
                registry.instances.drain(..).partition(|i| {
                    i.service_name == service_name && !entries.iter().any(|e| e.id == i.id)
                });
            registry.instances = kept;
            stats.removed = stale.len() as u32;

            if stats.membership_changed() {
                registry.rebuild_ring();
            }
            stale.into_iter().map(|i| i.id).collect()
        };

        if !removed_ids.is_empty() {
            let mut weighted = self.weighted();
            for id in &removed_ids {
                weighted.forget(id);
                if let Some(breakers) = &self.breakers {
                    breakers.remove(id);
                }
            }
        }

        info!(
            service = service_name,
            added = stats.added,
            updated = stats.updated,
            removed = stats.removed,
            "service registry sync complete"
        );
        stats
    }

    /// Re-sync `service_name` every `interval` until `cancel` fires.
    /// Failed syncs are logged and retried on the next tick.
    pub async fn run_discovery(
        self: Arc<Self>,
        service_name: String,
        interval: Duration,
        cancel: CancellationToken,
    ) {
        info!(service = %service_name, interval_ms = interval.as_millis() as u64, "discovery loop started");
        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.sync_from_service_registry(&service_name).await {
                        warn!(service = %service_name, error = %e, "service registry sync failed");
                    }
                }
                _ = cancel.cancelled() => {
                    info!(service = %service_name, "discovery loop stopped");
                    return;
                }
            }
        }
    }

    fn adjust_load(&self, id: &str, increment: bool) {
        let mut registry = self.write();
        if let Some(instance) = registry.find_mut(id) {
            instance.active_requests = if increment {
                instance.active_requests.saturating_add(1)
            } else {
                instance.active_requests.saturating_sub(1)
            };
        }
    }

    fn read(&self) -> RwLockReadGuard<'_, Registry> {
        self.registry.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write(&self) -> RwLockWriteGuard<'_, Registry> {
        self.registry.write().unwrap_or_else(|e| e.into_inner())
    }

    fn weighted(&self) -> MutexGuard<'_, SmoothWeighted> {
        self.weighted.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// Holds one unit of `active_requests` on an instance; released on drop.
pub struct RequestGuard<'a> {
    balancer: &'a LoadBalancer,
    id: String,
}

impl<'a> RequestGuard<'a> {
    fn enter(balancer: &'a LoadBalancer, id: &str) -> Self {
        balancer.adjust_load(id, true);
        Self {
            balancer,
            id: id.to_string(),
        }
    }
}

impl Drop for RequestGuard<'_> {
    fn drop(&mut self) {
        self.balancer.adjust_load(&self.id, false);
    }
}
