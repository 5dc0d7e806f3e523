//! Named breakers, created on first use.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use tracing::debug;

use agentgrid_core::{BreakerConfig, Clock, SystemClock};

use crate::breaker::{BreakerStats, CircuitBreaker, CircuitState};

/// One breaker per dependency name, sharing a config and clock.
///
/// Cloning the registry shares the underlying breakers.
#[derive(Debug, Clone)]
pub struct BreakerRegistry {
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    breakers: Arc<RwLock<HashMap<String, Arc<CircuitBreaker>>>>,
}

impl BreakerRegistry {
    pub fn new(config: BreakerConfig) -> Self {
        Self::with_clock(config, Arc::new(SystemClock))
    }

    pub fn with_clock(config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            config,
            clock,
            breakers: Arc::new(RwLock::new(HashMap::new())),
        }
    }

    /// Get the breaker for `name`, creating it closed if needed.
    pub fn get_or_create(&self, name: &str) -> Arc<CircuitBreaker> {
        if let Some(existing) = self.get(name) {
            return existing;
        }

        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        breakers
            .entry(name.to_string())
            .or_insert_with(|| {
                debug!(breaker = name, "created circuit breaker");
                Arc::new(CircuitBreaker::with_clock(
                    name,
                    self.config.clone(),
                    self.clock.clone(),
                ))
            })
            .clone()
    }

    pub fn get(&self, name: &str) -> Option<Arc<CircuitBreaker>> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        breakers.get(name).cloned()
    }

    /// Drop the breaker for `name` (e.g. when its instance is unregistered).
    pub fn remove(&self, name: &str) -> bool {
        let mut breakers = self.breakers.write().unwrap_or_else(|e| e.into_inner());
        breakers.remove(name).is_some()
    }

    /// Stats for every breaker, sorted by name.
    pub fn stats(&self) -> Vec<BreakerStats> {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        let mut stats: Vec<BreakerStats> = breakers.values().map(|b| b.stats()).collect();
        stats.sort_by(|a, b| a.name.cmp(&b.name));
        stats
    }

    /// Names of breakers that are not closed.
    pub fn open_circuits(&self) -> Vec<String> {
        self.stats()
            .into_iter()
            .filter(|s| s.state != CircuitState::Closed)
            .map(|s| s.name)
            .collect()
    }

    pub fn reset_all(&self) {
        let breakers = self.breakers.read().unwrap_or_else(|e| e.into_inner());
        for breaker in breakers.values() {
            breaker.reset();
        }
    }

    pub fn len(&self) -> usize {
        self.breakers.read().unwrap_or_else(|e| e.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
