//! Circuit breaker state machine.

use std::fmt;
use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use agentgrid_core::{BreakerConfig, Clock, SystemClock};

use crate::error::BreakerError;

/// Observable breaker state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CircuitState {
    /// Calls pass through.
    Closed,
    /// Calls are rejected until the reset timeout elapses.
    Open,
    /// One probe call is in flight to test recovery.
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CircuitState::Closed => f.write_str("closed"),
            CircuitState::Open => f.write_str("open"),
            CircuitState::HalfOpen => f.write_str("half_open"),
        }
    }
}

/// Point-in-time view of a breaker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BreakerStats {
    pub name: String,
    pub state: CircuitState,
    pub failure_count: u32,
}

#[derive(Debug)]
struct BreakerInner {
    state: CircuitState,
    failure_count: u32,
    /// Set while Open or HalfOpen.
    opened_at: Option<Instant>,
    /// When the current HalfOpen probe was admitted.
    probe_started: Option<Instant>,
}

impl BreakerInner {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            opened_at: None,
            probe_started: None,
        }
    }
}

/// Guards calls to a single dependency.
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    config: BreakerConfig,
    clock: Arc<dyn Clock>,
    inner: Mutex<BreakerInner>,
}

impl CircuitBreaker {
    /// Create a breaker that reads the system clock.
    pub fn new(name: impl Into<String>, config: BreakerConfig) -> Self {
        Self::with_clock(name, config, Arc::new(SystemClock))
    }

    pub fn with_clock(name: impl Into<String>, config: BreakerConfig, clock: Arc<dyn Clock>) -> Self {
        Self {
            name: name.into(),
            config: BreakerConfig {
                failure_threshold: config.failure_threshold.max(1),
                ..config
            },
            clock,
            inner: Mutex::new(BreakerInner::new()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn state(&self) -> CircuitState {
        self.lock().state
    }

    pub fn failure_count(&self) -> u32 {
        self.lock().failure_count
    }

    pub fn stats(&self) -> BreakerStats {
        let inner = self.lock();
        BreakerStats {
            name: self.name.clone(),
            state: inner.state,
            failure_count: inner.failure_count,
        }
    }

    /// Run `op` through the breaker.
    ///
    /// Returns `BreakerError::Open` without calling `op` while the circuit
    /// is open. Otherwise the outcome of `op` is recorded and passed back.
    pub async fn call<T, F, Fut>(&self, op: F) -> Result<T, BreakerError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<T>>,
    {
        self.try_acquire()?;

        match op().await {
            Ok(value) => {
                self.record_success();
                Ok(value)
            }
            Err(e) => {
                self.record_failure();
                Err(BreakerError::Operation(e))
            }
        }
    }

    /// Decide whether a call may proceed right now.
    ///
    /// An Open circuit whose timeout has elapsed moves to HalfOpen and
    /// admits the caller as the probe. A probe that never reports back
    /// (its future was dropped) stops blocking once another full timeout
    /// has passed.
    pub fn try_acquire(&self) -> Result<(), BreakerError> {
        let now = self.clock.now();
        let timeout = self.config.reset_timeout;
        let mut inner = self.lock();

        match inner.state {
            CircuitState::Closed => Ok(()),
            CircuitState::Open => {
                let opened_at = inner.opened_at.unwrap_or(now);
                let elapsed = now.saturating_duration_since(opened_at);
                if elapsed < timeout {
                    return Err(self.open_error(timeout - elapsed));
                }
                inner.state = CircuitState::HalfOpen;
                inner.probe_started = Some(now);
                info!(breaker = %self.name, "circuit half-open, probing");
                Ok(())
            }
            CircuitState::HalfOpen => {
                let started = inner.probe_started.unwrap_or(now);
                let elapsed = now.saturating_duration_since(started);
                if elapsed < timeout {
                    return Err(self.open_error(timeout - elapsed));
                }
                debug!(breaker = %self.name, "previous probe abandoned, admitting a new one");
                inner.probe_started = Some(now);
                Ok(())
            }
        }
    }

    /// Record a successful call.
    pub fn record_success(&self) {
        let mut inner = self.lock();
        match inner.state {
            CircuitState::Closed => inner.failure_count = 0,
            CircuitState::HalfOpen => {
                *inner = BreakerInner::new();
                info!(breaker = %self.name, "circuit closed after successful probe");
            }
            // A call admitted before the circuit opened; it says nothing
            // about whether the timeout has passed.
            CircuitState::Open => {}
        }
    }

    /// Record a failed call.
    pub fn record_failure(&self) {
        let now = self.clock.now();
        let mut inner = self.lock();
        inner.failure_count = inner.failure_count.saturating_add(1);

        match inner.state {
            CircuitState::Closed if inner.failure_count >= self.config.failure_threshold => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                warn!(
                    breaker = %self.name,
                    failures = inner.failure_count,
                    threshold = self.config.failure_threshold,
                    "circuit opened"
                );
            }
            CircuitState::HalfOpen => {
                inner.state = CircuitState::Open;
                inner.opened_at = Some(now);
                inner.probe_started = None;
                warn!(breaker = %self.name, "probe failed, circuit re-opened");
            }
            _ => {}
        }
    }

    /// Force the breaker closed.
    pub fn reset(&self) {
        *self.lock() = BreakerInner::new();
        info!(breaker = %self.name, "circuit reset");
    }

    fn open_error(&self, retry_after: Duration) -> BreakerError {
        BreakerError::Open {
            name: self.name.clone(),
            retry_after,
        }
    }

    fn lock(&self) -> MutexGuard<'_, BreakerInner> {
        // State stays consistent across a poisoned lock: every write is a
        // whole-field assignment.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}
