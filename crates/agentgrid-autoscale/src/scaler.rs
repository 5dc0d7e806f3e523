//! Turns metrics snapshots into instance-count changes.
//!
//! `evaluate()` reads one snapshot, decides, and (when the target differs
//! from the current count) invokes the scaling callback. State only moves
//! once the callback has succeeded.

use std::future::Future;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::{Duration, Instant};

use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info};

use agentgrid_core::{Clock, ScalingDecision, ScalingMetrics, ScalingOptions, SystemClock};

use crate::error::AutoscaleError;
use crate::metrics::MetricsProvider;

/// Queue depth one instance is expected to absorb before more are needed.
pub const QUEUE_ITEMS_PER_INSTANCE: u64 = 10;

pub type BoxFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Callback that moves the fleet to the given instance count.
pub type ScaleCallback = Box<dyn Fn(u32) -> BoxFuture + Send + Sync>;

/// Box an async closure as a [`ScaleCallback`].
pub fn scale_callback<F, Fut>(f: F) -> ScaleCallback
where
    F: Fn(u32) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
{
    Box::new(move |target| Box::pin(f(target)))
}

/// Cooldown tracking and the instance count the autoscaler believes in.
#[derive(Debug, Clone, Copy)]
struct ScaleState {
    current: u32,
    last_scale_up: Option<Instant>,
    last_scale_down: Option<Instant>,
}

pub struct Autoscaler {
    options: ScalingOptions,
    metrics: Arc<dyn MetricsProvider>,
    scale_fn: ScaleCallback,
    clock: Arc<dyn Clock>,
    state: Mutex<ScaleState>,
}

impl Autoscaler {
    /// Create an autoscaler starting at `min_instances`.
    pub fn new(
        options: ScalingOptions,
        metrics: Arc<dyn MetricsProvider>,
        scale_fn: ScaleCallback,
    ) -> Result<Self, AutoscaleError> {
        options.validate()?;
        let current = options.min_instances;
        Ok(Self {
            options,
            metrics,
            scale_fn,
            clock: Arc::new(SystemClock),
            state: Mutex::new(ScaleState {
                current,
                last_scale_up: None,
                last_scale_down: None,
            }),
        })
    }

    /// Read cooldown time from `clock` instead of the system clock.
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    pub fn options(&self) -> &ScalingOptions {
        &self.options
    }

    pub fn current_instances(&self) -> u32 {
        self.lock().current
    }

    /// Override the believed instance count, clamped to
    /// `[min_instances, max_instances]`. Does not invoke the callback.
    pub fn set_current_instances(&self, count: u32) {
        let clamped = count.clamp(self.options.min_instances, self.options.max_instances);
        self.lock().current = clamped;
        debug!(requested = count, current = clamped, "instance count overridden");
    }

    pub fn last_scale_up_time(&self) -> Option<Instant> {
        self.lock().last_scale_up
    }

    pub fn last_scale_down_time(&self) -> Option<Instant> {
        self.lock().last_scale_down
    }

    /// Evaluate one metrics snapshot and apply the resulting decision.
    ///
    /// A failed callback is returned as `AutoscaleError::Scale` and leaves
    /// the instance count and cooldowns unchanged.
    pub async fn evaluate(&self) -> Result<ScalingDecision, AutoscaleError> {
        let metrics = self
            .metrics
            .get_metrics()
            .await
            .map_err(AutoscaleError::Metrics)?;

        let now = self.clock.now();
        let before = *self.lock();
        let (decision, target) = decide(&self.options, &before, &metrics, now);

        if target == before.current {
            debug!(
                current = before.current,
                cpu = metrics.cpu_percent,
                memory = metrics.memory_percent,
                queue = metrics.queue_length,
                reason = %decision.reason,
                "no scaling change"
            );
            return Ok(decision);
        }

        (self.scale_fn)(target)
            .await
            .map_err(|source| AutoscaleError::Scale { target, source })?;

        {
            let mut state = self.lock();
            state.current = target;
            if target > before.current {
                state.last_scale_up = Some(now);
            } else {
                state.last_scale_down = Some(now);
            }
        }

        info!(
            from = before.current,
            to = target,
            delta = decision.delta,
            reason = %decision.reason,
            "scaled instances"
        );
        Ok(decision)
    }

    /// Evaluate every `interval` until `cancel` fires. Errors are logged and
    /// the loop carries on.
    pub async fn run(&self, interval: Duration, cancel: CancellationToken) {
        info!(interval_secs = interval.as_secs(), "autoscaler started");

        loop {
            tokio::select! {
                _ = tokio::time::sleep(interval) => {
                    if let Err(e) = self.evaluate().await {
                        error!(error = %e, "autoscaler evaluation failed");
                    }
                }
                _ = cancel.cancelled() => {
                    info!("autoscaler shutting down");
                    break;
                }
            }
        }
    }

    fn lock(&self) -> MutexGuard<'_, ScaleState> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

fn cooling(last: Option<Instant>, cooldown: Duration, now: Instant) -> bool {
    last.is_some_and(|at| now.saturating_duration_since(at) < cooldown)
}

/// Decide what to do for one snapshot. Returns the decision and the
/// clamped target count (equal to `state.current` for no change).
fn decide(
    options: &ScalingOptions,
    state: &ScaleState,
    metrics: &ScalingMetrics,
    now: Instant,
) -> (ScalingDecision, u32) {
    let current = state.current;
    let (min, max) = (options.min_instances, options.max_instances);
    let queue_limit = u64::from(current.max(1)) * QUEUE_ITEMS_PER_INSTANCE;

    let cpu_ratio = metrics.cpu_percent / options.target_cpu_percent;
    let mem_ratio = metrics.memory_percent / options.target_memory_percent;
    let queue_ratio = metrics.queue_length as f64 / queue_limit as f64;
    let pressure = cpu_ratio.max(mem_ratio).max(queue_ratio);

    let mut triggers = Vec::new();
    if metrics.cpu_percent > options.target_cpu_percent {
        triggers.push(format!(
            "cpu {:.1}% above target {:.1}%",
            metrics.cpu_percent, options.target_cpu_percent
        ));
    }
    if metrics.memory_percent > options.target_memory_percent {
        triggers.push(format!(
            "memory {:.1}% above target {:.1}%",
            metrics.memory_percent, options.target_memory_percent
        ));
    }
    if metrics.queue_length > queue_limit {
        triggers.push(format!(
            "queue length {} above {queue_limit}",
            metrics.queue_length
        ));
    }

    if !triggers.is_empty() {
        let reason = triggers.join(", ");
        if current >= max {
            return (ScalingDecision::none(format!("{reason}; already at max {max}")), current);
        }
        if cooling(state.last_scale_up, options.scale_up_cooldown(), now) {
            return (ScalingDecision::none(format!("{reason}; scale-up cooldown active")), current);
        }
        let desired = (f64::from(current) * pressure).ceil() as u32;
        let target = desired.max(current + 1).clamp(min, max);
        return (ScalingDecision::scale_up(target - current, reason), target);
    }

    let idle = metrics.cpu_percent < options.target_cpu_percent * 0.5
        && metrics.memory_percent < options.target_memory_percent * 0.5;
    if idle && current > min {
        if cooling(state.last_scale_down, options.scale_down_cooldown(), now) {
            return (ScalingDecision::none("underutilized; scale-down cooldown active"), current);
        }
        let desired = (f64::from(current) * pressure).ceil() as u32;
        let target = desired.min(current - 1).clamp(min, max);
        let reason = format!(
            "cpu {:.1}% and memory {:.1}% below half of target",
            metrics.cpu_percent, metrics.memory_percent
        );
        return (ScalingDecision::scale_down(current - target, reason), target);
    }

    (ScalingDecision::none("within targets"), current)
}
