//! agentgridd — the agentgrid daemon.
//!
//! Assembles the scaling core around a simulated agent fleet:
//! - Load balancer (synced from the fleet, per-instance circuit breakers)
//! - Request queue + worker pool (every request routed with failover)
//! - Autoscaler (queue depth and pool utilization drive fleet size)
//! - Synthetic load generator
//!
//! # Usage
//!
//! ```text
//! agentgridd run --config agentgrid.toml --rps 50
//! agentgridd check --config agentgrid.toml
//! ```

mod agent;
mod fleet;
mod metrics;
mod traffic;

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use clap::{Parser, Subcommand};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use agentgrid_autoscale::{Autoscaler, scale_callback};
use agentgrid_balancer::LoadBalancer;
use agentgrid_breaker::BreakerRegistry;
use agentgrid_core::GridConfig;
use agentgrid_runtime::{AgentQueue, RequestQueue, WorkerPool};

use crate::agent::{LatencyStats, RoutedAgent};
use crate::fleet::SimulatedFleet;
use crate::metrics::PoolMetrics;
use crate::traffic::{TrafficStats, generate_load};

const DEFAULT_FILTER: &str = "info,agentgridd=debug,agentgrid=debug";

#[derive(Parser)]
#[command(name = "agentgridd", about = "agentgrid daemon")]
struct Cli {
    /// Emit logs as JSON lines.
    #[arg(long, global = true)]
    json: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Run a simulated agent fleet behind the balancer, pool and autoscaler.
    Run {
        /// Config file (TOML). Defaults apply when omitted.
        #[arg(long)]
        config: Option<PathBuf>,

        /// Synthetic requests per second.
        #[arg(long, default_value = "20")]
        rps: u32,

        /// Chance that a simulated instance call fails (0.0 to 1.0).
        #[arg(long, default_value = "0.05")]
        failure_rate: f64,

        /// Distinct session keys the load is spread over.
        #[arg(long, default_value = "64")]
        sessions: u32,
    },

    /// Validate a config file and print the effective settings as JSON.
    Check {
        #[arg(long)]
        config: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    init_tracing(cli.json);

    match cli.command {
        Command::Run {
            config,
            rps,
            failure_rate,
            sessions,
        } => {
            let config = load_config(config.as_deref())?;
            run(config, rps, failure_rate, sessions).await
        }
        Command::Check { config } => {
            let config = load_config(config.as_deref())?;
            println!("{}", serde_json::to_string_pretty(&config)?);
            Ok(())
        }
    }
}

fn init_tracing(json: bool) {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER));
    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    if json {
        builder.json().init();
    } else {
        builder.init();
    }
}

fn load_config(path: Option<&Path>) -> anyhow::Result<GridConfig> {
    match path {
        Some(path) => GridConfig::from_file(path)
            .with_context(|| format!("failed to load config from {}", path.display())),
        None => {
            let config = GridConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}

async fn run(config: GridConfig, rps: u32, failure_rate: f64, sessions: u32) -> anyhow::Result<()> {
    info!("agentgrid daemon starting");

    let service = config.balancer.service_name.clone();
    let scaling = config.scaling.clone();
    let initial = config
        .daemon
        .initial_instances
        .clamp(scaling.min_instances, scaling.max_instances);

    // ── Fleet + load balancer ──────────────────────────────────

    let fleet = Arc::new(SimulatedFleet::new(&service, failure_rate));
    fleet.resize(initial);

    let breakers = BreakerRegistry::new(config.breaker.clone());
    let balancer = Arc::new(
        LoadBalancer::new(config.balancer.clone())
            .with_service_registry(fleet.clone())
            .with_breakers(breakers.clone()),
    );
    balancer.sync_from_service_registry(&service).await?;
    info!(
        service = %service,
        instances = balancer.len(),
        strategy = %balancer.strategy(),
        "load balancer ready"
    );

    // ── Queue + worker pool ────────────────────────────────────

    let latency = Arc::new(LatencyStats::default());
    let agent = Arc::new(RoutedAgent::new(balancer.clone(), fleet.clone(), latency.clone()));
    let queue: Arc<AgentQueue<RoutedAgent>> = Arc::new(RequestQueue::new(scaling.queue_capacity));
    let pool = Arc::new(WorkerPool::new(agent, queue.clone(), scaling.worker_count));
    pool.start();

    // ── Autoscaler ─────────────────────────────────────────────

    let metrics = Arc::new(PoolMetrics::new(pool.clone(), balancer.clone(), latency));
    let scale_fn = {
        let fleet = fleet.clone();
        let balancer = balancer.clone();
        let service = service.clone();
        scale_callback(move |target| {
            let fleet = fleet.clone();
            let balancer = balancer.clone();
            let service = service.clone();
            async move {
                fleet.resize(target);
                balancer.sync_from_service_registry(&service).await?;
                Ok::<_, anyhow::Error>(())
            }
        })
    };
    let autoscaler = Arc::new(Autoscaler::new(scaling.clone(), metrics, scale_fn)?);
    autoscaler.set_current_instances(initial);

    // ── Background tasks ───────────────────────────────────────

    let cancel = CancellationToken::new();
    let stats = Arc::new(TrafficStats::default());

    let autoscale_handle = tokio::spawn({
        let autoscaler = autoscaler.clone();
        let interval = config.daemon.autoscale_interval;
        let cancel = cancel.clone();
        async move { autoscaler.run(interval, cancel).await }
    });
    let discovery_handle = tokio::spawn(balancer.clone().run_discovery(
        service.clone(),
        config.daemon.sync_interval,
        cancel.clone(),
    ));
    let load_handle = tokio::spawn(generate_load(
        queue.clone(),
        rps,
        sessions,
        stats.clone(),
        cancel.clone(),
    ));

    // ── Shutdown ───────────────────────────────────────────────

    tokio::signal::ctrl_c()
        .await
        .context("failed to install CTRL+C handler")?;
    info!("shutdown signal received");

    cancel.cancel();
    queue.complete();

    let timeout = config.daemon.shutdown_timeout;
    if tokio::time::timeout(timeout, wait_for_drain(&queue)).await.is_err() {
        warn!(remaining = queue.count(), "queue not drained before shutdown timeout");
    }

    // In-flight calls get one more timeout window before being aborted.
    let deadline = CancellationToken::new();
    tokio::spawn({
        let deadline = deadline.clone();
        async move {
            tokio::time::sleep(timeout).await;
            deadline.cancel();
        }
    });
    let drained = pool.stop(&deadline).await;

    let _ = autoscale_handle.await;
    let _ = discovery_handle.await;
    let _ = load_handle.await;

    info!(
        submitted = stats.submitted(),
        succeeded = stats.succeeded(),
        failed = stats.failed(),
        shed = stats.shed(),
        instances = autoscaler.current_instances(),
        fleet = ?fleet.ids(),
        open_circuits = ?breakers.open_circuits(),
        drained,
        "agentgrid daemon stopped"
    );
    Ok(())
}

async fn wait_for_drain(queue: &AgentQueue<RoutedAgent>) {
    while !queue.is_empty() {
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_run_flags() {
        let cli = Cli::try_parse_from(["agentgridd", "--json", "run", "--rps", "5"]).unwrap();
        assert!(cli.json);
        match cli.command {
            Command::Run {
                config,
                rps,
                failure_rate,
                sessions,
            } => {
                assert!(config.is_none());
                assert_eq!(rps, 5);
                assert_eq!(failure_rate, 0.05);
                assert_eq!(sessions, 64);
            }
            Command::Check { .. } => panic!("expected run"),
        }
    }

    #[test]
    fn defaults_load_without_a_file() {
        assert_eq!(load_config(None).unwrap(), GridConfig::default());
    }

    #[test]
    fn missing_config_file_is_reported() {
        let err = load_config(Some(Path::new("/nonexistent/agentgrid.toml"))).unwrap_err();
        assert!(err.to_string().contains("/nonexistent/agentgrid.toml"));
    }
}
