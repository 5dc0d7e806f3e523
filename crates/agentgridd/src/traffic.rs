//! Synthetic request load for the daemon.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info};

use agentgrid_runtime::{AgentQueue, QueueError, WorkItem};

use crate::agent::{Request, RoutedAgent};

#[derive(Debug, Default)]
pub struct TrafficStats {
    submitted: AtomicU64,
    succeeded: AtomicU64,
    failed: AtomicU64,
    shed: AtomicU64,
}

impl TrafficStats {
    pub fn submitted(&self) -> u64 {
        self.submitted.load(Ordering::Relaxed)
    }

    pub fn succeeded(&self) -> u64 {
        self.succeeded.load(Ordering::Relaxed)
    }

    pub fn failed(&self) -> u64 {
        self.failed.load(Ordering::Relaxed)
    }

    pub fn shed(&self) -> u64 {
        self.shed.load(Ordering::Relaxed)
    }
}

/// Enqueue `rps` requests per second spread over `sessions` session keys,
/// until `cancel` fires or the queue completes. Requests that find the
/// queue full are shed rather than waited on.
pub async fn generate_load(
    queue: Arc<AgentQueue<RoutedAgent>>,
    rps: u32,
    sessions: u32,
    stats: Arc<TrafficStats>,
    cancel: CancellationToken,
) {
    let mut ticker = tokio::time::interval(Duration::from_secs(1) / rps.max(1));
    let sessions = u64::from(sessions.max(1));
    let mut seq: u64 = 0;
    info!(rps, sessions, "load generator started");

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {}
        }

        seq += 1;
        let (item, ticket) = WorkItem::new(
            Request {
                session: Some(format!("session-{}", seq % sessions)),
                prompt: format!("request #{seq}"),
            },
            0,
        );

        match queue.try_enqueue(item) {
            Ok(()) => {
                stats.submitted.fetch_add(1, Ordering::Relaxed);
                let stats = stats.clone();
                tokio::spawn(async move {
                    match ticket.wait().await {
                        Ok(reply) => {
                            debug!(%reply, "request served");
                            stats.succeeded.fetch_add(1, Ordering::Relaxed);
                        }
                        Err(e) => {
                            debug!(error = %e, "request failed");
                            stats.failed.fetch_add(1, Ordering::Relaxed);
                        }
                    }
                });
            }
            Err(QueueError::Full) => {
                stats.shed.fetch_add(1, Ordering::Relaxed);
                debug!(seq, "queue full, request shed");
            }
            Err(QueueError::Completed) => break,
        }
    }

    info!(sent = seq, "load generator stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use agentgrid_runtime::RequestQueue;

    #[tokio::test(start_paused = true)]
    async fn sheds_when_queue_is_full() {
        let queue: Arc<AgentQueue<RoutedAgent>> = Arc::new(RequestQueue::new(5));
        let stats = Arc::new(TrafficStats::default());
        let cancel = CancellationToken::new();

        let task = tokio::spawn(generate_load(
            queue.clone(),
            10,
            4,
            stats.clone(),
            cancel.clone(),
        ));

        tokio::time::sleep(Duration::from_millis(1050)).await;
        cancel.cancel();
        task.await.unwrap();

        assert_eq!(stats.submitted(), 5);
        assert!(stats.shed() >= 1);
        assert_eq!(queue.count(), 5);
    }

    #[tokio::test]
    async fn stops_when_queue_completes() {
        let queue: Arc<AgentQueue<RoutedAgent>> = Arc::new(RequestQueue::new(5));
        queue.complete();
        let stats = Arc::new(TrafficStats::default());

        tokio::time::timeout(
            Duration::from_secs(1),
            generate_load(queue, 1000, 1, stats.clone(), CancellationToken::new()),
        )
        .await
        .expect("generator should stop on a completed queue");
        assert_eq!(stats.submitted(), 0);
    }
}
