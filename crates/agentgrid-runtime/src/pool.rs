//! Worker pool: a fixed set of tasks draining a `RequestQueue` into an
//! `Agent`.
//!
//! Workers are tokio tasks sharing one shutdown token. A worker exits when
//! the token fires or the queue is completed and empty; it never exits
//! because the agent failed or panicked.

use std::any::Any;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use futures_util::FutureExt;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::agent::Agent;
use crate::error::{QueueError, WorkError};
use crate::queue::RequestQueue;
use crate::work::{WorkItem, WorkTicket};

/// The queue type a pool for agent `A` drains.
pub type AgentQueue<A> = RequestQueue<WorkItem<<A as Agent>::Input, <A as Agent>::Output>>;

/// Worker count used when the configured count is zero.
pub fn default_worker_count() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
        * 2
}

/// Live worker tasks and the token that stops them.
struct Workers {
    shutdown: CancellationToken,
    handles: Vec<JoinHandle<()>>,
}

pub struct WorkerPool<A: Agent> {
    agent: Arc<A>,
    queue: Arc<AgentQueue<A>>,
    worker_count: usize,
    busy: Arc<AtomicUsize>,
    workers: Mutex<Option<Workers>>,
}

impl<A: Agent> WorkerPool<A> {
    /// Create a pool. A `worker_count` of zero uses [`default_worker_count`].
    pub fn new(agent: Arc<A>, queue: Arc<AgentQueue<A>>, worker_count: usize) -> Self {
        let worker_count = if worker_count == 0 {
            default_worker_count()
        } else {
            worker_count
        };
        Self {
            agent,
            queue,
            worker_count,
            busy: Arc::new(AtomicUsize::new(0)),
            workers: Mutex::new(None),
        }
    }

    /// Spawn the workers. Calling again while running does nothing.
    ///
    /// Must be called from within a tokio runtime.
    pub fn start(&self) {
        let mut workers = self.lock();
        if workers.is_some() {
            debug!("worker pool already running");
            return;
        }

        let shutdown = CancellationToken::new();
        let handles = (0..self.worker_count)
            .map(|index| {
                tokio::spawn(run_worker(
                    index,
                    self.agent.clone(),
                    self.queue.clone(),
                    self.busy.clone(),
                    shutdown.clone(),
                ))
            })
            .collect();

        *workers = Some(Workers { shutdown, handles });
        info!(workers = self.worker_count, "worker pool started");
    }

    /// Stop pulling new work and wait for in-flight items to finish.
    ///
    /// If `cancel` fires before every worker has finished, the stragglers
    /// are aborted; their items resolve as `WorkError::Abandoned`. Returns
    /// `true` if all workers finished on their own. Safe to call before
    /// `start()` and more than once.
    pub async fn stop(&self, cancel: &CancellationToken) -> bool {
        let Some(Workers {
            shutdown,
            mut handles,
        }) = self.lock().take()
        else {
            debug!("worker pool not running, nothing to stop");
            return true;
        };

        shutdown.cancel();

        let drained = tokio::select! {
            _ = join_all(&mut handles) => true,
            _ = cancel.cancelled() => false,
        };

        if drained {
            info!("worker pool stopped");
        } else {
            for handle in &handles {
                handle.abort();
            }
            warn!(
                busy = self.busy_workers(),
                "worker pool stop deadline reached, aborting workers"
            );
        }
        drained
    }

    /// Enqueue `input` and return a ticket for its result.
    pub async fn submit(
        &self,
        input: A::Input,
        priority: i32,
    ) -> Result<WorkTicket<A::Output>, QueueError> {
        let (item, ticket) = WorkItem::new(input, priority);
        self.queue.enqueue(item).await?;
        Ok(ticket)
    }

    pub fn is_running(&self) -> bool {
        self.lock().is_some()
    }

    pub fn worker_count(&self) -> usize {
        self.worker_count
    }

    /// Workers currently inside an agent call.
    pub fn busy_workers(&self) -> usize {
        self.busy.load(Ordering::Relaxed)
    }

    pub fn queue(&self) -> &Arc<AgentQueue<A>> {
        &self.queue
    }

    fn lock(&self) -> MutexGuard<'_, Option<Workers>> {
        self.workers.lock().unwrap_or_else(|e| e.into_inner())
    }
}

async fn join_all(handles: &mut [JoinHandle<()>]) {
    for handle in handles.iter_mut() {
        if let Err(e) = handle.await {
            warn!(error = %e, "worker task ended abnormally");
        }
    }
}

/// Decrements the busy gauge even if the worker is aborted mid-call.
struct BusyGuard(Arc<AtomicUsize>);

impl BusyGuard {
    fn enter(counter: &Arc<AtomicUsize>) -> Self {
        counter.fetch_add(1, Ordering::Relaxed);
        Self(counter.clone())
    }
}

impl Drop for BusyGuard {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::Relaxed);
    }
}

async fn run_worker<A: Agent>(
    index: usize,
    agent: Arc<A>,
    queue: Arc<AgentQueue<A>>,
    busy: Arc<AtomicUsize>,
    shutdown: CancellationToken,
) {
    debug!(worker = index, "worker started");

    while let Some(item) = queue.dequeue(&shutdown).await {
        let _busy = BusyGuard::enter(&busy);
        let id = item.id.clone();
        let waited = item.enqueued_at.elapsed();
        let (input, slot) = item.take();

        let result = match AssertUnwindSafe(agent.execute(input)).catch_unwind().await {
            Ok(Ok(output)) => Ok(output),
            Ok(Err(e)) => {
                debug!(worker = index, item = %id, error = %e, "agent call failed");
                Err(WorkError::Agent(e))
            }
            Err(panic) => {
                let message = panic_message(panic.as_ref());
                warn!(worker = index, item = %id, %message, "agent panicked");
                Err(WorkError::Panicked(message))
            }
        };

        if !slot.resolve(result) {
            debug!(worker = index, item = %id, "submitter stopped waiting, result dropped");
        }
        debug!(worker = index, item = %id, waited_ms = waited.as_millis() as u64, "work item done");
    }

    debug!(worker = index, "worker exiting");
}

fn panic_message(panic: &(dyn Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    use crate::agent::agent_fn;

    fn echo_pool(workers: usize) -> WorkerPool<impl Agent<Input = String, Output = String>> {
        let agent = Arc::new(agent_fn(|input: String| async move {
            Ok(format!("echo: {input}"))
        }));
        WorkerPool::new(agent, Arc::new(RequestQueue::new(16)), workers)
    }

    #[tokio::test]
    async fn single_worker_resolves_item() {
        let pool = echo_pool(1);
        pool.start();

        let ticket = pool.submit("hi".to_string(), 0).await.unwrap();
        let out = tokio::time::timeout(Duration::from_secs(2), ticket.wait())
            .await
            .expect("item should resolve promptly")
            .unwrap();
        assert_eq!(out, "echo: hi");

        assert!(pool.stop(&CancellationToken::new()).await);
    }

    #[tokio::test]
    async fn start_twice_is_noop() {
        let pool = echo_pool(2);
        pool.start();
        pool.start();
        assert!(pool.is_running());
        assert_eq!(pool.lock().as_ref().unwrap().handles.len(), 2);
        pool.stop(&CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn stop_before_start_is_fine() {
        let pool = echo_pool(1);
        assert!(!pool.is_running());
        assert!(pool.stop(&CancellationToken::new()).await);
        assert!(pool.stop(&CancellationToken::new()).await);
    }

    #[test]
    fn zero_workers_auto_detects() {
        let pool = echo_pool(0);
        assert_eq!(pool.worker_count(), default_worker_count());
        assert!(pool.worker_count() >= 2);
    }

    #[tokio::test]
    async fn agent_error_resolves_ticket_and_worker_survives() {
        let agent = Arc::new(agent_fn(|n: u32| async move {
            if n == 0 {
                anyhow::bail!("zero is not allowed");
            }
            Ok(n + 1)
        }));
        let pool = WorkerPool::new(agent, Arc::new(RequestQueue::new(16)), 1);
        pool.start();

        let bad = pool.submit(0, 0).await.unwrap();
        let good = pool.submit(1, 0).await.unwrap();

        let err = bad.wait().await.unwrap_err();
        assert!(matches!(err, WorkError::Agent(_)));
        assert_eq!(good.wait().await.unwrap(), 2);

        pool.stop(&CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn agent_panic_is_captured() {
        let agent = Arc::new(agent_fn(|n: u32| async move {
            if n == 0 {
                panic!("tool exploded");
            }
            Ok(n)
        }));
        let pool = WorkerPool::new(agent, Arc::new(RequestQueue::new(16)), 1);
        pool.start();

        let boom = pool.submit(0, 0).await.unwrap();
        match boom.wait().await {
            Err(WorkError::Panicked(msg)) => assert!(msg.contains("tool exploded")),
            other => panic!("expected panic error, got {other:?}"),
        }

        // The same single worker keeps serving.
        assert_eq!(pool.submit(5, 0).await.unwrap().wait().await.unwrap(), 5);
        assert_eq!(pool.busy_workers(), 0);
        pool.stop(&CancellationToken::new()).await;
    }

    #[tokio::test]
    async fn stop_waits_for_in_flight_work() {
        let agent = Arc::new(agent_fn(|ms: u64| async move {
            tokio::time::sleep(Duration::from_millis(ms)).await;
            Ok(ms)
        }));
        let pool = WorkerPool::new(agent, Arc::new(RequestQueue::new(16)), 1);
        pool.start();

        let ticket = pool.submit(50, 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(pool.busy_workers(), 1);

        assert!(pool.stop(&CancellationToken::new()).await);
        assert!(!pool.is_running());
        assert_eq!(ticket.wait().await.unwrap(), 50);
    }

    #[tokio::test]
    async fn stop_deadline_aborts_stragglers() {
        let agent = Arc::new(agent_fn(|_: ()| async move {
            tokio::time::sleep(Duration::from_secs(60)).await;
            Ok(())
        }));
        let pool = WorkerPool::new(agent, Arc::new(RequestQueue::new(16)), 1);
        pool.start();

        let ticket = pool.submit((), 0).await.unwrap();
        tokio::time::sleep(Duration::from_millis(10)).await;

        let deadline = CancellationToken::new();
        let trigger = deadline.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        assert!(!pool.stop(&deadline).await);
        assert!(matches!(ticket.wait().await, Err(WorkError::Abandoned)));
    }

    #[tokio::test]
    async fn items_left_queued_after_stop_stay_queued() {
        let pool = echo_pool(1);
        pool.start();
        pool.stop(&CancellationToken::new()).await;

        let _ticket = pool.submit("late".to_string(), 0).await.unwrap();
        assert_eq!(pool.queue().count(), 1);

        // Restarting picks it up.
        pool.start();
        tokio::time::timeout(Duration::from_secs(2), async {
            while !pool.queue().is_empty() {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .unwrap();
        pool.stop(&CancellationToken::new()).await;
    }
}
