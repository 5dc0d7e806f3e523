//! Queue + pool behaviour across many items and workers.

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use agentgrid_runtime::{RequestQueue, WorkError, WorkItem, WorkerPool, agent_fn};
use tokio_util::sync::CancellationToken;

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn many_items_across_workers_all_resolve() {
    let in_flight = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let agent = {
        let in_flight = in_flight.clone();
        let peak = peak.clone();
        Arc::new(agent_fn(move |n: u64| {
            let in_flight = in_flight.clone();
            let peak = peak.clone();
            async move {
                let now = in_flight.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(5)).await;
                in_flight.fetch_sub(1, Ordering::SeqCst);
                Ok(n * n)
            }
        }))
    };

    let pool = WorkerPool::new(agent, Arc::new(RequestQueue::new(64)), 4);
    pool.start();

    let mut tickets = Vec::new();
    for n in 0..40u64 {
        tickets.push((n, pool.submit(n, 0).await.unwrap()));
    }

    for (n, ticket) in tickets {
        let out = tokio::time::timeout(Duration::from_secs(5), ticket.wait())
            .await
            .expect("ticket resolved")
            .unwrap();
        assert_eq!(out, n * n);
    }

    assert!(peak.load(Ordering::SeqCst) > 1, "work should overlap across workers");
    assert!(peak.load(Ordering::SeqCst) <= 4);
    assert!(pool.stop(&CancellationToken::new()).await);
}

#[tokio::test]
async fn completed_queue_drains_before_workers_exit() {
    let queue = Arc::new(RequestQueue::new(16));
    let mut tickets = Vec::new();
    for n in 0..5u32 {
        let (item, ticket) = WorkItem::<u32, u32>::new(n, 0);
        queue.enqueue(item).await.unwrap();
        tickets.push(ticket);
    }
    queue.complete();

    let agent = Arc::new(agent_fn(|n: u32| async move { Ok(n + 100) }));
    let pool = WorkerPool::new(agent, queue.clone(), 2);
    pool.start();

    for (n, ticket) in tickets.into_iter().enumerate() {
        assert_eq!(ticket.wait().await.unwrap(), n as u32 + 100);
    }
    assert!(queue.is_empty());
    assert!(pool.stop(&CancellationToken::new()).await);
}

#[tokio::test]
async fn priority_does_not_reorder() {
    let queue = Arc::new(RequestQueue::new(16));
    let cancel = CancellationToken::new();

    let (low, _t1) = WorkItem::<&str, ()>::new("low", 0);
    let (high, _t2) = WorkItem::<&str, ()>::new("high", 10);
    queue.enqueue(low).await.unwrap();
    queue.enqueue(high).await.unwrap();

    assert_eq!(queue.dequeue(&cancel).await.unwrap().input, "low");
    assert_eq!(queue.dequeue(&cancel).await.unwrap().input, "high");
}

#[tokio::test]
async fn failures_never_stop_the_pool() {
    let agent = Arc::new(agent_fn(|n: u32| async move {
        if n % 2 == 0 {
            anyhow::bail!("even input {n}");
        }
        Ok(n)
    }));
    let pool = WorkerPool::new(agent, Arc::new(RequestQueue::new(32)), 2);
    pool.start();

    let mut ok = 0;
    let mut failed = 0;
    for n in 0..20u32 {
        match pool.submit(n, 0).await.unwrap().wait().await {
            Ok(v) => {
                assert_eq!(v % 2, 1);
                ok += 1;
            }
            Err(WorkError::Agent(e)) => {
                assert!(e.to_string().starts_with("even input"));
                failed += 1;
            }
            Err(other) => panic!("unexpected {other:?}"),
        }
    }

    assert_eq!((ok, failed), (10, 10));
    assert!(pool.is_running());
    pool.stop(&CancellationToken::new()).await;
}
