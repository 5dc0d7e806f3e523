//! End-to-end failover across a small fleet.

use std::sync::Mutex;

use agentgrid_balancer::{BalancerError, LoadBalancer};
use agentgrid_core::{BalancerConfig, Instance, Strategy};

fn fleet(strategy: Strategy) -> LoadBalancer {
    let lb = LoadBalancer::new(BalancerConfig {
        strategy,
        failover_retries: 3,
        ..BalancerConfig::default()
    });
    for id in ["1", "2", "3"] {
        lb.register(Instance::new(id, "agents", format!("127.0.0.1:90{id}0")));
    }
    lb
}

async fn only_three_succeeds(lb: &LoadBalancer) -> (Result<String, BalancerError>, Vec<String>) {
    let attempted = Mutex::new(Vec::new());
    let result = lb
        .execute_with_failover(|instance| {
            attempted.lock().unwrap().push(instance.id.clone());
            async move {
                if instance.id == "3" {
                    Ok(format!("served by {}", instance.endpoint))
                } else {
                    anyhow::bail!("instance {} refused the call", instance.id)
                }
            }
        })
        .await;
    (result, attempted.into_inner().unwrap())
}

#[tokio::test]
async fn reaches_the_healthy_instance_under_every_strategy() {
    for strategy in [
        Strategy::RoundRobin,
        Strategy::LeastConnections,
        Strategy::Random,
        Strategy::WeightedRoundRobin,
        Strategy::ConsistentHash,
    ] {
        let lb = fleet(strategy);
        let (result, attempted) = only_three_succeeds(&lb).await;

        assert_eq!(result.unwrap(), "served by 127.0.0.1:9030", "{strategy}");
        assert!(attempted.len() <= 3);
        assert_eq!(attempted.last().map(String::as_str), Some("3"));

        let mut distinct = attempted.clone();
        distinct.sort();
        distinct.dedup();
        assert_eq!(distinct.len(), attempted.len(), "retried an instance twice");

        for instance in lb.instances() {
            assert_eq!(instance.active_requests, 0);
        }
    }
}

#[tokio::test]
async fn exhaustion_wraps_the_last_failure() {
    let lb = fleet(Strategy::RoundRobin);
    lb.update_health("3", false);

    let (result, attempted) = only_three_succeeds(&lb).await;
    assert_eq!(attempted, vec!["1", "2"]);

    let err = result.unwrap_err();
    assert!(matches!(err, BalancerError::FailoverExhausted { attempts: 2, .. }));
    assert!(err.to_string().contains("instance 2 refused the call"));
}

#[tokio::test]
async fn empty_fleet_reports_no_healthy_instances() {
    let lb = fleet(Strategy::RoundRobin);
    for id in ["1", "2", "3"] {
        lb.update_health(id, false);
    }
    let (result, attempted) = only_three_succeeds(&lb).await;
    assert!(attempted.is_empty());
    assert!(matches!(result, Err(BalancerError::NoHealthyInstances)));
}
