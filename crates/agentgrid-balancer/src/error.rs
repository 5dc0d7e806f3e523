//! Load balancer error types.

use thiserror::Error;

pub type BalancerResult<T> = Result<T, BalancerError>;

#[derive(Debug, Error)]
pub enum BalancerError {
    #[error("no healthy instances available")]
    NoHealthyInstances,

    #[error("failover exhausted after {attempts} attempt(s): {source}")]
    FailoverExhausted {
        attempts: u32,
        #[source]
        source: anyhow::Error,
    },

    #[error("service registry error: {0}")]
    Discovery(#[source] anyhow::Error),
}
