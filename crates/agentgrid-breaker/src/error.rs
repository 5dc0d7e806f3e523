//! Circuit breaker error types.

use std::time::Duration;

use thiserror::Error;

/// Outcome of a failed `CircuitBreaker::call`.
#[derive(Debug, Error)]
pub enum BreakerError {
    /// Rejected without invoking the operation.
    #[error("circuit '{name}' is open, retry in {retry_after:?}")]
    Open { name: String, retry_after: Duration },

    /// The operation ran and failed.
    #[error(transparent)]
    Operation(#[from] anyhow::Error),
}

impl BreakerError {
    pub fn is_open(&self) -> bool {
        matches!(self, BreakerError::Open { .. })
    }

    /// Unwrap into an `anyhow::Error` regardless of variant.
    pub fn into_anyhow(self) -> anyhow::Error {
        match self {
            BreakerError::Operation(e) => e,
            open @ BreakerError::Open { .. } => anyhow::Error::new(open),
        }
    }
}
