use thiserror::Error;

use agentgrid_core::ConfigError;

#[derive(Debug, Error)]
pub enum AutoscaleError {
    #[error("invalid scaling options: {0}")]
    Config(#[from] ConfigError),

    #[error("failed to read metrics: {0}")]
    Metrics(#[source] anyhow::Error),

    #[error("scaling to {target} instances failed: {source}")]
    Scale {
        target: u32,
        #[source]
        source: anyhow::Error,
    },
}
