//! Configuration error types.

use thiserror::Error;

/// Result type alias for config loading and validation.
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Errors raised while loading or validating configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("min_instances must be at least 1, got {0}")]
    MinInstances(u32),

    #[error("max_instances ({max}) is below min_instances ({min})")]
    MaxBelowMin { min: u32, max: u32 },

    #[error("{field} must be within 1..=100, got {value}")]
    PercentOutOfRange { field: &'static str, value: f64 },

    #[error("{0} must be greater than zero")]
    Zero(&'static str),

    #[error("unknown load balancing strategy: {0}")]
    UnknownStrategy(String),

    #[error("invalid duration: {0}")]
    Duration(String),

    #[error("failed to read config file: {0}")]
    Io(#[from] std::io::Error),

    #[error("failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),
}
