//! Configuration errors

use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read configuration: {0}")]
    LoadError(#[from] config::ConfigError),

    #[error("failed to read .env: {0}")]
    Dotenv(String),

    #[error("invalid configuration: {0}")]
    ValidationFailed(#[from] ValidationError),
}

/// A loaded value that the service refuses to start with.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    #[error("{0} is required")]
    MissingRequired(&'static str),

    #[error("server.port must be non-zero")]
    InvalidPort,

    #[error("'{0}' is not a valid listen address")]
    InvalidListenAddress(String),

    #[error("server.request_timeout_secs must be between 1 and 300")]
    InvalidTimeout,

    #[error("server.max_body_bytes {0} is outside 1..=1048576")]
    InvalidBodyLimit(usize),

    #[error("database.url must use the postgres:// or postgresql:// scheme")]
    InvalidDatabaseUrl,

    #[error("database.min_connections exceeds database.max_connections")]
    InvalidPoolSize,

    #[error("database.max_connections exceeds 100")]
    PoolSizeTooLarge,

    #[error("gateway.webhook_secret must be a whsec_ signing secret")]
    InvalidWebhookSecret,

    #[error("gateway.signature_tolerance_secs must be between 1 and 3600")]
    InvalidSignatureTolerance,

    #[error("{0} must be greater than zero")]
    MustBePositive(&'static str),
}
