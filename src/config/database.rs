//! Database pool settings

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

/// Upper bound on pool size; Postgres connections are not free.
const MAX_POOL_SIZE: u32 = 100;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    /// `postgres://` connection URL. Required.
    pub url: String,
    pub min_connections: u32,
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,

    /// Session `statement_timeout`. A webhook transaction holding row locks
    /// longer than this is aborted and surfaces as a transient failure.
    pub statement_timeout_secs: u64,

    /// Apply pending `migrations/` at startup.
    pub run_migrations: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: String::new(),
            min_connections: 2,
            max_connections: 20,
            acquire_timeout_secs: 10,
            statement_timeout_secs: 5,
            run_migrations: false,
        }
    }
}

impl DatabaseConfig {
    pub fn acquire_timeout(&self) -> Duration {
        Duration::from_secs(self.acquire_timeout_secs)
    }

    pub fn statement_timeout(&self) -> Duration {
        Duration::from_secs(self.statement_timeout_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        let url = self.url.trim();
        if url.is_empty() {
            return Err(ValidationError::MissingRequired("database.url"));
        }
        if !["postgres://", "postgresql://"]
            .iter()
            .any(|scheme| url.starts_with(scheme))
        {
            return Err(ValidationError::InvalidDatabaseUrl);
        }
        if self.max_connections == 0 {
            return Err(ValidationError::MustBePositive("max_connections"));
        }
        if self.min_connections > self.max_connections {
            return Err(ValidationError::InvalidPoolSize);
        }
        if self.max_connections > MAX_POOL_SIZE {
            return Err(ValidationError::PoolSizeTooLarge);
        }
        if self.statement_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("statement_timeout_secs"));
        }
        Ok(())
    }
}
