//! HTTP listener, logging, and shutdown settings

use serde::Deserialize;
use std::net::SocketAddr;
use std::time::Duration;

use super::error::ValidationError;

/// Gateway webhook bodies are small; anything larger is not an event.
const MAX_BODY_LIMIT: usize = 1024 * 1024;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub environment: Environment,

    /// `EnvFilter` directive; `RUST_LOG` takes precedence when set.
    pub log_level: String,

    /// Per-request budget, including the webhook transaction.
    pub request_timeout_secs: u64,

    pub max_body_bytes: usize,

    /// How long shutdown waits for queued side effects to drain.
    pub shutdown_grace_secs: u64,
}

/// Deployment environment
#[derive(Debug, Clone, Copy, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Staging,
    Production,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            environment: Environment::default(),
            log_level: "info,fiscal_desk=debug,sqlx=warn".to_string(),
            request_timeout_secs: 15,
            max_body_bytes: 256 * 1024,
            shutdown_grace_secs: 30,
        }
    }
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ValidationError> {
        let addr = format!("{}:{}", self.host, self.port);
        addr.parse()
            .map_err(|_| ValidationError::InvalidListenAddress(addr))
    }

    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout_secs)
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_secs)
    }

    pub fn is_production(&self) -> bool {
        self.environment == Environment::Production
    }

    /// Staging and production ship logs to the aggregator as JSON.
    pub fn json_logs(&self) -> bool {
        self.environment != Environment::Development
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.port == 0 {
            return Err(ValidationError::InvalidPort);
        }
        if !(1..=300).contains(&self.request_timeout_secs) {
            return Err(ValidationError::InvalidTimeout);
        }
        if self.max_body_bytes == 0 || self.max_body_bytes > MAX_BODY_LIMIT {
            return Err(ValidationError::InvalidBodyLimit(self.max_body_bytes));
        }
        self.socket_addr()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_listen_on_all_interfaces() {
        let config = ServerConfig::default();
        assert_eq!(config.socket_addr().unwrap().to_string(), "0.0.0.0:8080");
        assert_eq!(config.environment, Environment::Development);
        assert!(!config.json_logs());
        assert!(config.validate().is_ok());
    }

    #[test]
    fn staging_logs_as_json_but_is_not_production() {
        let config = ServerConfig {
            environment: Environment::Staging,
            ..Default::default()
        };
        assert!(config.json_logs());
        assert!(!config.is_production());
    }

    #[test]
    fn unparseable_host_fails_validation() {
        let config = ServerConfig {
            host: "not a host".to_string(),
            ..Default::default()
        };
        assert!(matches!(
            config.validate(),
            Err(ValidationError::InvalidListenAddress(_))
        ));
    }

    #[test]
    fn request_timeout_is_bounded() {
        for secs in [0, 301] {
            let config = ServerConfig {
                request_timeout_secs: secs,
                ..Default::default()
            };
            assert_eq!(config.validate(), Err(ValidationError::InvalidTimeout));
        }
    }

    #[test]
    fn oversized_body_limit_is_rejected() {
        let config = ServerConfig {
            max_body_bytes: 8 * 1024 * 1024,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::InvalidBodyLimit(8 * 1024 * 1024))
        );
    }
}
