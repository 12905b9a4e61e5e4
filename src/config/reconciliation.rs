//! Reconciliation engine and janitor settings

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;

#[derive(Debug, Clone, Deserialize)]
pub struct ReconciliationConfig {
    /// Age after which a `processing` ledger marker may be taken over
    #[serde(default = "default_processing_timeout")]
    pub processing_timeout_secs: u64,

    /// Finalized ledger records older than this are purged
    #[serde(default = "default_retention_days")]
    pub retention_days: u64,

    /// How often the janitor runs
    #[serde(default = "default_purge_interval")]
    pub purge_interval_secs: u64,
}

impl ReconciliationConfig {
    pub fn processing_timeout(&self) -> Duration {
        Duration::from_secs(self.processing_timeout_secs)
    }

    pub fn retention(&self) -> Duration {
        Duration::from_secs(self.retention_days * 24 * 3600)
    }

    pub fn purge_interval(&self) -> Duration {
        Duration::from_secs(self.purge_interval_secs)
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.processing_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("processing_timeout_secs"));
        }
        if self.retention_days == 0 {
            return Err(ValidationError::MustBePositive("retention_days"));
        }
        if self.purge_interval_secs == 0 {
            return Err(ValidationError::MustBePositive("purge_interval_secs"));
        }
        Ok(())
    }
}

impl Default for ReconciliationConfig {
    fn default() -> Self {
        Self {
            processing_timeout_secs: default_processing_timeout(),
            retention_days: default_retention_days(),
            purge_interval_secs: default_purge_interval(),
        }
    }
}

fn default_processing_timeout() -> u64 {
    300
}

fn default_retention_days() -> u64 {
    90
}

fn default_purge_interval() -> u64 {
    3600
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ReconciliationConfig::default();
        assert_eq!(config.processing_timeout(), Duration::from_secs(300));
        assert_eq!(config.retention(), Duration::from_secs(90 * 86_400));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_zero_retention_rejected() {
        let config = ReconciliationConfig {
            retention_days: 0,
            ..Default::default()
        };
        assert_eq!(
            config.validate(),
            Err(ValidationError::MustBePositive("retention_days"))
        );
    }
}
