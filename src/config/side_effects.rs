//! Side-effect worker pool settings

use serde::Deserialize;
use std::time::Duration;

use super::error::ValidationError;
use crate::adapters::side_effects::OrchestratorConfig;

#[derive(Debug, Clone, Deserialize)]
pub struct SideEffectsConfig {
    #[serde(default = "default_workers")]
    pub workers: usize,

    #[serde(default = "default_queue_capacity")]
    pub queue_capacity: usize,

    /// Upper bound for a single invoice or notification attempt
    #[serde(default = "default_task_timeout")]
    pub task_timeout_secs: u64,
}

impl SideEffectsConfig {
    pub fn orchestrator(&self) -> OrchestratorConfig {
        OrchestratorConfig::default()
            .with_workers(self.workers)
            .with_queue_capacity(self.queue_capacity)
            .with_task_timeout(Duration::from_secs(self.task_timeout_secs))
    }

    pub fn validate(&self) -> Result<(), ValidationError> {
        if self.workers == 0 {
            return Err(ValidationError::MustBePositive("workers"));
        }
        if self.queue_capacity == 0 {
            return Err(ValidationError::MustBePositive("queue_capacity"));
        }
        if self.task_timeout_secs == 0 {
            return Err(ValidationError::MustBePositive("task_timeout_secs"));
        }
        Ok(())
    }
}

impl Default for SideEffectsConfig {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            queue_capacity: default_queue_capacity(),
            task_timeout_secs: default_task_timeout(),
        }
    }
}

fn default_workers() -> usize {
    4
}

fn default_queue_capacity() -> usize {
    1024
}

fn default_task_timeout() -> u64 {
    30
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_orchestrator_config_carries_values() {
        let config = SideEffectsConfig {
            workers: 8,
            queue_capacity: 16,
            task_timeout_secs: 5,
        };
        let orchestrator = config.orchestrator();
        assert_eq!(orchestrator.workers, 8);
        assert_eq!(orchestrator.queue_capacity, 16);
        assert_eq!(orchestrator.task_timeout, Duration::from_secs(5));
    }

    #[test]
    fn test_zero_workers_rejected() {
        let config = SideEffectsConfig {
            workers: 0,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }
}
