//! Janitor - background housekeeping for the reconciliation tables.
//!
//! On every tick:
//! 1. Expire active subscriptions whose period has ended
//! 2. Purge finalized ledger records older than the retention window
//!
//! Orphans and in-flight markers are never purged. A failed tick is logged
//! and retried on the next one.
//!
//! ## Graceful Shutdown
//!
//! The loop listens on a watch channel and runs one final tick before
//! returning.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tokio::time;

use crate::domain::foundation::Timestamp;

use super::errors::SupportError;
use super::service::SupportService;

#[derive(Debug, Clone)]
pub struct JanitorConfig {
    pub interval: Duration,
    /// Ledger records older than this are deleted.
    pub retention: Duration,
    pub expiry_batch_size: u32,
}

impl Default for JanitorConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(3600),
            retention: Duration::from_secs(90 * 24 * 3600),
            expiry_batch_size: 500,
        }
    }
}

impl JanitorConfig {
    pub fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    pub fn with_retention(mut self, retention: Duration) -> Self {
        self.retention = retention;
        self
    }
}

/// What one tick did.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct JanitorReport {
    pub expired_subscriptions: usize,
    pub purged_events: u64,
}

pub struct Janitor {
    support: Arc<SupportService>,
    config: JanitorConfig,
}

impl Janitor {
    pub fn new(support: Arc<SupportService>, config: JanitorConfig) -> Self {
        Self { support, config }
    }

    /// Runs until the shutdown channel flips to `true`.
    pub async fn run(&self, mut shutdown: watch::Receiver<bool>) {
        let mut interval = time::interval(self.config.interval);
        interval.set_missed_tick_behavior(time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        self.tick().await;
                        tracing::info!("Janitor stopped");
                        return;
                    }
                }
                _ = interval.tick() => {
                    self.tick().await;
                }
            }
        }
    }

    /// One housekeeping pass.
    pub async fn run_once(&self) -> Result<JanitorReport, SupportError> {
        let expired_subscriptions = self
            .support
            .expire_due_subscriptions(Timestamp::now(), self.config.expiry_batch_size)
            .await?;
        let purged_events = self.support.purge_ledger(self.config.retention).await?;

        Ok(JanitorReport {
            expired_subscriptions,
            purged_events,
        })
    }

    async fn tick(&self) {
        match self.run_once().await {
            Ok(report) if report != JanitorReport::default() => tracing::info!(
                expired_subscriptions = report.expired_subscriptions,
                purged_events = report.purged_events,
                "Janitor tick"
            ),
            Ok(_) => tracing::debug!("Janitor tick found nothing to do"),
            Err(err) => tracing::warn!(error = %err, "Janitor tick failed"),
        }
    }
}
