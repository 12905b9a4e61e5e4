//! SupportService - manual reconciliation for support staff.
//!
//! Every write goes through the same `BillingTransaction` boundary the
//! engine uses; side effects are scheduled after commit.

use std::sync::Arc;
use std::time::Duration;

use rust_decimal::Decimal;

use crate::application::reconciliation::{ProcessOutcome, ReconciliationEngine, ReplayResult};
use crate::domain::billing::{
    metadata_keys, IdempotencyRecord, Money, NotificationRecord, NotificationRequest,
    NotificationTemplate, Payment, PaymentStatus, SideEffect,
};
use crate::domain::foundation::{NotificationId, PaymentId, Timestamp};
use crate::ports::{BillingStore, NotificationLog, PaymentLookup, SideEffectScheduler};

use super::errors::SupportError;

/// Refund recorded by a support agent.
#[derive(Debug, Clone)]
pub struct ManualRefundCommand {
    pub payment_id: PaymentId,
    /// Total refunded so far, in the payment's currency.
    pub amount: Decimal,
    pub reason: String,
    /// Who issued the refund, kept in payment metadata.
    pub actor: String,
}

pub struct SupportService {
    store: Arc<dyn BillingStore>,
    engine: Arc<ReconciliationEngine>,
    notifications: Arc<dyn NotificationLog>,
    scheduler: Arc<dyn SideEffectScheduler>,
}

impl SupportService {
    pub fn new(
        store: Arc<dyn BillingStore>,
        engine: Arc<ReconciliationEngine>,
        notifications: Arc<dyn NotificationLog>,
        scheduler: Arc<dyn SideEffectScheduler>,
    ) -> Self {
        Self {
            store,
            engine,
            notifications,
            scheduler,
        }
    }

    /// Unresolved orphan events, oldest first.
    pub async fn list_orphans(&self, limit: u32) -> Result<Vec<IdempotencyRecord>, SupportError> {
        Ok(self.store.list_orphans(limit).await?)
    }

    /// Re-runs an orphaned or failed event against current state.
    pub async fn replay_event(&self, event_id: &str) -> Result<ProcessOutcome, SupportError> {
        match self.engine.replay(event_id).await? {
            ReplayResult::Replayed(outcome) => Ok(outcome),
            ReplayResult::NotFound => Err(SupportError::EventNotFound(event_id.to_string())),
            ReplayResult::NotReplayable(outcome) => Err(SupportError::NotReplayable {
                event_id: event_id.to_string(),
                outcome,
            }),
        }
    }

    pub async fn list_failed_notifications(
        &self,
        limit: u32,
    ) -> Result<Vec<NotificationRecord>, SupportError> {
        Ok(self.notifications.list_failed(limit).await?)
    }

    /// Queues the logged notification again under the same id.
    pub async fn resend_notification(
        &self,
        id: NotificationId,
    ) -> Result<NotificationRecord, SupportError> {
        let record = self
            .notifications
            .find(id)
            .await?
            .ok_or(SupportError::NotificationNotFound(id))?;

        self.scheduler
            .schedule(SideEffect::Notify(record.request.clone()))?;
        tracing::info!(
            notification_id = %id,
            template = %record.request.template,
            attempts = record.attempts,
            "Notification resend queued"
        );
        Ok(record)
    }

    /// Refunds a completed payment on behalf of a support agent.
    pub async fn manual_refund(&self, cmd: ManualRefundCommand) -> Result<Payment, SupportError> {
        if cmd.reason.trim().is_empty() {
            return Err(SupportError::InvalidRequest("refund reason is required".into()));
        }
        let now = Timestamp::now();
        let mut tx = self.store.begin().await?;

        let mut payment = tx
            .find_payment(PaymentLookup::Id(cmd.payment_id))
            .await?
            .ok_or(SupportError::PaymentNotFound(cmd.payment_id))?;
        let amount = Money::new(cmd.amount, payment.amount.currency().clone())?;

        let applied = payment
            .refund(&amount, &cmd.reason, None, now)?
            .is_applied();
        if applied {
            payment
                .metadata
                .insert(metadata_keys::REFUNDED_BY.to_string(), cmd.actor.clone());
            tx.update_payment(&payment).await?;
        }
        tx.commit().await?;

        if applied {
            tracing::info!(
                payment_id = %payment.id,
                amount = %amount,
                actor = %cmd.actor,
                "Manual refund recorded"
            );
            self.schedule(SideEffect::Notify(
                NotificationRequest::new(payment.user_id, NotificationTemplate::PaymentRefunded)
                    .with("payment_id", payment.id)
                    .with("amount", &amount),
            ));
        }
        Ok(payment)
    }

    /// Schedules invoice generation again for a completed payment.
    pub async fn regenerate_invoice(&self, payment_id: PaymentId) -> Result<(), SupportError> {
        let mut tx = self.store.begin().await?;
        let payment = tx.find_payment(PaymentLookup::Id(payment_id)).await?;
        tx.rollback().await?;

        let payment = payment.ok_or(SupportError::PaymentNotFound(payment_id))?;
        if payment.status != PaymentStatus::Completed {
            return Err(SupportError::InvalidRequest(format!(
                "payment {} is {}, only completed payments are invoiced",
                payment_id, payment.status
            )));
        }
        self.scheduler
            .schedule(SideEffect::GenerateInvoice { payment_id })?;
        Ok(())
    }

    /// Expires active subscriptions whose end date has passed.
    pub async fn expire_due_subscriptions(
        &self,
        now: Timestamp,
        limit: u32,
    ) -> Result<usize, SupportError> {
        let mut tx = self.store.begin().await?;
        let due = tx.find_due_for_expiry(now, limit).await?;

        let mut expired = Vec::with_capacity(due.len());
        for mut subscription in due {
            if subscription.expire(now)?.is_applied() {
                tx.update_subscription(&subscription).await?;
                expired.push(subscription);
            }
        }
        tx.commit().await?;

        for subscription in &expired {
            tracing::info!(subscription_id = %subscription.id, "Subscription expired");
            let notice =
                NotificationRequest::new(subscription.user_id, NotificationTemplate::SubscriptionExpired)
                    .with("subscription_id", subscription.id)
                    .with("plan_id", subscription.plan_id);
            self.schedule(SideEffect::Notify(notice));
        }
        Ok(expired.len())
    }

    /// Deletes finalized ledger records older than `retention`.
    pub async fn purge_ledger(&self, retention: Duration) -> Result<u64, SupportError> {
        let cutoff = Timestamp::now().minus(retention);
        let purged = self.store.purge_ledger(cutoff).await?;
        if purged > 0 {
            tracing::info!(purged, cutoff = %cutoff.as_datetime(), "Ledger records purged");
        }
        Ok(purged)
    }

    fn schedule(&self, effect: SideEffect) {
        let label = effect.label();
        if let Err(err) = self.scheduler.schedule(effect) {
            tracing::warn!(side_effect = label, error = %err, "Side effect not scheduled");
        }
    }
}
