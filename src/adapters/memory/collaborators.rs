//! In-memory plan catalog, notification log, and recording scheduler.
//!
//! Deterministic stand-ins for tests and local runs. Std locks recover from
//! poisoning instead of panicking.

use std::collections::HashMap;
use std::sync::Mutex;

use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::domain::billing::{
    NotificationRecord, NotificationRequest, NotificationStatus, SideEffect,
};
use crate::domain::foundation::{DomainError, NotificationId, PlanId};
use crate::ports::{NotificationLog, Plan, PlanCatalog, SideEffectScheduler};

// === Plan catalog ===

#[derive(Default)]
pub struct InMemoryPlanCatalog {
    plans: RwLock<Vec<Plan>>,
}

impl InMemoryPlanCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_plans(plans: impl IntoIterator<Item = Plan>) -> Self {
        Self {
            plans: RwLock::new(plans.into_iter().collect()),
        }
    }

    pub async fn add(&self, plan: Plan) {
        self.plans.write().await.push(plan);
    }
}

#[async_trait]
impl PlanCatalog for InMemoryPlanCatalog {
    async fn find_plan(&self, id: PlanId) -> Result<Option<Plan>, DomainError> {
        Ok(self.plans.read().await.iter().find(|p| p.id == id).cloned())
    }

    async fn find_plan_by_gateway_price(&self, price_id: &str) -> Result<Option<Plan>, DomainError> {
        Ok(self
            .plans
            .read()
            .await
            .iter()
            .find(|p| p.gateway_price_id.as_deref() == Some(price_id))
            .cloned())
    }
}

// === Notification log ===

#[derive(Default)]
pub struct InMemoryNotificationLog {
    records: RwLock<HashMap<NotificationId, NotificationRecord>>,
}

impl InMemoryNotificationLog {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl NotificationLog for InMemoryNotificationLog {
    async fn save(&self, record: &NotificationRecord) -> Result<(), DomainError> {
        self.records
            .write()
            .await
            .insert(record.request.id, record.clone());
        Ok(())
    }

    async fn find(&self, id: NotificationId) -> Result<Option<NotificationRecord>, DomainError> {
        Ok(self.records.read().await.get(&id).cloned())
    }

    async fn list_failed(&self, limit: u32) -> Result<Vec<NotificationRecord>, DomainError> {
        let mut failed: Vec<_> = self
            .records
            .read()
            .await
            .values()
            .filter(|r| r.status == NotificationStatus::Failed)
            .cloned()
            .collect();
        failed.sort_by(|a, b| b.updated_at.cmp(&a.updated_at));
        failed.truncate(limit as usize);
        Ok(failed)
    }
}

// === Scheduler ===

/// Captures scheduled side effects instead of running them.
#[derive(Default)]
pub struct RecordingScheduler {
    effects: Mutex<Vec<SideEffect>>,
}

impl RecordingScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn effects(&self) -> Vec<SideEffect> {
        self.effects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }

    pub fn notifications(&self) -> Vec<NotificationRequest> {
        self.effects()
            .into_iter()
            .filter_map(|effect| match effect {
                SideEffect::Notify(request) => Some(request),
                SideEffect::GenerateInvoice { .. } => None,
            })
            .collect()
    }

    pub fn clear(&self) {
        self.effects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clear();
    }
}

impl SideEffectScheduler for RecordingScheduler {
    fn schedule(&self, effect: SideEffect) -> Result<(), DomainError> {
        self.effects
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(effect);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::NotificationTemplate;
    use crate::domain::foundation::{Timestamp, UserId};

    #[tokio::test]
    async fn list_failed_returns_most_recent_first() {
        let log = InMemoryNotificationLog::new();
        let base = Timestamp::now();
        for offset in [10, 30, 20] {
            let request = NotificationRequest::new(UserId::new(), NotificationTemplate::PaymentFailed);
            let mut record = NotificationRecord::queued(request, base);
            record.record_attempt(Err("bounced".into()), base.add_seconds(offset));
            log.save(&record).await.unwrap();
        }
        let sent = NotificationRecord::queued(
            NotificationRequest::new(UserId::new(), NotificationTemplate::PaymentReceived),
            base,
        );
        log.save(&sent).await.unwrap();

        let failed = log.list_failed(2).await.unwrap();

        assert_eq!(failed.len(), 2);
        assert_eq!(failed[0].updated_at, base.add_seconds(30));
        assert_eq!(failed[1].updated_at, base.add_seconds(20));
    }

    #[test]
    fn recording_scheduler_separates_notifications() {
        let scheduler = RecordingScheduler::new();
        scheduler
            .schedule(SideEffect::GenerateInvoice {
                payment_id: crate::domain::foundation::PaymentId::new(),
            })
            .unwrap();
        scheduler
            .schedule(SideEffect::Notify(NotificationRequest::new(
                UserId::new(),
                NotificationTemplate::SubscriptionActivated,
            )))
            .unwrap();

        assert_eq!(scheduler.effects().len(), 2);
        assert_eq!(scheduler.notifications().len(), 1);
    }
}
