//! In-memory BillingStore for tests and local runs.
//!
//! A transaction holds the store-wide lock from `begin` until it is
//! committed or dropped, and works on a private copy of the state. Commit
//! swaps the copy in; anything else discards it. That gives the same
//! all-or-nothing behaviour as the Postgres adapter, with transactions fully
//! serialized instead of row-locked.
//!
//! Failures can be injected at the ledger finalize or commit step to
//! exercise crash recovery.

use std::collections::HashMap;
use std::sync::{Arc, Mutex as StdMutex};

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use crate::domain::billing::{
    EventCompletion, EventOutcome, IdempotencyRecord, Payment, Reservation, ServiceRequest,
    SubscriptionStatus, UserSubscription,
};
use crate::domain::foundation::{
    DomainError, ErrorCode, PaymentId, ServiceRequestId, SubscriptionId, Timestamp, UserId,
};
use crate::ports::{
    BillingStore, BillingTransaction, LedgerTransaction, PaymentLookup, PaymentTransaction,
    ServiceRequestTransaction, SubscriptionTransaction,
};

/// Step at which an injected failure fires (once).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailurePoint {
    /// Writing the final outcome onto the ledger marker.
    CompleteEvent,
    Commit,
}

#[derive(Debug, Clone, Default)]
struct BillingState {
    ledger: HashMap<String, IdempotencyRecord>,
    /// Insertion order doubles as recency.
    payments: Vec<Payment>,
    subscriptions: Vec<UserSubscription>,
    service_requests: HashMap<ServiceRequestId, ServiceRequest>,
}

#[derive(Clone, Default)]
pub struct InMemoryBillingStore {
    state: Arc<Mutex<BillingState>>,
    failure: Arc<StdMutex<Option<FailurePoint>>>,
}

impl InMemoryBillingStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Makes the next transaction that reaches `point` fail with a database error.
    pub fn inject_failure(&self, point: FailurePoint) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = Some(point);
    }

    // === Seeding and inspection ===

    pub async fn seed_payment(&self, payment: Payment) {
        self.state.lock().await.payments.push(payment);
    }

    pub async fn seed_subscription(&self, subscription: UserSubscription) {
        self.state.lock().await.subscriptions.push(subscription);
    }

    pub async fn seed_service_request(&self, request: ServiceRequest) {
        self.state
            .lock()
            .await
            .service_requests
            .insert(request.id, request);
    }

    pub async fn payments(&self) -> Vec<Payment> {
        self.state.lock().await.payments.clone()
    }

    pub async fn payment(&self, id: PaymentId) -> Option<Payment> {
        self.state
            .lock()
            .await
            .payments
            .iter()
            .find(|p| p.id == id)
            .cloned()
    }

    pub async fn subscriptions(&self) -> Vec<UserSubscription> {
        self.state.lock().await.subscriptions.clone()
    }

    pub async fn subscription(&self, id: SubscriptionId) -> Option<UserSubscription> {
        self.state
            .lock()
            .await
            .subscriptions
            .iter()
            .find(|s| s.id == id)
            .cloned()
    }

    pub async fn service_request(&self, id: ServiceRequestId) -> Option<ServiceRequest> {
        self.state.lock().await.service_requests.get(&id).cloned()
    }

    pub async fn ledger_record(&self, event_id: &str) -> Option<IdempotencyRecord> {
        self.state.lock().await.ledger.get(event_id).cloned()
    }

    pub async fn ledger_len(&self) -> usize {
        self.state.lock().await.ledger.len()
    }
}

#[async_trait]
impl BillingStore for InMemoryBillingStore {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(InMemoryTransaction {
            guard,
            working,
            failure: self.failure.clone(),
        }))
    }

    async fn list_orphans(&self, limit: u32) -> Result<Vec<IdempotencyRecord>, DomainError> {
        let state = self.state.lock().await;
        let mut orphans: Vec<_> = state
            .ledger
            .values()
            .filter(|r| r.outcome == EventOutcome::Orphaned)
            .cloned()
            .collect();
        orphans.sort_by_key(|r| r.reserved_at);
        orphans.truncate(limit as usize);
        Ok(orphans)
    }

    async fn purge_ledger(&self, cutoff: Timestamp) -> Result<u64, DomainError> {
        let mut state = self.state.lock().await;
        let before = state.ledger.len();
        state.ledger.retain(|_, r| {
            let purgeable = r.outcome.is_final()
                && r.outcome != EventOutcome::Orphaned
                && r.processed_at.map(|at| at <= cutoff).unwrap_or(false);
            !purgeable
        });
        Ok((before - state.ledger.len()) as u64)
    }
}

pub struct InMemoryTransaction {
    guard: OwnedMutexGuard<BillingState>,
    working: BillingState,
    failure: Arc<StdMutex<Option<FailurePoint>>>,
}

impl InMemoryTransaction {
    fn injected(&self, point: FailurePoint) -> Result<(), DomainError> {
        let mut failure = self.failure.lock().unwrap_or_else(|e| e.into_inner());
        if *failure == Some(point) {
            *failure = None;
            return Err(DomainError::database(format!("injected failure at {:?}", point)));
        }
        Ok(())
    }

    fn payment_index(&self, id: PaymentId) -> Result<usize, DomainError> {
        self.working
            .payments
            .iter()
            .position(|p| p.id == id)
            .ok_or_else(|| DomainError::new(ErrorCode::PaymentNotFound, format!("payment {}", id)))
    }

    fn subscription_index(&self, id: SubscriptionId) -> Result<usize, DomainError> {
        self.working
            .subscriptions
            .iter()
            .position(|s| s.id == id)
            .ok_or_else(|| {
                DomainError::new(ErrorCode::SubscriptionNotFound, format!("subscription {}", id))
            })
    }
}

#[async_trait]
impl LedgerTransaction for InMemoryTransaction {
    async fn reserve_event(
        &mut self,
        record: IdempotencyRecord,
        stale_before: Timestamp,
    ) -> Result<Reservation, DomainError> {
        if let Some(existing) = self.working.ledger.get(&record.event_id) {
            if !existing.is_stale(stale_before) {
                return Ok(Reservation::AlreadyProcessed(existing.clone()));
            }
        }
        self.working.ledger.insert(record.event_id.clone(), record);
        Ok(Reservation::Fresh)
    }

    async fn complete_event(
        &mut self,
        event_id: &str,
        completion: &EventCompletion,
        now: Timestamp,
    ) -> Result<(), DomainError> {
        self.injected(FailurePoint::CompleteEvent)?;
        let record = self.working.ledger.get_mut(event_id).ok_or_else(|| {
            DomainError::new(ErrorCode::EventNotFound, format!("ledger record {}", event_id))
        })?;
        record.finish(completion, now);
        Ok(())
    }

    async fn find_event(&mut self, event_id: &str) -> Result<Option<IdempotencyRecord>, DomainError> {
        Ok(self.working.ledger.get(event_id).cloned())
    }

    async fn find_orphans(
        &mut self,
        correlation_key: &str,
    ) -> Result<Vec<IdempotencyRecord>, DomainError> {
        let mut orphans: Vec<_> = self
            .working
            .ledger
            .values()
            .filter(|r| {
                r.outcome == EventOutcome::Orphaned
                    && r.correlation_key.as_deref() == Some(correlation_key)
            })
            .cloned()
            .collect();
        orphans.sort_by(|a, b| {
            a.reserved_at
                .cmp(&b.reserved_at)
                .then_with(|| a.event_id.cmp(&b.event_id))
        });
        Ok(orphans)
    }
}

#[async_trait]
impl PaymentTransaction for InMemoryTransaction {
    async fn find_payment(
        &mut self,
        lookup: PaymentLookup<'_>,
    ) -> Result<Option<Payment>, DomainError> {
        let mut payments = self.working.payments.iter().rev();
        let found = match lookup {
            PaymentLookup::Id(id) => payments.find(|p| p.id == id),
            PaymentLookup::GatewayReference(reference) => {
                payments.find(|p| p.gateway_reference.as_deref() == Some(reference))
            }
            PaymentLookup::Metadata { key, value } => {
                payments.find(|p| p.metadata_value(key) == Some(value))
            }
            PaymentLookup::LatestForSubscription(id) => {
                payments.find(|p| p.subscription_id == Some(id))
            }
        };
        Ok(found.cloned())
    }

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        if self.working.payments.iter().any(|p| p.id == payment.id) {
            return Err(DomainError::database(format!(
                "duplicate payment id {}",
                payment.id
            )));
        }
        self.working.payments.push(payment.clone());
        Ok(())
    }

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), DomainError> {
        let index = self.payment_index(payment.id)?;
        self.working.payments[index] = payment.clone();
        Ok(())
    }
}

#[async_trait]
impl SubscriptionTransaction for InMemoryTransaction {
    async fn find_subscription(
        &mut self,
        id: SubscriptionId,
    ) -> Result<Option<UserSubscription>, DomainError> {
        Ok(self
            .working
            .subscriptions
            .iter()
            .find(|s| s.id == id)
            .cloned())
    }

    async fn find_subscription_by_gateway_id(
        &mut self,
        gateway_subscription_id: &str,
    ) -> Result<Option<UserSubscription>, DomainError> {
        Ok(self
            .working
            .subscriptions
            .iter()
            .find(|s| s.gateway_subscription_id.as_deref() == Some(gateway_subscription_id))
            .cloned())
    }

    async fn find_pending_subscriptions(
        &mut self,
        user_id: UserId,
    ) -> Result<Vec<UserSubscription>, DomainError> {
        let mut pending: Vec<_> = self
            .working
            .subscriptions
            .iter()
            .rev()
            .filter(|s| s.user_id == user_id && s.status == SubscriptionStatus::Pending)
            .cloned()
            .collect();
        // Stable: equal timestamps keep the newest insertion first.
        pending.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(pending)
    }

    async fn find_active_subscriptions(
        &mut self,
        user_id: UserId,
    ) -> Result<Vec<UserSubscription>, DomainError> {
        Ok(self
            .working
            .subscriptions
            .iter()
            .filter(|s| s.user_id == user_id && s.is_active())
            .cloned()
            .collect())
    }

    async fn find_due_for_expiry(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<UserSubscription>, DomainError> {
        Ok(self
            .working
            .subscriptions
            .iter()
            .filter(|s| s.is_due_for_expiry(now))
            .take(limit as usize)
            .cloned()
            .collect())
    }

    async fn insert_subscription(
        &mut self,
        subscription: &UserSubscription,
    ) -> Result<(), DomainError> {
        self.working.subscriptions.push(subscription.clone());
        Ok(())
    }

    async fn update_subscription(
        &mut self,
        subscription: &UserSubscription,
    ) -> Result<(), DomainError> {
        let index = self.subscription_index(subscription.id)?;
        self.working.subscriptions[index] = subscription.clone();
        Ok(())
    }
}

#[async_trait]
impl ServiceRequestTransaction for InMemoryTransaction {
    async fn find_service_request(
        &mut self,
        id: ServiceRequestId,
    ) -> Result<Option<ServiceRequest>, DomainError> {
        Ok(self.working.service_requests.get(&id).cloned())
    }

    async fn update_service_request_status(
        &mut self,
        request: &ServiceRequest,
    ) -> Result<(), DomainError> {
        let stored = self
            .working
            .service_requests
            .get_mut(&request.id)
            .ok_or_else(|| {
                DomainError::new(
                    ErrorCode::ServiceRequestNotFound,
                    format!("service request {}", request.id),
                )
            })?;
        stored.status = request.status;
        stored.updated_at = request.updated_at;
        Ok(())
    }
}

#[async_trait]
impl BillingTransaction for InMemoryTransaction {
    async fn commit(mut self: Box<Self>) -> Result<(), DomainError> {
        self.injected(FailurePoint::Commit)?;
        let working = std::mem::take(&mut self.working);
        *self.guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), DomainError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::{BillingCycle, Currency, Money};
    use crate::domain::foundation::PlanId;
    use serde_json::json;

    fn payment() -> Payment {
        let eur = Money::from_minor_units(1999, Currency::new("EUR").unwrap()).unwrap();
        Payment::pending(UserId::new(), eur, Timestamp::now())
    }

    #[tokio::test]
    async fn dropped_transaction_discards_writes() {
        let store = InMemoryBillingStore::new();
        {
            let mut tx = store.begin().await.unwrap();
            tx.insert_payment(&payment()).await.unwrap();
        }
        assert!(store.payments().await.is_empty());
    }

    #[tokio::test]
    async fn commit_publishes_writes() {
        let store = InMemoryBillingStore::new();
        let p = payment();
        let mut tx = store.begin().await.unwrap();
        tx.insert_payment(&p).await.unwrap();
        tx.commit().await.unwrap();

        assert_eq!(store.payment(p.id).await, Some(p));
    }

    #[tokio::test]
    async fn injected_commit_failure_fires_once() {
        let store = InMemoryBillingStore::new();
        store.inject_failure(FailurePoint::Commit);

        let mut tx = store.begin().await.unwrap();
        tx.insert_payment(&payment()).await.unwrap();
        assert!(tx.commit().await.is_err());
        assert!(store.payments().await.is_empty());

        let mut tx = store.begin().await.unwrap();
        tx.insert_payment(&payment()).await.unwrap();
        assert!(tx.commit().await.is_ok());
        assert_eq!(store.payments().await.len(), 1);
    }

    #[tokio::test]
    async fn metadata_lookup_finds_latest_match() {
        let store = InMemoryBillingStore::new();
        let older = payment().with_metadata("invoice_id", "in_1");
        let newer = payment().with_metadata("invoice_id", "in_1");
        store.seed_payment(older).await;
        store.seed_payment(newer.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let found = tx
            .find_payment(PaymentLookup::Metadata {
                key: "invoice_id",
                value: "in_1",
            })
            .await
            .unwrap();
        assert_eq!(found.map(|p| p.id), Some(newer.id));
    }

    #[tokio::test]
    async fn pending_subscriptions_are_newest_first() {
        let store = InMemoryBillingStore::new();
        let user = UserId::new();
        let now = Timestamp::now();
        let older =
            UserSubscription::pending(user, PlanId::new(), BillingCycle::Monthly, now.add_days(-1));
        let newer = UserSubscription::pending(user, PlanId::new(), BillingCycle::Monthly, now);
        store.seed_subscription(older.clone()).await;
        store.seed_subscription(newer.clone()).await;

        let mut tx = store.begin().await.unwrap();
        let pending = tx.find_pending_subscriptions(user).await.unwrap();
        assert_eq!(
            pending.iter().map(|s| s.id).collect::<Vec<_>>(),
            vec![newer.id, older.id]
        );
    }

    #[tokio::test]
    async fn purge_keeps_orphans_and_markers() {
        let store = InMemoryBillingStore::new();
        let old = Timestamp::now().add_days(-200);
        let mut tx = store.begin().await.unwrap();
        for (id, completion) in [
            ("evt_done", Some(EventCompletion::success("ok"))),
            ("evt_orphan", Some(EventCompletion::orphaned("waiting", "subscription:sub_1"))),
            ("evt_marker", None),
        ] {
            tx.reserve_event(IdempotencyRecord::processing(id, "invoice.paid", json!({}), old), old)
                .await
                .unwrap();
            if let Some(completion) = completion {
                tx.complete_event(id, &completion, old).await.unwrap();
            }
        }
        tx.commit().await.unwrap();

        let purged = store.purge_ledger(Timestamp::now().add_days(-90)).await.unwrap();

        assert_eq!(purged, 1);
        assert!(store.ledger_record("evt_done").await.is_none());
        assert!(store.ledger_record("evt_orphan").await.is_some());
        assert!(store.ledger_record("evt_marker").await.is_some());
    }
}
