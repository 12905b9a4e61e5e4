//! BillingStore port - transactional access to the engine's aggregates.
//!
//! Every gateway event is applied inside exactly one `BillingTransaction`:
//! the ledger marker, payment, subscription, and service-request writes all
//! commit together or not at all. Dropping a transaction without calling
//! `commit` discards its writes.
//!
//! Lookups inside a transaction lock the rows they return (`FOR UPDATE` in
//! Postgres), so concurrent events touching the same aggregate serialize.

use async_trait::async_trait;

use crate::domain::billing::{
    EventCompletion, IdempotencyRecord, Payment, Reservation, ServiceRequest, UserSubscription,
};
use crate::domain::foundation::{
    DomainError, PaymentId, ServiceRequestId, SubscriptionId, Timestamp, UserId,
};

/// How a handler locates the payment an event refers to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PaymentLookup<'a> {
    Id(PaymentId),
    /// Gateway charge / payment-intent reference.
    GatewayReference(&'a str),
    /// Correlation identifier stored in payment metadata.
    Metadata { key: &'a str, value: &'a str },
    /// Most recent payment attached to a subscription.
    LatestForSubscription(SubscriptionId),
}

impl std::fmt::Display for PaymentLookup<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PaymentLookup::Id(id) => write!(f, "id={}", id),
            PaymentLookup::GatewayReference(r) => write!(f, "gateway_reference={}", r),
            PaymentLookup::Metadata { key, value } => write!(f, "metadata.{}={}", key, value),
            PaymentLookup::LatestForSubscription(id) => write!(f, "subscription={}", id),
        }
    }
}

/// Idempotency ledger operations.
#[async_trait]
pub trait LedgerTransaction: Send {
    /// Inserts a `processing` marker for the event.
    ///
    /// Returns `Fresh` when this transaction now owns the event (including
    /// takeover of a marker reserved at or before `stale_before`), otherwise
    /// `AlreadyProcessed` with the existing record. Concurrent callers for
    /// the same event id must observe exactly one `Fresh`.
    async fn reserve_event(
        &mut self,
        record: IdempotencyRecord,
        stale_before: Timestamp,
    ) -> Result<Reservation, DomainError>;

    /// Writes the final outcome onto a reserved record.
    async fn complete_event(
        &mut self,
        event_id: &str,
        completion: &EventCompletion,
        now: Timestamp,
    ) -> Result<(), DomainError>;

    /// Locks and returns a ledger record.
    async fn find_event(&mut self, event_id: &str) -> Result<Option<IdempotencyRecord>, DomainError>;

    /// Locks and returns orphaned records waiting on `correlation_key`, oldest first.
    async fn find_orphans(
        &mut self,
        correlation_key: &str,
    ) -> Result<Vec<IdempotencyRecord>, DomainError>;
}

#[async_trait]
pub trait PaymentTransaction: Send {
    async fn find_payment(
        &mut self,
        lookup: PaymentLookup<'_>,
    ) -> Result<Option<Payment>, DomainError>;

    async fn insert_payment(&mut self, payment: &Payment) -> Result<(), DomainError>;

    async fn update_payment(&mut self, payment: &Payment) -> Result<(), DomainError>;
}

#[async_trait]
pub trait SubscriptionTransaction: Send {
    async fn find_subscription(
        &mut self,
        id: SubscriptionId,
    ) -> Result<Option<UserSubscription>, DomainError>;

    async fn find_subscription_by_gateway_id(
        &mut self,
        gateway_subscription_id: &str,
    ) -> Result<Option<UserSubscription>, DomainError>;

    /// Pending subscriptions of a user, newest first.
    async fn find_pending_subscriptions(
        &mut self,
        user_id: UserId,
    ) -> Result<Vec<UserSubscription>, DomainError>;

    async fn find_active_subscriptions(
        &mut self,
        user_id: UserId,
    ) -> Result<Vec<UserSubscription>, DomainError>;

    /// Active subscriptions whose end date is at or before `now`.
    async fn find_due_for_expiry(
        &mut self,
        now: Timestamp,
        limit: u32,
    ) -> Result<Vec<UserSubscription>, DomainError>;

    async fn insert_subscription(&mut self, subscription: &UserSubscription)
        -> Result<(), DomainError>;

    async fn update_subscription(&mut self, subscription: &UserSubscription)
        -> Result<(), DomainError>;
}

/// The engine's narrow view of the workflow module's service requests.
#[async_trait]
pub trait ServiceRequestTransaction: Send {
    async fn find_service_request(
        &mut self,
        id: ServiceRequestId,
    ) -> Result<Option<ServiceRequest>, DomainError>;

    /// Persists `status` and `updated_at` only.
    async fn update_service_request_status(
        &mut self,
        request: &ServiceRequest,
    ) -> Result<(), DomainError>;
}

/// One unit of work.
#[async_trait]
pub trait BillingTransaction:
    LedgerTransaction + PaymentTransaction + SubscriptionTransaction + ServiceRequestTransaction + Send
{
    async fn commit(self: Box<Self>) -> Result<(), DomainError>;

    async fn rollback(self: Box<Self>) -> Result<(), DomainError>;
}

#[async_trait]
pub trait BillingStore: Send + Sync {
    async fn begin(&self) -> Result<Box<dyn BillingTransaction>, DomainError>;

    /// Unresolved orphan events, oldest first.
    async fn list_orphans(&self, limit: u32) -> Result<Vec<IdempotencyRecord>, DomainError>;

    /// Deletes finalized ledger records processed before `cutoff`.
    ///
    /// Orphans and in-flight markers are kept regardless of age.
    async fn purge_ledger(&self, cutoff: Timestamp) -> Result<u64, DomainError>;
}
