//! Hook into the external service-request workflow.
//!
//! Called while the engine's transaction is open, so implementations must be
//! idempotent and must not perform external I/O.

use async_trait::async_trait;

use crate::domain::billing::{PaymentOutcome, ServiceRequestStatus};
use crate::domain::foundation::{DomainError, ServiceRequestId, Timestamp};

use super::BillingTransaction;

#[async_trait]
pub trait PaymentResolvedHook: Send + Sync {
    /// Reacts to a payment reaching a terminal state.
    ///
    /// Returns the request's new status when the workflow moved it.
    async fn on_payment_resolved(
        &self,
        tx: &mut dyn BillingTransaction,
        service_request_id: ServiceRequestId,
        outcome: PaymentOutcome,
        now: Timestamp,
    ) -> Result<Option<ServiceRequestStatus>, DomainError>;
}
