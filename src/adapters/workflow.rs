//! Default service-request workflow hook.
//!
//! Applies `ServiceRequest::apply_payment_outcome` to the row through the
//! engine's open transaction. Deployments with a richer workflow module plug
//! their own `PaymentResolvedHook` in instead.

use async_trait::async_trait;

use crate::domain::billing::{PaymentOutcome, ServiceRequestStatus};
use crate::domain::foundation::{DomainError, ServiceRequestId, Timestamp};
use crate::ports::{BillingTransaction, PaymentResolvedHook};

#[derive(Debug, Clone, Copy, Default)]
pub struct StatusWorkflowHook;

#[async_trait]
impl PaymentResolvedHook for StatusWorkflowHook {
    async fn on_payment_resolved(
        &self,
        tx: &mut dyn BillingTransaction,
        service_request_id: ServiceRequestId,
        outcome: PaymentOutcome,
        now: Timestamp,
    ) -> Result<Option<ServiceRequestStatus>, DomainError> {
        let Some(mut request) = tx.find_service_request(service_request_id).await? else {
            tracing::warn!(
                service_request_id = %service_request_id,
                "Payment references unknown service request"
            );
            return Ok(None);
        };

        let moved = request.apply_payment_outcome(outcome, now);
        if moved.is_some() {
            tx.update_service_request_status(&request).await?;
        }
        Ok(moved)
    }
}
