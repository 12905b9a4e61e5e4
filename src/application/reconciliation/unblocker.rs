//! Service-request unblocker.
//!
//! After a payment reaches a terminal state, forwards the outcome to the
//! workflow hook inside the same transaction. Workflow stages are the hook's
//! business; this type only decides whether the hook is called.

use std::sync::Arc;

use crate::domain::billing::{Payment, ReconciliationError, ServiceRequestStatus};
use crate::domain::foundation::Timestamp;
use crate::ports::{BillingTransaction, PaymentResolvedHook};

pub struct ServiceRequestUnblocker {
    hook: Arc<dyn PaymentResolvedHook>,
}

impl ServiceRequestUnblocker {
    pub fn new(hook: Arc<dyn PaymentResolvedHook>) -> Self {
        Self { hook }
    }

    /// Calls the hook if the payment is linked to a request and resolved.
    pub async fn payment_resolved(
        &self,
        tx: &mut dyn BillingTransaction,
        payment: &Payment,
        now: Timestamp,
    ) -> Result<Option<ServiceRequestStatus>, ReconciliationError> {
        let (Some(service_request_id), Some(outcome)) =
            (payment.service_request_id, payment.resolution())
        else {
            return Ok(None);
        };

        let moved = self
            .hook
            .on_payment_resolved(tx, service_request_id, outcome, now)
            .await?;

        match moved {
            Some(status) => tracing::info!(
                payment_id = %payment.id,
                service_request_id = %service_request_id,
                outcome = ?outcome,
                status = %status,
                "Service request advanced by payment outcome"
            ),
            None => tracing::debug!(
                payment_id = %payment.id,
                service_request_id = %service_request_id,
                outcome = ?outcome,
                "Service request unchanged by payment outcome"
            ),
        }
        Ok(moved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::adapters::memory::InMemoryBillingStore;
    use crate::adapters::workflow::StatusWorkflowHook;
    use crate::domain::billing::{Currency, Money, ServiceRequest};
    use crate::domain::foundation::{ServiceRequestId, UserId};
    use crate::ports::BillingStore;

    fn eur(minor: i64) -> Money {
        Money::from_minor_units(minor, Currency::new("EUR").unwrap()).unwrap()
    }

    async fn store_with_request(status: ServiceRequestStatus) -> (InMemoryBillingStore, ServiceRequest) {
        let store = InMemoryBillingStore::new();
        let request = ServiceRequest {
            id: ServiceRequestId::new(),
            user_id: UserId::new(),
            status,
            payment_id: None,
            requires_payment: true,
            updated_at: Timestamp::now(),
        };
        store.seed_service_request(request.clone()).await;
        (store, request)
    }

    #[tokio::test]
    async fn failed_payment_reverts_request_to_payment_required() {
        let (store, request) = store_with_request(ServiceRequestStatus::Submitted).await;
        let unblocker = ServiceRequestUnblocker::new(Arc::new(StatusWorkflowHook));
        let mut payment = Payment::pending(request.user_id, eur(5000), Timestamp::now())
            .with_service_request(request.id);
        payment.mark_failed(Some("card_declined"), Timestamp::now()).unwrap();

        let mut tx = store.begin().await.unwrap();
        let moved = unblocker
            .payment_resolved(tx.as_mut(), &payment, Timestamp::now())
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(moved, Some(ServiceRequestStatus::PaymentRequired));
        assert_eq!(
            store.service_request(request.id).await.unwrap().status,
            ServiceRequestStatus::PaymentRequired
        );
    }

    #[tokio::test]
    async fn pending_payment_does_not_call_hook() {
        let (store, request) = store_with_request(ServiceRequestStatus::Submitted).await;
        let unblocker = ServiceRequestUnblocker::new(Arc::new(StatusWorkflowHook));
        let payment = Payment::pending(request.user_id, eur(5000), Timestamp::now())
            .with_service_request(request.id);

        let mut tx = store.begin().await.unwrap();
        let moved = unblocker
            .payment_resolved(tx.as_mut(), &payment, Timestamp::now())
            .await
            .unwrap();

        assert_eq!(moved, None);
    }

    #[tokio::test]
    async fn unlinked_payment_is_skipped() {
        let store = InMemoryBillingStore::new();
        let unblocker = ServiceRequestUnblocker::new(Arc::new(StatusWorkflowHook));
        let payment = Payment::settled(UserId::new(), eur(100), "pi_1", Timestamp::now());

        let mut tx = store.begin().await.unwrap();
        assert_eq!(
            unblocker
                .payment_resolved(tx.as_mut(), &payment, Timestamp::now())
                .await
                .unwrap(),
            None
        );
    }
}
