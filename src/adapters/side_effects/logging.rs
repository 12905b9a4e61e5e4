//! Logging stand-ins for the invoice renderer and mail relay.
//!
//! Rendering and delivery live outside this crate; these adapters record
//! what would have been sent so local runs and tests have a full pipeline.

use async_trait::async_trait;

use crate::domain::billing::NotificationRequest;
use crate::domain::foundation::{DomainError, PaymentId};
use crate::ports::{InvoiceGenerator, InvoiceRef, Notifier};

/// Derives the invoice reference from the payment id, so repeated calls
/// return the same invoice.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingInvoiceGenerator;

#[async_trait]
impl InvoiceGenerator for LoggingInvoiceGenerator {
    async fn generate_invoice(&self, payment_id: PaymentId) -> Result<InvoiceRef, DomainError> {
        let invoice = InvoiceRef(format!("INV-{}", payment_id));
        tracing::info!(payment_id = %payment_id, invoice = %invoice, "Invoice rendered");
        Ok(invoice)
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

#[async_trait]
impl Notifier for LoggingNotifier {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), DomainError> {
        tracing::info!(
            notification_id = %request.id,
            user_id = %request.user_id,
            template = %request.template,
            context = ?request.context,
            "Notification delivered"
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn invoice_reference_is_stable_per_payment() {
        let payment_id = PaymentId::new();
        let first = LoggingInvoiceGenerator.generate_invoice(payment_id).await.unwrap();
        let second = LoggingInvoiceGenerator.generate_invoice(payment_id).await.unwrap();
        assert_eq!(first, second);
        assert!(first.0.starts_with("INV-"));
    }
}
