//! Side-effect collaborator ports.
//!
//! - `InvoiceGenerator` - renders an invoice for a completed payment
//! - `Notifier` - delivers an email/in-app notice
//! - `NotificationLog` - durable record of every notification attempt
//! - `SideEffectScheduler` - hands post-commit work to a detached executor

use async_trait::async_trait;

use crate::domain::billing::{NotificationRecord, NotificationRequest, SideEffect};
use crate::domain::foundation::{DomainError, NotificationId, PaymentId};

/// Reference to a rendered invoice.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InvoiceRef(pub String);

impl std::fmt::Display for InvoiceRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[async_trait]
pub trait InvoiceGenerator: Send + Sync {
    /// Idempotent by payment id: a second call returns the existing invoice.
    async fn generate_invoice(&self, payment_id: PaymentId) -> Result<InvoiceRef, DomainError>;
}

#[async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, request: &NotificationRequest) -> Result<(), DomainError>;
}

#[async_trait]
pub trait NotificationLog: Send + Sync {
    /// Inserts or replaces the record keyed by its notification id.
    async fn save(&self, record: &NotificationRecord) -> Result<(), DomainError>;

    async fn find(&self, id: NotificationId) -> Result<Option<NotificationRecord>, DomainError>;

    /// Failed notifications, most recent first.
    async fn list_failed(&self, limit: u32) -> Result<Vec<NotificationRecord>, DomainError>;
}

/// Accepts work without blocking the caller.
pub trait SideEffectScheduler: Send + Sync {
    /// Returns an error when the work could not be queued; the caller logs it.
    fn schedule(&self, effect: SideEffect) -> Result<(), DomainError>;
}
