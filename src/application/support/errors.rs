use thiserror::Error;

use crate::domain::billing::{EventOutcome, PaymentError, ReconciliationError, SubscriptionError};
use crate::domain::foundation::{DomainError, NotificationId, PaymentId, ValidationError};

/// Errors returned by support operations.
#[derive(Debug, Error)]
pub enum SupportError {
    #[error("Payment not found: {0}")]
    PaymentNotFound(PaymentId),

    #[error("Notification not found: {0}")]
    NotificationNotFound(NotificationId),

    #[error("Event not found: {0}")]
    EventNotFound(String),

    #[error("Event {event_id} is {outcome} and cannot be replayed")]
    NotReplayable {
        event_id: String,
        outcome: EventOutcome,
    },

    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    #[error(transparent)]
    Payment(#[from] PaymentError),

    #[error(transparent)]
    Subscription(#[from] SubscriptionError),

    #[error(transparent)]
    Reconciliation(#[from] ReconciliationError),

    #[error(transparent)]
    Infrastructure(#[from] DomainError),
}

impl From<ValidationError> for SupportError {
    fn from(err: ValidationError) -> Self {
        SupportError::InvalidRequest(err.to_string())
    }
}

impl SupportError {
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            SupportError::PaymentNotFound(_)
                | SupportError::NotificationNotFound(_)
                | SupportError::EventNotFound(_)
        )
    }
}
