//! Reconciliation error taxonomy.
//!
//! Every failure the engine can hit lands in one of five buckets, and the
//! bucket alone decides whether the gateway gets an acknowledgement.

use axum::http::StatusCode;
use thiserror::Error;

use crate::domain::foundation::{DomainError, ErrorCode, ValidationError};

use super::payment::PaymentError;
use super::subscription::SubscriptionError;
use super::webhook_verifier::SignatureError;

#[derive(Debug, Clone, Error)]
pub enum ReconciliationError {
    /// Rejected at the boundary; never persisted.
    #[error("Invalid signature: {0}")]
    InvalidSignature(#[from] SignatureError),

    /// Payload we cannot interpret. Acknowledged, no domain effect.
    #[error("Malformed event: {0}")]
    MalformedEvent(String),

    /// Domain invariant violated. Acknowledged and raised as an alert.
    #[error("Invalid transition: {0}")]
    InvalidTransition(String),

    /// No prerequisite entity yet. Acknowledged and kept for catch-up.
    #[error("Orphan event: nothing matches {correlation_key}")]
    OrphanEvent { correlation_key: String },

    /// Database or lock failure before commit. Not acknowledged.
    #[error("Transient infrastructure failure: {0}")]
    Transient(String),
}

impl ReconciliationError {
    /// True when the gateway should get a 2xx and stop redelivering.
    pub fn is_acknowledged(&self) -> bool {
        !matches!(
            self,
            ReconciliationError::InvalidSignature(_) | ReconciliationError::Transient(_)
        )
    }

    /// True when a redelivery could succeed.
    pub fn is_retryable(&self) -> bool {
        matches!(self, ReconciliationError::Transient(_))
    }

    pub fn status_code(&self) -> StatusCode {
        match self {
            ReconciliationError::InvalidSignature(_) => StatusCode::UNAUTHORIZED,
            ReconciliationError::Transient(_) => StatusCode::SERVICE_UNAVAILABLE,
            ReconciliationError::MalformedEvent(_)
            | ReconciliationError::InvalidTransition(_)
            | ReconciliationError::OrphanEvent { .. } => StatusCode::OK,
        }
    }

    /// Short label for log fields and ledger summaries.
    pub fn kind(&self) -> &'static str {
        match self {
            ReconciliationError::InvalidSignature(_) => "invalid_signature",
            ReconciliationError::MalformedEvent(_) => "malformed_event",
            ReconciliationError::InvalidTransition(_) => "invalid_transition",
            ReconciliationError::OrphanEvent { .. } => "orphan",
            ReconciliationError::Transient(_) => "transient",
        }
    }
}

/// Only infrastructure codes are worth a redelivery; anything else a port
/// reports (missing ledger row, undecodable stored value, a collaborator
/// refusing the change) fails the same way every time.
impl From<DomainError> for ReconciliationError {
    fn from(err: DomainError) -> Self {
        match err.code {
            ErrorCode::DatabaseError | ErrorCode::InternalError => {
                ReconciliationError::Transient(err.to_string())
            }
            _ => ReconciliationError::InvalidTransition(err.to_string()),
        }
    }
}

impl From<ValidationError> for ReconciliationError {
    fn from(err: ValidationError) -> Self {
        ReconciliationError::MalformedEvent(err.to_string())
    }
}

impl From<PaymentError> for ReconciliationError {
    fn from(err: PaymentError) -> Self {
        ReconciliationError::InvalidTransition(err.to_string())
    }
}

impl From<SubscriptionError> for ReconciliationError {
    fn from(err: SubscriptionError) -> Self {
        ReconciliationError::InvalidTransition(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_signature_and_transient_are_rejected() {
        assert!(!ReconciliationError::InvalidSignature(SignatureError::Mismatch).is_acknowledged());
        assert!(!ReconciliationError::Transient("db down".into()).is_acknowledged());
        assert!(ReconciliationError::MalformedEvent("x".into()).is_acknowledged());
        assert!(ReconciliationError::InvalidTransition("x".into()).is_acknowledged());
        assert!(ReconciliationError::OrphanEvent {
            correlation_key: "sub_1".into()
        }
        .is_acknowledged());
    }

    #[test]
    fn status_codes_drive_redelivery() {
        assert_eq!(
            ReconciliationError::InvalidSignature(SignatureError::Expired).status_code(),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            ReconciliationError::Transient("lock timeout".into()).status_code(),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            ReconciliationError::OrphanEvent {
                correlation_key: "sub_1".into()
            }
            .status_code(),
            StatusCode::OK
        );
    }

    #[test]
    fn repository_failures_are_transient() {
        let err: ReconciliationError = DomainError::database("connection reset").into();
        assert!(err.is_retryable());
        assert!(err.to_string().contains("connection reset"));
    }

    #[test]
    fn non_infrastructure_port_errors_are_acknowledged() {
        for code in [
            ErrorCode::EventNotFound,
            ErrorCode::SerializationError,
            ErrorCode::ValidationFailed,
        ] {
            let err: ReconciliationError = DomainError::new(code, "bad row").into();
            assert!(!err.is_retryable(), "{} should not be retried", code);
            assert!(err.is_acknowledged());
            assert_eq!(err.kind(), "invalid_transition");
        }
        let internal: ReconciliationError = DomainError::new(ErrorCode::InternalError, "x").into();
        assert!(internal.is_retryable());
    }

    #[test]
    fn validation_failures_are_malformed() {
        let err: ReconciliationError = ValidationError::not_positive("amount").into();
        assert_eq!(err.kind(), "malformed_event");
    }
}
