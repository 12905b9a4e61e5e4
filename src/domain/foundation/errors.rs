//! Shared error vocabulary.
//!
//! `ValidationError` is raised by value constructors (money, currencies,
//! status strings). `DomainError` is what ports return; its `ErrorCode`
//! doubles as the wire code in HTTP error bodies.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ValidationError {
    #[error("{field} must not be empty")]
    EmptyField { field: String },

    #[error("{field} must be greater than zero")]
    NotPositive { field: String },

    #[error("{field} is malformed: {reason}")]
    InvalidFormat { field: String, reason: String },
}

impl ValidationError {
    pub fn empty_field(field: impl Into<String>) -> Self {
        Self::EmptyField { field: field.into() }
    }

    pub fn not_positive(field: impl Into<String>) -> Self {
        Self::NotPositive { field: field.into() }
    }

    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        Self::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCode {
    ValidationFailed,
    PaymentNotFound,
    SubscriptionNotFound,
    ServiceRequestNotFound,
    EventNotFound,
    NotificationNotFound,
    InvalidStateTransition,
    DuplicateEvent,
    DatabaseError,
    SerializationError,
    InternalError,
}

impl ErrorCode {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::ValidationFailed => "VALIDATION_FAILED",
            Self::PaymentNotFound => "PAYMENT_NOT_FOUND",
            Self::SubscriptionNotFound => "SUBSCRIPTION_NOT_FOUND",
            Self::ServiceRequestNotFound => "SERVICE_REQUEST_NOT_FOUND",
            Self::EventNotFound => "EVENT_NOT_FOUND",
            Self::NotificationNotFound => "NOTIFICATION_NOT_FOUND",
            Self::InvalidStateTransition => "INVALID_STATE_TRANSITION",
            Self::DuplicateEvent => "DUPLICATE_EVENT",
            Self::DatabaseError => "DATABASE_ERROR",
            Self::SerializationError => "SERIALIZATION_ERROR",
            Self::InternalError => "INTERNAL_ERROR",
        }
    }
}

impl std::fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Failure reported by a port.
///
/// The reconciliation engine treats `DatabaseError` and `InternalError` as
/// transient and lets the gateway retry; other codes are recorded as
/// rejected transitions.
#[derive(Debug, Clone, Error)]
#[error("[{code}] {message}")]
pub struct DomainError {
    pub code: ErrorCode,
    pub message: String,
}

impl DomainError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn database(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::DatabaseError, message)
    }
}

impl From<ValidationError> for DomainError {
    fn from(err: ValidationError) -> Self {
        Self::new(ErrorCode::ValidationFailed, err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_messages_name_the_field() {
        assert_eq!(
            ValidationError::empty_field("currency").to_string(),
            "currency must not be empty"
        );
        assert_eq!(
            ValidationError::not_positive("amount").to_string(),
            "amount must be greater than zero"
        );
    }

    #[test]
    fn domain_error_display_carries_wire_code() {
        let err = DomainError::new(ErrorCode::PaymentNotFound, "no payment pay_1");
        assert_eq!(err.to_string(), "[PAYMENT_NOT_FOUND] no payment pay_1");
        assert_eq!(DomainError::database("reset").code, ErrorCode::DatabaseError);
    }

    #[test]
    fn invalid_value_becomes_validation_failure() {
        let err: DomainError = ValidationError::invalid_format("currency", "expected ISO code").into();
        assert_eq!(err.code, ErrorCode::ValidationFailed);
        assert!(err.message.contains("currency is malformed"));
    }
}
