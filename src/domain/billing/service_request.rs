//! Service-request view owned by the external workflow module.
//!
//! The engine only touches `status` and `updated_at`; the workflow stages
//! themselves live behind the `PaymentResolvedHook` port.

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{PaymentId, ServiceRequestId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ServiceRequestStatus {
    Draft,
    Submitted,
    InReview,
    MissingDocuments,
    /// Payment failed; the user must pay again before work continues.
    PaymentRequired,
    Completed,
    Rejected,
}

impl ServiceRequestStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceRequestStatus::Draft => "draft",
            ServiceRequestStatus::Submitted => "submitted",
            ServiceRequestStatus::InReview => "in_review",
            ServiceRequestStatus::MissingDocuments => "missing_documents",
            ServiceRequestStatus::PaymentRequired => "payment_required",
            ServiceRequestStatus::Completed => "completed",
            ServiceRequestStatus::Rejected => "rejected",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "draft" => Some(ServiceRequestStatus::Draft),
            "submitted" => Some(ServiceRequestStatus::Submitted),
            "in_review" => Some(ServiceRequestStatus::InReview),
            "missing_documents" => Some(ServiceRequestStatus::MissingDocuments),
            "payment_required" => Some(ServiceRequestStatus::PaymentRequired),
            "completed" => Some(ServiceRequestStatus::Completed),
            "rejected" => Some(ServiceRequestStatus::Rejected),
            _ => None,
        }
    }

    /// Statuses from which a request is waiting on (or affected by) payment.
    pub fn is_open(&self) -> bool {
        matches!(
            self,
            ServiceRequestStatus::Submitted
                | ServiceRequestStatus::InReview
                | ServiceRequestStatus::MissingDocuments
                | ServiceRequestStatus::PaymentRequired
        )
    }
}

impl std::fmt::Display for ServiceRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Terminal result of a payment attempt, as reported to the workflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentOutcome {
    Completed,
    Failed,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServiceRequest {
    pub id: ServiceRequestId,
    pub user_id: UserId,
    pub status: ServiceRequestStatus,
    pub payment_id: Option<PaymentId>,
    pub requires_payment: bool,
    pub updated_at: Timestamp,
}

impl ServiceRequest {
    /// Whether the request may be marked completed given its payment state.
    pub fn may_complete(&self, payment_completed: bool) -> bool {
        !self.requires_payment || payment_completed
    }

    /// Default workflow reaction to a resolved payment.
    ///
    /// Completed payments release a request waiting at `submitted` or
    /// `payment_required` into review; failed payments send open requests
    /// back to `payment_required`. Returns the new status if it changed.
    pub fn apply_payment_outcome(
        &mut self,
        outcome: PaymentOutcome,
        now: Timestamp,
    ) -> Option<ServiceRequestStatus> {
        use ServiceRequestStatus::*;
        let next = match (outcome, self.status) {
            (PaymentOutcome::Completed, Submitted | PaymentRequired) => InReview,
            (PaymentOutcome::Failed, Submitted | InReview | MissingDocuments) => PaymentRequired,
            _ => return None,
        };
        self.status = next;
        self.updated_at = now;
        Some(next)
    }
}
