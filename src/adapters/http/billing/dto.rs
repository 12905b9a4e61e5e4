//! HTTP DTOs for the webhook and support endpoints.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use crate::application::ProcessOutcome;
use crate::domain::billing::{IdempotencyRecord, NotificationRecord, Payment};

// ════════════════════════════════════════════════════════════════════════════════
// Request DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// `?limit=` for list endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct ListQuery {
    #[serde(default)]
    pub limit: Option<u32>,
}

impl ListQuery {
    pub const DEFAULT_LIMIT: u32 = 100;
    pub const MAX_LIMIT: u32 = 500;

    pub fn limit(&self) -> u32 {
        self.limit
            .unwrap_or(Self::DEFAULT_LIMIT)
            .clamp(1, Self::MAX_LIMIT)
    }
}

/// Manual refund in the payment's currency.
#[derive(Debug, Clone, Deserialize)]
pub struct ManualRefundRequest {
    pub amount: Decimal,
    pub reason: String,
}

// ════════════════════════════════════════════════════════════════════════════════
// Response DTOs
// ════════════════════════════════════════════════════════════════════════════════

/// Acknowledgement returned to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct WebhookAck {
    pub received: bool,
}

#[derive(Debug, Clone, Serialize)]
pub struct OrphanEventResponse {
    pub event_id: String,
    pub event_type: String,
    pub correlation_key: Option<String>,
    pub summary: Option<String>,
    pub reserved_at: String,
    pub processed_at: Option<String>,
}

impl From<IdempotencyRecord> for OrphanEventResponse {
    fn from(record: IdempotencyRecord) -> Self {
        Self {
            event_id: record.event_id,
            event_type: record.event_type,
            correlation_key: record.correlation_key,
            summary: record.result_summary,
            reserved_at: record.reserved_at.as_datetime().to_rfc3339(),
            processed_at: record.processed_at.map(|t| t.as_datetime().to_rfc3339()),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct ReplayResponse {
    pub event_id: String,
    pub outcome: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub summary: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub correlation_key: Option<String>,
    /// Orphans caught up as a consequence of the replay.
    pub replayed: usize,
}

impl ReplayResponse {
    pub fn new(event_id: String, outcome: ProcessOutcome) -> Self {
        let label = outcome.label();
        let (summary, correlation_key, replayed) = match outcome {
            ProcessOutcome::Processed { summary, replayed } => (Some(summary), None, replayed),
            ProcessOutcome::Ignored { summary } => (Some(summary), None, 0),
            ProcessOutcome::Orphaned {
                correlation_key,
                summary,
            } => (Some(summary), Some(correlation_key), 0),
            ProcessOutcome::Duplicate { outcome } => (Some(outcome.to_string()), None, 0),
            ProcessOutcome::Rejected(err) => (Some(err.to_string()), None, 0),
        };
        Self {
            event_id,
            outcome: label,
            summary,
            correlation_key,
            replayed,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct NotificationResponse {
    pub id: String,
    pub user_id: String,
    pub template: String,
    pub status: String,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub updated_at: String,
}

impl From<NotificationRecord> for NotificationResponse {
    fn from(record: NotificationRecord) -> Self {
        Self {
            id: record.request.id.to_string(),
            user_id: record.request.user_id.to_string(),
            template: record.request.template.to_string(),
            status: record.status.as_str().to_string(),
            attempts: record.attempts,
            last_error: record.last_error,
            updated_at: record.updated_at.as_datetime().to_rfc3339(),
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct PaymentResponse {
    pub id: String,
    pub status: String,
    pub amount: Decimal,
    pub currency: String,
    pub gateway_reference: Option<String>,
    pub metadata: std::collections::BTreeMap<String, String>,
}

impl From<Payment> for PaymentResponse {
    fn from(payment: Payment) -> Self {
        Self {
            id: payment.id.to_string(),
            status: payment.status.to_string(),
            amount: payment.amount.amount(),
            currency: payment.amount.currency().to_string(),
            gateway_reference: payment.gateway_reference,
            metadata: payment.metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct InvoiceScheduledResponse {
    pub payment_id: String,
    pub scheduled: bool,
}

/// Error body for every non-2xx response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub error_code: String,
    pub message: String,
}

impl ErrorResponse {
    pub fn new(error_code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            error_code: error_code.into(),
            message: message.into(),
        }
    }
}
