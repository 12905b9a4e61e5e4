//! Post-commit side effects and the notification log entry.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::domain::foundation::{NotificationId, PaymentId, Timestamp, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationTemplate {
    PaymentReceived,
    PaymentFailed,
    PaymentRefunded,
    SubscriptionActivated,
    SubscriptionRenewed,
    SubscriptionPlanChanged,
    SubscriptionCancelled,
    SubscriptionExpired,
}

impl NotificationTemplate {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationTemplate::PaymentReceived => "payment_received",
            NotificationTemplate::PaymentFailed => "payment_failed",
            NotificationTemplate::PaymentRefunded => "payment_refunded",
            NotificationTemplate::SubscriptionActivated => "subscription_activated",
            NotificationTemplate::SubscriptionRenewed => "subscription_renewed",
            NotificationTemplate::SubscriptionPlanChanged => "subscription_plan_changed",
            NotificationTemplate::SubscriptionCancelled => "subscription_cancelled",
            NotificationTemplate::SubscriptionExpired => "subscription_expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "payment_received" => Some(NotificationTemplate::PaymentReceived),
            "payment_failed" => Some(NotificationTemplate::PaymentFailed),
            "payment_refunded" => Some(NotificationTemplate::PaymentRefunded),
            "subscription_activated" => Some(NotificationTemplate::SubscriptionActivated),
            "subscription_renewed" => Some(NotificationTemplate::SubscriptionRenewed),
            "subscription_plan_changed" => Some(NotificationTemplate::SubscriptionPlanChanged),
            "subscription_cancelled" => Some(NotificationTemplate::SubscriptionCancelled),
            "subscription_expired" => Some(NotificationTemplate::SubscriptionExpired),
            _ => None,
        }
    }
}

impl std::fmt::Display for NotificationTemplate {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A notification to deliver. The id is stable across resends.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRequest {
    pub id: NotificationId,
    pub user_id: UserId,
    pub template: NotificationTemplate,
    pub context: BTreeMap<String, String>,
}

impl NotificationRequest {
    pub fn new(user_id: UserId, template: NotificationTemplate) -> Self {
        Self {
            id: NotificationId::new(),
            user_id,
            template,
            context: BTreeMap::new(),
        }
    }

    pub fn with(mut self, key: impl Into<String>, value: impl ToString) -> Self {
        self.context.insert(key.into(), value.to_string());
        self
    }
}

/// Work scheduled after a transaction commits.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SideEffect {
    /// Idempotent by payment id.
    GenerateInvoice { payment_id: PaymentId },
    Notify(NotificationRequest),
}

impl SideEffect {
    pub fn label(&self) -> &'static str {
        match self {
            SideEffect::GenerateInvoice { .. } => "generate_invoice",
            SideEffect::Notify(_) => "notify",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationStatus {
    Queued,
    Sent,
    Failed,
}

impl NotificationStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationStatus::Queued => "queued",
            NotificationStatus::Sent => "sent",
            NotificationStatus::Failed => "failed",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(NotificationStatus::Queued),
            "sent" => Some(NotificationStatus::Sent),
            "failed" => Some(NotificationStatus::Failed),
            _ => None,
        }
    }
}

/// Delivery record kept for every notification so support can resend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    pub request: NotificationRequest,
    pub status: NotificationStatus,
    pub attempts: u32,
    pub last_error: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl NotificationRecord {
    pub fn queued(request: NotificationRequest, now: Timestamp) -> Self {
        Self {
            request,
            status: NotificationStatus::Queued,
            attempts: 0,
            last_error: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn record_attempt(&mut self, result: Result<(), String>, now: Timestamp) {
        self.attempts += 1;
        match result {
            Ok(()) => {
                self.status = NotificationStatus::Sent;
                self.last_error = None;
            }
            Err(error) => {
                self.status = NotificationStatus::Failed;
                self.last_error = Some(error);
            }
        }
        self.updated_at = now;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn attempts_accumulate_and_clear_error_on_success() {
        let request = NotificationRequest::new(UserId::new(), NotificationTemplate::PaymentFailed)
            .with("amount", "19.99 EUR");
        let mut record = NotificationRecord::queued(request, Timestamp::now());

        record.record_attempt(Err("smtp timeout".into()), Timestamp::now());
        assert_eq!(record.status, NotificationStatus::Failed);
        assert_eq!(record.last_error.as_deref(), Some("smtp timeout"));

        record.record_attempt(Ok(()), Timestamp::now());
        assert_eq!(record.status, NotificationStatus::Sent);
        assert_eq!(record.attempts, 2);
        assert!(record.last_error.is_none());
    }

    #[test]
    fn template_names_are_stable() {
        for t in [
            NotificationTemplate::PaymentReceived,
            NotificationTemplate::SubscriptionPlanChanged,
            NotificationTemplate::SubscriptionExpired,
        ] {
            assert_eq!(NotificationTemplate::parse(t.as_str()), Some(t));
        }
    }
}
