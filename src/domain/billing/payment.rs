//! Payment aggregate and its lifecycle.
//!
//! ```text
//! pending ──► completed ──► refunded
//!    │
//!    └──────► failed
//! ```
//!
//! `failed` is terminal for an attempt: a retry is a new Payment record.
//! Every transition method reports whether it changed anything so handlers
//! can be replayed without double-applying.

use std::collections::BTreeMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::foundation::{
    PaymentId, ServiceRequestId, StateMachine, SubscriptionId, Timestamp, UserId,
};

use super::money::Money;
use super::service_request::PaymentOutcome;

/// Well-known metadata keys used for correlation and audit.
pub mod metadata_keys {
    pub const CHECKOUT_SESSION_ID: &str = "checkout_session_id";
    pub const INVOICE_ID: &str = "invoice_id";
    pub const PAYMENT_INTENT_ID: &str = "payment_intent_id";
    pub const FAILURE_REASON: &str = "failure_reason";
    pub const REFUND_AMOUNT: &str = "refund_amount";
    pub const REFUND_REASON: &str = "refund_reason";
    pub const REFUND_REFERENCE: &str = "refund_reference";
    pub const REFUNDED_AT: &str = "refunded_at";
    pub const REFUNDED_BY: &str = "refunded_by";
    pub const INITIAL_PERIOD: &str = "initial_period";
}

/// Payment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Pending,
    Completed,
    Failed,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Completed => "completed",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(PaymentStatus::Pending),
            "completed" => Some(PaymentStatus::Completed),
            "failed" => Some(PaymentStatus::Failed),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMachine for PaymentStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, target),
            (Pending, Completed) | (Pending, Failed) | (Completed, Refunded)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use PaymentStatus::*;
        match self {
            Pending => vec![Completed, Failed],
            Completed => vec![Refunded],
            Failed | Refunded => vec![],
        }
    }
}

/// Whether a transition call changed the aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransitionOutcome {
    Applied,
    /// Already in the target state; nothing was written.
    Unchanged,
}

impl TransitionOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, TransitionOutcome::Applied)
    }
}

/// Errors raised by payment transitions.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PaymentError {
    #[error("Payment {payment_id} cannot go from {from} to {to}")]
    InvalidTransition {
        payment_id: PaymentId,
        from: PaymentStatus,
        to: PaymentStatus,
    },

    #[error("Refund of {requested} exceeds original amount {original}")]
    RefundExceedsAmount { requested: Decimal, original: Decimal },

    #[error("Refund currency {requested} does not match payment currency {original}")]
    CurrencyMismatch { requested: String, original: String },
}

/// A single payment attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Payment {
    pub id: PaymentId,
    pub user_id: UserId,
    pub subscription_id: Option<SubscriptionId>,
    pub service_request_id: Option<ServiceRequestId>,
    pub amount: Money,
    pub status: PaymentStatus,
    /// Gateway charge / payment-intent reference, set on completion.
    pub gateway_reference: Option<String>,
    pub paid_at: Option<Timestamp>,
    pub metadata: BTreeMap<String, String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl Payment {
    /// A new attempt awaiting the gateway's verdict.
    pub fn pending(user_id: UserId, amount: Money, now: Timestamp) -> Self {
        Self {
            id: PaymentId::new(),
            user_id,
            subscription_id: None,
            service_request_id: None,
            amount,
            status: PaymentStatus::Pending,
            gateway_reference: None,
            paid_at: None,
            metadata: BTreeMap::new(),
            created_at: now,
            updated_at: now,
        }
    }

    /// A payment the gateway reports as settled with no local pending attempt.
    pub fn settled(
        user_id: UserId,
        amount: Money,
        gateway_reference: impl Into<String>,
        now: Timestamp,
    ) -> Self {
        let mut payment = Self::pending(user_id, amount, now);
        payment.status = PaymentStatus::Completed;
        payment.gateway_reference = Some(gateway_reference.into());
        payment.paid_at = Some(now);
        payment
    }

    /// A failed attempt reported by the gateway with no local pending record.
    pub fn declined(user_id: UserId, amount: Money, reason: Option<&str>, now: Timestamp) -> Self {
        let mut payment = Self::pending(user_id, amount, now);
        payment.status = PaymentStatus::Failed;
        if let Some(reason) = reason {
            payment
                .metadata
                .insert(metadata_keys::FAILURE_REASON.to_string(), reason.to_string());
        }
        payment
    }

    pub fn with_subscription(mut self, subscription_id: SubscriptionId) -> Self {
        self.subscription_id = Some(subscription_id);
        self
    }

    pub fn with_service_request(mut self, service_request_id: ServiceRequestId) -> Self {
        self.service_request_id = Some(service_request_id);
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Terminal outcome for the service-request workflow, if resolved.
    pub fn resolution(&self) -> Option<PaymentOutcome> {
        match self.status {
            PaymentStatus::Completed => Some(PaymentOutcome::Completed),
            PaymentStatus::Failed => Some(PaymentOutcome::Failed),
            PaymentStatus::Pending | PaymentStatus::Refunded => None,
        }
    }

    /// Marks the payment as settled by the gateway.
    ///
    /// Idempotent when already completed; the original reference is kept.
    pub fn mark_completed(
        &mut self,
        gateway_reference: impl Into<String>,
        now: Timestamp,
    ) -> Result<TransitionOutcome, PaymentError> {
        if self.status == PaymentStatus::Completed {
            return Ok(TransitionOutcome::Unchanged);
        }
        self.transition(PaymentStatus::Completed)?;
        self.gateway_reference = Some(gateway_reference.into());
        self.paid_at = Some(now);
        self.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    /// Marks this attempt as failed. Only a pending attempt can fail.
    pub fn mark_failed(
        &mut self,
        reason: Option<&str>,
        now: Timestamp,
    ) -> Result<TransitionOutcome, PaymentError> {
        if self.status == PaymentStatus::Failed {
            return Ok(TransitionOutcome::Unchanged);
        }
        self.transition(PaymentStatus::Failed)?;
        if let Some(reason) = reason {
            self.metadata
                .insert(metadata_keys::FAILURE_REASON.to_string(), reason.to_string());
        }
        self.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    /// Refunds a completed payment, fully or partially.
    ///
    /// `amount` is the cumulative refunded total, as the gateway reports it.
    /// On an already refunded payment a larger total replaces the recorded
    /// one; an equal or smaller total changes nothing.
    pub fn refund(
        &mut self,
        amount: &Money,
        reason: &str,
        reference: Option<&str>,
        now: Timestamp,
    ) -> Result<TransitionOutcome, PaymentError> {
        if amount.currency() != self.amount.currency() {
            return Err(PaymentError::CurrencyMismatch {
                requested: amount.currency().to_string(),
                original: self.amount.currency().to_string(),
            });
        }
        if amount.amount() > self.amount.amount() {
            return Err(PaymentError::RefundExceedsAmount {
                requested: amount.amount(),
                original: self.amount.amount(),
            });
        }
        if self.status == PaymentStatus::Refunded {
            if amount.amount() <= self.refunded_amount().unwrap_or(Decimal::ZERO) {
                return Ok(TransitionOutcome::Unchanged);
            }
        } else {
            self.transition(PaymentStatus::Refunded)?;
        }

        self.metadata.insert(
            metadata_keys::REFUND_AMOUNT.to_string(),
            amount.amount().to_string(),
        );
        self.metadata
            .insert(metadata_keys::REFUND_REASON.to_string(), reason.to_string());
        self.metadata.insert(
            metadata_keys::REFUNDED_AT.to_string(),
            now.as_datetime().to_rfc3339(),
        );
        if let Some(reference) = reference {
            self.metadata
                .insert(metadata_keys::REFUND_REFERENCE.to_string(), reference.to_string());
        }
        self.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    /// Refunded total recorded so far, if any.
    pub fn refunded_amount(&self) -> Option<Decimal> {
        self.metadata_value(metadata_keys::REFUND_AMOUNT)?.parse().ok()
    }

    fn transition(&mut self, target: PaymentStatus) -> Result<(), PaymentError> {
        self.status = self
            .status
            .transition_to(target)
            .map_err(|_| PaymentError::InvalidTransition {
                payment_id: self.id,
                from: self.status,
                to: target,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::money::Currency;
    use proptest::prelude::*;
    use std::str::FromStr;

    fn eur(minor: i64) -> Money {
        Money::from_minor_units(minor, Currency::new("EUR").unwrap()).unwrap()
    }

    fn pending() -> Payment {
        Payment::pending(UserId::new(), eur(1999), Timestamp::now())
    }

    #[test]
    fn pending_completes_and_stamps_reference() {
        let mut payment = pending();
        let outcome = payment.mark_completed("pi_123", Timestamp::now()).unwrap();

        assert_eq!(outcome, TransitionOutcome::Applied);
        assert_eq!(payment.status, PaymentStatus::Completed);
        assert_eq!(payment.gateway_reference.as_deref(), Some("pi_123"));
        assert!(payment.paid_at.is_some());
    }

    #[test]
    fn completing_twice_is_a_no_op_and_keeps_first_reference() {
        let mut payment = pending();
        payment.mark_completed("pi_first", Timestamp::now()).unwrap();
        let outcome = payment.mark_completed("pi_second", Timestamp::now()).unwrap();

        assert_eq!(outcome, TransitionOutcome::Unchanged);
        assert_eq!(payment.gateway_reference.as_deref(), Some("pi_first"));
    }

    #[test]
    fn refunded_payment_cannot_complete() {
        let mut payment = pending();
        payment.mark_completed("pi_1", Timestamp::now()).unwrap();
        payment.refund(&eur(1999), "customer request", None, Timestamp::now()).unwrap();

        let result = payment.mark_completed("pi_1", Timestamp::now());
        assert!(matches!(result, Err(PaymentError::InvalidTransition { .. })));
    }

    #[test]
    fn completed_payment_cannot_fail() {
        let mut payment = pending();
        payment.mark_completed("pi_1", Timestamp::now()).unwrap();

        let result = payment.mark_failed(Some("card_declined"), Timestamp::now());
        assert!(matches!(
            result,
            Err(PaymentError::InvalidTransition {
                from: PaymentStatus::Completed,
                to: PaymentStatus::Failed,
                ..
            })
        ));
    }

    #[test]
    fn failed_attempt_is_never_resurrected() {
        let mut payment = pending();
        payment.mark_failed(Some("card_declined"), Timestamp::now()).unwrap();

        assert!(payment.mark_completed("pi_late", Timestamp::now()).is_err());
        assert_eq!(payment.metadata_value(metadata_keys::FAILURE_REASON), Some("card_declined"));
    }

    #[test]
    fn failing_twice_is_a_no_op() {
        let mut payment = pending();
        payment.mark_failed(None, Timestamp::now()).unwrap();
        assert_eq!(
            payment.mark_failed(None, Timestamp::now()).unwrap(),
            TransitionOutcome::Unchanged
        );
    }

    #[test]
    fn pending_cannot_be_refunded_directly() {
        let mut payment = pending();
        let result = payment.refund(&eur(100), "oops", None, Timestamp::now());
        assert!(matches!(result, Err(PaymentError::InvalidTransition { .. })));
        assert_eq!(payment.status, PaymentStatus::Pending);
    }

    #[test]
    fn refund_cannot_exceed_original() {
        let mut payment = pending();
        payment.mark_completed("pi_1", Timestamp::now()).unwrap();

        let result = payment.refund(&eur(2000), "too much", None, Timestamp::now());
        assert!(matches!(result, Err(PaymentError::RefundExceedsAmount { .. })));
        assert_eq!(payment.status, PaymentStatus::Completed);
    }

    #[test]
    fn partial_refund_is_recorded_for_audit() {
        let mut payment = pending();
        payment.mark_completed("pi_1", Timestamp::now()).unwrap();
        payment
            .refund(&eur(500), "partial goodwill", Some("re_1"), Timestamp::now())
            .unwrap();

        assert_eq!(payment.status, PaymentStatus::Refunded);
        assert_eq!(
            Decimal::from_str(payment.metadata_value(metadata_keys::REFUND_AMOUNT).unwrap())
                .unwrap(),
            Decimal::from_str("5.00").unwrap()
        );
        assert_eq!(payment.metadata_value(metadata_keys::REFUND_REFERENCE), Some("re_1"));
    }

    #[test]
    fn growing_cumulative_refund_updates_recorded_total() {
        let mut payment = pending();
        payment.mark_completed("pi_1", Timestamp::now()).unwrap();
        payment.refund(&eur(500), "gateway", Some("ch_1"), Timestamp::now()).unwrap();

        let outcome = payment
            .refund(&eur(1200), "gateway", Some("ch_1"), Timestamp::now())
            .unwrap();
        assert_eq!(outcome, TransitionOutcome::Applied);
        assert_eq!(payment.refunded_amount(), Some(Decimal::from_str("12.00").unwrap()));

        // Redelivered or stale totals leave the record alone.
        for stale in [1200, 500] {
            assert_eq!(
                payment.refund(&eur(stale), "gateway", None, Timestamp::now()).unwrap(),
                TransitionOutcome::Unchanged
            );
        }
        assert_eq!(payment.refunded_amount(), Some(Decimal::from_str("12.00").unwrap()));
        assert!(matches!(
            payment.refund(&eur(2500), "gateway", None, Timestamp::now()),
            Err(PaymentError::RefundExceedsAmount { .. })
        ));
    }

    #[test]
    fn refund_in_other_currency_is_rejected() {
        let mut payment = pending();
        payment.mark_completed("pi_1", Timestamp::now()).unwrap();
        let usd = Money::from_minor_units(100, Currency::new("USD").unwrap()).unwrap();

        assert!(matches!(
            payment.refund(&usd, "wrong", None, Timestamp::now()),
            Err(PaymentError::CurrencyMismatch { .. })
        ));
    }

    #[test]
    fn resolution_maps_terminal_states() {
        let mut payment = pending();
        assert_eq!(payment.resolution(), None);
        payment.mark_failed(None, Timestamp::now()).unwrap();
        assert_eq!(payment.resolution(), Some(PaymentOutcome::Failed));
    }

    #[derive(Debug, Clone, Copy)]
    enum Op {
        Complete,
        Fail,
        Refund,
    }

    fn op() -> impl Strategy<Value = Op> {
        prop_oneof![Just(Op::Complete), Just(Op::Fail), Just(Op::Refund)]
    }

    proptest! {
        /// Whatever sequence of events arrives, a payment never moves
        /// completed → failed and never reaches refunded without completing.
        #[test]
        fn lifecycle_is_monotonic(ops in proptest::collection::vec(op(), 1..12)) {
            let mut payment = pending();
            let mut was_completed = false;
            for op in ops {
                let before = payment.status;
                let _ = match op {
                    Op::Complete => payment.mark_completed("pi_x", Timestamp::now()),
                    Op::Fail => payment.mark_failed(None, Timestamp::now()),
                    Op::Refund => payment.refund(&eur(100), "r", None, Timestamp::now()),
                };
                prop_assert!(!(before == PaymentStatus::Completed && payment.status == PaymentStatus::Failed));
                if payment.status == PaymentStatus::Refunded {
                    prop_assert!(was_completed);
                }
                was_completed |= payment.status == PaymentStatus::Completed;
            }
        }
    }
}
