//! UserSubscription aggregate.
//!
//! ```text
//! pending ──► active ──► cancelled
//!                │
//!                └─────► expired
//! ```

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::domain::foundation::{PlanId, StateMachine, SubscriptionId, Timestamp, UserId};

use super::payment::TransitionOutcome;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionStatus {
    Pending,
    Active,
    Cancelled,
    Expired,
}

impl SubscriptionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            SubscriptionStatus::Pending => "pending",
            SubscriptionStatus::Active => "active",
            SubscriptionStatus::Cancelled => "cancelled",
            SubscriptionStatus::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "pending" => Some(SubscriptionStatus::Pending),
            "active" => Some(SubscriptionStatus::Active),
            "cancelled" => Some(SubscriptionStatus::Cancelled),
            "expired" => Some(SubscriptionStatus::Expired),
            _ => None,
        }
    }
}

impl std::fmt::Display for SubscriptionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl StateMachine for SubscriptionStatus {
    fn can_transition_to(&self, target: &Self) -> bool {
        use SubscriptionStatus::*;
        matches!(
            (self, target),
            (Pending, Active) | (Active, Cancelled) | (Active, Expired)
        )
    }

    fn valid_transitions(&self) -> Vec<Self> {
        use SubscriptionStatus::*;
        match self {
            Pending => vec![Active],
            Active => vec![Cancelled, Expired],
            Cancelled | Expired => vec![],
        }
    }
}

/// How often the plan is billed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BillingCycle {
    Monthly,
    Annual,
}

impl BillingCycle {
    pub fn months(&self) -> u32 {
        match self {
            BillingCycle::Monthly => 1,
            BillingCycle::Annual => 12,
        }
    }

    /// End of one billing period starting at `start`, in calendar months.
    pub fn end_date(&self, start: Timestamp) -> Timestamp {
        start.add_months(self.months())
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            BillingCycle::Monthly => "monthly",
            BillingCycle::Annual => "annual",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "monthly" | "month" => Some(BillingCycle::Monthly),
            "annual" | "yearly" | "year" => Some(BillingCycle::Annual),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum SubscriptionError {
    #[error("Subscription {subscription_id} cannot go from {from} to {to}")]
    InvalidTransition {
        subscription_id: SubscriptionId,
        from: SubscriptionStatus,
        to: SubscriptionStatus,
    },

    #[error("Subscription {subscription_id} is {status}; plan changes need an active subscription")]
    NotActive {
        subscription_id: SubscriptionId,
        status: SubscriptionStatus,
    },

    #[error("Subscription {subscription_id} is already linked to {existing}")]
    GatewayMismatch {
        subscription_id: SubscriptionId,
        existing: String,
    },
}

/// A user's subscription to a plan.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserSubscription {
    pub id: SubscriptionId,
    pub user_id: UserId,
    pub plan_id: PlanId,
    pub status: SubscriptionStatus,
    pub billing_cycle: BillingCycle,
    pub start_date: Option<Timestamp>,
    /// `None` means non-expiring.
    pub end_date: Option<Timestamp>,
    pub gateway_subscription_id: Option<String>,
    pub created_at: Timestamp,
    pub updated_at: Timestamp,
}

impl UserSubscription {
    pub fn pending(
        user_id: UserId,
        plan_id: PlanId,
        billing_cycle: BillingCycle,
        now: Timestamp,
    ) -> Self {
        Self {
            id: SubscriptionId::new(),
            user_id,
            plan_id,
            status: SubscriptionStatus::Pending,
            billing_cycle,
            start_date: None,
            end_date: None,
            gateway_subscription_id: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == SubscriptionStatus::Active
    }

    /// Attaches the gateway's subscription id. Re-linking to the same id is a no-op.
    pub fn link_gateway(
        &mut self,
        gateway_subscription_id: &str,
        now: Timestamp,
    ) -> Result<TransitionOutcome, SubscriptionError> {
        match self.gateway_subscription_id.as_deref() {
            Some(existing) if existing == gateway_subscription_id => {
                Ok(TransitionOutcome::Unchanged)
            }
            Some(existing) => Err(SubscriptionError::GatewayMismatch {
                subscription_id: self.id,
                existing: existing.to_string(),
            }),
            None => {
                self.gateway_subscription_id = Some(gateway_subscription_id.to_string());
                self.updated_at = now;
                Ok(TransitionOutcome::Applied)
            }
        }
    }

    /// Activates a pending subscription, stamping the start and computing the
    /// end from the billing cycle. Already active is a no-op.
    pub fn activate(
        &mut self,
        gateway_subscription_id: Option<&str>,
        now: Timestamp,
    ) -> Result<TransitionOutcome, SubscriptionError> {
        if self.status == SubscriptionStatus::Active {
            return Ok(TransitionOutcome::Unchanged);
        }
        self.transition(SubscriptionStatus::Active)?;
        if let Some(gateway_id) = gateway_subscription_id {
            if self.gateway_subscription_id.is_none() {
                self.gateway_subscription_id = Some(gateway_id.to_string());
            }
        }
        self.start_date = Some(now);
        self.end_date = Some(self.billing_cycle.end_date(now));
        self.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    /// Reassigns the plan in place. `start_date` is never touched.
    pub fn change_plan(
        &mut self,
        plan_id: PlanId,
        now: Timestamp,
    ) -> Result<TransitionOutcome, SubscriptionError> {
        if self.status != SubscriptionStatus::Active {
            return Err(SubscriptionError::NotActive {
                subscription_id: self.id,
                status: self.status,
            });
        }
        if self.plan_id == plan_id {
            return Ok(TransitionOutcome::Unchanged);
        }
        self.plan_id = plan_id;
        self.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    /// Cancels an active subscription, ending it now. Idempotent.
    pub fn cancel(&mut self, now: Timestamp) -> Result<TransitionOutcome, SubscriptionError> {
        if self.status == SubscriptionStatus::Cancelled {
            return Ok(TransitionOutcome::Unchanged);
        }
        self.transition(SubscriptionStatus::Cancelled)?;
        self.end_date = Some(now);
        self.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    /// Expires an active subscription whose period has ended. Idempotent.
    pub fn expire(&mut self, now: Timestamp) -> Result<TransitionOutcome, SubscriptionError> {
        if self.status == SubscriptionStatus::Expired {
            return Ok(TransitionOutcome::Unchanged);
        }
        self.transition(SubscriptionStatus::Expired)?;
        self.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    /// Extends an active subscription by one billing cycle.
    ///
    /// The new period starts from the current end, or from `now` if the
    /// subscription already lapsed.
    pub fn renew(&mut self, now: Timestamp) -> Result<TransitionOutcome, SubscriptionError> {
        if self.status != SubscriptionStatus::Active {
            return Err(SubscriptionError::NotActive {
                subscription_id: self.id,
                status: self.status,
            });
        }
        let from = match self.end_date {
            Some(end) if end > now => end,
            _ => now,
        };
        self.end_date = Some(self.billing_cycle.end_date(from));
        self.updated_at = now;
        Ok(TransitionOutcome::Applied)
    }

    /// True when the subscription is active but its period is over.
    pub fn is_due_for_expiry(&self, now: Timestamp) -> bool {
        self.is_active() && self.end_date.map(|end| end <= now).unwrap_or(false)
    }

    fn transition(&mut self, target: SubscriptionStatus) -> Result<(), SubscriptionError> {
        self.status = self
            .status
            .transition_to(target)
            .map_err(|_| SubscriptionError::InvalidTransition {
                subscription_id: self.id,
                from: self.status,
                to: target,
            })?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{DateTime, Utc};

    fn at(rfc3339: &str) -> Timestamp {
        Timestamp::from_datetime(
            DateTime::parse_from_rfc3339(rfc3339)
                .unwrap()
                .with_timezone(&Utc),
        )
    }

    fn pending(cycle: BillingCycle) -> UserSubscription {
        UserSubscription::pending(UserId::new(), PlanId::new(), cycle, at("2024-01-01T00:00:00Z"))
    }

    // ══════════════════════════════════════════════════════════════
    // Activation
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn monthly_activation_ends_one_month_later() {
        let mut sub = pending(BillingCycle::Monthly);
        let now = at("2024-03-10T12:00:00Z");

        assert!(sub.activate(Some("sub_1"), now).unwrap().is_applied());
        assert_eq!(sub.status, SubscriptionStatus::Active);
        assert_eq!(sub.start_date, Some(now));
        assert_eq!(sub.end_date, Some(at("2024-04-10T12:00:00Z")));
        assert_eq!(sub.gateway_subscription_id.as_deref(), Some("sub_1"));
    }

    #[test]
    fn annual_activation_ends_one_year_later() {
        let mut sub = pending(BillingCycle::Annual);
        sub.activate(None, at("2024-02-29T00:00:00Z")).unwrap();
        assert_eq!(sub.end_date, Some(at("2025-02-28T00:00:00Z")));
    }

    #[test]
    fn activation_is_idempotent_and_keeps_dates() {
        let mut sub = pending(BillingCycle::Monthly);
        sub.activate(None, at("2024-03-10T00:00:00Z")).unwrap();
        let before = sub.clone();

        let outcome = sub.activate(None, at("2024-03-11T00:00:00Z")).unwrap();
        assert_eq!(outcome, TransitionOutcome::Unchanged);
        assert_eq!(sub, before);
    }

    #[test]
    fn cancelled_subscription_cannot_reactivate() {
        let mut sub = pending(BillingCycle::Monthly);
        sub.activate(None, Timestamp::now()).unwrap();
        sub.cancel(Timestamp::now()).unwrap();

        assert!(matches!(
            sub.activate(None, Timestamp::now()),
            Err(SubscriptionError::InvalidTransition { .. })
        ));
    }

    // ══════════════════════════════════════════════════════════════
    // Plan changes, cancellation, renewal
    // ══════════════════════════════════════════════════════════════

    #[test]
    fn plan_change_keeps_start_date() {
        let mut sub = pending(BillingCycle::Monthly);
        let start = at("2024-03-10T00:00:00Z");
        sub.activate(None, start).unwrap();
        let new_plan = PlanId::new();

        sub.change_plan(new_plan, at("2024-03-20T00:00:00Z")).unwrap();
        assert_eq!(sub.plan_id, new_plan);
        assert_eq!(sub.start_date, Some(start));
    }

    #[test]
    fn plan_change_on_pending_is_rejected() {
        let mut sub = pending(BillingCycle::Monthly);
        assert!(matches!(
            sub.change_plan(PlanId::new(), Timestamp::now()),
            Err(SubscriptionError::NotActive { .. })
        ));
    }

    #[test]
    fn cancel_sets_end_date_and_is_idempotent() {
        let mut sub = pending(BillingCycle::Monthly);
        sub.activate(None, at("2024-03-10T00:00:00Z")).unwrap();
        let cancelled_at = at("2024-03-15T00:00:00Z");

        sub.cancel(cancelled_at).unwrap();
        assert_eq!(sub.end_date, Some(cancelled_at));
        assert_eq!(
            sub.cancel(at("2024-03-16T00:00:00Z")).unwrap(),
            TransitionOutcome::Unchanged
        );
        assert_eq!(sub.end_date, Some(cancelled_at));
    }

    #[test]
    fn pending_cannot_be_cancelled() {
        let mut sub = pending(BillingCycle::Monthly);
        assert!(sub.cancel(Timestamp::now()).is_err());
    }

    #[test]
    fn renewal_extends_from_current_end() {
        let mut sub = pending(BillingCycle::Monthly);
        sub.activate(None, at("2024-03-10T00:00:00Z")).unwrap();

        sub.renew(at("2024-04-09T00:00:00Z")).unwrap();
        assert_eq!(sub.end_date, Some(at("2024-05-10T00:00:00Z")));
    }

    #[test]
    fn lapsed_renewal_restarts_from_now() {
        let mut sub = pending(BillingCycle::Monthly);
        sub.activate(None, at("2024-03-10T00:00:00Z")).unwrap();

        sub.renew(at("2024-06-01T00:00:00Z")).unwrap();
        assert_eq!(sub.end_date, Some(at("2024-07-01T00:00:00Z")));
    }

    #[test]
    fn expiry_detection() {
        let mut sub = pending(BillingCycle::Monthly);
        sub.activate(None, at("2024-03-10T00:00:00Z")).unwrap();

        assert!(!sub.is_due_for_expiry(at("2024-04-01T00:00:00Z")));
        assert!(sub.is_due_for_expiry(at("2024-04-10T00:00:00Z")));
        sub.expire(at("2024-04-10T00:00:00Z")).unwrap();
        assert!(!sub.is_due_for_expiry(at("2024-05-10T00:00:00Z")));
    }

    #[test]
    fn linking_to_a_different_gateway_id_is_rejected() {
        let mut sub = pending(BillingCycle::Monthly);
        sub.link_gateway("sub_a", Timestamp::now()).unwrap();

        assert_eq!(
            sub.link_gateway("sub_a", Timestamp::now()).unwrap(),
            TransitionOutcome::Unchanged
        );
        assert!(matches!(
            sub.link_gateway("sub_b", Timestamp::now()),
            Err(SubscriptionError::GatewayMismatch { .. })
        ));
    }
}
