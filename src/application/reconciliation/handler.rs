//! Event handler contract shared by the router and the engine.

use async_trait::async_trait;

use crate::domain::billing::{GatewayEvent, ReconciliationError, SideEffect};
use crate::domain::foundation::Timestamp;
use crate::ports::{BillingTransaction, PlanCatalog};

use super::unblocker::ServiceRequestUnblocker;

/// Everything a handler may touch while the event's transaction is open.
pub struct HandlerContext<'a> {
    pub tx: &'a mut dyn BillingTransaction,
    pub unblocker: &'a ServiceRequestUnblocker,
    pub plans: &'a dyn PlanCatalog,
    pub now: Timestamp,
}

/// What the handler did, before the ledger marker is finalized.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OutcomeStatus {
    Applied,
    Ignored,
    /// Applied what was knowable; the rest waits on `correlation_key`.
    Orphaned { correlation_key: String },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HandlerOutcome {
    pub status: OutcomeStatus,
    pub summary: String,
    /// Scheduled only after commit.
    pub side_effects: Vec<SideEffect>,
    /// Correlation keys this event made resolvable; waiting orphans are replayed.
    pub unlocked_keys: Vec<String>,
}

impl HandlerOutcome {
    pub fn applied(summary: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Applied,
            summary: summary.into(),
            side_effects: Vec::new(),
            unlocked_keys: Vec::new(),
        }
    }

    pub fn ignored(summary: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Ignored,
            ..Self::applied(summary)
        }
    }

    pub fn orphaned(correlation_key: impl Into<String>, summary: impl Into<String>) -> Self {
        Self {
            status: OutcomeStatus::Orphaned {
                correlation_key: correlation_key.into(),
            },
            ..Self::applied(summary)
        }
    }

    pub fn with_effect(mut self, effect: SideEffect) -> Self {
        self.side_effects.push(effect);
        self
    }

    pub fn with_effects(mut self, effects: impl IntoIterator<Item = SideEffect>) -> Self {
        self.side_effects.extend(effects);
        self
    }

    pub fn unlocking(mut self, key: impl Into<String>) -> Self {
        let key = key.into();
        if !self.unlocked_keys.contains(&key) {
            self.unlocked_keys.push(key);
        }
        self
    }

    /// Turns an applied outcome into an orphan while keeping its effects.
    pub fn waiting_on(mut self, correlation_key: impl Into<String>) -> Self {
        self.status = OutcomeStatus::Orphaned {
            correlation_key: correlation_key.into(),
        };
        self
    }
}

/// Handles one family of gateway event types.
///
/// Implementations must be idempotent at the entity level: replaying an
/// event against state it already produced changes nothing.
#[async_trait]
pub trait EventHandler: Send + Sync {
    fn name(&self) -> &'static str;

    async fn handle(
        &self,
        event: &GatewayEvent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, ReconciliationError>;
}

/// Correlation keys orphans wait on.
pub mod correlation {
    use crate::domain::foundation::UserId;

    pub fn subscription(gateway_subscription_id: &str) -> String {
        format!("subscription:{}", gateway_subscription_id)
    }

    pub fn payment(gateway_reference: &str) -> String {
        format!("payment:{}", gateway_reference)
    }

    pub fn user(user_id: UserId) -> String {
        format!("user:{}", user_id)
    }
}
