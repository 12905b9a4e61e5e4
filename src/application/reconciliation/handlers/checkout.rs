//! `checkout.session.completed`
//!
//! Settles the checkout's payment and, for subscription checkouts, activates
//! the user's pending subscription. When no pending subscription exists the
//! payment is still recorded and the event waits as an orphan on the user.

use async_trait::async_trait;

use crate::domain::billing::{
    metadata_keys, CheckoutSession, GatewayEvent, NotificationTemplate, ReconciliationError,
    SubscriptionStatus,
};
use crate::ports::PaymentLookup;

use super::super::handler::{correlation, EventHandler, HandlerContext, HandlerOutcome};
use super::{
    activate, completion_effects, find_first, initial_period_payment, newest_pending, settle,
    subscription_notice, PaymentFacts,
};

pub struct CheckoutCompletedHandler;

#[async_trait]
impl EventHandler for CheckoutCompletedHandler {
    fn name(&self) -> &'static str {
        "checkout_completed"
    }

    async fn handle(
        &self,
        event: &GatewayEvent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, ReconciliationError> {
        let session: CheckoutSession = event.object()?;
        let user_id = session.user_id()?;
        let amount = session.amount()?;
        let service_request_id = session.service_request_id()?;
        let payment_id = session.payment_id()?;
        let reference = session.gateway_reference();

        let mut subscription = None;
        if session.is_subscription() {
            if let Some(gateway_id) = session.subscription.as_deref() {
                subscription = ctx.tx.find_subscription_by_gateway_id(gateway_id).await?;
            }
            if subscription.is_none() {
                subscription = newest_pending(ctx, user_id).await?;
            }
        }
        if let Some(sub) = &subscription {
            if !matches!(sub.status, SubscriptionStatus::Pending | SubscriptionStatus::Active) {
                return Err(ReconciliationError::InvalidTransition(format!(
                    "checkout {} completed for {} subscription {}",
                    session.id, sub.status, sub.id
                )));
            }
        }

        let mut lookups = Vec::new();
        if let Some(id) = payment_id {
            lookups.push(PaymentLookup::Id(id));
        }
        lookups.push(PaymentLookup::Metadata {
            key: metadata_keys::CHECKOUT_SESSION_ID,
            value: &session.id,
        });
        if let Some(intent) = session.payment_intent.as_deref() {
            lookups.push(PaymentLookup::GatewayReference(intent));
        }
        let mut existing = find_first(ctx, &lookups).await?;
        if existing.is_none() {
            if let Some(sub) = &subscription {
                existing = initial_period_payment(ctx, sub, metadata_keys::CHECKOUT_SESSION_ID).await?;
            }
        }

        let mut metadata = vec![(metadata_keys::CHECKOUT_SESSION_ID, session.id.clone())];
        if let Some(intent) = &session.payment_intent {
            metadata.push((metadata_keys::PAYMENT_INTENT_ID, intent.clone()));
        }
        if session.is_subscription() {
            metadata.push((metadata_keys::INITIAL_PERIOD, "true".to_string()));
        }
        let facts = PaymentFacts {
            user_id,
            amount,
            reference,
            subscription_id: subscription.as_ref().map(|s| s.id),
            service_request_id,
            metadata,
        };
        let settlement = settle(ctx, existing, &facts).await?;

        let mut outcome = HandlerOutcome::applied(format!(
            "checkout {} settled payment {}",
            session.id, settlement.payment.id
        ))
        .unlocking(correlation::payment(reference));
        if settlement.applied {
            outcome = outcome.with_effects(completion_effects(&settlement.payment));
        }

        if !session.is_subscription() {
            return Ok(outcome);
        }

        let Some(mut sub) = subscription else {
            tracing::warn!(
                reconciliation = "orphan",
                event_id = %event.id,
                user_id = %user_id,
                "Subscription checkout without a pending subscription"
            );
            return Ok(outcome.waiting_on(correlation::user(user_id)));
        };

        if activate(ctx, &mut sub, session.subscription.as_deref()).await? {
            outcome = outcome.with_effect(subscription_notice(
                NotificationTemplate::SubscriptionActivated,
                &sub,
            ));
        }

        outcome.summary = format!("{}; subscription {} active", outcome.summary, sub.id);
        if let Some(gateway_id) = sub.gateway_subscription_id.as_deref() {
            outcome = outcome.unlocking(correlation::subscription(gateway_id));
        }
        Ok(outcome)
    }
}
