//! `payment_intent.succeeded` / `payment_intent.payment_failed`

use async_trait::async_trait;

use crate::domain::billing::{
    metadata_keys, GatewayEvent, GatewayEventType, NotificationTemplate, PaymentIntent,
    ReconciliationError,
};
use crate::ports::PaymentLookup;

use super::super::handler::{correlation, EventHandler, HandlerContext, HandlerOutcome};
use super::{completion_effects, decline, find_first, payment_notice, settle, PaymentFacts};

pub struct PaymentIntentHandler;

#[async_trait]
impl EventHandler for PaymentIntentHandler {
    fn name(&self) -> &'static str {
        "payment_intent"
    }

    async fn handle(
        &self,
        event: &GatewayEvent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, ReconciliationError> {
        let intent: PaymentIntent = event.object()?;
        let key = correlation::payment(&intent.id);

        let mut lookups = Vec::new();
        if let Some(id) = intent.payment_id()? {
            lookups.push(PaymentLookup::Id(id));
        }
        lookups.push(PaymentLookup::GatewayReference(&intent.id));
        lookups.push(PaymentLookup::Metadata {
            key: metadata_keys::PAYMENT_INTENT_ID,
            value: &intent.id,
        });
        let existing = find_first(ctx, &lookups).await?;

        // Invoice-backed intents are owned by the invoice handler.
        let user_id = match (&existing, intent.user_id()?) {
            (Some(payment), _) => payment.user_id,
            (None, Some(user_id)) if intent.invoice.is_none() => user_id,
            _ => {
                tracing::warn!(
                    reconciliation = "orphan",
                    event_id = %event.id,
                    payment_intent = %intent.id,
                    "No payment matches payment intent"
                );
                return Ok(HandlerOutcome::orphaned(
                    key,
                    format!("no payment for intent {}", intent.id),
                ));
            }
        };

        let facts = PaymentFacts {
            user_id,
            amount: intent.amount()?,
            reference: &intent.id,
            subscription_id: None,
            service_request_id: intent.service_request_id()?,
            metadata: vec![(metadata_keys::PAYMENT_INTENT_ID, intent.id.clone())],
        };

        if event.kind() == GatewayEventType::PaymentSucceeded {
            let settlement = settle(ctx, existing, &facts).await?;
            let mut outcome = HandlerOutcome::applied(format!(
                "intent {} completed payment {}",
                intent.id, settlement.payment.id
            ))
            .unlocking(key);
            if settlement.applied {
                outcome = outcome.with_effects(completion_effects(&settlement.payment));
            }
            Ok(outcome)
        } else {
            let settlement = decline(ctx, existing, &facts, intent.failure_reason()).await?;
            let mut outcome = HandlerOutcome::applied(format!(
                "intent {} failed payment {}",
                intent.id, settlement.payment.id
            ));
            if settlement.applied {
                outcome = outcome.with_effect(payment_notice(
                    NotificationTemplate::PaymentFailed,
                    &settlement.payment,
                ));
            }
            Ok(outcome)
        }
    }
}
