//! `invoice.paid` / `invoice.payment_failed`
//!
//! Subscription invoices either activate a pending subscription (first
//! period) or renew an active one. Each invoice settles at most one payment,
//! found again by its invoice id on replay.

use async_trait::async_trait;

use crate::domain::billing::{
    metadata_keys, GatewayEvent, GatewayEventType, Invoice, NotificationTemplate, PaymentStatus,
    ReconciliationError, SubscriptionStatus,
};
use crate::ports::PaymentLookup;

use super::super::handler::{correlation, EventHandler, HandlerContext, HandlerOutcome};
use super::{
    activate, completion_effects, decline, find_first, initial_period_payment, payment_notice,
    settle, subscription_notice, PaymentFacts,
};

/// Gateway billing reason of a subscription's first invoice.
const FIRST_INVOICE: &str = "subscription_create";

pub struct InvoiceHandler;

#[async_trait]
impl EventHandler for InvoiceHandler {
    fn name(&self) -> &'static str {
        "invoice"
    }

    async fn handle(
        &self,
        event: &GatewayEvent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, ReconciliationError> {
        let invoice: Invoice = event.object()?;
        let Some(gateway_id) = invoice.subscription.as_deref() else {
            return Ok(HandlerOutcome::ignored(format!(
                "invoice {} is not tied to a subscription",
                invoice.id
            )));
        };
        let key = correlation::subscription(gateway_id);

        let Some(mut sub) = ctx.tx.find_subscription_by_gateway_id(gateway_id).await? else {
            tracing::warn!(
                reconciliation = "orphan",
                event_id = %event.id,
                gateway_subscription_id = gateway_id,
                "Invoice for unknown subscription"
            );
            return Ok(HandlerOutcome::orphaned(
                key,
                format!("no local subscription for {}", gateway_id),
            ));
        };

        let first_period = invoice.billing_reason.as_deref() == Some(FIRST_INVOICE)
            || sub.status == SubscriptionStatus::Pending;

        let mut lookups = vec![PaymentLookup::Metadata {
            key: metadata_keys::INVOICE_ID,
            value: &invoice.id,
        }];
        if let Some(intent) = invoice.payment_intent.as_deref() {
            lookups.push(PaymentLookup::GatewayReference(intent));
        }
        let mut existing = find_first(ctx, &lookups).await?;
        if existing.is_none() && first_period {
            existing = initial_period_payment(ctx, &sub, metadata_keys::INVOICE_ID).await?;
        }

        let mut metadata = vec![(metadata_keys::INVOICE_ID, invoice.id.clone())];
        if let Some(intent) = &invoice.payment_intent {
            metadata.push((metadata_keys::PAYMENT_INTENT_ID, intent.clone()));
        }
        if first_period {
            metadata.push((metadata_keys::INITIAL_PERIOD, "true".to_string()));
        }
        let reference = invoice.gateway_reference();

        if event.kind() == GatewayEventType::InvoicePaymentFailed {
            let facts = PaymentFacts {
                user_id: sub.user_id,
                amount: invoice.due_amount()?,
                reference,
                subscription_id: Some(sub.id),
                service_request_id: None,
                metadata,
            };
            let settlement = decline(ctx, existing, &facts, Some("invoice_payment_failed")).await?;
            let mut outcome = HandlerOutcome::applied(format!(
                "invoice {} failed for subscription {}",
                invoice.id, sub.id
            ));
            if settlement.applied {
                outcome = outcome.with_effect(payment_notice(
                    NotificationTemplate::PaymentFailed,
                    &settlement.payment,
                ));
            }
            return Ok(outcome);
        }

        let renewal_due = !first_period
            && existing
                .as_ref()
                .map(|p| p.status != PaymentStatus::Completed)
                .unwrap_or(true);

        let mut outcome = HandlerOutcome::applied(format!(
            "invoice {} paid for subscription {}",
            invoice.id, sub.id
        ))
        .unlocking(correlation::payment(reference));

        if invoice.amount_paid > 0 {
            let facts = PaymentFacts {
                user_id: sub.user_id,
                amount: invoice.paid_amount()?,
                reference,
                subscription_id: Some(sub.id),
                service_request_id: None,
                metadata,
            };
            let settlement = settle(ctx, existing, &facts).await?;
            if settlement.applied {
                outcome = outcome.with_effects(completion_effects(&settlement.payment));
            }
        }

        match sub.status {
            SubscriptionStatus::Pending => {
                if activate(ctx, &mut sub, Some(gateway_id)).await? {
                    outcome = outcome
                        .with_effect(subscription_notice(
                            NotificationTemplate::SubscriptionActivated,
                            &sub,
                        ))
                        .unlocking(key);
                }
            }
            SubscriptionStatus::Active if renewal_due => {
                sub.renew(ctx.now)?;
                ctx.tx.update_subscription(&sub).await?;
                tracing::info!(
                    subscription_id = %sub.id,
                    end_date = ?sub.end_date,
                    "Subscription renewed"
                );
                outcome = outcome.with_effect(subscription_notice(
                    NotificationTemplate::SubscriptionRenewed,
                    &sub,
                ));
            }
            SubscriptionStatus::Active => {}
            SubscriptionStatus::Cancelled | SubscriptionStatus::Expired => {
                tracing::error!(
                    alert = true,
                    event_id = %event.id,
                    subscription_id = %sub.id,
                    status = %sub.status,
                    "Invoice paid for inactive subscription; payment recorded for review"
                );
            }
        }
        Ok(outcome)
    }
}
