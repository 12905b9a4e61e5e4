//! `charge.refunded`

use async_trait::async_trait;

use crate::domain::billing::{
    metadata_keys, Charge, GatewayEvent, NotificationTemplate, ReconciliationError,
};
use crate::ports::PaymentLookup;

use super::super::handler::{correlation, EventHandler, HandlerContext, HandlerOutcome};
use super::{find_first, payment_notice};

pub struct RefundHandler;

#[async_trait]
impl EventHandler for RefundHandler {
    fn name(&self) -> &'static str {
        "refund"
    }

    async fn handle(
        &self,
        event: &GatewayEvent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, ReconciliationError> {
        let charge: Charge = event.object()?;
        let reference = charge.payment_intent.as_deref().unwrap_or(&charge.id);

        let mut lookups = Vec::new();
        if let Some(id) = charge.payment_id()? {
            lookups.push(PaymentLookup::Id(id));
        }
        lookups.push(PaymentLookup::GatewayReference(reference));
        lookups.push(PaymentLookup::Metadata {
            key: metadata_keys::PAYMENT_INTENT_ID,
            value: reference,
        });
        if reference != charge.id {
            lookups.push(PaymentLookup::GatewayReference(&charge.id));
        }

        let Some(mut payment) = find_first(ctx, &lookups).await? else {
            tracing::warn!(
                reconciliation = "orphan",
                event_id = %event.id,
                charge_id = %charge.id,
                "Refund for unknown payment"
            );
            return Ok(HandlerOutcome::orphaned(
                correlation::payment(reference),
                format!("no payment for charge {}", charge.id),
            ));
        };

        let amount = charge.refunded_amount()?;
        if !payment
            .refund(&amount, "refunded at gateway", Some(&charge.id), ctx.now)?
            .is_applied()
        {
            return Ok(HandlerOutcome::applied(format!(
                "payment {} already refunded {}",
                payment.id, amount
            )));
        }
        ctx.tx.update_payment(&payment).await?;
        // `amount_refunded` is cumulative across partial refunds.
        tracing::info!(payment_id = %payment.id, refunded_total = %amount, "Payment refunded");

        Ok(
            HandlerOutcome::applied(format!("payment {} refunded {}", payment.id, amount))
                .with_effect(payment_notice(NotificationTemplate::PaymentRefunded, &payment)),
        )
    }
}
