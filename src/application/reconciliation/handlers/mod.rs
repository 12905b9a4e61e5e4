//! Per-event-type handlers and the payment/subscription steps they share.

mod checkout;
mod invoice;
mod payment_intent;
mod refund;
mod subscription;

pub use checkout::CheckoutCompletedHandler;
pub use invoice::InvoiceHandler;
pub use payment_intent::PaymentIntentHandler;
pub use refund::RefundHandler;
pub use subscription::SubscriptionLifecycleHandler;

use crate::domain::billing::{
    metadata_keys, Money, NotificationRequest, NotificationTemplate, Payment, PaymentStatus,
    ReconciliationError, SideEffect, SubscriptionStatus, UserSubscription,
};
use crate::domain::foundation::{ServiceRequestId, SubscriptionId, UserId};
use crate::ports::PaymentLookup;

use super::handler::HandlerContext;

/// Returns the first payment matched by any lookup, in order.
pub(crate) async fn find_first(
    ctx: &mut HandlerContext<'_>,
    lookups: &[PaymentLookup<'_>],
) -> Result<Option<Payment>, ReconciliationError> {
    for lookup in lookups {
        if let Some(payment) = ctx.tx.find_payment(lookup.clone()).await? {
            tracing::debug!(payment_id = %payment.id, lookup = %lookup, "Matched payment");
            return Ok(Some(payment));
        }
    }
    Ok(None)
}

/// The first-period payment recorded by the other half of a subscription
/// checkout (the pending attempt, or the payment the checkout/invoice
/// already settled), if `recorded_by` has not claimed it yet.
pub(crate) async fn initial_period_payment(
    ctx: &mut HandlerContext<'_>,
    subscription: &UserSubscription,
    recorded_by: &str,
) -> Result<Option<Payment>, ReconciliationError> {
    let latest = ctx
        .tx
        .find_payment(PaymentLookup::LatestForSubscription(subscription.id))
        .await?;
    Ok(latest.filter(|p| {
        p.metadata_value(recorded_by).is_none()
            && (subscription.status == SubscriptionStatus::Pending
                || p.metadata_value(metadata_keys::INITIAL_PERIOD).is_some())
    }))
}

/// Fields an event knows about the payment it settles or declines.
pub(crate) struct PaymentFacts<'a> {
    pub user_id: UserId,
    pub amount: Money,
    pub reference: &'a str,
    pub subscription_id: Option<SubscriptionId>,
    pub service_request_id: Option<ServiceRequestId>,
    pub metadata: Vec<(&'static str, String)>,
}

impl PaymentFacts<'_> {
    /// Fills links and correlation ids the payment does not have yet.
    fn enrich(&self, payment: &mut Payment) -> bool {
        let mut changed = false;
        if payment.subscription_id.is_none() && self.subscription_id.is_some() {
            payment.subscription_id = self.subscription_id;
            changed = true;
        }
        if payment.service_request_id.is_none() && self.service_request_id.is_some() {
            payment.service_request_id = self.service_request_id;
            changed = true;
        }
        for (key, value) in &self.metadata {
            if !payment.metadata.contains_key(*key) {
                payment.metadata.insert((*key).to_string(), value.clone());
                changed = true;
            }
        }
        changed
    }

    /// A new attempt inheriting the links of a failed predecessor.
    fn retry_of(&self, mut payment: Payment, previous: Option<&Payment>) -> Payment {
        self.enrich(&mut payment);
        if let Some(previous) = previous {
            payment.subscription_id = payment.subscription_id.or(previous.subscription_id);
            payment.service_request_id = payment.service_request_id.or(previous.service_request_id);
        }
        payment
    }
}

pub(crate) struct Settlement {
    pub payment: Payment,
    /// The payment changed state (or was created) in this transaction.
    pub applied: bool,
}

/// Completes the matched payment, or records a new completed one.
///
/// A failed match is never resurrected: the settlement becomes a new
/// attempt. The workflow hook runs when the payment newly completes.
pub(crate) async fn settle(
    ctx: &mut HandlerContext<'_>,
    existing: Option<Payment>,
    facts: &PaymentFacts<'_>,
) -> Result<Settlement, ReconciliationError> {
    let settlement = match existing {
        Some(mut payment) if payment.status != PaymentStatus::Failed => {
            let enriched = facts.enrich(&mut payment);
            let applied = payment.mark_completed(facts.reference, ctx.now)?.is_applied();
            if applied || enriched {
                ctx.tx.update_payment(&payment).await?;
            }
            Settlement { payment, applied }
        }
        previous => {
            let fresh = Payment::settled(facts.user_id, facts.amount.clone(), facts.reference, ctx.now);
            let payment = facts.retry_of(fresh, previous.as_ref());
            if let Some(previous) = &previous {
                tracing::info!(
                    failed_payment_id = %previous.id,
                    payment_id = %payment.id,
                    "Recording settlement as a new attempt after failure"
                );
            }
            ctx.tx.insert_payment(&payment).await?;
            Settlement {
                payment,
                applied: true,
            }
        }
    };

    if settlement.applied {
        tracing::info!(
            payment_id = %settlement.payment.id,
            amount = %settlement.payment.amount,
            gateway_reference = facts.reference,
            "Payment completed"
        );
        ctx.unblocker
            .payment_resolved(&mut *ctx.tx, &settlement.payment, ctx.now)
            .await?;
    }
    Ok(settlement)
}

/// Fails the matched pending payment, or records a failed attempt.
pub(crate) async fn decline(
    ctx: &mut HandlerContext<'_>,
    existing: Option<Payment>,
    facts: &PaymentFacts<'_>,
    reason: Option<&str>,
) -> Result<Settlement, ReconciliationError> {
    let settlement = match existing {
        Some(mut payment) => {
            let enriched = facts.enrich(&mut payment);
            let applied = payment.mark_failed(reason, ctx.now)?.is_applied();
            if applied || enriched {
                ctx.tx.update_payment(&payment).await?;
            }
            Settlement { payment, applied }
        }
        None => {
            let mut payment = Payment::declined(facts.user_id, facts.amount.clone(), reason, ctx.now);
            facts.enrich(&mut payment);
            ctx.tx.insert_payment(&payment).await?;
            Settlement {
                payment,
                applied: true,
            }
        }
    };

    if settlement.applied {
        tracing::info!(
            payment_id = %settlement.payment.id,
            reason = reason.unwrap_or("unspecified"),
            "Payment failed"
        );
        ctx.unblocker
            .payment_resolved(&mut *ctx.tx, &settlement.payment, ctx.now)
            .await?;
    }
    Ok(settlement)
}

/// Pending subscriptions of a user, choosing the newest when several exist.
pub(crate) async fn newest_pending(
    ctx: &mut HandlerContext<'_>,
    user_id: UserId,
) -> Result<Option<UserSubscription>, ReconciliationError> {
    let pending = ctx.tx.find_pending_subscriptions(user_id).await?;
    if pending.len() > 1 {
        // Duplicate checkout attempts upstream; flagged, not fixed.
        tracing::warn!(
            user_id = %user_id,
            count = pending.len(),
            chosen = %pending[0].id,
            "Multiple pending subscriptions, choosing newest"
        );
    }
    Ok(pending.into_iter().next())
}

/// Activates the subscription and cancels any other active one of the user.
///
/// Returns true when the activation was applied now.
pub(crate) async fn activate(
    ctx: &mut HandlerContext<'_>,
    subscription: &mut UserSubscription,
    gateway_subscription_id: Option<&str>,
) -> Result<bool, ReconciliationError> {
    if !subscription
        .activate(gateway_subscription_id, ctx.now)?
        .is_applied()
    {
        return Ok(false);
    }
    ctx.tx.update_subscription(subscription).await?;

    for mut other in ctx.tx.find_active_subscriptions(subscription.user_id).await? {
        if other.id == subscription.id {
            continue;
        }
        other.cancel(ctx.now)?;
        ctx.tx.update_subscription(&other).await?;
        tracing::warn!(
            user_id = %subscription.user_id,
            cancelled_subscription_id = %other.id,
            subscription_id = %subscription.id,
            "Cancelled superseded active subscription"
        );
    }

    tracing::info!(
        subscription_id = %subscription.id,
        plan_id = %subscription.plan_id,
        end_date = ?subscription.end_date,
        "Subscription activated"
    );
    Ok(true)
}

pub(crate) fn payment_notice(template: NotificationTemplate, payment: &Payment) -> SideEffect {
    SideEffect::Notify(
        NotificationRequest::new(payment.user_id, template)
            .with("payment_id", payment.id)
            .with("amount", &payment.amount),
    )
}

pub(crate) fn subscription_notice(
    template: NotificationTemplate,
    subscription: &UserSubscription,
) -> SideEffect {
    let mut request = NotificationRequest::new(subscription.user_id, template)
        .with("subscription_id", subscription.id)
        .with("plan_id", subscription.plan_id);
    if let Some(end) = subscription.end_date {
        request = request.with("end_date", end.as_datetime().to_rfc3339());
    }
    SideEffect::Notify(request)
}

/// Invoice + receipt for a newly completed payment.
pub(crate) fn completion_effects(payment: &Payment) -> [SideEffect; 2] {
    [
        SideEffect::GenerateInvoice {
            payment_id: payment.id,
        },
        payment_notice(NotificationTemplate::PaymentReceived, payment),
    ]
}
