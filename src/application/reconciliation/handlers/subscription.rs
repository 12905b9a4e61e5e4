//! `customer.subscription.created` / `.updated` / `.deleted`
//!
//! Subscription events are keyed by the gateway subscription id. Until a
//! local subscription carries that id and is active, the event waits as an
//! orphan; the activation that links the id replays it.

use async_trait::async_trait;

use crate::domain::billing::{
    GatewayEvent, GatewayEventType, GatewaySubscription, NotificationTemplate, PaymentStatus,
    ReconciliationError, SubscriptionStatus, UserSubscription,
};
use crate::domain::foundation::PlanId;
use crate::ports::PaymentLookup;

use super::super::handler::{correlation, EventHandler, HandlerContext, HandlerOutcome};
use super::{newest_pending, subscription_notice};

/// Gateway status string for a cancelled subscription.
const GATEWAY_CANCELED: &str = "canceled";

pub struct SubscriptionLifecycleHandler;

#[async_trait]
impl EventHandler for SubscriptionLifecycleHandler {
    fn name(&self) -> &'static str {
        "subscription_lifecycle"
    }

    async fn handle(
        &self,
        event: &GatewayEvent,
        ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, ReconciliationError> {
        let remote: GatewaySubscription = event.object()?;
        let key = correlation::subscription(&remote.id);
        let local = ctx.tx.find_subscription_by_gateway_id(&remote.id).await?;

        if event.kind() == GatewayEventType::SubscriptionCreated {
            return link(ctx, event, &remote, local).await;
        }

        let Some(mut local) = local else {
            tracing::warn!(
                reconciliation = "orphan",
                event_id = %event.id,
                gateway_subscription_id = %remote.id,
                "No local subscription for gateway subscription"
            );
            return Ok(HandlerOutcome::orphaned(
                key,
                format!("no local subscription for {}", remote.id),
            ));
        };

        if local.status == SubscriptionStatus::Pending {
            tracing::warn!(
                reconciliation = "orphan",
                event_id = %event.id,
                subscription_id = %local.id,
                "Subscription event before activation"
            );
            return Ok(HandlerOutcome::orphaned(
                key,
                format!("subscription {} not active yet", local.id),
            ));
        }

        if event.kind() == GatewayEventType::SubscriptionDeleted || remote.status == GATEWAY_CANCELED
        {
            return cancel(ctx, &mut local).await;
        }
        change_plan(ctx, &remote, &mut local).await
    }
}

async fn link(
    ctx: &mut HandlerContext<'_>,
    event: &GatewayEvent,
    remote: &GatewaySubscription,
    local: Option<UserSubscription>,
) -> Result<HandlerOutcome, ReconciliationError> {
    let key = correlation::subscription(&remote.id);
    if let Some(local) = local {
        return Ok(
            HandlerOutcome::applied(format!("subscription {} already linked", local.id))
                .unlocking(key)
                .unlocking(correlation::user(local.user_id)),
        );
    }

    let pending = match remote.user_id()? {
        Some(user_id) => newest_pending(ctx, user_id).await?,
        None => None,
    };
    let Some(mut pending) = pending else {
        tracing::warn!(
            reconciliation = "orphan",
            event_id = %event.id,
            gateway_subscription_id = %remote.id,
            "No pending subscription to link"
        );
        return Ok(HandlerOutcome::orphaned(
            key,
            format!("no pending subscription for {}", remote.id),
        ));
    };

    if pending.link_gateway(&remote.id, ctx.now)?.is_applied() {
        ctx.tx.update_subscription(&pending).await?;
    }
    Ok(
        HandlerOutcome::applied(format!("linked subscription {} to {}", pending.id, remote.id))
            .unlocking(key)
            .unlocking(correlation::user(pending.user_id)),
    )
}

async fn cancel(
    ctx: &mut HandlerContext<'_>,
    local: &mut UserSubscription,
) -> Result<HandlerOutcome, ReconciliationError> {
    if !local.cancel(ctx.now)?.is_applied() {
        return Ok(HandlerOutcome::applied(format!(
            "subscription {} already cancelled",
            local.id
        )));
    }
    ctx.tx.update_subscription(local).await?;
    tracing::info!(subscription_id = %local.id, "Subscription cancelled");

    Ok(
        HandlerOutcome::applied(format!("subscription {} cancelled", local.id))
            .with_effect(subscription_notice(NotificationTemplate::SubscriptionCancelled, local)),
    )
}

async fn change_plan(
    ctx: &mut HandlerContext<'_>,
    remote: &GatewaySubscription,
    local: &mut UserSubscription,
) -> Result<HandlerOutcome, ReconciliationError> {
    let Some(plan_id) = resolve_plan(ctx, remote).await? else {
        return Ok(HandlerOutcome::applied(format!(
            "no recognizable plan on {}",
            remote.id
        )));
    };

    if !local.change_plan(plan_id, ctx.now)?.is_applied() {
        return Ok(HandlerOutcome::applied(format!(
            "subscription {} already on plan {}",
            local.id, plan_id
        )));
    }
    ctx.tx.update_subscription(local).await?;
    tracing::info!(subscription_id = %local.id, plan_id = %plan_id, "Subscription plan changed");

    // The plan change reuses the subscription's settled payment.
    match ctx
        .tx
        .find_payment(PaymentLookup::LatestForSubscription(local.id))
        .await?
    {
        Some(mut payment) if payment.status == PaymentStatus::Pending => {
            payment.mark_completed(remote.id.as_str(), ctx.now)?;
            ctx.tx.update_payment(&payment).await?;
            ctx.unblocker
                .payment_resolved(&mut *ctx.tx, &payment, ctx.now)
                .await?;
        }
        Some(_) => {}
        None => tracing::warn!(
            subscription_id = %local.id,
            "Plan change on subscription without a payment"
        ),
    }

    Ok(
        HandlerOutcome::applied(format!("subscription {} moved to plan {}", local.id, plan_id))
            .with_effect(subscription_notice(
                NotificationTemplate::SubscriptionPlanChanged,
                local,
            )),
    )
}

async fn resolve_plan(
    ctx: &mut HandlerContext<'_>,
    remote: &GatewaySubscription,
) -> Result<Option<PlanId>, ReconciliationError> {
    if let Some(plan_id) = remote.plan_id()? {
        return Ok(Some(plan_id));
    }
    match remote.price_id() {
        Some(price_id) => Ok(ctx
            .plans
            .find_plan_by_gateway_price(price_id)
            .await?
            .map(|plan| plan.id)),
        None => Ok(None),
    }
}
