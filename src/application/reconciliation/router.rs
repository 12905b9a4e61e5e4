//! Event router - pure dispatch from event type to handler.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;

use crate::domain::billing::{GatewayEvent, GatewayEventType, ReconciliationError};

use super::handler::{EventHandler, HandlerContext, HandlerOutcome};
use super::handlers::{
    CheckoutCompletedHandler, InvoiceHandler, PaymentIntentHandler, RefundHandler,
    SubscriptionLifecycleHandler,
};

/// Acknowledges event types the engine does not act on.
pub struct NoOpHandler;

#[async_trait]
impl EventHandler for NoOpHandler {
    fn name(&self) -> &'static str {
        "noop"
    }

    async fn handle(
        &self,
        event: &GatewayEvent,
        _ctx: &mut HandlerContext<'_>,
    ) -> Result<HandlerOutcome, ReconciliationError> {
        Ok(HandlerOutcome::ignored(format!(
            "event type {} not handled",
            event.event_type
        )))
    }
}

pub struct EventRouter {
    handlers: HashMap<GatewayEventType, Arc<dyn EventHandler>>,
    fallback: Arc<dyn EventHandler>,
}

impl EventRouter {
    /// Empty router: every event goes to the `NoOpHandler`.
    pub fn new() -> Self {
        Self {
            handlers: HashMap::new(),
            fallback: Arc::new(NoOpHandler),
        }
    }

    /// Router with every handler the engine ships.
    pub fn standard() -> Self {
        let payment_intent: Arc<dyn EventHandler> = Arc::new(PaymentIntentHandler);
        let lifecycle: Arc<dyn EventHandler> = Arc::new(SubscriptionLifecycleHandler);
        let invoice: Arc<dyn EventHandler> = Arc::new(InvoiceHandler);

        Self::new()
            .register(GatewayEventType::CheckoutCompleted, Arc::new(CheckoutCompletedHandler))
            .register(GatewayEventType::PaymentSucceeded, payment_intent.clone())
            .register(GatewayEventType::PaymentFailed, payment_intent)
            .register(GatewayEventType::SubscriptionCreated, lifecycle.clone())
            .register(GatewayEventType::SubscriptionUpdated, lifecycle.clone())
            .register(GatewayEventType::SubscriptionDeleted, lifecycle)
            .register(GatewayEventType::InvoicePaid, invoice.clone())
            .register(GatewayEventType::InvoicePaymentFailed, invoice)
            .register(GatewayEventType::ChargeRefunded, Arc::new(RefundHandler))
    }

    pub fn register(mut self, event_type: GatewayEventType, handler: Arc<dyn EventHandler>) -> Self {
        self.handlers.insert(event_type, handler);
        self
    }

    pub fn route(&self, event_type: GatewayEventType) -> &dyn EventHandler {
        self.handlers
            .get(&event_type)
            .map(|h| h.as_ref())
            .unwrap_or_else(|| self.fallback.as_ref())
    }
}

impl Default for EventRouter {
    fn default() -> Self {
        Self::standard()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_types_go_to_noop() {
        let router = EventRouter::standard();
        assert_eq!(router.route(GatewayEventType::Unknown).name(), "noop");
    }

    #[test]
    fn known_types_have_handlers() {
        let router = EventRouter::standard();
        assert_eq!(router.route(GatewayEventType::CheckoutCompleted).name(), "checkout_completed");
        assert_eq!(router.route(GatewayEventType::PaymentFailed).name(), "payment_intent");
        assert_eq!(router.route(GatewayEventType::SubscriptionDeleted).name(), "subscription_lifecycle");
        assert_eq!(router.route(GatewayEventType::InvoicePaid).name(), "invoice");
        assert_eq!(router.route(GatewayEventType::ChargeRefunded).name(), "refund");
    }

    #[test]
    fn empty_router_falls_back() {
        let router = EventRouter::new();
        assert_eq!(router.route(GatewayEventType::InvoicePaid).name(), "noop");
    }
}
