//! Billing domain: payments, subscriptions, the service-request view, and
//! the gateway events that drive them.

mod errors;
mod gateway_event;
mod ledger;
mod money;
mod payment;
mod service_request;
mod side_effect;
mod subscription;
mod webhook_verifier;

pub use errors::ReconciliationError;
pub use gateway_event::{
    gateway_metadata, Charge, CheckoutSession, GatewayEvent, GatewayEventData, GatewayEventType,
    GatewaySubscription, Invoice, PaymentIntent,
};
pub use ledger::{EventCompletion, EventOutcome, IdempotencyRecord, Reservation};
pub use money::{Currency, Money};
pub use payment::{metadata_keys, Payment, PaymentError, PaymentStatus, TransitionOutcome};
pub use service_request::{PaymentOutcome, ServiceRequest, ServiceRequestStatus};
pub use side_effect::{
    NotificationRecord, NotificationRequest, NotificationStatus, NotificationTemplate, SideEffect,
};
pub use subscription::{BillingCycle, SubscriptionError, SubscriptionStatus, UserSubscription};
pub use webhook_verifier::{
    SignatureError, SignatureHeader, WebhookVerifier, DEFAULT_TOLERANCE_SECS, MAX_CLOCK_SKEW_SECS,
};
