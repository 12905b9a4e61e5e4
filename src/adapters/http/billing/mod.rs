//! HTTP adapter for the reconciliation engine.

mod dto;
mod handlers;
mod routes;

pub use dto::{ErrorResponse, ManualRefundRequest, WebhookAck};
pub use handlers::{ApiError, BillingAppState, ACTOR_HEADER, SIGNATURE_HEADER, SUPPORTED_GATEWAYS};
pub use routes::{billing_router, support_routes, webhook_routes};
