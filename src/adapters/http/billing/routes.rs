//! Axum router configuration for webhook and support endpoints.

use axum::{
    routing::{get, post},
    Router,
};

use super::handlers::{
    handle_gateway_webhook, health, list_failed_notifications, list_orphans, manual_refund,
    regenerate_invoice, replay_event, resend_notification, BillingAppState,
};

/// Gateway webhooks. No user authentication; verified by signature.
///
/// - `POST /:gateway`
pub fn webhook_routes() -> Router<BillingAppState> {
    Router::new().route("/:gateway", post(handle_gateway_webhook))
}

/// Support operations. Mounted behind the host's RBAC layer.
///
/// - `GET /orphans`
/// - `POST /events/:event_id/replay`
/// - `GET /notifications/failed`
/// - `POST /notifications/:id/resend`
/// - `POST /payments/:id/refund`
/// - `POST /payments/:id/invoice`
pub fn support_routes() -> Router<BillingAppState> {
    Router::new()
        .route("/orphans", get(list_orphans))
        .route("/events/:event_id/replay", post(replay_event))
        .route("/notifications/failed", get(list_failed_notifications))
        .route("/notifications/:id/resend", post(resend_notification))
        .route("/payments/:id/refund", post(manual_refund))
        .route("/payments/:id/invoice", post(regenerate_invoice))
}

/// Complete billing router: `/webhooks`, `/api/support`, and `/health`.
pub fn billing_router() -> Router<BillingAppState> {
    Router::new()
        .route("/health", get(health))
        .nest("/webhooks", webhook_routes())
        .nest("/api/support", support_routes())
}
