//! HTTP handlers for gateway webhooks and support operations.

use std::sync::Arc;

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::{HeaderMap, StatusCode},
    response::IntoResponse,
    Json,
};
use uuid::Uuid;

use crate::application::{ManualRefundCommand, ReconciliationEngine, SupportError, SupportService};
use crate::domain::billing::ReconciliationError;
use crate::domain::foundation::{NotificationId, PaymentId};

use super::dto::{
    ErrorResponse, InvoiceScheduledResponse, ListQuery, ManualRefundRequest, NotificationResponse,
    OrphanEventResponse, PaymentResponse, ReplayResponse, WebhookAck,
};

/// Gateways with a registered verifier.
pub const SUPPORTED_GATEWAYS: &[&str] = &["stripe"];

pub const SIGNATURE_HEADER: &str = "Stripe-Signature";

/// Identity of the support agent, set by the host's RBAC layer.
pub const ACTOR_HEADER: &str = "X-Support-Actor";

#[derive(Clone)]
pub struct BillingAppState {
    pub engine: Arc<ReconciliationEngine>,
    pub support: Arc<SupportService>,
}

impl BillingAppState {
    pub fn new(engine: Arc<ReconciliationEngine>, support: Arc<SupportService>) -> Self {
        Self { engine, support }
    }
}

// ════════════════════════════════════════════════════════════════════════════════
// Webhook
// ════════════════════════════════════════════════════════════════════════════════

/// POST /webhooks/:gateway
///
/// 200 once the event is durably recorded, including permanently failed
/// events. 401 for signature problems, 503 when the transaction did not
/// commit so the gateway redelivers.
pub async fn handle_gateway_webhook(
    State(state): State<BillingAppState>,
    Path(gateway): Path<String>,
    headers: HeaderMap,
    body: Bytes,
) -> Result<impl IntoResponse, ApiError> {
    if !SUPPORTED_GATEWAYS.contains(&gateway.as_str()) {
        return Err(ApiError::UnknownGateway(gateway));
    }

    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|v| v.to_str().ok());

    match state.engine.handle_webhook(&body, signature).await {
        Ok(outcome) => {
            tracing::debug!(gateway = %gateway, outcome = outcome.label(), "Webhook acknowledged");
        }
        // Could not be recorded, but redelivery would fail the same way.
        Err(err) if err.is_acknowledged() => {
            tracing::error!(
                alert = true,
                gateway = %gateway,
                error = %err,
                "Webhook acknowledged without a ledger record"
            );
        }
        Err(err) => return Err(err.into()),
    }

    Ok(Json(WebhookAck { received: true }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Support
// ════════════════════════════════════════════════════════════════════════════════

/// GET /api/support/orphans
pub async fn list_orphans(
    State(state): State<BillingAppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let orphans = state.support.list_orphans(query.limit()).await?;
    let body: Vec<OrphanEventResponse> = orphans.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

/// POST /api/support/events/:event_id/replay
pub async fn replay_event(
    State(state): State<BillingAppState>,
    Path(event_id): Path<String>,
) -> Result<impl IntoResponse, ApiError> {
    let outcome = state.support.replay_event(&event_id).await?;
    Ok(Json(ReplayResponse::new(event_id, outcome)))
}

/// GET /api/support/notifications/failed
pub async fn list_failed_notifications(
    State(state): State<BillingAppState>,
    Query(query): Query<ListQuery>,
) -> Result<impl IntoResponse, ApiError> {
    let failed = state.support.list_failed_notifications(query.limit()).await?;
    let body: Vec<NotificationResponse> = failed.into_iter().map(Into::into).collect();
    Ok(Json(body))
}

/// POST /api/support/notifications/:id/resend
pub async fn resend_notification(
    State(state): State<BillingAppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let record = state
        .support
        .resend_notification(NotificationId::from_uuid(id))
        .await?;
    Ok((StatusCode::ACCEPTED, Json(NotificationResponse::from(record))))
}

/// POST /api/support/payments/:id/refund
pub async fn manual_refund(
    State(state): State<BillingAppState>,
    Path(id): Path<Uuid>,
    headers: HeaderMap,
    Json(request): Json<ManualRefundRequest>,
) -> Result<impl IntoResponse, ApiError> {
    let actor = headers
        .get(ACTOR_HEADER)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or(ApiError::MissingActor)?;

    let payment = state
        .support
        .manual_refund(ManualRefundCommand {
            payment_id: PaymentId::from_uuid(id),
            amount: request.amount,
            reason: request.reason,
            actor: actor.to_string(),
        })
        .await?;
    Ok(Json(PaymentResponse::from(payment)))
}

/// POST /api/support/payments/:id/invoice
pub async fn regenerate_invoice(
    State(state): State<BillingAppState>,
    Path(id): Path<Uuid>,
) -> Result<impl IntoResponse, ApiError> {
    let payment_id = PaymentId::from_uuid(id);
    state.support.regenerate_invoice(payment_id).await?;
    Ok((
        StatusCode::ACCEPTED,
        Json(InvoiceScheduledResponse {
            payment_id: payment_id.to_string(),
            scheduled: true,
        }),
    ))
}

/// GET /health
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

// ════════════════════════════════════════════════════════════════════════════════
// Error Handling
// ════════════════════════════════════════════════════════════════════════════════

/// API error type that converts engine and support errors to HTTP responses.
#[derive(Debug)]
pub enum ApiError {
    UnknownGateway(String),
    MissingActor,
    Reconciliation(ReconciliationError),
    Support(SupportError),
}

impl From<ReconciliationError> for ApiError {
    fn from(err: ReconciliationError) -> Self {
        ApiError::Reconciliation(err)
    }
}

impl From<SupportError> for ApiError {
    fn from(err: SupportError) -> Self {
        ApiError::Support(err)
    }
}

fn reconciliation_status(err: &ReconciliationError) -> (StatusCode, &'static str) {
    match err {
        ReconciliationError::InvalidSignature(_) => {
            (StatusCode::UNAUTHORIZED, "INVALID_WEBHOOK_SIGNATURE")
        }
        ReconciliationError::Transient(_) => (StatusCode::SERVICE_UNAVAILABLE, "TEMPORARILY_UNAVAILABLE"),
        ReconciliationError::MalformedEvent(_) => (StatusCode::UNPROCESSABLE_ENTITY, "MALFORMED_EVENT"),
        ReconciliationError::InvalidTransition(_) => (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION"),
        ReconciliationError::OrphanEvent { .. } => (StatusCode::CONFLICT, "ORPHAN_EVENT"),
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> axum::response::Response {
        let (status, error_code) = match &self {
            ApiError::UnknownGateway(_) => (StatusCode::NOT_FOUND, "UNKNOWN_GATEWAY"),
            ApiError::MissingActor => (StatusCode::BAD_REQUEST, "MISSING_ACTOR"),
            ApiError::Reconciliation(err) => reconciliation_status(err),
            ApiError::Support(err) => match err {
                SupportError::PaymentNotFound(_) => (StatusCode::NOT_FOUND, "PAYMENT_NOT_FOUND"),
                SupportError::NotificationNotFound(_) => {
                    (StatusCode::NOT_FOUND, "NOTIFICATION_NOT_FOUND")
                }
                SupportError::EventNotFound(_) => (StatusCode::NOT_FOUND, "EVENT_NOT_FOUND"),
                SupportError::NotReplayable { .. } => (StatusCode::CONFLICT, "EVENT_NOT_REPLAYABLE"),
                SupportError::InvalidRequest(_) => (StatusCode::BAD_REQUEST, "VALIDATION_FAILED"),
                SupportError::Payment(_) | SupportError::Subscription(_) => {
                    (StatusCode::CONFLICT, "INVALID_STATE_TRANSITION")
                }
                SupportError::Reconciliation(inner) => reconciliation_status(inner),
                SupportError::Infrastructure(_) => {
                    (StatusCode::SERVICE_UNAVAILABLE, "TEMPORARILY_UNAVAILABLE")
                }
            },
        };

        let message = match &self {
            ApiError::UnknownGateway(gateway) => format!("No webhook endpoint for gateway '{}'", gateway),
            ApiError::MissingActor => format!("{} header is required", ACTOR_HEADER),
            ApiError::Reconciliation(err) => err.to_string(),
            ApiError::Support(err) => err.to_string(),
        };

        if status.is_server_error() {
            tracing::error!(status = %status, error = %message, "Request failed");
        }

        (status, Json(ErrorResponse::new(error_code, message))).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::billing::{EventOutcome, SignatureError};

    fn status_of(err: ApiError) -> StatusCode {
        err.into_response().status()
    }

    #[test]
    fn webhook_errors_map_to_gateway_contract() {
        assert_eq!(
            status_of(ReconciliationError::InvalidSignature(SignatureError::Mismatch).into()),
            StatusCode::UNAUTHORIZED
        );
        assert_eq!(
            status_of(ReconciliationError::Transient("pool timed out".into()).into()),
            StatusCode::SERVICE_UNAVAILABLE
        );
        assert_eq!(
            status_of(ApiError::UnknownGateway("paypal".into())),
            StatusCode::NOT_FOUND
        );
    }

    #[test]
    fn support_errors_map_to_client_statuses() {
        assert_eq!(
            status_of(SupportError::PaymentNotFound(PaymentId::new()).into()),
            StatusCode::NOT_FOUND
        );
        assert_eq!(
            status_of(
                SupportError::NotReplayable {
                    event_id: "evt_1".into(),
                    outcome: EventOutcome::Success,
                }
                .into()
            ),
            StatusCode::CONFLICT
        );
        assert_eq!(
            status_of(SupportError::InvalidRequest("reason".into()).into()),
            StatusCode::BAD_REQUEST
        );
    }
}
