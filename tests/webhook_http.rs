//! Integration tests for the billing HTTP surface.
//!
//! Exercises the axum router end to end with the in-memory adapters:
//! 1. The webhook endpoint's status-code contract with the gateway
//! 2. Support endpoints for orphans, replay, refunds, invoices, notifications

use std::sync::Arc;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use secrecy::SecretString;
use serde_json::{json, Value};
use tower::ServiceExt;

use fiscal_desk::adapters::http::{
    billing_router, BillingAppState, ACTOR_HEADER, SIGNATURE_HEADER,
};
use fiscal_desk::adapters::memory::{
    FailurePoint, InMemoryBillingStore, InMemoryNotificationLog, InMemoryPlanCatalog,
    RecordingScheduler,
};
use fiscal_desk::adapters::workflow::StatusWorkflowHook;
use fiscal_desk::application::{ReconciliationEngine, SupportService};
use fiscal_desk::domain::billing::{
    Currency, EventOutcome, Money, NotificationRecord, NotificationRequest, NotificationTemplate,
    Payment, PaymentStatus, SideEffect, WebhookVerifier,
};
use fiscal_desk::domain::foundation::{Timestamp, UserId};
use fiscal_desk::ports::NotificationLog;

// =============================================================================
// Test Infrastructure
// =============================================================================

const SECRET: &str = "whsec_http";

struct TestApp {
    router: Router,
    store: InMemoryBillingStore,
    notifications: Arc<InMemoryNotificationLog>,
    scheduler: Arc<RecordingScheduler>,
    verifier: WebhookVerifier,
}

impl TestApp {
    fn new() -> Self {
        let store = InMemoryBillingStore::new();
        let notifications = Arc::new(InMemoryNotificationLog::new());
        let scheduler = Arc::new(RecordingScheduler::new());
        let engine = Arc::new(ReconciliationEngine::new(
            WebhookVerifier::new(SecretString::new(SECRET.to_string()), 300),
            Arc::new(store.clone()),
            Arc::new(InMemoryPlanCatalog::new()),
            Arc::new(StatusWorkflowHook),
            scheduler.clone(),
        ));
        let support = Arc::new(SupportService::new(
            Arc::new(store.clone()),
            engine.clone(),
            notifications.clone(),
            scheduler.clone(),
        ));
        let router = billing_router().with_state(BillingAppState::new(engine, support));

        Self {
            router,
            store,
            notifications,
            scheduler,
            verifier: WebhookVerifier::new(SecretString::new(SECRET.to_string()), 300),
        }
    }

    async fn send(&self, request: Request<Body>) -> (StatusCode, Value) {
        let response = self.router.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, body)
    }

    fn signed_webhook(&self, body: &Value) -> Request<Body> {
        let raw = serde_json::to_vec(body).unwrap();
        let signature = self
            .verifier
            .sign(&raw, Timestamp::now().as_unix_secs())
            .unwrap();
        Request::post("/webhooks/stripe")
            .header("content-type", "application/json")
            .header(SIGNATURE_HEADER, signature)
            .body(Body::from(raw))
            .unwrap()
    }
}

fn event(id: &str, event_type: &str, object: Value) -> Value {
    json!({
        "id": id,
        "type": event_type,
        "created": Timestamp::now().as_unix_secs(),
        "data": { "object": object }
    })
}

fn unknown_subscription_update(id: &str) -> Value {
    event(
        id,
        "customer.subscription.updated",
        json!({ "id": "sub_unknown", "status": "active" }),
    )
}

fn eur(minor: i64) -> Money {
    Money::from_minor_units(minor, Currency::new("EUR").unwrap()).unwrap()
}

fn json_post(uri: &str, body: Value) -> Request<Body> {
    Request::post(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

// =============================================================================
// Webhook endpoint
// =============================================================================

#[tokio::test]
async fn health_reports_ok() {
    let app = TestApp::new();
    let (status, body) = app
        .send(Request::get("/health").body(Body::empty()).unwrap())
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

#[tokio::test]
async fn signed_event_is_acknowledged() {
    let app = TestApp::new();
    let request = app.signed_webhook(&event("evt_ack", "customer.created", json!({ "id": "cus_1" })));

    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body, json!({ "received": true }));
    assert_eq!(
        app.store.ledger_record("evt_ack").await.unwrap().outcome,
        EventOutcome::Ignored
    );
}

#[tokio::test]
async fn bad_signature_is_unauthorized() {
    let app = TestApp::new();
    let raw = event("evt_forged", "invoice.paid", json!({ "id": "in_1" })).to_string();
    let request = Request::post("/webhooks/stripe")
        .header(SIGNATURE_HEADER, format!("t={},v1=deadbeef", Timestamp::now().as_unix_secs()))
        .body(Body::from(raw))
        .unwrap();

    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
    assert_eq!(body["error_code"], "INVALID_WEBHOOK_SIGNATURE");
    assert_eq!(app.store.ledger_len().await, 0);
}

#[tokio::test]
async fn extreme_signature_timestamps_are_unauthorized() {
    let app = TestApp::new();
    for timestamp in [i64::MIN, i64::MAX] {
        let request = Request::post("/webhooks/stripe")
            .header(SIGNATURE_HEADER, format!("t={},v1={}", timestamp, "aa".repeat(32)))
            .body(Body::from("{}"))
            .unwrap();

        let (status, body) = app.send(request).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error_code"], "INVALID_WEBHOOK_SIGNATURE");
    }
    assert_eq!(app.store.ledger_len().await, 0);
}

#[tokio::test]
async fn missing_signature_is_unauthorized() {
    let app = TestApp::new();
    let request = Request::post("/webhooks/stripe")
        .body(Body::from(event("evt_unsigned", "invoice.paid", json!({})).to_string()))
        .unwrap();

    let (status, _) = app.send(request).await;

    assert_eq!(status, StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn unknown_gateway_is_not_found() {
    let app = TestApp::new();
    let request = Request::post("/webhooks/paypal")
        .body(Body::from("{}"))
        .unwrap();

    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "UNKNOWN_GATEWAY");
}

#[tokio::test]
async fn signed_garbage_is_acknowledged() {
    let app = TestApp::new();
    let raw = b"not an event".to_vec();
    let signature = app
        .verifier
        .sign(&raw, Timestamp::now().as_unix_secs())
        .unwrap();
    let request = Request::post("/webhooks/stripe")
        .header(SIGNATURE_HEADER, signature)
        .body(Body::from(raw))
        .unwrap();

    let (status, _) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(app.store.ledger_len().await, 0);
}

#[tokio::test]
async fn transient_failure_asks_gateway_to_redeliver() {
    let app = TestApp::new();
    let body = unknown_subscription_update("evt_transient");

    app.store.inject_failure(FailurePoint::Commit);
    let (status, error) = app.send(app.signed_webhook(&body)).await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(error["error_code"], "TEMPORARILY_UNAVAILABLE");
    assert!(app.store.ledger_record("evt_transient").await.is_none());

    let (status, _) = app.send(app.signed_webhook(&body)).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(
        app.store.ledger_record("evt_transient").await.unwrap().outcome,
        EventOutcome::Orphaned
    );
}

// =============================================================================
// Support endpoints
// =============================================================================

#[tokio::test]
async fn orphans_are_listed_for_support() {
    let app = TestApp::new();
    app.send(app.signed_webhook(&unknown_subscription_update("evt_orphan")))
        .await;

    let (status, body) = app
        .send(
            Request::get("/api/support/orphans?limit=10")
                .body(Body::empty())
                .unwrap(),
        )
        .await;

    assert_eq!(status, StatusCode::OK);
    let orphans = body.as_array().unwrap();
    assert_eq!(orphans.len(), 1);
    assert_eq!(orphans[0]["event_id"], "evt_orphan");
    assert_eq!(orphans[0]["correlation_key"], "subscription:sub_unknown");
}

#[tokio::test]
async fn replay_distinguishes_missing_and_settled_events() {
    let app = TestApp::new();
    app.send(app.signed_webhook(&event("evt_settled", "customer.created", json!({}))))
        .await;

    let (status, _) = app
        .send(json_post("/api/support/events/evt_missing/replay", json!({})))
        .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = app
        .send(json_post("/api/support/events/evt_settled/replay", json!({})))
        .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["error_code"], "EVENT_NOT_REPLAYABLE");
}

#[tokio::test]
async fn replaying_a_still_orphaned_event_reports_it() {
    let app = TestApp::new();
    app.send(app.signed_webhook(&unknown_subscription_update("evt_waiting")))
        .await;

    let (status, body) = app
        .send(json_post("/api/support/events/evt_waiting/replay", json!({})))
        .await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["event_id"], "evt_waiting");
    assert_eq!(body["outcome"], "orphaned");
}

#[tokio::test]
async fn manual_refund_requires_actor() {
    let app = TestApp::new();
    let payment = Payment::settled(UserId::new(), eur(1999), "pi_http", Timestamp::now());
    app.store.seed_payment(payment.clone()).await;
    let uri = format!("/api/support/payments/{}/refund", payment.id);

    let (status, body) = app
        .send(json_post(&uri, json!({ "amount": "19.99", "reason": "duplicate order" })))
        .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["error_code"], "MISSING_ACTOR");

    let request = Request::post(&uri)
        .header("content-type", "application/json")
        .header(ACTOR_HEADER, "agent@fiscaldesk")
        .body(Body::from(
            json!({ "amount": "19.99", "reason": "duplicate order" }).to_string(),
        ))
        .unwrap();
    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "refunded");
    assert_eq!(
        app.store.payment(payment.id).await.unwrap().status,
        PaymentStatus::Refunded
    );
}

#[tokio::test]
async fn refund_of_unknown_payment_is_not_found() {
    let app = TestApp::new();
    let request = Request::post(format!("/api/support/payments/{}/refund", uuid::Uuid::new_v4()))
        .header("content-type", "application/json")
        .header(ACTOR_HEADER, "agent")
        .body(Body::from(json!({ "amount": "1.00", "reason": "x" }).to_string()))
        .unwrap();

    let (status, body) = app.send(request).await;

    assert_eq!(status, StatusCode::NOT_FOUND);
    assert_eq!(body["error_code"], "PAYMENT_NOT_FOUND");
}

#[tokio::test]
async fn invoice_regeneration_is_scheduled() {
    let app = TestApp::new();
    let payment = Payment::settled(UserId::new(), eur(500), "pi_invoice", Timestamp::now());
    app.store.seed_payment(payment.clone()).await;

    let (status, body) = app
        .send(json_post(
            &format!("/api/support/payments/{}/invoice", payment.id),
            json!({}),
        ))
        .await;

    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(body["scheduled"], true);
    assert_eq!(
        app.scheduler.effects(),
        vec![SideEffect::GenerateInvoice {
            payment_id: payment.id
        }]
    );
}

#[tokio::test]
async fn failed_notifications_can_be_listed_and_resent() {
    let app = TestApp::new();
    let request = NotificationRequest::new(UserId::new(), NotificationTemplate::PaymentReceived);
    let mut record = NotificationRecord::queued(request.clone(), Timestamp::now());
    record.record_attempt(Err("mailbox unavailable".into()), Timestamp::now());
    app.notifications.save(&record).await.unwrap();

    let (status, body) = app
        .send(
            Request::get("/api/support/notifications/failed")
                .body(Body::empty())
                .unwrap(),
        )
        .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body[0]["id"], request.id.to_string());
    assert_eq!(body[0]["last_error"], "mailbox unavailable");

    let (status, _) = app
        .send(json_post(
            &format!("/api/support/notifications/{}/resend", request.id),
            json!({}),
        ))
        .await;
    assert_eq!(status, StatusCode::ACCEPTED);
    assert_eq!(app.scheduler.notifications()[0].id, request.id);
}
