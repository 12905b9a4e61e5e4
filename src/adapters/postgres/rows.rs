//! Database row representations and their domain conversions.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::types::Json;
use uuid::Uuid;

use crate::domain::billing::{
    BillingCycle, Currency, EventOutcome, IdempotencyRecord, Money, NotificationRecord,
    NotificationRequest, NotificationStatus, NotificationTemplate, Payment, PaymentStatus,
    ServiceRequest, ServiceRequestStatus, SubscriptionStatus, UserSubscription,
};
use crate::domain::foundation::{
    DomainError, ErrorCode, NotificationId, PaymentId, PlanId, ServiceRequestId, SubscriptionId,
    Timestamp, UserId,
};
use crate::ports::Plan;

pub(super) fn db_error(context: &'static str) -> impl Fn(sqlx::Error) -> DomainError {
    move |e| DomainError::database(format!("{}: {}", context, e))
}

fn invalid(column: &str, value: &str) -> DomainError {
    DomainError::new(
        ErrorCode::SerializationError,
        format!("Invalid {} value: {}", column, value),
    )
}

fn money(amount: Decimal, currency: &str) -> Result<Money, DomainError> {
    let currency = Currency::new(currency.trim()).map_err(DomainError::from)?;
    Money::new(amount, currency).map_err(DomainError::from)
}

fn ts(dt: Option<DateTime<Utc>>) -> Option<Timestamp> {
    dt.map(Timestamp::from_datetime)
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct LedgerRow {
    event_id: String,
    event_type: String,
    outcome: String,
    result_summary: Option<String>,
    correlation_key: Option<String>,
    payload: serde_json::Value,
    reserved_at: DateTime<Utc>,
    processed_at: Option<DateTime<Utc>>,
}

impl TryFrom<LedgerRow> for IdempotencyRecord {
    type Error = DomainError;

    fn try_from(row: LedgerRow) -> Result<Self, Self::Error> {
        Ok(IdempotencyRecord {
            outcome: EventOutcome::parse(&row.outcome)
                .ok_or_else(|| invalid("outcome", &row.outcome))?,
            event_id: row.event_id,
            event_type: row.event_type,
            result_summary: row.result_summary,
            correlation_key: row.correlation_key,
            payload: row.payload,
            reserved_at: Timestamp::from_datetime(row.reserved_at),
            processed_at: ts(row.processed_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct PaymentRow {
    id: Uuid,
    user_id: Uuid,
    subscription_id: Option<Uuid>,
    service_request_id: Option<Uuid>,
    amount: Decimal,
    currency: String,
    status: String,
    gateway_reference: Option<String>,
    paid_at: Option<DateTime<Utc>>,
    metadata: Json<BTreeMap<String, String>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<PaymentRow> for Payment {
    type Error = DomainError;

    fn try_from(row: PaymentRow) -> Result<Self, Self::Error> {
        Ok(Payment {
            id: PaymentId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            subscription_id: row.subscription_id.map(SubscriptionId::from_uuid),
            service_request_id: row.service_request_id.map(ServiceRequestId::from_uuid),
            amount: money(row.amount, &row.currency)?,
            status: PaymentStatus::parse(&row.status)
                .ok_or_else(|| invalid("payment status", &row.status))?,
            gateway_reference: row.gateway_reference,
            paid_at: ts(row.paid_at),
            metadata: row.metadata.0,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct SubscriptionRow {
    id: Uuid,
    user_id: Uuid,
    plan_id: Uuid,
    status: String,
    billing_cycle: String,
    start_date: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    gateway_subscription_id: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<SubscriptionRow> for UserSubscription {
    type Error = DomainError;

    fn try_from(row: SubscriptionRow) -> Result<Self, Self::Error> {
        Ok(UserSubscription {
            id: SubscriptionId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            plan_id: PlanId::from_uuid(row.plan_id),
            status: SubscriptionStatus::parse(&row.status)
                .ok_or_else(|| invalid("subscription status", &row.status))?,
            billing_cycle: BillingCycle::parse(&row.billing_cycle)
                .ok_or_else(|| invalid("billing cycle", &row.billing_cycle))?,
            start_date: ts(row.start_date),
            end_date: ts(row.end_date),
            gateway_subscription_id: row.gateway_subscription_id,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct ServiceRequestRow {
    id: Uuid,
    user_id: Uuid,
    status: String,
    payment_id: Option<Uuid>,
    requires_payment: bool,
    updated_at: DateTime<Utc>,
}

impl TryFrom<ServiceRequestRow> for ServiceRequest {
    type Error = DomainError;

    fn try_from(row: ServiceRequestRow) -> Result<Self, Self::Error> {
        Ok(ServiceRequest {
            id: ServiceRequestId::from_uuid(row.id),
            user_id: UserId::from_uuid(row.user_id),
            status: ServiceRequestStatus::parse(&row.status)
                .ok_or_else(|| invalid("service request status", &row.status))?,
            payment_id: row.payment_id.map(PaymentId::from_uuid),
            requires_payment: row.requires_payment,
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct PlanRow {
    id: Uuid,
    name: String,
    billing_cycle: String,
    price_amount: Decimal,
    currency: String,
    gateway_price_id: Option<String>,
}

impl TryFrom<PlanRow> for Plan {
    type Error = DomainError;

    fn try_from(row: PlanRow) -> Result<Self, Self::Error> {
        Ok(Plan {
            id: PlanId::from_uuid(row.id),
            name: row.name,
            billing_cycle: BillingCycle::parse(&row.billing_cycle)
                .ok_or_else(|| invalid("billing cycle", &row.billing_cycle))?,
            price: money(row.price_amount, &row.currency)?,
            gateway_price_id: row.gateway_price_id,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
pub(super) struct NotificationRow {
    id: Uuid,
    user_id: Uuid,
    template: String,
    context: Json<BTreeMap<String, String>>,
    status: String,
    attempts: i32,
    last_error: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<NotificationRow> for NotificationRecord {
    type Error = DomainError;

    fn try_from(row: NotificationRow) -> Result<Self, Self::Error> {
        Ok(NotificationRecord {
            request: NotificationRequest {
                id: NotificationId::from_uuid(row.id),
                user_id: UserId::from_uuid(row.user_id),
                template: NotificationTemplate::parse(&row.template)
                    .ok_or_else(|| invalid("template", &row.template))?,
                context: row.context.0,
            },
            status: NotificationStatus::parse(&row.status)
                .ok_or_else(|| invalid("notification status", &row.status))?,
            attempts: u32::try_from(row.attempts).unwrap_or(0),
            last_error: row.last_error,
            created_at: Timestamp::from_datetime(row.created_at),
            updated_at: Timestamp::from_datetime(row.updated_at),
        })
    }
}
