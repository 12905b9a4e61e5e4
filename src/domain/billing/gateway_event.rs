//! Gateway (Stripe) event envelope and the payload objects we consume.
//!
//! Only fields relevant to reconciliation are captured; everything else in
//! the gateway's schema is ignored on deserialization.

use std::collections::HashMap;

use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::domain::foundation::{PaymentId, PlanId, ServiceRequestId, Timestamp, UserId};

use super::errors::ReconciliationError;
use super::money::{Currency, Money};

/// Verified gateway event.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEvent {
    /// Gateway-assigned id (evt_xxx). This is the idempotency key.
    pub id: String,

    #[serde(rename = "type")]
    pub event_type: String,

    /// Unix seconds at which the gateway created the event.
    pub created: i64,

    pub data: GatewayEventData,

    #[serde(default)]
    pub livemode: bool,

    #[serde(skip, default = "Timestamp::now")]
    pub received_at: Timestamp,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GatewayEventData {
    pub object: serde_json::Value,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub previous_attributes: Option<serde_json::Value>,
}

impl GatewayEvent {
    pub fn kind(&self) -> GatewayEventType {
        GatewayEventType::parse(&self.event_type)
    }

    /// Deserializes the data object into a typed payload.
    pub fn object<T: DeserializeOwned>(&self) -> Result<T, ReconciliationError> {
        serde_json::from_value(self.data.object.clone()).map_err(|e| {
            ReconciliationError::MalformedEvent(format!(
                "{} payload for {}: {}",
                self.event_type, self.id, e
            ))
        })
    }

    /// Raw JSON form stored in the ledger for orphan replay.
    pub fn to_payload(&self) -> serde_json::Value {
        serde_json::to_value(self).unwrap_or(serde_json::Value::Null)
    }

    pub fn from_payload(payload: &serde_json::Value) -> Result<Self, ReconciliationError> {
        serde_json::from_value(payload.clone())
            .map_err(|e| ReconciliationError::MalformedEvent(e.to_string()))
    }
}

/// Event types the engine routes. Anything else is `Unknown` and acknowledged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum GatewayEventType {
    CheckoutCompleted,
    PaymentSucceeded,
    PaymentFailed,
    SubscriptionCreated,
    SubscriptionUpdated,
    SubscriptionDeleted,
    InvoicePaid,
    InvoicePaymentFailed,
    ChargeRefunded,
    Unknown,
}

impl GatewayEventType {
    pub fn parse(s: &str) -> Self {
        match s {
            "checkout.session.completed" => Self::CheckoutCompleted,
            "payment_intent.succeeded" => Self::PaymentSucceeded,
            "payment_intent.payment_failed" => Self::PaymentFailed,
            "customer.subscription.created" => Self::SubscriptionCreated,
            "customer.subscription.updated" => Self::SubscriptionUpdated,
            "customer.subscription.deleted" => Self::SubscriptionDeleted,
            "invoice.paid" | "invoice.payment_succeeded" => Self::InvoicePaid,
            "invoice.payment_failed" => Self::InvoicePaymentFailed,
            "charge.refunded" => Self::ChargeRefunded,
            _ => Self::Unknown,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::CheckoutCompleted => "checkout.session.completed",
            Self::PaymentSucceeded => "payment_intent.succeeded",
            Self::PaymentFailed => "payment_intent.payment_failed",
            Self::SubscriptionCreated => "customer.subscription.created",
            Self::SubscriptionUpdated => "customer.subscription.updated",
            Self::SubscriptionDeleted => "customer.subscription.deleted",
            Self::InvoicePaid => "invoice.paid",
            Self::InvoicePaymentFailed => "invoice.payment_failed",
            Self::ChargeRefunded => "charge.refunded",
            Self::Unknown => "unknown",
        }
    }
}

/// Metadata keys the checkout flow attaches to gateway objects.
pub mod gateway_metadata {
    pub const USER_ID: &str = "user_id";
    pub const SERVICE_REQUEST_ID: &str = "service_request_id";
    pub const PAYMENT_ID: &str = "payment_id";
    pub const PLAN_ID: &str = "plan_id";
}

fn parse_metadata_id<T>(
    metadata: &HashMap<String, String>,
    key: &'static str,
) -> Result<Option<T>, ReconciliationError>
where
    T: std::str::FromStr,
{
    match metadata.get(key).map(|v| v.trim()).filter(|v| !v.is_empty()) {
        None => Ok(None),
        Some(raw) => raw
            .parse()
            .map(Some)
            .map_err(|_| ReconciliationError::MalformedEvent(format!("metadata {} = '{}'", key, raw))),
    }
}

fn money(minor: i64, currency: &str) -> Result<Money, ReconciliationError> {
    let currency = Currency::new(currency)?;
    Ok(Money::from_minor_units(minor, currency)?)
}

/// `checkout.session.completed` object.
#[derive(Debug, Clone, Deserialize)]
pub struct CheckoutSession {
    pub id: String,
    #[serde(default)]
    pub client_reference_id: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub amount_total: Option<i64>,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub mode: Option<String>,
}

impl CheckoutSession {
    /// User from metadata, falling back to the client reference.
    pub fn user_id(&self) -> Result<UserId, ReconciliationError> {
        if let Some(id) = parse_metadata_id(&self.metadata, gateway_metadata::USER_ID)? {
            return Ok(id);
        }
        let reference = self
            .client_reference_id
            .as_deref()
            .ok_or_else(|| ReconciliationError::MalformedEvent("checkout without user reference".into()))?;
        reference.parse().map_err(|_| {
            ReconciliationError::MalformedEvent(format!("client_reference_id '{}'", reference))
        })
    }

    pub fn service_request_id(&self) -> Result<Option<ServiceRequestId>, ReconciliationError> {
        parse_metadata_id(&self.metadata, gateway_metadata::SERVICE_REQUEST_ID)
    }

    pub fn payment_id(&self) -> Result<Option<PaymentId>, ReconciliationError> {
        parse_metadata_id(&self.metadata, gateway_metadata::PAYMENT_ID)
    }

    pub fn amount(&self) -> Result<Money, ReconciliationError> {
        let total = self
            .amount_total
            .ok_or_else(|| ReconciliationError::MalformedEvent("checkout without amount_total".into()))?;
        let currency = self
            .currency
            .as_deref()
            .ok_or_else(|| ReconciliationError::MalformedEvent("checkout without currency".into()))?;
        money(total, currency)
    }

    pub fn is_subscription(&self) -> bool {
        self.subscription.is_some() || self.mode.as_deref() == Some("subscription")
    }

    /// Reference stored on the payment once settled.
    pub fn gateway_reference(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct LastPaymentError {
    #[serde(default)]
    pub code: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// `payment_intent.*` object.
#[derive(Debug, Clone, Deserialize)]
pub struct PaymentIntent {
    pub id: String,
    pub amount: i64,
    pub currency: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub invoice: Option<String>,
    #[serde(default)]
    pub last_payment_error: Option<LastPaymentError>,
}

impl PaymentIntent {
    pub fn amount(&self) -> Result<Money, ReconciliationError> {
        money(self.amount, &self.currency)
    }

    pub fn payment_id(&self) -> Result<Option<PaymentId>, ReconciliationError> {
        parse_metadata_id(&self.metadata, gateway_metadata::PAYMENT_ID)
    }

    pub fn user_id(&self) -> Result<Option<UserId>, ReconciliationError> {
        parse_metadata_id(&self.metadata, gateway_metadata::USER_ID)
    }

    pub fn service_request_id(&self) -> Result<Option<ServiceRequestId>, ReconciliationError> {
        parse_metadata_id(&self.metadata, gateway_metadata::SERVICE_REQUEST_ID)
    }

    pub fn failure_reason(&self) -> Option<&str> {
        self.last_payment_error
            .as_ref()
            .and_then(|e| e.code.as_deref().or(e.message.as_deref()))
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct Recurring {
    pub interval: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Price {
    pub id: String,
    #[serde(default)]
    pub recurring: Option<Recurring>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct SubscriptionItem {
    pub price: Price,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SubscriptionItems {
    #[serde(default)]
    pub data: Vec<SubscriptionItem>,
}

/// `customer.subscription.*` object.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySubscription {
    pub id: String,
    pub status: String,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
    #[serde(default)]
    pub items: SubscriptionItems,
}

impl GatewaySubscription {
    pub fn user_id(&self) -> Result<Option<UserId>, ReconciliationError> {
        parse_metadata_id(&self.metadata, gateway_metadata::USER_ID)
    }

    /// Internal plan id if the checkout flow stamped one.
    pub fn plan_id(&self) -> Result<Option<PlanId>, ReconciliationError> {
        parse_metadata_id(&self.metadata, gateway_metadata::PLAN_ID)
    }

    /// Gateway price id of the first item, used for catalog lookup.
    pub fn price_id(&self) -> Option<&str> {
        self.items.data.first().map(|item| item.price.id.as_str())
    }
}

/// `invoice.*` object.
#[derive(Debug, Clone, Deserialize)]
pub struct Invoice {
    pub id: String,
    #[serde(default)]
    pub subscription: Option<String>,
    #[serde(default)]
    pub amount_paid: i64,
    #[serde(default)]
    pub amount_due: i64,
    pub currency: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub billing_reason: Option<String>,
}

impl Invoice {
    pub fn paid_amount(&self) -> Result<Money, ReconciliationError> {
        money(self.amount_paid, &self.currency)
    }

    pub fn due_amount(&self) -> Result<Money, ReconciliationError> {
        money(self.amount_due, &self.currency)
    }

    pub fn gateway_reference(&self) -> &str {
        self.payment_intent.as_deref().unwrap_or(&self.id)
    }
}

/// `charge.refunded` object.
#[derive(Debug, Clone, Deserialize)]
pub struct Charge {
    pub id: String,
    pub amount_refunded: i64,
    pub currency: String,
    #[serde(default)]
    pub payment_intent: Option<String>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

impl Charge {
    pub fn refunded_amount(&self) -> Result<Money, ReconciliationError> {
        money(self.amount_refunded, &self.currency)
    }

    pub fn payment_id(&self) -> Result<Option<PaymentId>, ReconciliationError> {
        parse_metadata_id(&self.metadata, gateway_metadata::PAYMENT_ID)
    }
}
