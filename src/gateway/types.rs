//! Wire types for the PayMongo HTTP API and the typed views the services
//! consume. The raw resources mirror the provider's `{ "data": { "id",
//! "attributes": { .. } } }` envelope; everything unknown is tolerated so a
//! provider-side field addition never breaks deserialization.

use chrono::{DateTime, TimeZone, Utc};
use rust_decimal::prelude::ToPrimitive;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// Intent-level status as reported by the gateway.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayIntentStatus {
    AwaitingPaymentMethod,
    AwaitingNextAction,
    Processing,
    Succeeded,
    Cancelled,
    #[serde(other)]
    Unknown,
}

/// Status of an individual payment attached to an intent.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum GatewayPaymentStatus {
    Pending,
    Paid,
    Failed,
    Refunded,
    #[serde(other)]
    Unknown,
}

#[derive(Debug, Clone, Deserialize)]
pub struct Envelope<T> {
    pub data: T,
}

#[derive(Debug, Clone, Deserialize)]
pub struct ListEnvelope<T> {
    pub data: Vec<T>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentResource {
    pub id: String,
    pub attributes: IntentAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct IntentAttributes {
    pub amount: i64,
    #[serde(default)]
    pub currency: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
    pub status: GatewayIntentStatus,
    #[serde(default)]
    pub payments: Vec<PaymentResource>,
    #[serde(default)]
    pub refunds: Vec<RefundResource>,
    #[serde(default)]
    pub last_payment_error: Option<JsonValue>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentResource {
    pub id: String,
    pub attributes: PaymentAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentAttributes {
    pub status: GatewayPaymentStatus,
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub source: Option<PaymentSource>,
    #[serde(default)]
    pub external_reference_number: Option<String>,
    /// Unix seconds.
    #[serde(default)]
    pub paid_at: Option<i64>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentSource {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(rename = "type", default)]
    pub source_type: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundResource {
    pub id: String,
    pub attributes: RefundAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct RefundAttributes {
    #[serde(default)]
    pub amount: Option<i64>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub payment_id: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkResource {
    pub id: String,
    pub attributes: LinkAttributes,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LinkAttributes {
    #[serde(default)]
    pub checkout_url: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub reference_number: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PaymentMethodResource {
    pub id: String,
}

// ---------------------------------------------------------------------------
// Typed views handed to the services
// ---------------------------------------------------------------------------

/// Parameters for intent creation; the idempotency key travels to the
/// provider so it can deduplicate retries of the identical logical request.
#[derive(Debug, Clone)]
pub struct CreateIntentParams {
    pub amount: Decimal,
    pub description: Option<String>,
    pub idempotency_key: String,
}

#[derive(Debug, Clone)]
pub struct CreatedIntent {
    pub intent_id: String,
    pub status: GatewayIntentStatus,
}

/// One payment hanging off an intent, reduced to what reconciliation needs.
#[derive(Debug, Clone)]
pub struct GatewayPayment {
    pub id: String,
    pub status: GatewayPaymentStatus,
    pub reference: Option<String>,
    pub method: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct GatewayRefund {
    pub id: String,
    pub payment_id: Option<String>,
}

/// Point-in-time gateway truth for one intent.
#[derive(Debug, Clone)]
pub struct IntentSnapshot {
    pub intent_id: String,
    pub status: GatewayIntentStatus,
    pub amount: Decimal,
    pub payments: Vec<GatewayPayment>,
    pub refunds: Vec<GatewayRefund>,
}

#[derive(Debug, Clone)]
pub struct CheckoutLink {
    pub link_id: String,
    pub checkout_url: Option<String>,
    pub status: Option<String>,
}

impl From<IntentResource> for IntentSnapshot {
    fn from(resource: IntentResource) -> Self {
        let payments = resource
            .attributes
            .payments
            .into_iter()
            .map(|p| GatewayPayment {
                id: p.id,
                status: p.attributes.status,
                reference: p.attributes.external_reference_number,
                method: p.attributes.source.and_then(|s| s.source_type),
                paid_at: p
                    .attributes
                    .paid_at
                    .and_then(|secs| Utc.timestamp_opt(secs, 0).single()),
            })
            .collect();
        let refunds = resource
            .attributes
            .refunds
            .into_iter()
            .map(|r| GatewayRefund {
                id: r.id,
                payment_id: r.attributes.payment_id,
            })
            .collect();
        IntentSnapshot {
            intent_id: resource.id,
            status: resource.attributes.status,
            amount: from_minor_units(resource.attributes.amount),
            payments,
            refunds,
        }
    }
}

// ---------------------------------------------------------------------------
// Minor-unit conversion
// ---------------------------------------------------------------------------

/// Convert a decimal amount to the gateway's integer minor units (centavos).
/// Returns `None` for non-positive amounts or values that do not fit.
pub fn to_minor_units(amount: Decimal) -> Option<i64> {
    if amount <= Decimal::ZERO {
        return None;
    }
    (amount * Decimal::from(100)).round().to_i64()
}

pub fn from_minor_units(minor: i64) -> Decimal {
    Decimal::from(minor) / Decimal::from(100)
}
