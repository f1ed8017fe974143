//! Payment record model and store contract.
//!
//! The store is the only shared resource between the intent creator, the
//! webhook ingestor, the reconciler, and the expiry sweeper. Every mutating
//! operation is a conditional update keyed on the expected prior state and
//! reports back whether it actually took effect, so concurrent writers (and
//! multiple process instances behind a load balancer) converge without any
//! in-process locking.

use crate::database::error::DatabaseError;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

/// Payment lifecycle status.
///
/// `pending` is the only non-terminal origin; `paid` may still move to
/// `refunded`. Nothing leaves `failed`, `cancelled`, or `refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Failed,
    Cancelled,
    Refunded,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Failed => "failed",
            PaymentStatus::Cancelled => "cancelled",
            PaymentStatus::Refunded => "refunded",
        }
    }

    pub fn from_db_status(status: &str) -> Option<Self> {
        match status {
            "pending" => Some(PaymentStatus::Pending),
            "paid" => Some(PaymentStatus::Paid),
            "failed" => Some(PaymentStatus::Failed),
            "cancelled" => Some(PaymentStatus::Cancelled),
            "refunded" => Some(PaymentStatus::Refunded),
            _ => None,
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded
        )
    }

    /// Legal successor check. Duplicate and out-of-order events from the
    /// gateway are expected, so illegal transitions are treated as no-ops by
    /// callers, never as errors.
    pub fn can_transition_to(&self, target: PaymentStatus) -> bool {
        match self {
            PaymentStatus::Pending => matches!(
                target,
                PaymentStatus::Paid | PaymentStatus::Failed | PaymentStatus::Cancelled
            ),
            PaymentStatus::Paid => matches!(target, PaymentStatus::Refunded),
            PaymentStatus::Failed | PaymentStatus::Cancelled | PaymentStatus::Refunded => false,
        }
    }
}

impl std::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A single payment attempt. Never hard-deleted; terminal rows stay as the
/// audit trail.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentRecord {
    pub id: Uuid,
    /// Human-readable unique code, generated at creation, never reused.
    pub transaction_code: String,
    /// Foreign key into the user directory; absent for gateway-initiated
    /// records reconstructed before the payer is known.
    pub user_id: Option<Uuid>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_method: String,
    pub description: Option<String>,
    /// Generated once per attempt, persisted before the first external call,
    /// reused for every retry. Absence on an existing record is a fatal
    /// configuration problem, never regenerated ad hoc.
    pub idempotency_key: Option<String>,
    /// Write-once gateway intent id; never overwritten or cleared once set.
    pub payment_intent_id: Option<String>,
    /// Processor-side payment/refund reference, filled in opportunistically.
    pub reference_number: Option<String>,
    /// Receipt recipient for the notification sink.
    pub payer_email: Option<String>,
    pub paid_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// Placeholder method label used until richer data arrives from the gateway.
pub const DEFAULT_PAYMENT_METHOD: &str = "online";

/// Insert payload. `transaction_code` and `idempotency_key` are minted here
/// so every record carries them from birth.
#[derive(Debug, Clone)]
pub struct NewPaymentRecord {
    pub user_id: Option<Uuid>,
    pub amount: Decimal,
    pub status: PaymentStatus,
    pub payment_method: String,
    pub description: Option<String>,
    pub idempotency_key: String,
    pub payment_intent_id: Option<String>,
    pub payer_email: Option<String>,
    pub transaction_code: String,
}

impl NewPaymentRecord {
    /// A fresh pending record with a generated transaction code and
    /// idempotency key.
    pub fn pending(user_id: Option<Uuid>, amount: Decimal, description: Option<String>) -> Self {
        Self {
            user_id,
            amount,
            status: PaymentStatus::Pending,
            payment_method: DEFAULT_PAYMENT_METHOD.to_string(),
            description,
            idempotency_key: Uuid::new_v4().to_string(),
            payment_intent_id: None,
            payer_email: None,
            transaction_code: generate_transaction_code(),
        }
    }

    /// A record for an offline/manual payment that is already settled, e.g.
    /// a cashier receipt entered after the fact.
    pub fn paid(
        user_id: Option<Uuid>,
        amount: Decimal,
        method: &str,
        description: Option<String>,
    ) -> Self {
        Self {
            status: PaymentStatus::Paid,
            payment_method: method.to_string(),
            ..Self::pending(user_id, amount, description)
        }
    }

    pub fn with_payer_email(mut self, email: Option<String>) -> Self {
        self.payer_email = email;
        self
    }

    pub fn with_intent_id(mut self, intent_id: Option<String>) -> Self {
        self.payment_intent_id = intent_id;
        self
    }
}

/// Generate the human-readable transaction code, e.g. `PAY-20260823-1C2F9A0B`.
pub fn generate_transaction_code() -> String {
    let date = Utc::now().format("%Y%m%d");
    let suffix = Uuid::new_v4().simple().to_string()[..8].to_uppercase();
    format!("PAY-{}-{}", date, suffix)
}

/// Persistent store contract.
///
/// Mutators return `Ok(true)` when the conditional update took effect and
/// `Ok(false)` when another writer got there first (or the record was not in
/// the expected prior state). Callers treat `false` as "lost the race", not
/// as a failure.
#[async_trait]
pub trait PaymentStore: Send + Sync {
    async fn create(&self, new: NewPaymentRecord) -> Result<PaymentRecord, DatabaseError>;

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn find_by_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Most recent `pending` record created inside `window`, used as the
    /// bounded fallback when a webhook event carries no usable identifier.
    /// Never returns a terminal record.
    async fn find_recent_unmatched_pending(
        &self,
        window: Duration,
    ) -> Result<Option<PaymentRecord>, DatabaseError>;

    /// Pending records older than `min_age` that carry an intent id, for the
    /// background reconciliation sweep.
    async fn find_pending_with_intent(
        &self,
        min_age: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError>;

    /// Write-once claim of the gateway intent id: succeeds only while the
    /// record is still `{status = pending, payment_intent_id = NULL}`.
    async fn claim_intent(&self, id: Uuid, intent_id: &str) -> Result<bool, DatabaseError>;

    /// `pending → paid`; sets `paid_at` and, when supplied, the reference
    /// number and discovered payment method.
    async fn mark_paid(
        &self,
        id: Uuid,
        paid_at: DateTime<Utc>,
        reference: Option<&str>,
        method: Option<&str>,
    ) -> Result<bool, DatabaseError>;

    /// `pending → failed`.
    async fn mark_failed(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// `pending → cancelled`.
    async fn mark_cancelled(&self, id: Uuid) -> Result<bool, DatabaseError>;

    /// `paid → refunded`; records the refund reference when supplied.
    async fn mark_refunded(&self, id: Uuid, reference: Option<&str>)
        -> Result<bool, DatabaseError>;

    /// Opportunistic reference-number update for non-terminal records.
    async fn set_reference(&self, id: Uuid, reference: &str) -> Result<bool, DatabaseError>;

    /// Fail `pending` records older than `max_age` (regardless of whether a
    /// gateway reference exists) and return the rows that actually flipped.
    async fn expire_stale(
        &self,
        max_age: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError>;
}
