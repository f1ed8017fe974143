//! Shared fakes for the integration tests: an in-memory store with the same
//! conditional-update semantics as the Postgres one, a programmable gateway,
//! and a notification sink that records what it was asked to send.

#![allow(dead_code)]

use async_trait::async_trait;
use campuspay_backend::database::error::DatabaseError;
use campuspay_backend::database::payment_store::{
    NewPaymentRecord, PaymentRecord, PaymentStatus, PaymentStore,
};
use campuspay_backend::gateway::types::{
    CheckoutLink, CreateIntentParams, CreatedIntent, GatewayIntentStatus, IntentSnapshot,
};
use campuspay_backend::gateway::{GatewayError, PaymentGateway};
use campuspay_backend::services::notification::{
    NotificationKind, NotificationSink, PaymentReceipt,
};
use chrono::{DateTime, Duration as ChronoDuration, Utc};
use hmac::{Hmac, Mac};
use rust_decimal::Decimal;
use sha2::Sha256;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;
use uuid::Uuid;

// ---------------------------------------------------------------------------
// In-memory store
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct InMemoryPaymentStore {
    records: Mutex<HashMap<Uuid, PaymentRecord>>,
}

impl InMemoryPaymentStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn get(&self, id: Uuid) -> Option<PaymentRecord> {
        self.records.lock().unwrap().get(&id).cloned()
    }

    /// Insert a fully built record, bypassing the normal creation path.
    pub fn insert_raw(&self, record: PaymentRecord) {
        self.records.lock().unwrap().insert(record.id, record);
    }

    /// Rewind a record's creation time, for age-based behavior.
    pub fn backdate(&self, id: Uuid, age: Duration) {
        let mut records = self.records.lock().unwrap();
        if let Some(record) = records.get_mut(&id) {
            record.created_at =
                Utc::now() - ChronoDuration::from_std(age).unwrap_or_else(|_| ChronoDuration::zero());
        }
    }

    pub fn len(&self) -> usize {
        self.records.lock().unwrap().len()
    }
}

#[async_trait]
impl PaymentStore for InMemoryPaymentStore {
    async fn create(&self, new: NewPaymentRecord) -> Result<PaymentRecord, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        if records
            .values()
            .any(|r| r.idempotency_key.as_deref() == Some(new.idempotency_key.as_str()))
        {
            return Err(DatabaseError::UniqueViolation {
                constraint: "payments_idempotency_key_key".to_string(),
            });
        }
        let now = Utc::now();
        let paid_at = (new.status == PaymentStatus::Paid).then_some(now);
        let record = PaymentRecord {
            id: Uuid::new_v4(),
            transaction_code: new.transaction_code,
            user_id: new.user_id,
            amount: new.amount,
            status: new.status,
            payment_method: new.payment_method,
            description: new.description,
            idempotency_key: Some(new.idempotency_key),
            payment_intent_id: new.payment_intent_id,
            reference_number: None,
            payer_email: new.payer_email,
            paid_at,
            created_at: now,
            updated_at: now,
        };
        records.insert(record.id, record.clone());
        Ok(record)
    }

    async fn find_by_id(&self, id: Uuid) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self.records.lock().unwrap().get(&id).cloned())
    }

    async fn find_by_intent_id(
        &self,
        intent_id: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.payment_intent_id.as_deref() == Some(intent_id))
            .cloned())
    }

    async fn find_by_reference(
        &self,
        reference: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.reference_number.as_deref() == Some(reference))
            .cloned())
    }

    async fn find_by_idempotency_key(
        &self,
        key: &str,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .find(|r| r.idempotency_key.as_deref() == Some(key))
            .cloned())
    }

    async fn find_recent_unmatched_pending(
        &self,
        window: Duration,
    ) -> Result<Option<PaymentRecord>, DatabaseError> {
        let cutoff =
            Utc::now() - ChronoDuration::from_std(window).unwrap_or_else(|_| ChronoDuration::zero());
        Ok(self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.status == PaymentStatus::Pending
                    && r.payment_intent_id.is_none()
                    && r.created_at >= cutoff
            })
            .max_by_key(|r| r.created_at)
            .cloned())
    }

    async fn find_pending_with_intent(
        &self,
        min_age: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let cutoff =
            Utc::now() - ChronoDuration::from_std(min_age).unwrap_or_else(|_| ChronoDuration::zero());
        let mut matched: Vec<PaymentRecord> = self
            .records
            .lock()
            .unwrap()
            .values()
            .filter(|r| {
                r.status == PaymentStatus::Pending
                    && r.payment_intent_id.is_some()
                    && r.created_at < cutoff
            })
            .cloned()
            .collect();
        matched.sort_by_key(|r| r.created_at);
        matched.truncate(limit as usize);
        Ok(matched)
    }

    async fn claim_intent(&self, id: Uuid, intent_id: &str) -> Result<bool, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&id) {
            Some(record)
                if record.status == PaymentStatus::Pending
                    && record.payment_intent_id.is_none() =>
            {
                record.payment_intent_id = Some(intent_id.to_string());
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_paid(
        &self,
        id: Uuid,
        paid_at: DateTime<Utc>,
        reference: Option<&str>,
        method: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&id) {
            Some(record) if record.status == PaymentStatus::Pending => {
                record.status = PaymentStatus::Paid;
                record.paid_at = Some(paid_at);
                if let Some(reference) = reference {
                    record.reference_number = Some(reference.to_string());
                }
                if let Some(method) = method {
                    record.payment_method = method.to_string();
                }
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn mark_failed(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.transition(id, PaymentStatus::Pending, PaymentStatus::Failed)
    }

    async fn mark_cancelled(&self, id: Uuid) -> Result<bool, DatabaseError> {
        self.transition(id, PaymentStatus::Pending, PaymentStatus::Cancelled)
    }

    async fn mark_refunded(
        &self,
        id: Uuid,
        reference: Option<&str>,
    ) -> Result<bool, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&id) {
            Some(record) if record.status == PaymentStatus::Paid => {
                record.status = PaymentStatus::Refunded;
                if let Some(reference) = reference {
                    record.reference_number = Some(reference.to_string());
                }
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn set_reference(&self, id: Uuid, reference: &str) -> Result<bool, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&id) {
            Some(record) if !record.status.is_terminal() => {
                record.reference_number = Some(reference.to_string());
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn expire_stale(
        &self,
        max_age: Duration,
        limit: i64,
    ) -> Result<Vec<PaymentRecord>, DatabaseError> {
        let cutoff =
            Utc::now() - ChronoDuration::from_std(max_age).unwrap_or_else(|_| ChronoDuration::zero());
        let mut records = self.records.lock().unwrap();
        let mut stale: Vec<(DateTime<Utc>, Uuid)> = records
            .values()
            .filter(|r| r.status == PaymentStatus::Pending && r.created_at < cutoff)
            .map(|r| (r.created_at, r.id))
            .collect();
        stale.sort();
        stale.truncate(limit as usize);

        let mut flipped = Vec::new();
        for (_, id) in stale {
            if let Some(record) = records.get_mut(&id) {
                record.status = PaymentStatus::Failed;
                record.updated_at = Utc::now();
                flipped.push(record.clone());
            }
        }
        Ok(flipped)
    }
}

impl InMemoryPaymentStore {
    fn transition(
        &self,
        id: Uuid,
        expected: PaymentStatus,
        target: PaymentStatus,
    ) -> Result<bool, DatabaseError> {
        let mut records = self.records.lock().unwrap();
        match records.get_mut(&id) {
            Some(record) if record.status == expected => {
                record.status = target;
                record.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

// ---------------------------------------------------------------------------
// Programmable gateway
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct MockGateway {
    create_calls: AtomicUsize,
    counter: AtomicUsize,
    snapshots: Mutex<HashMap<String, IntentSnapshot>>,
}

impl MockGateway {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn create_calls(&self) -> usize {
        self.create_calls.load(Ordering::SeqCst)
    }

    /// Preload the snapshot returned by `get_intent` for an intent id.
    pub fn set_snapshot(&self, snapshot: IntentSnapshot) {
        self.snapshots
            .lock()
            .unwrap()
            .insert(snapshot.intent_id.clone(), snapshot);
    }
}

#[async_trait]
impl PaymentGateway for MockGateway {
    async fn create_intent(
        &self,
        _params: CreateIntentParams,
    ) -> Result<CreatedIntent, GatewayError> {
        self.create_calls.fetch_add(1, Ordering::SeqCst);
        // Suspend like a real network call so concurrent callers interleave.
        tokio::task::yield_now().await;
        let n = self.counter.fetch_add(1, Ordering::SeqCst);
        Ok(CreatedIntent {
            intent_id: format!("pi_mock_{}", n),
            status: GatewayIntentStatus::AwaitingPaymentMethod,
        })
    }

    async fn get_intent(&self, intent_id: &str) -> Result<IntentSnapshot, GatewayError> {
        self.snapshots
            .lock()
            .unwrap()
            .get(intent_id)
            .cloned()
            .ok_or(GatewayError::Api {
                status: 404,
                message: format!("intent {} not found", intent_id),
                retryable: false,
            })
    }

    async fn create_link(
        &self,
        _amount: Decimal,
        _description: Option<&str>,
    ) -> Result<CheckoutLink, GatewayError> {
        Ok(CheckoutLink {
            link_id: "link_mock".to_string(),
            checkout_url: Some("https://pm.link/mock".to_string()),
            status: Some("unpaid".to_string()),
        })
    }

    async fn archive_link(&self, link_id: &str) -> Result<CheckoutLink, GatewayError> {
        Ok(CheckoutLink {
            link_id: link_id.to_string(),
            checkout_url: None,
            status: Some("archived".to_string()),
        })
    }

    async fn list_methods(&self) -> Result<Vec<String>, GatewayError> {
        Ok(vec!["card".to_string(), "gcash".to_string()])
    }
}

// ---------------------------------------------------------------------------
// Recording notifier
// ---------------------------------------------------------------------------

#[derive(Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<(NotificationKind, PaymentReceipt)>>,
}

impl RecordingNotifier {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sent(&self) -> Vec<(NotificationKind, PaymentReceipt)> {
        self.sent.lock().unwrap().clone()
    }

    pub fn count(&self, kind: NotificationKind) -> usize {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(k, _)| *k == kind)
            .count()
    }
}

#[async_trait]
impl NotificationSink for RecordingNotifier {
    async fn notify(&self, kind: NotificationKind, receipt: PaymentReceipt) {
        self.sent.lock().unwrap().push((kind, receipt));
    }
}

// ---------------------------------------------------------------------------
// Webhook signing helper
// ---------------------------------------------------------------------------

pub const TEST_SECRET: &str = "whsk_test_secret";

/// Sign a body the way the gateway does and return the composite header.
pub fn signed_header(secret: &str, body: &str) -> String {
    let timestamp = "1712000000";
    let mut mac = Hmac::<Sha256>::new_from_slice(secret.as_bytes()).unwrap();
    mac.update(format!("{}.{}", timestamp, body).as_bytes());
    let signature = hex::encode(mac.finalize().into_bytes());
    format!("t={},te={},li={}", timestamp, signature, signature)
}
