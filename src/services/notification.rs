//! Receipt dispatch. Strictly fire-and-forget: a failed notification is
//! logged and dropped, it never blocks or rolls back the state transition
//! that triggered it.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::{error, info};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PaymentReceipt {
    pub recipient: Option<String>,
    pub transaction_code: String,
    pub amount: Decimal,
    pub payment_method: String,
    pub paid_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum NotificationKind {
    PaymentReceived,
    PaymentFailed,
}

#[async_trait]
pub trait NotificationSink: Send + Sync {
    async fn notify(&self, kind: NotificationKind, receipt: PaymentReceipt);
}

/// Default sink: structured log lines only. Email/SMS delivery hangs off the
/// same trait without touching the payment components.
pub struct LogNotificationSink;

impl LogNotificationSink {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LogNotificationSink {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl NotificationSink for LogNotificationSink {
    async fn notify(&self, kind: NotificationKind, receipt: PaymentReceipt) {
        match kind {
            NotificationKind::PaymentReceived => {
                info!(
                    transaction_code = %receipt.transaction_code,
                    recipient = receipt.recipient.as_deref().unwrap_or("unknown"),
                    amount = %receipt.amount,
                    payment_method = %receipt.payment_method,
                    paid_at = ?receipt.paid_at,
                    "NOTIFICATION: payment received"
                );
            }
            NotificationKind::PaymentFailed => {
                error!(
                    transaction_code = %receipt.transaction_code,
                    recipient = receipt.recipient.as_deref().unwrap_or("unknown"),
                    amount = %receipt.amount,
                    "NOTIFICATION: payment failed"
                );
            }
        }
    }
}
