//! Status reconciliation against the gateway.
//!
//! The gateway is the source of truth; the local record follows it. Each
//! reconciliation pulls one intent, matches it to a record (by intent id, by
//! processor reference, or as a last resort by reconstructing the record),
//! and applies whichever transitions the snapshot justifies. Every write is
//! conditional, so re-running a reconciliation is a no-op.

use crate::database::error::DatabaseError;
use crate::database::payment_store::{NewPaymentRecord, PaymentRecord, PaymentStatus, PaymentStore};
use crate::error::AppError;
use crate::gateway::types::{
    GatewayIntentStatus, GatewayPayment, GatewayPaymentStatus, IntentSnapshot,
};
use crate::gateway::{GatewayError, PaymentGateway};
use crate::services::notification::{NotificationKind, NotificationSink, PaymentReceipt};
use chrono::Utc;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<ReconcileError> for AppError {
    fn from(err: ReconcileError) -> Self {
        match err {
            ReconcileError::Gateway(e) => e.into(),
            ReconcileError::Store(e) => AppError::Database(e),
        }
    }
}

/// What one reconciliation pass did to the record.
#[derive(Debug, Clone)]
pub struct ReconcileReport {
    pub payment_id: Uuid,
    pub previous: PaymentStatus,
    pub current: PaymentStatus,
    /// True when no local record existed and one was created from the
    /// gateway snapshot.
    pub reconstructed: bool,
}

pub struct Reconciler {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
    notifier: Arc<dyn NotificationSink>,
}

impl Reconciler {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        gateway: Arc<dyn PaymentGateway>,
        notifier: Arc<dyn NotificationSink>,
    ) -> Self {
        Self {
            store,
            gateway,
            notifier,
        }
    }

    /// Pull the gateway truth for `intent_id` and fold it into the local
    /// record.
    pub async fn reconcile_intent(&self, intent_id: &str) -> Result<ReconcileReport, ReconcileError> {
        let snapshot = self.gateway.get_intent(intent_id).await?;
        let (record, reconstructed) = self.match_or_reconstruct(&snapshot).await?;
        let previous = record.status;
        let current = self.apply(&record, &snapshot).await?;

        if previous != current {
            info!(
                payment_id = %record.id,
                intent_id = %snapshot.intent_id,
                from = %previous,
                to = %current,
                "payment reconciled against gateway"
            );
        }

        Ok(ReconcileReport {
            payment_id: record.id,
            previous,
            current,
            reconstructed,
        })
    }

    /// Reconcile a known record. Records without an intent id have nothing
    /// to reconcile against and are reported unchanged.
    pub async fn reconcile_record(
        &self,
        record: &PaymentRecord,
    ) -> Result<ReconcileReport, ReconcileError> {
        match record.payment_intent_id.as_deref() {
            Some(intent_id) => self.reconcile_intent(intent_id).await,
            None => Ok(ReconcileReport {
                payment_id: record.id,
                previous: record.status,
                current: record.status,
                reconstructed: false,
            }),
        }
    }

    /// Locate the record for a snapshot: intent id first, processor
    /// reference second, reconstruction last. Reconstruction creates a
    /// pending record carrying the intent id and a fresh idempotency key so
    /// the normal transition path below applies to it too.
    async fn match_or_reconstruct(
        &self,
        snapshot: &IntentSnapshot,
    ) -> Result<(PaymentRecord, bool), ReconcileError> {
        if let Some(record) = self.store.find_by_intent_id(&snapshot.intent_id).await? {
            return Ok((record, false));
        }

        for payment in &snapshot.payments {
            if let Some(reference) = payment.reference.as_deref() {
                if let Some(record) = self.store.find_by_reference(reference).await? {
                    if record.payment_intent_id.is_none() {
                        let _ = self
                            .store
                            .claim_intent(record.id, &snapshot.intent_id)
                            .await?;
                    }
                    return Ok((record, false));
                }
            }
        }

        warn!(
            intent_id = %snapshot.intent_id,
            amount = %snapshot.amount,
            "no local record for gateway intent, reconstructing"
        );
        let new = NewPaymentRecord::pending(
            None,
            snapshot.amount,
            Some("recovered from gateway during reconciliation".to_string()),
        )
        .with_intent_id(Some(snapshot.intent_id.clone()));
        let record = self.store.create(new).await?;
        Ok((record, true))
    }

    /// Apply the snapshot to the record and return the resulting status.
    async fn apply(
        &self,
        record: &PaymentRecord,
        snapshot: &IntentSnapshot,
    ) -> Result<PaymentStatus, ReconcileError> {
        let mut status = record.status;

        if status == PaymentStatus::Pending {
            match pending_target(snapshot) {
                Some((PaymentStatus::Paid, Some(payment))) => {
                    let paid_at = payment.paid_at.unwrap_or_else(Utc::now);
                    if self
                        .store
                        .mark_paid(
                            record.id,
                            paid_at,
                            payment.reference.as_deref(),
                            payment.method.as_deref(),
                        )
                        .await?
                    {
                        status = PaymentStatus::Paid;
                        self.notifier
                            .notify(
                                NotificationKind::PaymentReceived,
                                PaymentReceipt {
                                    recipient: record.payer_email.clone(),
                                    transaction_code: record.transaction_code.clone(),
                                    amount: record.amount,
                                    payment_method: payment
                                        .method
                                        .clone()
                                        .unwrap_or_else(|| record.payment_method.clone()),
                                    paid_at: Some(paid_at),
                                },
                            )
                            .await;
                    } else {
                        status = self.refreshed_status(record.id, status).await?;
                    }
                }
                Some((PaymentStatus::Cancelled, _)) => {
                    if self.store.mark_cancelled(record.id).await? {
                        status = PaymentStatus::Cancelled;
                    } else {
                        status = self.refreshed_status(record.id, status).await?;
                    }
                }
                Some((PaymentStatus::Failed, _)) => {
                    if self.store.mark_failed(record.id).await? {
                        status = PaymentStatus::Failed;
                        self.notifier
                            .notify(
                                NotificationKind::PaymentFailed,
                                PaymentReceipt {
                                    recipient: record.payer_email.clone(),
                                    transaction_code: record.transaction_code.clone(),
                                    amount: record.amount,
                                    payment_method: record.payment_method.clone(),
                                    paid_at: None,
                                },
                            )
                            .await;
                    } else {
                        status = self.refreshed_status(record.id, status).await?;
                    }
                }
                _ => {}
            }
        }

        // Refunds only stack on paid. A refund reported for a record in any
        // other state is logged and left alone.
        if refund_applies(snapshot) {
            if status == PaymentStatus::Paid {
                let reference = snapshot.refunds.first().map(|r| r.id.as_str());
                if self.store.mark_refunded(record.id, reference).await? {
                    status = PaymentStatus::Refunded;
                }
            } else if status != PaymentStatus::Refunded {
                warn!(
                    payment_id = %record.id,
                    status = %status,
                    "gateway reports a refund but the payment is not paid"
                );
            }
        }

        Ok(status)
    }

    async fn refreshed_status(
        &self,
        id: Uuid,
        fallback: PaymentStatus,
    ) -> Result<PaymentStatus, ReconcileError> {
        Ok(self
            .store
            .find_by_id(id)
            .await?
            .map(|r| r.status)
            .unwrap_or(fallback))
    }
}

/// Decide where a pending record should move given the gateway snapshot.
/// Paid wins over everything; an intent the gateway cancelled cancels the
/// record; a failed attempt with no successor fails it. Anything else leaves
/// the record pending.
fn pending_target(snapshot: &IntentSnapshot) -> Option<(PaymentStatus, Option<&GatewayPayment>)> {
    if let Some(paid) = snapshot
        .payments
        .iter()
        .find(|p| p.status == GatewayPaymentStatus::Paid)
    {
        return Some((PaymentStatus::Paid, Some(paid)));
    }
    if snapshot.status == GatewayIntentStatus::Cancelled {
        return Some((PaymentStatus::Cancelled, None));
    }
    if !snapshot.payments.is_empty()
        && snapshot
            .payments
            .iter()
            .all(|p| p.status == GatewayPaymentStatus::Failed)
    {
        return Some((PaymentStatus::Failed, None));
    }
    None
}

fn refund_applies(snapshot: &IntentSnapshot) -> bool {
    !snapshot.refunds.is_empty()
        || snapshot
            .payments
            .iter()
            .any(|p| p.status == GatewayPaymentStatus::Refunded)
}
