//! Idempotent intent creation.
//!
//! The single most important guard against double-charging is the
//! short-circuit on an already-persisted intent id; the second line of
//! defense is the conditional claim of the intent id after the external
//! call, which forces all concurrent callers to converge on whichever
//! intent won the write. The external call itself is deliberately not
//! serialized.

use crate::database::error::DatabaseError;
use crate::database::payment_store::{NewPaymentRecord, PaymentStatus, PaymentStore};
use crate::error::AppError;
use crate::gateway::types::CreateIntentParams;
use crate::gateway::{GatewayError, PaymentGateway};
use rust_decimal::Decimal;
use std::sync::Arc;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum IntentError {
    #[error("payment {0} not found")]
    NotFound(Uuid),

    #[error("payment {id} is locked or already processed (status: {status})")]
    Locked { id: Uuid, status: PaymentStatus },

    #[error("payment {0} has no idempotency key")]
    MissingIdempotencyKey(Uuid),

    #[error("invalid amount: {0}")]
    InvalidAmount(Decimal),

    #[error(transparent)]
    Gateway(#[from] GatewayError),

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<IntentError> for AppError {
    fn from(err: IntentError) -> Self {
        match err {
            IntentError::NotFound(id) => AppError::not_found("PaymentRecord", id),
            IntentError::Locked { .. } => AppError::Conflict(err.to_string()),
            // A record without its key is broken setup, not a retryable
            // request failure.
            IntentError::MissingIdempotencyKey(_) => AppError::Configuration(err.to_string()),
            IntentError::InvalidAmount(_) => {
                AppError::validation("amount", "amount must be a positive value")
            }
            IntentError::Gateway(e) => e.into(),
            IntentError::Store(e) => AppError::Database(e),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IntentOutcome {
    pub payment_id: Uuid,
    pub intent_id: String,
    pub amount: Decimal,
    pub status: PaymentStatus,
}

pub struct IntentCreator {
    store: Arc<dyn PaymentStore>,
    gateway: Arc<dyn PaymentGateway>,
}

impl IntentCreator {
    pub fn new(store: Arc<dyn PaymentStore>, gateway: Arc<dyn PaymentGateway>) -> Self {
        Self { store, gateway }
    }

    /// Create (or return) the gateway intent for an existing payment.
    ///
    /// Gateway failures surface to the caller unretried; retrying with the
    /// same `payment_id` is safe because of the short-circuit.
    pub async fn create_for_payment(
        &self,
        payment_id: Uuid,
        description: Option<String>,
    ) -> Result<IntentOutcome, IntentError> {
        self.drive_existing(payment_id, description).await
    }

    /// Gateway-initiated flow: no record exists yet, so a fresh pending one
    /// is created and then driven through the same intent path.
    pub async fn create_standalone(
        &self,
        amount: Decimal,
        description: Option<String>,
    ) -> Result<IntentOutcome, IntentError> {
        if amount <= Decimal::ZERO {
            return Err(IntentError::InvalidAmount(amount));
        }
        let new = NewPaymentRecord::pending(None, amount, description.clone());
        // Freshly minted keys cannot collide, but the duplicate guard stays
        // cheap and catches a re-driven insert.
        if let Some(existing) = self
            .store
            .find_by_idempotency_key(&new.idempotency_key)
            .await?
        {
            return self.drive_existing(existing.id, description).await;
        }
        let record = self.store.create(new).await?;
        info!(
            payment_id = %record.id,
            transaction_code = %record.transaction_code,
            "created payment record for gateway-initiated intent"
        );
        self.drive_existing(record.id, description).await
    }

    async fn drive_existing(
        &self,
        id: Uuid,
        description: Option<String>,
    ) -> Result<IntentOutcome, IntentError> {
        let record = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(IntentError::NotFound(id))?;

        // Resubmission of a finished payment is a conflict, never a charge.
        if record.status != PaymentStatus::Pending {
            return Err(IntentError::Locked {
                id,
                status: record.status,
            });
        }

        // Idempotent short-circuit: an intent already exists, return it
        // without touching the gateway.
        if let Some(intent_id) = record.payment_intent_id {
            return Ok(IntentOutcome {
                payment_id: id,
                intent_id,
                amount: record.amount,
                status: record.status,
            });
        }

        let idempotency_key = record
            .idempotency_key
            .clone()
            .ok_or(IntentError::MissingIdempotencyKey(id))?;

        let created = self
            .gateway
            .create_intent(CreateIntentParams {
                amount: record.amount,
                description: description.or(record.description.clone()),
                idempotency_key,
            })
            .await?;

        // Race detection: a concurrent execution may have persisted a
        // different intent while ours was in flight. The record wins.
        let latest = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(IntentError::NotFound(id))?;
        if let Some(existing) = latest.payment_intent_id {
            if existing != created.intent_id {
                warn!(
                    payment_id = %id,
                    discarded_intent = %created.intent_id,
                    persisted_intent = %existing,
                    "concurrent intent creation detected; discarding local intent"
                );
            }
            return Ok(IntentOutcome {
                payment_id: id,
                intent_id: existing,
                amount: latest.amount,
                status: latest.status,
            });
        }

        // Atomic commit: only wins while the record is still
        // {pending, intent_id = NULL}. Zero affected rows means another
        // writer got there first; their intent id is the real one.
        if self.store.claim_intent(id, &created.intent_id).await? {
            info!(
                payment_id = %id,
                intent_id = %created.intent_id,
                "payment intent claimed"
            );
            return Ok(IntentOutcome {
                payment_id: id,
                intent_id: created.intent_id,
                amount: latest.amount,
                status: latest.status,
            });
        }

        let current = self
            .store
            .find_by_id(id)
            .await?
            .ok_or(IntentError::NotFound(id))?;
        match current.payment_intent_id {
            Some(winner) => Ok(IntentOutcome {
                payment_id: id,
                intent_id: winner,
                amount: current.amount,
                status: current.status,
            }),
            // No intent and the claim failed: the record left `pending`
            // while we were talking to the gateway.
            None => Err(IntentError::Locked {
                id,
                status: current.status,
            }),
        }
    }
}
