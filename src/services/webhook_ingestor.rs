//! Webhook ingestion.
//!
//! Events are authenticated with an HMAC-SHA256 signature over
//! `"{timestamp}.{raw_body}"` before any parsing happens. The signature
//! header carries separate test and live segments; which one is checked
//! depends on the configured mode. Signature failure is the only outcome
//! that asks the gateway to redeliver; everything else is acknowledged,
//! applied or not.

use crate::config::WebhookConfig;
use crate::database::error::DatabaseError;
use crate::database::payment_store::{PaymentRecord, PaymentStatus, PaymentStore};
use crate::error::AppError;
use crate::gateway::types::PaymentSource;
use crate::services::notification::{NotificationKind, NotificationSink, PaymentReceipt};
use chrono::{DateTime, Utc};
use hmac::{Hmac, Mac};
use serde::Deserialize;
use sha2::Sha256;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tracing::{info, warn};
use uuid::Uuid;

type HmacSha256 = Hmac<Sha256>;

#[derive(Debug, Error)]
pub enum WebhookError {
    #[error("missing signature header")]
    MissingSignature,

    #[error("malformed signature header")]
    MalformedSignature,

    #[error("signature verification failed")]
    SignatureMismatch,

    #[error(transparent)]
    Store(#[from] DatabaseError),
}

impl From<WebhookError> for AppError {
    fn from(err: WebhookError) -> Self {
        match err {
            WebhookError::MissingSignature
            | WebhookError::MalformedSignature
            | WebhookError::SignatureMismatch => AppError::Authentication(err.to_string()),
            WebhookError::Store(e) => AppError::Database(e),
        }
    }
}

/// What the ingestor did with a signature-valid event. Both variants are
/// acknowledged with a 2xx; `Ignored` carries the reason for the logs.
#[derive(Debug)]
pub enum WebhookOutcome {
    Applied {
        payment_id: Uuid,
        status: PaymentStatus,
    },
    Ignored {
        reason: String,
    },
}

/// Parsed form of the `t=<ts>,te=<test-sig>,li=<live-sig>` header. Either
/// signature segment may be absent depending on the webhook's mode.
#[derive(Debug, PartialEq)]
struct SignatureHeader {
    timestamp: String,
    test_signature: Option<String>,
    live_signature: Option<String>,
}

impl SignatureHeader {
    fn parse(raw: &str) -> Result<Self, WebhookError> {
        let mut timestamp = None;
        let mut test_signature = None;
        let mut live_signature = None;
        for segment in raw.split(',') {
            match segment.trim().split_once('=') {
                Some(("t", value)) => timestamp = Some(value.to_string()),
                Some(("te", value)) => test_signature = Some(value.to_string()),
                Some(("li", value)) => live_signature = Some(value.to_string()),
                _ => {}
            }
        }
        Ok(SignatureHeader {
            timestamp: timestamp.ok_or(WebhookError::MalformedSignature)?,
            test_signature,
            live_signature,
        })
    }
}

/// Verify the composite signature header against the raw request body.
pub fn verify_signature(
    secret: &str,
    header: Option<&str>,
    raw_body: &str,
    live_mode: bool,
) -> Result<(), WebhookError> {
    let header = SignatureHeader::parse(header.ok_or(WebhookError::MissingSignature)?)?;
    let provided = if live_mode {
        header.live_signature
    } else {
        header.test_signature
    }
    .ok_or(WebhookError::MalformedSignature)?;

    let mut mac = HmacSha256::new_from_slice(secret.as_bytes())
        .map_err(|_| WebhookError::SignatureMismatch)?;
    mac.update(header.timestamp.as_bytes());
    mac.update(b".");
    mac.update(raw_body.as_bytes());
    let expected = hex::encode(mac.finalize().into_bytes());

    if secure_eq(expected.as_bytes(), provided.as_bytes()) {
        Ok(())
    } else {
        Err(WebhookError::SignatureMismatch)
    }
}

/// Constant-time byte comparison. Always walks the full length of `a` so the
/// timing does not reveal where the first mismatch sits.
fn secure_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Debug, Deserialize)]
struct WebhookEnvelope {
    data: WebhookEventResource,
}

#[derive(Debug, Deserialize)]
struct WebhookEventResource {
    id: String,
    attributes: WebhookEventAttributes,
}

#[derive(Debug, Deserialize)]
struct WebhookEventAttributes {
    #[serde(rename = "type")]
    event_type: String,
    data: ResourceEnvelope,
}

/// The embedded resource. Payments and links share this loose shape; absent
/// fields stay `None` rather than failing the whole event.
#[derive(Debug, Deserialize)]
struct ResourceEnvelope {
    id: String,
    #[serde(default)]
    attributes: ResourceAttributes,
}

#[derive(Debug, Default, Deserialize)]
struct ResourceAttributes {
    status: Option<String>,
    payment_intent_id: Option<String>,
    external_reference_number: Option<String>,
    paid_at: Option<i64>,
    source: Option<PaymentSource>,
}

#[derive(Debug, Clone, Copy, PartialEq)]
enum WebhookEventKind {
    PaymentPaid,
    PaymentFailed,
    PaymentRefunded,
    LinkStatusUpdated,
    Unknown,
}

impl WebhookEventKind {
    fn from_type(event_type: &str) -> Self {
        match event_type {
            "payment.paid" | "link.payment.paid" => WebhookEventKind::PaymentPaid,
            "payment.failed" => WebhookEventKind::PaymentFailed,
            "payment.refunded" | "payment.refund.updated" => WebhookEventKind::PaymentRefunded,
            "link.status.updated" => WebhookEventKind::LinkStatusUpdated,
            _ => WebhookEventKind::Unknown,
        }
    }
}

pub struct WebhookIngestor {
    store: Arc<dyn PaymentStore>,
    notifier: Arc<dyn NotificationSink>,
    config: WebhookConfig,
}

impl WebhookIngestor {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        notifier: Arc<dyn NotificationSink>,
        config: WebhookConfig,
    ) -> Self {
        Self {
            store,
            notifier,
            config,
        }
    }

    /// Verify, parse, and apply one webhook delivery.
    ///
    /// The raw body must be the exact bytes the gateway signed; any
    /// re-serialization breaks verification. Events that cannot be matched
    /// to a record, or that arrive after the record already moved, are
    /// acknowledged as `Ignored` so the gateway stops redelivering them.
    pub async fn process(
        &self,
        signature_header: Option<&str>,
        raw_body: &str,
    ) -> Result<WebhookOutcome, WebhookError> {
        verify_signature(
            &self.config.signing_secret,
            signature_header,
            raw_body,
            self.config.live_mode,
        )?;

        let envelope: WebhookEnvelope = match serde_json::from_str(raw_body) {
            Ok(parsed) => parsed,
            Err(e) => {
                warn!(error = %e, "webhook body failed to parse, acknowledging");
                return Ok(WebhookOutcome::Ignored {
                    reason: "malformed event payload".to_string(),
                });
            }
        };

        let event_id = envelope.data.id;
        let event_type = envelope.data.attributes.event_type;
        let resource = envelope.data.attributes.data;
        let kind = WebhookEventKind::from_type(&event_type);
        info!(event_id = %event_id, event_type = %event_type, "webhook event received");

        match kind {
            WebhookEventKind::PaymentPaid => self.apply_paid(resource).await,
            WebhookEventKind::PaymentFailed => self.apply_failed(resource).await,
            WebhookEventKind::PaymentRefunded => self.apply_refunded(resource).await,
            WebhookEventKind::LinkStatusUpdated => self.apply_link_update(resource).await,
            WebhookEventKind::Unknown => {
                info!(event_type = %event_type, "unrecognized webhook event type, acknowledging");
                Ok(WebhookOutcome::Ignored {
                    reason: format!("unhandled event type: {}", event_type),
                })
            }
        }
    }

    async fn apply_paid(&self, resource: ResourceEnvelope) -> Result<WebhookOutcome, WebhookError> {
        let intent_id = resource.attributes.payment_intent_id.as_deref();
        let record = match self.locate(intent_id).await? {
            Some(record) => record,
            None => return Ok(unmatched(intent_id)),
        };

        if record.status.is_terminal() {
            return Ok(WebhookOutcome::Ignored {
                reason: format!("payment already {}", record.status),
            });
        }

        let paid_at = resource
            .attributes
            .paid_at
            .and_then(|secs| DateTime::<Utc>::from_timestamp(secs, 0))
            .unwrap_or_else(Utc::now);
        let reference = resource
            .attributes
            .external_reference_number
            .as_deref()
            .or(Some(resource.id.as_str()));
        let method = resource
            .attributes
            .source
            .as_ref()
            .and_then(|s| s.source_type.as_deref());

        // Conditional update: only one delivery of this event can move the
        // record out of pending, and only the winner notifies.
        if !self
            .store
            .mark_paid(record.id, paid_at, reference, method)
            .await?
        {
            return Ok(WebhookOutcome::Ignored {
                reason: "payment already transitioned".to_string(),
            });
        }

        info!(
            payment_id = %record.id,
            transaction_code = %record.transaction_code,
            "payment marked paid from webhook"
        );
        self.notifier
            .notify(
                NotificationKind::PaymentReceived,
                PaymentReceipt {
                    recipient: record.payer_email.clone(),
                    transaction_code: record.transaction_code.clone(),
                    amount: record.amount,
                    payment_method: method.unwrap_or(&record.payment_method).to_string(),
                    paid_at: Some(paid_at),
                },
            )
            .await;

        Ok(WebhookOutcome::Applied {
            payment_id: record.id,
            status: PaymentStatus::Paid,
        })
    }

    async fn apply_failed(
        &self,
        resource: ResourceEnvelope,
    ) -> Result<WebhookOutcome, WebhookError> {
        let intent_id = resource.attributes.payment_intent_id.as_deref();
        let record = match self.locate(intent_id).await? {
            Some(record) => record,
            None => return Ok(unmatched(intent_id)),
        };

        if !self.store.mark_failed(record.id).await? {
            return Ok(WebhookOutcome::Ignored {
                reason: "payment already transitioned".to_string(),
            });
        }

        warn!(
            payment_id = %record.id,
            transaction_code = %record.transaction_code,
            "payment marked failed from webhook"
        );
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

        Ok(WebhookOutcome::Applied {
            payment_id: record.id,
            status: PaymentStatus::Failed,
        })
    }

    async fn apply_refunded(
        &self,
        resource: ResourceEnvelope,
    ) -> Result<WebhookOutcome, WebhookError> {
        let intent_id = resource.attributes.payment_intent_id.as_deref();
        let record = match self.locate(intent_id).await? {
            Some(record) => record,
            None => return Ok(unmatched(intent_id)),
        };

        // Refund only applies on top of paid; the conditional update rejects
        // everything else.
        if !self
            .store
            .mark_refunded(
                record.id,
                resource.attributes.external_reference_number.as_deref(),
            )
            .await?
        {
            return Ok(WebhookOutcome::Ignored {
                reason: format!("refund does not apply to a {} payment", record.status),
            });
        }

        info!(payment_id = %record.id, "payment marked refunded from webhook");
        Ok(WebhookOutcome::Applied {
            payment_id: record.id,
            status: PaymentStatus::Refunded,
        })
    }

    async fn apply_link_update(
        &self,
        resource: ResourceEnvelope,
    ) -> Result<WebhookOutcome, WebhookError> {
        let status = resource.attributes.status.as_deref().unwrap_or_default();
        if status != "expired" && status != "archived" {
            return Ok(WebhookOutcome::Ignored {
                reason: format!("link status '{}' requires no action", status),
            });
        }

        // Links do not carry an intent id; the link id is stored as the
        // record's reference.
        let record = match self.store.find_by_reference(&resource.id).await? {
            Some(record) => Some(record),
            None => self.locate(None).await?,
        };
        let record = match record {
            Some(record) => record,
            None => return Ok(unmatched(Some(&resource.id))),
        };

        if !self.store.mark_cancelled(record.id).await? {
            return Ok(WebhookOutcome::Ignored {
                reason: "payment already transitioned".to_string(),
            });
        }

        info!(
            payment_id = %record.id,
            link_id = %resource.id,
            link_status = %status,
            "payment cancelled after link expiry"
        );
        Ok(WebhookOutcome::Applied {
            payment_id: record.id,
            status: PaymentStatus::Cancelled,
        })
    }

    /// Match an event to a record: by intent id when the resource carries
    /// one, otherwise the most recent pending record without an intent,
    /// bounded by the configured window. The fallback never returns a
    /// terminal record.
    async fn locate(&self, intent_id: Option<&str>) -> Result<Option<PaymentRecord>, DatabaseError> {
        if let Some(intent_id) = intent_id {
            if let Some(record) = self.store.find_by_intent_id(intent_id).await? {
                return Ok(Some(record));
            }
        }

        let window = Duration::from_secs(self.config.fallback_match_window_secs);
        let fallback = self.store.find_recent_unmatched_pending(window).await?;
        if let (Some(record), Some(intent_id)) = (&fallback, intent_id) {
            warn!(
                payment_id = %record.id,
                intent_id = %intent_id,
                "no record for intent, matched most recent pending payment"
            );
            // Best effort attach so subsequent events match directly.
            let _ = self.store.claim_intent(record.id, intent_id).await?;
        }
        Ok(fallback)
    }
}

fn unmatched(identifier: Option<&str>) -> WebhookOutcome {
    WebhookOutcome::Ignored {
        reason: format!(
            "no payment record matches event (identifier: {})",
            identifier.unwrap_or("none")
        ),
    }
}
