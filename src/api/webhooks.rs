//! Gateway webhook endpoint.
//!
//! The handler takes the body as raw text so the signature is verified over
//! the exact bytes the gateway signed. Signature failure is the only non-2xx
//! outcome; everything else is acknowledged so the gateway stops retrying.

use crate::api::AppState;
use crate::error::{AppError, AppResult};
use crate::services::webhook_ingestor::WebhookOutcome;
use axum::extract::State;
use axum::http::HeaderMap;
use axum::Json;
use serde::Serialize;
use uuid::Uuid;

const SIGNATURE_HEADER: &str = "paymongo-signature";

#[derive(Debug, Serialize)]
pub struct WebhookResponse {
    pub received: bool,
    pub action: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payment_id: Option<Uuid>,
}

/// POST /webhook
pub async fn handle_webhook(
    State(state): State<AppState>,
    headers: HeaderMap,
    body: String,
) -> AppResult<Json<WebhookResponse>> {
    let signature = headers
        .get(SIGNATURE_HEADER)
        .and_then(|value| value.to_str().ok());

    let outcome = state
        .webhooks
        .process(signature, &body)
        .await
        .map_err(AppError::from)?;

    let response = match outcome {
        WebhookOutcome::Applied { payment_id, .. } => WebhookResponse {
            received: true,
            action: "applied",
            payment_id: Some(payment_id),
        },
        WebhookOutcome::Ignored { .. } => WebhookResponse {
            received: true,
            action: "ignored",
            payment_id: None,
        },
    };
    Ok(Json(response))
}
