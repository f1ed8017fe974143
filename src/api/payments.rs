//! Payment endpoints.

use crate::api::AppState;
use crate::database::payment_store::{NewPaymentRecord, PaymentRecord, PaymentStatus};
use crate::error::{AppError, AppResult};
use crate::services::intent_creator::IntentOutcome;
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Deserialize)]
pub struct CreatePaymentRequest {
    pub user_id: Option<Uuid>,
    pub amount: Decimal,
    pub description: Option<String>,
    pub payer_email: Option<String>,
    /// Offline/manual payments (cashier receipts) are recorded already
    /// settled and never touch the gateway.
    #[serde(default)]
    pub paid: bool,
    #[serde(default)]
    pub payment_method: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct IntentResponse {
    pub payment_id: Uuid,
    pub payment_intent_id: String,
    pub amount: Decimal,
    pub status: String,
}

impl From<IntentOutcome> for IntentResponse {
    fn from(outcome: IntentOutcome) -> Self {
        Self {
            payment_id: outcome.payment_id,
            payment_intent_id: outcome.intent_id,
            amount: outcome.amount,
            status: outcome.status.to_string(),
        }
    }
}

/// POST /payments
pub async fn create_payment(
    State(state): State<AppState>,
    Json(request): Json<CreatePaymentRequest>,
) -> AppResult<(StatusCode, Json<PaymentRecord>)> {
    if request.amount <= Decimal::ZERO {
        return Err(AppError::validation("amount", "amount must be positive"));
    }

    let new = if request.paid {
        let method = request.payment_method.as_deref().unwrap_or("cash");
        NewPaymentRecord::paid(request.user_id, request.amount, method, request.description)
    } else {
        NewPaymentRecord::pending(request.user_id, request.amount, request.description)
    }
    .with_payer_email(request.payer_email);
    let record = state.store.create(new).await?;
    Ok((StatusCode::CREATED, Json(record)))
}

/// GET /payments/{id}
///
/// A pending record with an intent is reconciled against the gateway before
/// it is returned, so the caller sees the freshest status available.
pub async fn get_payment(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<PaymentRecord>> {
    let record = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("PaymentRecord", id))?;

    if record.status == PaymentStatus::Pending && record.payment_intent_id.is_some() {
        state.reconciler.reconcile_record(&record).await?;
        let refreshed = state
            .store
            .find_by_id(id)
            .await?
            .ok_or_else(|| AppError::not_found("PaymentRecord", id))?;
        return Ok(Json(refreshed));
    }
    Ok(Json(record))
}

/// POST /payments/{id}/intent
///
/// Safe to call repeatedly; an existing intent is returned as-is. The
/// intent's description is the record's.
pub async fn create_intent(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<IntentResponse>> {
    let outcome = state.intents.create_for_payment(id, None).await?;
    Ok(Json(outcome.into()))
}

#[derive(Debug, Serialize)]
pub struct LinkResponse {
    pub payment_id: Uuid,
    pub link_id: String,
    pub checkout_url: Option<String>,
}

/// POST /payments/{id}/link
///
/// Creates a hosted checkout link for a pending payment. The link id is
/// stored as the record's reference so a later `link.status.updated` event
/// can find it.
pub async fn create_checkout_link(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LinkResponse>> {
    let record = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("PaymentRecord", id))?;
    if record.status != PaymentStatus::Pending {
        return Err(AppError::Conflict(format!(
            "payment {} is {}, a checkout link requires pending",
            id, record.status
        )));
    }

    let link = state
        .gateway
        .create_link(record.amount, record.description.as_deref())
        .await
        .map_err(AppError::from)?;
    state.store.set_reference(record.id, &link.link_id).await?;

    Ok(Json(LinkResponse {
        payment_id: record.id,
        link_id: link.link_id,
        checkout_url: link.checkout_url,
    }))
}

/// POST /payments/{id}/link/archive
///
/// Archives the hosted checkout link and cancels the pending payment it was
/// issued for.
pub async fn archive_checkout_link(
    State(state): State<AppState>,
    Path(id): Path<Uuid>,
) -> AppResult<Json<LinkResponse>> {
    let record = state
        .store
        .find_by_id(id)
        .await?
        .ok_or_else(|| AppError::not_found("PaymentRecord", id))?;
    let link_id = record
        .reference_number
        .as_deref()
        .ok_or_else(|| AppError::Conflict(format!("payment {} has no checkout link", id)))?;

    let link = state
        .gateway
        .archive_link(link_id)
        .await
        .map_err(AppError::from)?;
    // No-op if a webhook already moved the record.
    state.store.mark_cancelled(record.id).await?;

    Ok(Json(LinkResponse {
        payment_id: record.id,
        link_id: link.link_id,
        checkout_url: link.checkout_url,
    }))
}

/// GET /payment-methods
pub async fn list_payment_methods(
    State(state): State<AppState>,
) -> AppResult<Json<Vec<String>>> {
    let methods = state.gateway.list_methods().await.map_err(AppError::from)?;
    Ok(Json(methods))
}
