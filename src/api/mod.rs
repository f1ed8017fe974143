//! HTTP surface: router construction and shared request state.

pub mod payments;
pub mod webhooks;

use crate::database::payment_store::PaymentStore;
use crate::gateway::PaymentGateway;
use crate::middleware::log_requests;
use crate::services::intent_creator::IntentCreator;
use crate::services::reconciler::Reconciler;
use crate::services::webhook_ingestor::WebhookIngestor;
use axum::routing::{get, post};
use axum::Router;
use sqlx::PgPool;
use std::sync::Arc;
use tower_http::request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer};

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn PaymentStore>,
    pub gateway: Arc<dyn PaymentGateway>,
    pub intents: Arc<IntentCreator>,
    pub webhooks: Arc<WebhookIngestor>,
    pub reconciler: Arc<Reconciler>,
    pub pool: PgPool,
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(crate::health::health))
        .route("/payments", post(payments::create_payment))
        .route("/payments/{id}", get(payments::get_payment))
        .route("/payments/{id}/intent", post(payments::create_intent))
        .route("/payments/{id}/link", post(payments::create_checkout_link))
        .route(
            "/payments/{id}/link/archive",
            post(payments::archive_checkout_link),
        )
        .route("/payment-methods", get(payments::list_payment_methods))
        .route("/webhook", post(webhooks::handle_webhook))
        .layer(axum::middleware::from_fn(log_requests))
        .layer(PropagateRequestIdLayer::x_request_id())
        .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
        .with_state(state)
}
