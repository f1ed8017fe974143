mod common;

use axum::body::Body;
use axum::http::{header, Request, StatusCode};
use axum::Router;
use campuspay_backend::api::{self, AppState};
use campuspay_backend::config::WebhookConfig;
use campuspay_backend::database::payment_store::{NewPaymentRecord, PaymentStatus, PaymentStore};
use campuspay_backend::services::intent_creator::IntentCreator;
use campuspay_backend::services::reconciler::Reconciler;
use campuspay_backend::services::webhook_ingestor::WebhookIngestor;
use common::{signed_header, InMemoryPaymentStore, MockGateway, RecordingNotifier, TEST_SECRET};
use rust_decimal::Decimal;
use serde_json::{json, Value};
use sqlx::PgPool;
use std::sync::Arc;
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> (Arc<InMemoryPaymentStore>, Router) {
    let store = Arc::new(InMemoryPaymentStore::new());
    let gateway = Arc::new(MockGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let webhook_config = WebhookConfig {
        signing_secret: TEST_SECRET.to_string(),
        live_mode: false,
        fallback_match_window_secs: 1800,
    };

    let state = AppState {
        store: store.clone(),
        gateway: gateway.clone(),
        intents: Arc::new(IntentCreator::new(store.clone(), gateway.clone())),
        webhooks: Arc::new(WebhookIngestor::new(
            store.clone(),
            notifier.clone(),
            webhook_config,
        )),
        reconciler: Arc::new(Reconciler::new(store.clone(), gateway, notifier)),
        // Lazy pool: never connected, only the /health probe would touch it.
        pool: PgPool::connect_lazy("postgres://localhost/unused").unwrap(),
    };
    (store, api::router(state))
}

async fn body_json(response: axum::response::Response) -> Value {
    let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn create_and_fetch_a_payment() {
    let (_store, router) = app();

    let request = Request::post("/payments")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "amount": "500.00", "description": "tuition" }).to_string(),
        ))
        .unwrap();
    let response = router.clone().oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "pending");
    let id = created["id"].as_str().unwrap().to_string();

    let request = Request::get(format!("/payments/{}", id).as_str())
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let fetched = body_json(response).await;
    assert_eq!(fetched["id"].as_str().unwrap(), id);
}

#[tokio::test]
async fn offline_payment_is_created_already_paid() {
    let (store, router) = app();

    let request = Request::post("/payments")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(
            json!({ "amount": "250", "paid": true, "payment_method": "cash" }).to_string(),
        ))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::CREATED);
    let created = body_json(response).await;
    assert_eq!(created["status"], "paid");

    let id: Uuid = created["id"].as_str().unwrap().parse().unwrap();
    let record = store.get(id).unwrap();
    assert_eq!(record.status, PaymentStatus::Paid);
    assert!(record.paid_at.is_some());
}

#[tokio::test]
async fn non_positive_amount_is_rejected() {
    let (_store, router) = app();

    let request = Request::post("/payments")
        .header(header::CONTENT_TYPE, "application/json")
        .body(Body::from(json!({ "amount": "0" }).to_string()))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
}

#[tokio::test]
async fn unknown_payment_is_404() {
    let (_store, router) = app();
    let request = Request::get(format!("/payments/{}", Uuid::new_v4()).as_str())
        .body(Body::empty())
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

#[tokio::test]
async fn intent_endpoint_is_idempotent_over_http() {
    let (store, router) = app();
    let record = store
        .create(NewPaymentRecord::pending(None, Decimal::from(500), None))
        .await
        .unwrap();

    let first = router
        .clone()
        .oneshot(
            Request::post(format!("/payments/{}/intent", record.id).as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let first = body_json(first).await;

    let second = router
        .oneshot(
            Request::post(format!("/payments/{}/intent", record.id).as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    let second = body_json(second).await;
    assert_eq!(first["payment_intent_id"], second["payment_intent_id"]);
}

#[tokio::test]
async fn webhook_with_bad_signature_gets_401() {
    let (_store, router) = app();
    let body = json!({ "data": { "id": "evt", "attributes": { "type": "payment.paid", "data": { "id": "pay", "attributes": {} } } } })
        .to_string();

    let request = Request::post("/webhook")
        .header("paymongo-signature", "t=1,te=deadbeef")
        .body(Body::from(body))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);
    let body = body_json(response).await;
    assert_eq!(body["error"]["code"], "AUTHENTICATION_ERROR");
}

#[tokio::test]
async fn signature_valid_unknown_event_gets_200() {
    let (_store, router) = app();
    let body = json!({ "data": { "id": "evt", "attributes": { "type": "source.chargeable", "data": { "id": "src", "attributes": {} } } } })
        .to_string();
    let header = signed_header(TEST_SECRET, &body);

    let request = Request::post("/webhook")
        .header("paymongo-signature", header)
        .body(Body::from(body))
        .unwrap();
    let response = router.oneshot(request).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let body = body_json(response).await;
    assert_eq!(body["received"], true);
    assert_eq!(body["action"], "ignored");
}

#[tokio::test]
async fn checkout_link_roundtrip_cancels_on_archive() {
    let (store, router) = app();
    let record = store
        .create(NewPaymentRecord::pending(None, Decimal::from(900), None))
        .await
        .unwrap();

    let response = router
        .clone()
        .oneshot(
            Request::post(format!("/payments/{}/link", record.id).as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let link = body_json(response).await;
    assert!(link["checkout_url"].as_str().is_some());

    let response = router
        .oneshot(
            Request::post(format!("/payments/{}/link/archive", record.id).as_str())
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(store.get(record.id).unwrap().status, PaymentStatus::Cancelled);
}
