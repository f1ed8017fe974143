mod common;

use campuspay_backend::database::payment_store::{NewPaymentRecord, PaymentStatus, PaymentStore};
use campuspay_backend::services::reconciler::Reconciler;
use campuspay_backend::workers::{
    ExpirySweeper, ExpirySweeperConfig, ReconcileWorker, ReconcileWorkerConfig,
};
use chrono::Utc;
use common::{InMemoryPaymentStore, MockGateway, RecordingNotifier};
use rust_decimal::Decimal;
use std::sync::Arc;
use std::time::Duration;
use uuid::Uuid;

const DAY: Duration = Duration::from_secs(86_400);

async fn pending(store: &Arc<InMemoryPaymentStore>) -> Uuid {
    store
        .create(NewPaymentRecord::pending(None, Decimal::from(100), None))
        .await
        .unwrap()
        .id
}

fn sweeper(store: Arc<InMemoryPaymentStore>) -> ExpirySweeper {
    ExpirySweeper::new(
        store,
        ExpirySweeperConfig {
            interval_secs: 300,
            max_age_secs: DAY.as_secs(),
            batch_size: 100,
        },
    )
}

#[tokio::test]
async fn stale_pending_payments_are_failed() {
    let store = Arc::new(InMemoryPaymentStore::new());
    let stale = pending(&store).await;
    store.backdate(stale, DAY * 2);

    let flipped = sweeper(store.clone()).sweep_once().await.unwrap();

    assert_eq!(flipped, 1);
    assert_eq!(store.get(stale).unwrap().status, PaymentStatus::Failed);
}

#[tokio::test]
async fn young_pending_payments_are_left_alone() {
    let store = Arc::new(InMemoryPaymentStore::new());
    let young = pending(&store).await;

    let flipped = sweeper(store.clone()).sweep_once().await.unwrap();

    assert_eq!(flipped, 0);
    assert_eq!(store.get(young).unwrap().status, PaymentStatus::Pending);
}

#[tokio::test]
async fn paid_payments_are_never_expired() {
    let store = Arc::new(InMemoryPaymentStore::new());
    let paid = pending(&store).await;
    assert!(store.mark_paid(paid, Utc::now(), None, None).await.unwrap());
    store.backdate(paid, DAY * 2);

    let flipped = sweeper(store.clone()).sweep_once().await.unwrap();

    assert_eq!(flipped, 0);
    assert_eq!(store.get(paid).unwrap().status, PaymentStatus::Paid);
}

#[tokio::test]
async fn rerunning_the_sweep_is_a_no_op() {
    let store = Arc::new(InMemoryPaymentStore::new());
    let stale = pending(&store).await;
    store.backdate(stale, DAY * 2);
    let sweeper = sweeper(store.clone());

    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
    assert_eq!(sweeper.sweep_once().await.unwrap(), 0);
}

#[tokio::test]
async fn sweep_respects_the_batch_limit() {
    let store = Arc::new(InMemoryPaymentStore::new());
    for _ in 0..5 {
        let id = pending(&store).await;
        store.backdate(id, DAY * 2);
    }
    let sweeper = ExpirySweeper::new(
        store.clone(),
        ExpirySweeperConfig {
            interval_secs: 300,
            max_age_secs: DAY.as_secs(),
            batch_size: 2,
        },
    );

    assert_eq!(sweeper.sweep_once().await.unwrap(), 2);
    assert_eq!(sweeper.sweep_once().await.unwrap(), 2);
    assert_eq!(sweeper.sweep_once().await.unwrap(), 1);
}

#[tokio::test]
async fn reconcile_sweep_picks_up_records_missed_by_webhooks() {
    use campuspay_backend::gateway::types::{
        GatewayIntentStatus, GatewayPayment, GatewayPaymentStatus, IntentSnapshot,
    };

    let store = Arc::new(InMemoryPaymentStore::new());
    let gateway = Arc::new(MockGateway::new());
    let notifier = Arc::new(RecordingNotifier::new());
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        gateway.clone(),
        notifier.clone(),
    ));

    let id = pending(&store).await;
    assert!(store.claim_intent(id, "pi_missed").await.unwrap());
    store.backdate(id, Duration::from_secs(600));
    gateway.set_snapshot(IntentSnapshot {
        intent_id: "pi_missed".to_string(),
        status: GatewayIntentStatus::Succeeded,
        amount: Decimal::from(100),
        payments: vec![GatewayPayment {
            id: "pay_1".to_string(),
            status: GatewayPaymentStatus::Paid,
            reference: None,
            method: None,
            paid_at: Some(Utc::now()),
        }],
        refunds: vec![],
    });

    let worker = ReconcileWorker::new(
        store.clone(),
        reconciler,
        ReconcileWorkerConfig {
            interval_secs: 600,
            min_age_secs: 300,
            batch_size: 50,
        },
    );

    assert_eq!(worker.sweep_once().await, 1);
    assert_eq!(store.get(id).unwrap().status, PaymentStatus::Paid);
    // A second sweep finds nothing pending and changes nothing.
    assert_eq!(worker.sweep_once().await, 0);
}
