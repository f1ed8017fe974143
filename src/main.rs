use anyhow::Context;
use campuspay_backend::api::{self, AppState};
use campuspay_backend::config::AppConfig;
use campuspay_backend::database;
use campuspay_backend::database::payment_repository::PgPaymentStore;
use campuspay_backend::database::payment_store::PaymentStore;
use campuspay_backend::gateway::client::{GatewayConfig, PayMongoClient};
use campuspay_backend::gateway::PaymentGateway;
use campuspay_backend::logging::init_tracing;
use campuspay_backend::services::intent_creator::IntentCreator;
use campuspay_backend::services::notification::{LogNotificationSink, NotificationSink};
use campuspay_backend::services::reconciler::Reconciler;
use campuspay_backend::services::webhook_ingestor::WebhookIngestor;
use campuspay_backend::workers::{
    ExpirySweeper, ExpirySweeperConfig, ReconcileWorker, ReconcileWorkerConfig,
};
use std::sync::Arc;
use tokio::sync::watch;
use tracing::info;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = AppConfig::from_env().context("failed to load configuration")?;
    config.validate().context("invalid configuration")?;
    init_tracing(&config.logging);
    info!("starting payment service");

    let pool = database::init_pool_from_config(&config.database)
        .await
        .context("failed to initialize database pool")?;

    let store: Arc<dyn PaymentStore> = Arc::new(PgPaymentStore::new(pool.clone()));
    let gateway_config = GatewayConfig::from_env().context("failed to load gateway credentials")?;
    let gateway: Arc<dyn PaymentGateway> =
        Arc::new(PayMongoClient::new(gateway_config).context("failed to initialize gateway client")?);
    let notifier: Arc<dyn NotificationSink> = Arc::new(LogNotificationSink::new());

    let intents = Arc::new(IntentCreator::new(store.clone(), gateway.clone()));
    let webhooks = Arc::new(WebhookIngestor::new(
        store.clone(),
        notifier.clone(),
        config.webhook.clone(),
    ));
    let reconciler = Arc::new(Reconciler::new(
        store.clone(),
        gateway.clone(),
        notifier.clone(),
    ));

    // One shared shutdown channel; flipping it stops every worker.
    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let sweeper = ExpirySweeper::new(store.clone(), ExpirySweeperConfig::from_env());
    let sweeper_handle = tokio::spawn(sweeper.run(shutdown_rx.clone()));
    let reconcile_worker = ReconcileWorker::new(
        store.clone(),
        reconciler.clone(),
        ReconcileWorkerConfig::from_env(),
    );
    let reconcile_handle = tokio::spawn(reconcile_worker.run(shutdown_rx));

    let state = AppState {
        store,
        gateway,
        intents,
        webhooks,
        reconciler,
        pool,
    };
    let app = api::router(state);

    let addr = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    info!(address = %addr, "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await
        .context("server error")?;

    let _ = shutdown_tx.send(true);
    let _ = tokio::join!(sweeper_handle, reconcile_handle);
    info!("shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
