//! Background reconciliation sweep.
//!
//! Webhooks can be lost; this worker periodically pulls the gateway truth
//! for pending records that already carry an intent id and lets the
//! reconciler fold it in. A failure on one record never stops the batch.

use crate::database::payment_store::PaymentStore;
use crate::services::reconciler::Reconciler;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info};

#[derive(Debug, Clone)]
pub struct ReconcileWorkerConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Minimum record age before it is reconciled; freshly created intents
    /// are left to the webhook path.
    pub min_age_secs: u64,
    /// Max records reconciled per sweep.
    pub batch_size: i64,
}

impl Default for ReconcileWorkerConfig {
    fn default() -> Self {
        Self {
            interval_secs: 600,
            min_age_secs: 300,
            batch_size: 50,
        }
    }
}

impl ReconcileWorkerConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval_secs: env_u64("RECONCILE_INTERVAL_SECS", defaults.interval_secs),
            min_age_secs: env_u64("RECONCILE_MIN_AGE_SECS", defaults.min_age_secs),
            batch_size: env_u64("RECONCILE_BATCH_SIZE", defaults.batch_size as u64) as i64,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub struct ReconcileWorker {
    store: Arc<dyn PaymentStore>,
    reconciler: Arc<Reconciler>,
    config: ReconcileWorkerConfig,
}

impl ReconcileWorker {
    pub fn new(
        store: Arc<dyn PaymentStore>,
        reconciler: Arc<Reconciler>,
        config: ReconcileWorkerConfig,
    ) -> Self {
        Self {
            store,
            reconciler,
            config,
        }
    }

    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            min_age_secs = self.config.min_age_secs,
            "reconcile worker started"
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("reconcile worker shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep over pending records with intents. Returns how many records
    /// changed status.
    pub async fn sweep_once(&self) -> usize {
        let records = match self
            .store
            .find_pending_with_intent(
                Duration::from_secs(self.config.min_age_secs),
                self.config.batch_size,
            )
            .await
        {
            Ok(records) => records,
            Err(e) => {
                error!(error = %e, "reconcile sweep could not list pending records");
                return 0;
            }
        };

        let mut transitioned = 0;
        for record in &records {
            match self.reconciler.reconcile_record(record).await {
                Ok(report) if report.previous != report.current => transitioned += 1,
                Ok(_) => {}
                Err(e) => {
                    error!(
                        payment_id = %record.id,
                        error = %e,
                        "reconciliation failed for record"
                    );
                }
            }
        }

        if !records.is_empty() {
            info!(
                scanned = records.len(),
                transitioned, "reconcile sweep completed"
            );
        }
        transitioned
    }
}
