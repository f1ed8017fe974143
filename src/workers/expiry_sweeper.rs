//! Abandoned-payment sweeper.
//!
//! A single instance of this worker runs per process. Each tick fails the
//! batch of pending records older than the configured threshold; the
//! conditional update in the store keeps concurrent deployments from
//! double-failing a record.

use crate::database::error::DatabaseError;
use crate::database::payment_store::PaymentStore;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, warn};

#[derive(Debug, Clone)]
pub struct ExpirySweeperConfig {
    /// Seconds between sweeps.
    pub interval_secs: u64,
    /// Age at which a pending record is considered abandoned.
    pub max_age_secs: u64,
    /// Max records failed per sweep.
    pub batch_size: i64,
}

impl Default for ExpirySweeperConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            max_age_secs: 86_400,
            batch_size: 100,
        }
    }
}

impl ExpirySweeperConfig {
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            interval_secs: env_u64("EXPIRY_SWEEP_INTERVAL_SECS", defaults.interval_secs),
            max_age_secs: env_u64("PAYMENT_EXPIRY_SECS", defaults.max_age_secs),
            batch_size: env_u64("EXPIRY_SWEEP_BATCH_SIZE", defaults.batch_size as u64) as i64,
        }
    }
}

fn env_u64(name: &str, default: u64) -> u64 {
    std::env::var(name)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

pub struct ExpirySweeper {
    store: Arc<dyn PaymentStore>,
    config: ExpirySweeperConfig,
}

impl ExpirySweeper {
    pub fn new(store: Arc<dyn PaymentStore>, config: ExpirySweeperConfig) -> Self {
        Self { store, config }
    }

    /// Run until the shutdown channel flips to `true` or closes.
    pub async fn run(self, mut shutdown: watch::Receiver<bool>) {
        info!(
            interval_secs = self.config.interval_secs,
            max_age_secs = self.config.max_age_secs,
            "expiry sweeper started"
        );
        let mut ticker = tokio::time::interval(Duration::from_secs(self.config.interval_secs));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    if let Err(e) = self.sweep_once().await {
                        error!(error = %e, "expiry sweep failed");
                    }
                }
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        info!("expiry sweeper shutting down");
                        break;
                    }
                }
            }
        }
    }

    /// One sweep: fail the batch of stale pending records. Returns how many
    /// records actually flipped.
    pub async fn sweep_once(&self) -> Result<usize, DatabaseError> {
        let expired = self
            .store
            .expire_stale(
                Duration::from_secs(self.config.max_age_secs),
                self.config.batch_size,
            )
            .await?;

        for record in &expired {
            warn!(
                payment_id = %record.id,
                transaction_code = %record.transaction_code,
                created_at = %record.created_at,
                "pending payment expired"
            );
        }
        if !expired.is_empty() {
            info!(count = expired.len(), "expiry sweep completed");
        }
        Ok(expired.len())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn config_defaults_are_sane() {
        let config = ExpirySweeperConfig::default();
        assert_eq!(config.max_age_secs, 86_400);
        assert!(config.interval_secs > 0);
        assert!(config.batch_size > 0);
    }
}
