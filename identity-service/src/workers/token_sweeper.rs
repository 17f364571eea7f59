use std::sync::Arc;
use std::time::Duration;
use tokio_util::sync::CancellationToken;

use crate::services::CredentialLifecycle;

/// Periodically deletes one-time tokens past their expiry.
pub struct TokenSweeper {
    lifecycle: Arc<CredentialLifecycle>,
    interval: Duration,
    shutdown: CancellationToken,
}

impl TokenSweeper {
    pub fn new(
        lifecycle: Arc<CredentialLifecycle>,
        interval: Duration,
        shutdown: CancellationToken,
    ) -> Self {
        Self {
            lifecycle,
            interval,
            shutdown,
        }
    }

    pub async fn run(self) {
        tracing::info!(interval_secs = self.interval.as_secs(), "Token sweeper starting");

        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_secs(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = self.shutdown.cancelled() => {
                    tracing::info!("Token sweeper shutting down");
                    break;
                }
                _ = ticker.tick() => {
                    self.sweep_once().await;
                }
            }
        }
    }

    pub async fn sweep_once(&self) -> u64 {
        match self.lifecycle.purge_expired().await {
            Ok(0) => 0,
            Ok(removed) => {
                tracing::info!(removed, "Expired one-time tokens purged");
                removed
            }
            Err(e) => {
                tracing::warn!(error = %e, "Token sweep failed");
                0
            }
        }
    }
}
