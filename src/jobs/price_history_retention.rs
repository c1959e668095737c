//! Price history retention
//!
//! Deletes price samples older than the retention window on every store,
//! once a day. Unreachable shards are skipped and retried next run.

use chrono::Utc;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, interval};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};

use crate::error::Result;
use crate::services::item_store::ItemRepository;

const RETENTION_INTERVAL: Duration = Duration::from_secs(86400); // Every 24 hours

pub async fn purge_expired_samples(store: &dyn ItemRepository, retention_days: i64) -> Result<u64> {
    let cutoff = Utc::now() - chrono::Duration::days(retention_days.max(1));
    let purged = store.purge_price_history(cutoff).await?;
    info!(purged = purged, cutoff = %cutoff, "Price history retention pass complete");
    Ok(purged)
}

pub fn start_price_history_retention_job(
    store: Arc<dyn ItemRepository>,
    retention_days: i64,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = interval(RETENTION_INTERVAL);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    if let Err(e) = purge_expired_samples(store.as_ref(), retention_days).await {
                        error!("Failed to purge price history: {}", e);
                    }
                }
            }
        }
    })
}
