//! Price Acquisition Engine
//!
//! Periodically refreshes the price of every known skin from the
//! marketplace through a bounded worker pool, persists each change
//! transactionally and publishes one price-update event per item.
//! Cycles never overlap; a tick that fires while a cycle is running is
//! dropped.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use tokio::sync::{Mutex as AsyncMutex, mpsc};
use tokio::task::{JoinHandle, JoinSet};
use tokio::time::{Duration, Instant, MissedTickBehavior, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::entities::skins;
use crate::error::{PipelineError, Result};
use crate::models::events::PriceUpdateEvent;
use crate::services::cache::{Cache, keys};
use crate::services::event_bus::TopicProducer;
use crate::services::item_store::ItemRepository;
use crate::services::rate_limiter::RateLimiter;
use crate::services::steam_market::MarketClient;

/// Shortest period the scheduler accepts
pub const MIN_CYCLE_INTERVAL: Duration = Duration::from_secs(60);

#[derive(Debug, Clone)]
pub struct AcquisitionSettings {
    pub interval: Duration,
    pub workers: usize,
    pub request_timeout: Duration,
}

impl Default for AcquisitionSettings {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(5 * 60),
            workers: 10,
            request_timeout: Duration::from_secs(10),
        }
    }
}

/// Summary of one cycle
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CycleReport {
    pub total: usize,
    pub succeeded: usize,
    pub failed: usize,
    pub rate_limited: usize,
    pub cancelled: usize,
    pub started_at: Option<DateTime<Utc>>,
    pub duration_ms: u64,
}

#[derive(Default)]
struct CycleCounters {
    succeeded: AtomicUsize,
    failed: AtomicUsize,
    rate_limited: AtomicUsize,
    cancelled: AtomicUsize,
}

/// Clears the running flag when a cycle ends, however it ends
struct RunningGuard<'a>(&'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}

pub struct PriceAcquisitionEngine {
    store: Arc<dyn ItemRepository>,
    market: Arc<dyn MarketClient>,
    limiter: RateLimiter,
    cache: Arc<dyn Cache>,
    producer: TopicProducer,
    settings: AcquisitionSettings,
    running: AtomicBool,
    last_report: Mutex<Option<CycleReport>>,
}

impl PriceAcquisitionEngine {
    pub fn new(
        store: Arc<dyn ItemRepository>,
        market: Arc<dyn MarketClient>,
        limiter: RateLimiter,
        cache: Arc<dyn Cache>,
        producer: TopicProducer,
        settings: AcquisitionSettings,
    ) -> Self {
        Self {
            store,
            market,
            limiter,
            cache,
            producer,
            settings,
            running: AtomicBool::new(false),
            last_report: Mutex::new(None),
        }
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    pub fn last_report(&self) -> Option<CycleReport> {
        self.last_report.lock().clone()
    }

    /// One full pass over every item. Fails with `Conflict` if a cycle is
    /// already in progress.
    pub async fn run_cycle(self: &Arc<Self>, cancel: &CancellationToken) -> Result<CycleReport> {
        if self.running.swap(true, Ordering::SeqCst) {
            return Err(PipelineError::Conflict("acquisition cycle already running".into()));
        }
        let _guard = RunningGuard(&self.running);

        let started_at = Utc::now();
        let start = Instant::now();

        let items = self.store.list_all().await?;
        let total = items.len();
        info!(items = total, workers = self.settings.workers, "Starting price acquisition cycle");

        let counters = Arc::new(CycleCounters::default());
        if total > 0 {
            self.dispatch(items, counters.clone(), cancel).await;
        }

        let report = CycleReport {
            total,
            succeeded: counters.succeeded.load(Ordering::SeqCst),
            failed: counters.failed.load(Ordering::SeqCst),
            rate_limited: counters.rate_limited.load(Ordering::SeqCst),
            cancelled: counters.cancelled.load(Ordering::SeqCst),
            started_at: Some(started_at),
            duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            total = report.total,
            succeeded = report.succeeded,
            failed = report.failed,
            rate_limited = report.rate_limited,
            cancelled = report.cancelled,
            duration_ms = report.duration_ms,
            "Price acquisition cycle complete"
        );

        *self.last_report.lock() = Some(report.clone());
        Ok(report)
    }

    /// Feeds items through a channel to a fixed number of worker tasks and
    /// waits for all of them.
    async fn dispatch(self: &Arc<Self>, items: Vec<skins::Model>, counters: Arc<CycleCounters>, cancel: &CancellationToken) {
        let workers = self.settings.workers.max(1);
        let (tx, rx) = mpsc::channel::<skins::Model>(workers * 2);
        let rx = Arc::new(AsyncMutex::new(rx));

        let mut pool = JoinSet::new();
        for worker_id in 0..workers {
            let engine = Arc::clone(self);
            let rx = Arc::clone(&rx);
            let counters = Arc::clone(&counters);
            let cancel = cancel.clone();
            pool.spawn(async move {
                loop {
                    let next = { rx.lock().await.recv().await };
                    let Some(skin) = next else { break };

                    if cancel.is_cancelled() {
                        counters.cancelled.fetch_add(1, Ordering::SeqCst);
                        continue;
                    }

                    match engine.refresh_item(&skin, &cancel).await {
                        Ok(()) => {
                            counters.succeeded.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(PipelineError::RateLimited { count, limit, .. }) => {
                            debug!(worker = worker_id, skin_id = %skin.id, count = count, limit = limit, "Rate limited, skipping until next cycle");
                            counters.rate_limited.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(PipelineError::Cancelled) => {
                            counters.cancelled.fetch_add(1, Ordering::SeqCst);
                        }
                        Err(e) => {
                            warn!(
                                worker = worker_id,
                                skin_id = %skin.id,
                                market_hash_name = %skin.market_hash_name,
                                error = %e,
                                "Price refresh failed"
                            );
                            counters.failed.fetch_add(1, Ordering::SeqCst);
                        }
                    }
                }
            });
        }

        let mut fed = 0usize;
        let total = items.len();
        for skin in items {
            if cancel.is_cancelled() {
                break;
            }
            if tx.send(skin).await.is_err() {
                break;
            }
            fed += 1;
        }
        drop(tx);

        if fed < total {
            counters.cancelled.fetch_add(total - fed, Ordering::SeqCst);
        }

        while let Some(joined) = pool.join_next().await {
            if let Err(e) = joined {
                error!(error = %e, "Acquisition worker panicked");
            }
        }
    }

    async fn refresh_item(&self, skin: &skins::Model, cancel: &CancellationToken) -> Result<()> {
        self.limiter.acquire().await?;

        let timeout = self.settings.request_timeout;
        let quote = tokio::select! {
            _ = cancel.cancelled() => return Err(PipelineError::Cancelled),
            fetched = tokio::time::timeout(timeout, self.market.get_item_price(&skin.market_hash_name)) => {
                fetched.map_err(|_| PipelineError::Timeout(timeout))??
            }
        };

        // Commits in progress are allowed to finish on cancel
        let change = self
            .store
            .update_item_price(skin.id, quote.price, quote.volume, self.market.source())
            .await?;

        for key in [keys::hot_item(skin.id), keys::skin_detail(&skin.slug)] {
            if let Err(e) = self.cache.delete(&key).await {
                warn!(key = %key, error = %e, "Cache invalidation failed");
            }
        }

        let event = PriceUpdateEvent::new(
            &change.skin,
            self.market.source(),
            change.old_price,
            change.new_price,
            change.change,
            quote.volume,
        );
        // One attempt per cycle; the next cycle publishes fresher numbers
        if let Err(e) = self.producer.publish_json(&event.key(), &event).await {
            warn!(skin_id = %skin.id, topic = %self.producer.topic(), error = %e, "Failed to publish price update");
        }

        Ok(())
    }
}

/// Start the acquisition scheduler
///
/// The first cycle runs immediately, then one per interval (never below
/// one minute). On cancel the current cycle drains before the task ends.
pub fn start_price_acquisition_job(
    engine: Arc<PriceAcquisitionEngine>,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let period = engine.settings.interval.max(MIN_CYCLE_INTERVAL);
        info!(interval_secs = period.as_secs(), "Price acquisition job started");

        let mut ticker = interval_at(Instant::now() + period, period);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

        let mut current = Some(spawn_cycle(engine.clone(), cancel.clone()));

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown signal received, stopping price acquisition job");
                    break;
                }
                _ = ticker.tick() => {
                    if engine.is_running() {
                        warn!("Previous acquisition cycle still running, dropping tick");
                        continue;
                    }
                    current = Some(spawn_cycle(engine.clone(), cancel.clone()));
                }
            }
        }

        if let Some(handle) = current.take() {
            if let Err(e) = handle.await {
                error!(error = %e, "Acquisition cycle task failed during drain");
            }
        }
        info!("Price acquisition job stopped");
    })
}

fn spawn_cycle(engine: Arc<PriceAcquisitionEngine>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        match engine.run_cycle(&cancel).await {
            Ok(_) => {}
            Err(PipelineError::Conflict(reason)) => debug!(reason = %reason, "Cycle skipped"),
            Err(e) => error!(error = %e, "Price acquisition cycle failed"),
        }
    })
}
