//! Skin discovery job
//!
//! Runs seed queries against the marketplace search and creates every
//! returned item the store does not know yet, announcing each on the
//! discovery topic.

use chrono::Utc;
use rust_decimal::prelude::ToPrimitive;
use serde::Serialize;
use std::sync::Arc;
use tokio::task::JoinHandle;
use tokio::time::{Duration, Instant, interval_at};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use crate::error::{PipelineError, Result};
use crate::models::events::SkinDiscoveredEvent;
use crate::models::skin::NewSkin;
use crate::services::event_bus::TopicProducer;
use crate::services::item_store::ItemRepository;
use crate::services::steam_market::{MarketClient, MarketItem};

pub const DEFAULT_DISCOVERY_QUERIES: &[&str] = &[
    "AK-47", "AWP", "M4A4", "M4A1-S", "Desert Eagle", "Glock-18", "USP-S", "Karambit", "Butterfly Knife",
];

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct DiscoveryReport {
    pub queries: usize,
    pub seen: usize,
    pub created: usize,
    pub failed: usize,
}

pub struct SkinDiscovery {
    store: Arc<dyn ItemRepository>,
    market: Arc<dyn MarketClient>,
    producer: TopicProducer,
    queries: Vec<String>,
}

impl SkinDiscovery {
    pub fn new(
        store: Arc<dyn ItemRepository>,
        market: Arc<dyn MarketClient>,
        producer: TopicProducer,
        queries: Vec<String>,
    ) -> Self {
        let queries = if queries.is_empty() {
            DEFAULT_DISCOVERY_QUERIES.iter().map(|q| q.to_string()).collect()
        } else {
            queries
        };
        Self {
            store,
            market,
            producer,
            queries,
        }
    }

    pub async fn run(&self, cancel: &CancellationToken) -> Result<DiscoveryReport> {
        let mut report = DiscoveryReport::default();

        for query in &self.queries {
            if cancel.is_cancelled() {
                return Err(PipelineError::Cancelled);
            }
            report.queries += 1;

            let items = match self.market.search_items(query).await {
                Ok(items) => items,
                Err(e) => {
                    warn!(query = %query, error = %e, "Discovery search failed");
                    report.failed += 1;
                    continue;
                }
            };

            for item in items {
                report.seen += 1;
                match self.store.get_by_hash_name(&item.market_hash_name).await {
                    Ok(_) => {}
                    Err(e) if e.is_not_found() => match self.create(&item).await {
                        Ok(()) => report.created += 1,
                        Err(e) => {
                            warn!(market_hash_name = %item.market_hash_name, error = %e, "Failed to create discovered skin");
                            report.failed += 1;
                        }
                    },
                    Err(e) => {
                        warn!(market_hash_name = %item.market_hash_name, error = %e, "Discovery lookup failed");
                        report.failed += 1;
                    }
                }
            }
        }

        info!(
            queries = report.queries,
            seen = report.seen,
            created = report.created,
            failed = report.failed,
            "Skin discovery complete"
        );
        Ok(report)
    }

    async fn create(&self, item: &MarketItem) -> Result<()> {
        let mut new_skin = NewSkin::from_hash_name(&item.market_hash_name);
        if let Some(rarity) = &item.rarity {
            new_skin.rarity = rarity.clone();
        }
        new_skin.image_url = item.image_url.clone();
        new_skin.initial_price = item.price;

        let created = self.store.create_item(new_skin).await?;

        let event = SkinDiscoveredEvent {
            market_hash_name: created.market_hash_name.clone(),
            name: created.name.clone(),
            weapon: created.weapon.clone(),
            quality: created.quality.clone(),
            rarity: created.rarity.clone(),
            initial_price: created.current_price.to_f64().unwrap_or(0.0),
            currency: created.currency.clone(),
            source: self.market.source().to_string(),
            image_url: created.image_url.clone().unwrap_or_default(),
            timestamp: Utc::now(),
        };
        if let Err(e) = self.producer.publish_json(&event.market_hash_name, &event).await {
            warn!(market_hash_name = %event.market_hash_name, error = %e, "Failed to publish discovery event");
        }
        Ok(())
    }
}

/// Start the discovery job on its own, longer interval
pub fn start_skin_discovery_job(
    discovery: Arc<SkinDiscovery>,
    period: Duration,
    cancel: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        info!(interval_secs = period.as_secs(), "Skin discovery job started");
        let mut ticker = interval_at(Instant::now(), period);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Shutdown signal received, stopping skin discovery job");
                    break;
                }
                _ = ticker.tick() => {
                    match discovery.run(&cancel).await {
                        Ok(_) | Err(PipelineError::Cancelled) => {}
                        Err(e) => error!(error = %e, "Skin discovery failed"),
                    }
                }
            }
        }
    })
}
