mod common;

use rust_decimal_macros::dec;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

use skinwatch_backend::error::PipelineError;
use skinwatch_backend::jobs::price_acquisition::{AcquisitionSettings, PriceAcquisitionEngine};
use skinwatch_backend::jobs::price_history_retention::purge_expired_samples;
use skinwatch_backend::models::events::PriceUpdateEvent;
use skinwatch_backend::services::cache::{Cache, MemoryCache, keys};
use skinwatch_backend::services::db_store::DbItemStore;
use skinwatch_backend::services::event_bus::{EventPublisher, InMemoryBus, ProducerConfig, TopicProducer};
use skinwatch_backend::services::item_store::ItemRepository;
use skinwatch_backend::services::rate_limiter::RateLimiter;

use crate::common::{FakeMarket, assert_decimal_eq, assert_f64_eq, force_prices, new_skin, seed_rifles, setup_test_db};

const PRICE_TOPIC: &str = "skin.price.updated";

struct Harness {
    store: Arc<DbItemStore>,
    market: Arc<FakeMarket>,
    cache: Arc<MemoryCache>,
    bus: Arc<InMemoryBus>,
    engine: Arc<PriceAcquisitionEngine>,
}

async fn harness(rate_limit: u64) -> Harness {
    let db = setup_test_db().await.expect("Failed to set up test DB");
    let store = Arc::new(DbItemStore::new(db));
    let market = FakeMarket::new();
    let cache = Arc::new(MemoryCache::new());
    let bus = Arc::new(InMemoryBus::new(6));

    let publisher: Arc<dyn EventPublisher> = bus.clone();
    let producer = TopicProducer::new(publisher, PRICE_TOPIC, ProducerConfig::for_price_updates());

    let engine = Arc::new(PriceAcquisitionEngine::new(
        store.clone(),
        market.clone(),
        RateLimiter::for_parser(cache.clone(), rate_limit),
        cache.clone(),
        producer,
        AcquisitionSettings::default(),
    ));

    Harness {
        store,
        market,
        cache,
        bus,
        engine,
    }
}

#[tokio::test]
async fn test_single_update_happy_path() {
    let h = harness(60).await;

    let skin = h
        .store
        .create_item(new_skin("AK-47 | Redline (Field-Tested)", Some(dec!(0.50))))
        .await
        .unwrap();
    force_prices(h.store.connection(), skin.id, dec!(0.50), dec!(0), dec!(0.55)).await;
    h.market.set_price("AK-47 | Redline (Field-Tested)", dec!(0.58), 1397);

    // Stale detail entry must not survive the update
    h.cache
        .set(&keys::skin_detail(&skin.slug), "{}", None)
        .await
        .unwrap();

    let report = h.engine.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.total, 1);
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 0);

    let updated = h.store.get_by_id(skin.id).await.unwrap();
    assert_decimal_eq(updated.current_price, dec!(0.58));
    assert_eq!(updated.volume_24h, 1397);
    assert_decimal_eq(updated.price_change_24h, dec!(16.0));
    assert_decimal_eq(updated.lowest_price, dec!(0.50));
    assert_decimal_eq(updated.highest_price, dec!(0.58));
    assert!(updated.last_updated.is_some());

    let history = h.store.price_history(skin.id, 10).await.unwrap();
    assert_eq!(history.len(), 1);
    assert_decimal_eq(history[0].price, dec!(0.58));
    assert_eq!(history[0].source, "steam");

    let messages = h.bus.messages(PRICE_TOPIC);
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0].key, skin.id.to_string());
    let event: PriceUpdateEvent = messages[0].decode().unwrap();
    assert_f64_eq(event.old_price, 0.50);
    assert_f64_eq(event.new_price, 0.58);
    assert_f64_eq(event.price_change, 16.0);
    assert_eq!(event.volume_24h, 1397);

    assert!(!h.cache.exists(&keys::skin_detail(&skin.slug)).await.unwrap());
    assert_eq!(h.engine.last_report(), Some(report));
}

#[tokio::test]
async fn test_rate_limit_cutoff() {
    let h = harness(60).await;
    seed_rifles(h.store.as_ref(), 61, dec!(1.00)).await;
    h.market.set_default_price(dec!(1.10), 5);

    let report = h.engine.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.total, 61);
    assert_eq!(report.succeeded, 60);
    assert_eq!(report.rate_limited, 1);
    assert_eq!(report.failed, 0);

    // Limited item never reached the marketplace and published nothing
    assert_eq!(h.market.price_calls(), 60);
    assert_eq!(h.bus.messages(PRICE_TOPIC).len(), 60);

    let untouched: Vec<_> = h
        .store
        .list_all()
        .await
        .unwrap()
        .into_iter()
        .filter(|s| s.last_updated.is_none())
        .collect();
    assert_eq!(untouched.len(), 1);
    assert_decimal_eq(untouched[0].current_price, dec!(1.00));
}

#[tokio::test]
async fn test_empty_cycle_completes() {
    let h = harness(60).await;

    let report = h.engine.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.total, 0);
    assert_eq!(report.succeeded, 0);
    assert!(h.bus.messages(PRICE_TOPIC).is_empty());
    assert!(!h.engine.is_running());
}

#[tokio::test]
async fn test_marketplace_failure_is_counted_not_fatal() {
    let h = harness(60).await;
    h.store
        .create_item(new_skin("Glock-18 | Fade (Factory New)", Some(dec!(300))))
        .await
        .unwrap();
    h.store
        .create_item(new_skin("AWP | Asiimov (Field-Tested)", Some(dec!(90))))
        .await
        .unwrap();
    h.market.set_price("AWP | Asiimov (Field-Tested)", dec!(95), 40);

    let report = h.engine.run_cycle(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.succeeded, 1);
    assert_eq!(report.failed, 1);
    assert_eq!(h.bus.messages(PRICE_TOPIC).len(), 1);
}

#[tokio::test]
async fn test_cancelled_cycle_publishes_nothing() {
    let h = harness(60).await;
    seed_rifles(h.store.as_ref(), 5, dec!(2)).await;
    h.market.set_default_price(dec!(3), 1);

    let cancel = CancellationToken::new();
    cancel.cancel();
    let report = h.engine.run_cycle(&cancel).await.unwrap();

    assert_eq!(report.total, 5);
    assert_eq!(report.succeeded, 0);
    assert_eq!(report.cancelled, 5);
    assert!(h.bus.messages(PRICE_TOPIC).is_empty());
}

#[tokio::test]
async fn test_overlapping_cycle_is_rejected() {
    let h = harness(60).await;
    seed_rifles(h.store.as_ref(), 30, dec!(1)).await;
    h.market.set_default_price(dec!(1.5), 1);

    let cancel = CancellationToken::new();
    let (first, second) = tokio::join!(h.engine.run_cycle(&cancel), h.engine.run_cycle(&cancel));

    let outcomes = [first, second];
    let conflicts = outcomes
        .iter()
        .filter(|r| matches!(r, Err(PipelineError::Conflict(_))))
        .count();
    let completed = outcomes.iter().filter(|r| r.is_ok()).count();
    assert_eq!(conflicts, 1);
    assert_eq!(completed, 1);
}

#[tokio::test]
async fn test_retention_keeps_recent_samples() {
    let h = harness(60).await;
    seed_rifles(h.store.as_ref(), 2, dec!(1)).await;
    h.market.set_default_price(dec!(2), 1);
    h.engine.run_cycle(&CancellationToken::new()).await.unwrap();

    let purged = purge_expired_samples(h.store.as_ref(), 90).await.unwrap();
    assert_eq!(purged, 0);

    let removed = h
        .store
        .purge_price_history(chrono::Utc::now() + chrono::Duration::minutes(1))
        .await
        .unwrap();
    assert_eq!(removed, 2);
}

#[tokio::test]
async fn test_discovery_creates_only_new_skins() {
    use skinwatch_backend::jobs::skin_discovery::SkinDiscovery;
    use skinwatch_backend::models::events::SkinDiscoveredEvent;

    let h = harness(60).await;
    h.store
        .create_item(new_skin("AK-47 | Redline (Field-Tested)", Some(dec!(5))))
        .await
        .unwrap();
    h.market.set_search(
        "redline",
        vec![
            common::market_item("AK-47 | Redline (Field-Tested)", dec!(5)),
            common::market_item("AWP | Redline (Minimal Wear)", dec!(40)),
        ],
    );

    let publisher: Arc<dyn EventPublisher> = h.bus.clone();
    let discovery = SkinDiscovery::new(
        h.store.clone(),
        h.market.clone(),
        TopicProducer::new(publisher, "skin.discovered", ProducerConfig::for_discovery()),
        vec!["redline".to_string()],
    );

    let report = discovery.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(report.seen, 2);
    assert_eq!(report.created, 1);

    let created = h.store.get_by_hash_name("AWP | Redline (Minimal Wear)").await.unwrap();
    assert_eq!(created.weapon, "AWP");
    assert_eq!(created.rarity, "Classified");
    assert_decimal_eq(created.current_price, dec!(40));

    let events = h.bus.messages("skin.discovered");
    assert_eq!(events.len(), 1);
    assert_eq!(events[0].key, "AWP | Redline (Minimal Wear)");
    let event: SkinDiscoveredEvent = events[0].decode().unwrap();
    assert_eq!(event.quality, "Minimal Wear");

    // Second pass finds nothing new
    let again = discovery.run(&CancellationToken::new()).await.unwrap();
    assert_eq!(again.created, 0);
    assert_eq!(h.bus.messages("skin.discovered").len(), 1);
}
