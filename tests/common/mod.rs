#![allow(dead_code)]

use async_trait::async_trait;
use parking_lot::Mutex;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use sea_orm::{
    ActiveModelTrait, ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait,
    IntoActiveModel, Schema, Set,
};
use std::collections::HashMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::time::Instant;

use skinwatch_backend::entities::prelude::*;
use skinwatch_backend::entities::skins;
use skinwatch_backend::error::{PipelineError, Result};
use skinwatch_backend::models::skin::NewSkin;
use skinwatch_backend::services::item_store::ItemRepository;
use skinwatch_backend::services::steam_market::{MarketClient, MarketItem, MarketPrice};

/// Fresh in-memory SQLite database with every table created from the
/// entity definitions. One connection, since each sqlite::memory:
/// connection is its own database.
pub async fn setup_test_db() -> std::result::Result<DatabaseConnection, DbErr> {
    let mut opt = ConnectOptions::new("sqlite::memory:");
    opt.max_connections(1)
        .min_connections(1)
        .sqlx_logging(false);
    let db = Database::connect(opt).await?;

    let backend = db.get_database_backend();
    let schema = Schema::new(backend);
    db.execute(backend.build(&schema.create_table_from_entity(Skins))).await?;
    db.execute(backend.build(&schema.create_table_from_entity(PriceHistory))).await?;
    db.execute(backend.build(&schema.create_table_from_entity(Watchlist))).await?;
    db.execute(backend.build(&schema.create_table_from_entity(Notifications))).await?;
    db.execute(backend.build(&schema.create_table_from_entity(NotificationPreferences)))
        .await?;

    Ok(db)
}

/// Three shard databases ordered [pistols, rifles, other] plus a primary
pub async fn setup_shards() -> (Vec<DatabaseConnection>, DatabaseConnection) {
    let mut shards = Vec::new();
    for _ in 0..3 {
        shards.push(setup_test_db().await.expect("shard db"));
    }
    let primary = setup_test_db().await.expect("primary db");
    (shards, primary)
}

pub fn new_skin(hash_name: &str, price: Option<Decimal>) -> NewSkin {
    let mut skin = NewSkin::from_hash_name(hash_name);
    skin.initial_price = price;
    skin.image_url = Some(format!("https://img.example/{}.png", skin.slug()));
    skin
}

/// Overwrite price columns directly to set up a precondition
pub async fn force_prices(
    db: &DatabaseConnection,
    id: uuid::Uuid,
    current: Decimal,
    lowest: Decimal,
    highest: Decimal,
) -> skins::Model {
    let skin = Skins::find_by_id(id)
        .one(db)
        .await
        .expect("query skin")
        .expect("skin exists");
    let mut model = skin.into_active_model();
    model.current_price = Set(current);
    model.lowest_price = Set(lowest);
    model.highest_price = Set(highest);
    model.update(db).await.expect("update skin")
}

/// SQLite keeps decimals as floating point
pub fn assert_decimal_eq(actual: Decimal, expected: Decimal) {
    let diff = (actual - expected).abs().to_f64().unwrap_or(f64::MAX);
    assert!(diff < 1e-6, "expected {}, got {}", expected, actual);
}

pub fn assert_f64_eq(actual: f64, expected: f64) {
    assert!((actual - expected).abs() < 1e-6, "expected {}, got {}", expected, actual);
}

/// Scripted marketplace: fixed quotes per hash name, everything else fails
#[derive(Default)]
pub struct FakeMarket {
    prices: Mutex<HashMap<String, MarketPrice>>,
    search_results: Mutex<HashMap<String, Vec<MarketItem>>>,
    pub price_calls: AtomicUsize,
    pub search_calls: AtomicUsize,
    /// Fallback quote for names without an explicit script
    pub default_quote: Mutex<Option<MarketPrice>>,
    /// Time every quote request spends before answering
    latency: Mutex<Option<Duration>>,
    /// When each quote request arrived
    price_call_times: Mutex<Vec<Instant>>,
}

impl FakeMarket {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn set_price(&self, hash_name: &str, price: Decimal, volume: i64) {
        self.prices.lock().insert(
            hash_name.to_string(),
            MarketPrice {
                price,
                volume,
                median_price: None,
            },
        );
    }

    pub fn set_default_price(&self, price: Decimal, volume: i64) {
        *self.default_quote.lock() = Some(MarketPrice {
            price,
            volume,
            median_price: None,
        });
    }

    pub fn set_search(&self, query: &str, items: Vec<MarketItem>) {
        self.search_results.lock().insert(query.to_string(), items);
    }

    pub fn price_calls(&self) -> usize {
        self.price_calls.load(Ordering::SeqCst)
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = Some(latency);
    }

    /// Arrival of each quote request relative to `origin`
    pub fn price_call_offsets(&self, origin: Instant) -> Vec<Duration> {
        self.price_call_times
            .lock()
            .iter()
            .map(|at| at.duration_since(origin))
            .collect()
    }
}

#[async_trait]
impl MarketClient for FakeMarket {
    fn source(&self) -> &str {
        "steam"
    }

    async fn get_item_price(&self, market_hash_name: &str) -> Result<MarketPrice> {
        self.price_calls.fetch_add(1, Ordering::SeqCst);
        self.price_call_times.lock().push(Instant::now());
        let latency = *self.latency.lock();
        if let Some(latency) = latency {
            tokio::time::sleep(latency).await;
        }
        if let Some(quote) = self.prices.lock().get(market_hash_name) {
            return Ok(quote.clone());
        }
        self.default_quote
            .lock()
            .clone()
            .ok_or_else(|| PipelineError::Market(format!("no listing for {}", market_hash_name)))
    }

    async fn search_items(&self, query: &str) -> Result<Vec<MarketItem>> {
        self.search_calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.search_results.lock().get(query).cloned().unwrap_or_default())
    }
}

pub fn market_item(hash_name: &str, price: Decimal) -> MarketItem {
    MarketItem {
        market_hash_name: hash_name.to_string(),
        name: hash_name.to_string(),
        price: Some(price),
        sell_listings: 10,
        image_url: None,
        rarity: Some("Classified".to_string()),
    }
}

/// Seeds `n` rifles with generated names
pub async fn seed_rifles(store: &dyn ItemRepository, n: usize, price: Decimal) -> Vec<skins::Model> {
    let mut created = Vec::with_capacity(n);
    for i in 0..n {
        let name = format!("AK-47 | Test Finish {} (Field-Tested)", i);
        created.push(store.create_item(new_skin(&name, Some(price))).await.expect("create"));
    }
    created
}
