// src/lib.rs

use std::sync::Arc;

use jobs::price_acquisition::PriceAcquisitionEngine;
use services::item_store::ItemRepository;

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn ItemRepository>,
    pub engine: Arc<PriceAcquisitionEngine>,
}

pub mod entities {
    pub mod prelude;
    pub mod skins;
    pub mod price_history;
    pub mod watchlist;
    pub mod notifications;
    pub mod notification_preferences;
}

pub mod services {
    pub mod cache;
    pub mod rate_limiter;
    pub mod shard_router;
    pub mod item_store;
    pub mod skin_queries;
    pub mod db_store;
    pub mod sharded_store;
    pub mod event_bus;
    pub mod steam_market;
    pub mod notification_channels;
    pub mod analytics;
}

pub mod config;
pub mod error;
pub mod models;
pub mod jobs;
pub mod consumers;
pub mod handlers;
