// src/bin/import_skins.rs

use std::env;
use std::fs;
use std::sync::Arc;

use rust_decimal::Decimal;
use serde::Deserialize;

use skinwatch_backend::config::DatabaseConfig;
use skinwatch_backend::models::skin::NewSkin;
use skinwatch_backend::services::db_store::DbItemStore;
use skinwatch_backend::services::item_store::ItemRepository;
use skinwatch_backend::services::shard_router::{ShardRouter, connect_pool};
use skinwatch_backend::services::sharded_store::ShardedItemStore;

/// One row of the import file. Only the hash name is required; missing
/// descriptive fields are derived from it.
#[derive(Debug, Deserialize)]
struct ImportEntry {
    market_hash_name: String,
    #[serde(default)]
    weapon: Option<String>,
    #[serde(default)]
    quality: Option<String>,
    #[serde(default)]
    rarity: Option<String>,
    #[serde(default)]
    image_url: Option<String>,
    #[serde(default)]
    price: Option<Decimal>,
}

impl ImportEntry {
    fn into_new_skin(self) -> NewSkin {
        let mut skin = NewSkin::from_hash_name(&self.market_hash_name);
        if let Some(weapon) = self.weapon.filter(|w| !w.trim().is_empty()) {
            skin.weapon = weapon;
        }
        if let Some(quality) = self.quality {
            skin.quality = quality;
        }
        if let Some(rarity) = self.rarity {
            skin.rarity = rarity;
        }
        skin.image_url = self.image_url;
        skin.initial_price = self.price;
        skin
    }
}

#[derive(Debug, Default)]
struct ImportResult {
    imported: usize,
    errors: usize,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load environment variables
    dotenvy::dotenv().ok();

    // Usage: cargo run --bin import_skins -- skins.json
    let args: Vec<String> = env::args().collect();
    if args.len() < 2 {
        eprintln!("Usage: {} <skins.json>", args[0]);
        std::process::exit(1);
    }

    let file_path = &args[1];
    let entries: Vec<ImportEntry> = serde_json::from_str(&fs::read_to_string(file_path)?)?;
    println!(" Found {} skins in {}", entries.len(), file_path);

    let db_config = DatabaseConfig::from_env()?;
    let primary = connect_pool(&db_config.url, db_config.pool_max).await?;
    let store: Arc<dyn ItemRepository> = if db_config.shard_enabled {
        let router = ShardRouter::connect(&db_config.shard_urls, db_config.pool_max).await?;
        Arc::new(ShardedItemStore::new(router, primary))
    } else {
        Arc::new(DbItemStore::new(primary))
    };

    let mut result = ImportResult::default();
    for entry in entries {
        let hash_name = entry.market_hash_name.clone();
        match store.create_item(entry.into_new_skin()).await {
            Ok(skin) => {
                result.imported += 1;
                println!("    {} -> {}", skin.market_hash_name, skin.id);
            }
            Err(e) => {
                result.errors += 1;
                eprintln!("    Failed to import {}: {}", hash_name, e);
            }
        }
    }

    // Re-running is safe: existing rows are updated in place
    println!("\n Import complete!");
    println!("    Imported or updated: {}", result.imported);
    if result.errors > 0 {
        println!("    Errors: {}", result.errors);
    }

    Ok(())
}
