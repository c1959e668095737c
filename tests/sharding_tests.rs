mod common;

use rust_decimal_macros::dec;
use sea_orm::EntityTrait;
use uuid::Uuid;

use skinwatch_backend::entities::prelude::*;
use skinwatch_backend::error::PipelineError;
use skinwatch_backend::models::watch::NewWatch;
use skinwatch_backend::services::item_store::{ItemRepository, TrendPeriod};
use skinwatch_backend::services::shard_router::{ShardRouter, WeaponFamily};
use skinwatch_backend::services::sharded_store::ShardedItemStore;

use crate::common::{assert_decimal_eq, new_skin, setup_shards};

async fn sharded_store() -> ShardedItemStore {
    let (shards, primary) = setup_shards().await;
    let router = ShardRouter::new(shards).expect("three shards");
    ShardedItemStore::new(router, primary)
}

async fn rows_on(store: &ShardedItemStore, family: WeaponFamily) -> usize {
    Skins::find()
        .all(store.router().shard(family))
        .await
        .unwrap()
        .len()
}

#[tokio::test]
async fn test_scatter_list_and_count() {
    let store = sharded_store().await;

    for name in [
        "Glock-18 | Fade (Factory New)",
        "USP-S | Kill Confirmed (Minimal Wear)",
        "Desert Eagle | Blaze (Factory New)",
    ] {
        store.create_item(new_skin(name, Some(dec!(10)))).await.unwrap();
    }
    for name in [
        "AK-47 | Redline (Field-Tested)",
        "M4A4 | Howl (Minimal Wear)",
        "AWP | Asiimov (Field-Tested)",
        "FAMAS | Pulse (Factory New)",
        "SSG 08 | Blood in the Water (Factory New)",
    ] {
        store.create_item(new_skin(name, Some(dec!(20)))).await.unwrap();
    }
    for name in ["★ Karambit | Fade (Factory New)", "MP9 | Hydra (Field-Tested)"] {
        store.create_item(new_skin(name, Some(dec!(30)))).await.unwrap();
    }

    assert_eq!(rows_on(&store, WeaponFamily::Pistol).await, 3);
    assert_eq!(rows_on(&store, WeaponFamily::Rifle).await, 5);
    assert_eq!(rows_on(&store, WeaponFamily::Other).await, 2);

    let all = store.list_all().await.unwrap();
    assert_eq!(all.len(), 10);
    assert_eq!(store.count().await.unwrap(), 10);

    // Merged listing keeps a stable order across shards
    let names: Vec<_> = all.iter().map(|s| s.market_hash_name.clone()).collect();
    let mut sorted = names.clone();
    sorted.sort();
    assert_eq!(names, sorted);
}

#[tokio::test]
async fn test_weapon_routing_is_case_insensitive() {
    let store = sharded_store().await;

    let mut lower = new_skin("AK-47 | Redline (Field-Tested)", Some(dec!(5)));
    lower.weapon = "ak-47".to_string();
    store.create_item(lower).await.unwrap();

    let upper = new_skin("AK-47 | Vulcan (Field-Tested)", Some(dec!(50)));
    assert_eq!(upper.weapon, "AK-47");
    store.create_item(upper).await.unwrap();

    store
        .create_item(new_skin("★ Karambit | Doppler (Factory New)", Some(dec!(900))))
        .await
        .unwrap();

    assert_eq!(rows_on(&store, WeaponFamily::Rifle).await, 2);
    assert_eq!(rows_on(&store, WeaponFamily::Other).await, 1);
    assert_eq!(rows_on(&store, WeaponFamily::Pistol).await, 0);

    let (family, _) = store.router().shard_for_weapon("Karambit").unwrap();
    assert_eq!(family, WeaponFamily::Other);
}

#[tokio::test]
async fn test_create_item_is_idempotent() {
    let store = sharded_store().await;
    let first = store
        .create_item(new_skin("AWP | Dragon Lore (Factory New)", Some(dec!(10000))))
        .await
        .unwrap();

    let mut again = new_skin("AWP | Dragon Lore (Factory New)", Some(dec!(10000)));
    again.rarity = "Covert".to_string();
    let second = store.create_item(again).await.unwrap();

    assert_eq!(first.id, second.id);
    assert_eq!(second.rarity, "Covert");
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_create_with_other_weapon_keeps_single_row() {
    let store = sharded_store().await;
    let first = store
        .create_item(new_skin("AK-47 | Redline (Field-Tested)", Some(dec!(0.50))))
        .await
        .unwrap();
    assert_eq!(rows_on(&store, WeaponFamily::Rifle).await, 1);

    // Same hash name, weapon that would route to another shard
    let mut renamed = new_skin("AK-47 | Redline (Field-Tested)", Some(dec!(0.50)));
    renamed.weapon = "Karambit".to_string();
    renamed.rarity = "Classified".to_string();
    let second = store.create_item(renamed).await.unwrap();

    assert_eq!(second.id, first.id);
    assert_eq!(second.weapon, "AK-47");
    assert_eq!(second.rarity, "Classified");

    // Different hash name, same slug
    let mut same_slug = new_skin("AK-47 | Redline (Field-Tested)", Some(dec!(0.50)));
    same_slug.market_hash_name = "AK-47 | Redline (Field-Tested) [import]".to_string();
    same_slug.weapon = "Glock-18".to_string();
    assert_eq!(same_slug.slug(), first.slug);
    let third = store.create_item(same_slug).await.unwrap();
    assert_eq!(third.id, first.id);

    assert_eq!(rows_on(&store, WeaponFamily::Rifle).await, 1);
    assert_eq!(rows_on(&store, WeaponFamily::Other).await, 0);
    assert_eq!(rows_on(&store, WeaponFamily::Pistol).await, 0);
    assert_eq!(store.count().await.unwrap(), 1);
}

#[tokio::test]
async fn test_lookups_hit_exactly_one_shard() {
    let store = sharded_store().await;
    let skin = store
        .create_item(new_skin("Glock-18 | Water Elemental (Minimal Wear)", Some(dec!(3))))
        .await
        .unwrap();

    let by_name = store.get_by_hash_name(&skin.market_hash_name).await.unwrap();
    let by_slug = store.get_by_slug(&skin.slug).await.unwrap();
    let by_id = store.get_by_id(skin.id).await.unwrap();
    assert_eq!(by_name.id, skin.id);
    assert_eq!(by_slug.id, skin.id);
    assert_eq!(by_id.id, skin.id);

    let mut hits = 0;
    for (_, conn) in store.router().shards() {
        if Skins::find_by_id(skin.id).one(conn).await.unwrap().is_some() {
            hits += 1;
        }
    }
    assert_eq!(hits, 1);

    let missing = store.get_by_hash_name("Nope | Nothing").await.unwrap_err();
    assert!(matches!(missing, PipelineError::NotFound(_)));
}

#[tokio::test]
async fn test_price_update_stays_on_owner_shard() {
    let store = sharded_store().await;
    let skin = store
        .create_item(new_skin("USP-S | Orion (Factory New)", Some(dec!(20))))
        .await
        .unwrap();

    let change = store
        .update_item_price(skin.id, dec!(25), 44, "steam")
        .await
        .unwrap();
    assert_decimal_eq(change.old_price, dec!(20));
    assert_decimal_eq(change.change, dec!(25));
    assert_decimal_eq(change.skin.highest_price, dec!(25));
    assert_decimal_eq(change.skin.lowest_price, dec!(20));

    let pistol = store.router().shard(WeaponFamily::Pistol);
    assert_eq!(PriceHistory::find().all(pistol).await.unwrap().len(), 1);
    for family in [WeaponFamily::Rifle, WeaponFamily::Other] {
        let conn = store.router().shard(family);
        assert!(PriceHistory::find().all(conn).await.unwrap().is_empty());
    }

    let missing = store
        .update_item_price(Uuid::new_v4(), dec!(1), 1, "steam")
        .await
        .unwrap_err();
    assert!(missing.is_not_found());
}

#[tokio::test]
async fn test_watch_upsert_keeps_one_active_row() {
    let store = sharded_store().await;
    let user = Uuid::new_v4();
    let skin = store
        .create_item(new_skin("M4A1-S | Printstream (Field-Tested)", Some(dec!(80))))
        .await
        .unwrap();

    for target in [dec!(70), dec!(65)] {
        store
            .upsert_watch(NewWatch {
                user_id: user,
                skin_id: skin.id,
                target_price: Some(target),
                notify_on_drop: true,
                notify_on_target: true,
            })
            .await
            .unwrap();
    }

    let active = store.get_active_watches_by_item(skin.id).await.unwrap();
    assert_eq!(active.len(), 1);
    assert_decimal_eq(active[0].target_price.unwrap(), dec!(65));

    // Watch lives beside the skin
    let rifle = store.router().shard(WeaponFamily::Rifle);
    assert_eq!(Watchlist::find().all(rifle).await.unwrap().len(), 1);

    assert!(store.deactivate_watch(user, skin.id).await.unwrap());
    assert!(store.get_active_watches_by_item(skin.id).await.unwrap().is_empty());
    assert!(!store.deactivate_watch(user, skin.id).await.unwrap());
}

#[tokio::test]
async fn test_trending_merges_across_shards() {
    let store = sharded_store().await;
    let moves = [
        ("Glock-18 | Fade (Factory New)", dec!(100), dec!(130)),
        ("AK-47 | Redline (Field-Tested)", dec!(10), dec!(5)),
        ("★ Karambit | Fade (Factory New)", dec!(1000), dec!(1100)),
        ("AWP | Asiimov (Field-Tested)", dec!(50), dec!(51)),
    ];
    for (name, from, to) in moves {
        let skin = store.create_item(new_skin(name, Some(from))).await.unwrap();
        store.update_item_price(skin.id, to, 10, "steam").await.unwrap();
    }

    let trending = store.trending(TrendPeriod::Day, 3).await.unwrap();
    let names: Vec<_> = trending.iter().map(|s| s.market_hash_name.as_str()).collect();
    assert_eq!(
        names,
        vec![
            "AK-47 | Redline (Field-Tested)",
            "Glock-18 | Fade (Factory New)",
            "★ Karambit | Fade (Factory New)",
        ]
    );

    let gainers = store.top_gainers(10).await.unwrap();
    assert_eq!(gainers.len(), 3);
    assert_eq!(gainers[0].market_hash_name, "Glock-18 | Fade (Factory New)");

    let losers = store.top_losers(10).await.unwrap();
    assert_eq!(losers.len(), 1);
    assert_eq!(losers[0].market_hash_name, "AK-47 | Redline (Field-Tested)");
}

#[tokio::test]
async fn test_health_reports_every_store() {
    let store = sharded_store().await;
    let health = store.health().await;
    let names: Vec<_> = health.iter().map(|h| h.name.as_str()).collect();
    assert_eq!(
        names,
        vec!["shard:pistol", "shard:rifle", "shard:other", "primary"]
    );
    assert!(health.iter().all(|h| h.healthy));
}
