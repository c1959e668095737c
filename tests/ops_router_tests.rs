mod common;

use axum::{
    body::Body,
    http::{Request, StatusCode},
};
use http_body_util::BodyExt;
use rust_decimal_macros::dec;
use serde_json::Value;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tower::ServiceExt;

use skinwatch_backend::AppState;
use skinwatch_backend::handlers::ops_router;
use skinwatch_backend::jobs::price_acquisition::{AcquisitionSettings, PriceAcquisitionEngine};
use skinwatch_backend::services::cache::MemoryCache;
use skinwatch_backend::services::db_store::DbItemStore;
use skinwatch_backend::services::event_bus::{InMemoryBus, ProducerConfig, TopicProducer};
use skinwatch_backend::services::rate_limiter::RateLimiter;

use crate::common::{FakeMarket, new_skin, setup_test_db};

async fn create_test_app_state() -> (AppState, Arc<FakeMarket>) {
    let db = setup_test_db().await.expect("Failed to set up test DB");
    let store = Arc::new(DbItemStore::new(db));
    let cache = Arc::new(MemoryCache::new());
    let bus = Arc::new(InMemoryBus::new(3));
    let market = FakeMarket::new();

    let engine = Arc::new(PriceAcquisitionEngine::new(
        store.clone(),
        market.clone(),
        RateLimiter::for_parser(cache.clone(), 60),
        cache,
        TopicProducer::new(bus, "skin.price.updated", ProducerConfig::for_price_updates()),
        AcquisitionSettings::default(),
    ));

    (AppState { store, engine }, market)
}

async fn get_json(app: axum::Router, uri: &str) -> (StatusCode, Value) {
    let response = app
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = response.into_body().collect().await.unwrap().to_bytes();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_ok() {
    let (state, _) = create_test_app_state().await;

    let (status, json) = get_json(ops_router(state), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["status"], "ok");
    assert_eq!(json["stores"][0]["name"], "primary");
    assert_eq!(json["stores"][0]["healthy"], true);
}

#[tokio::test]
async fn test_status_before_and_after_cycle() {
    let (state, market) = create_test_app_state().await;

    let (status, json) = get_json(ops_router(state.clone()), "/status").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(json["cycle_running"], false);
    assert!(json["last_cycle"].is_null());

    state
        .store
        .create_item(new_skin("Five-SeveN | Hyper Beast (Field-Tested)", Some(dec!(8))))
        .await
        .unwrap();
    market.set_default_price(dec!(9), 30);
    state.engine.run_cycle(&CancellationToken::new()).await.unwrap();

    let (_, json) = get_json(ops_router(state), "/status").await;
    assert_eq!(json["last_cycle"]["total"], 1);
    assert_eq!(json["last_cycle"]["succeeded"], 1);
}

#[tokio::test]
async fn test_unknown_route_is_404() {
    let (state, _) = create_test_app_state().await;
    let response = ops_router(state)
        .oneshot(Request::builder().uri("/nope").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
