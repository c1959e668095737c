use std::sync::Arc;
use std::time::Duration;

use sea_orm::DatabaseConnection;
use sea_orm_migration::MigratorTrait;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use skinwatch_backend::{
    AppState,
    config::Config,
    consumers::{
        RetryPolicy, notification_consumer::{NotificationConsumer, SystemClock},
        price_consumer::PriceConsumer,
        supervise_consumer,
    },
    error::{PipelineError, Result},
    handlers::ops_router,
    jobs::{
        price_acquisition::{AcquisitionSettings, PriceAcquisitionEngine, start_price_acquisition_job},
        price_history_retention::start_price_history_retention_job,
        skin_discovery::{SkinDiscovery, start_skin_discovery_job},
    },
    services::{
        cache::{Cache, MemoryCache},
        db_store::DbItemStore,
        event_bus::{
            ConsumerConfig, EventPublisher, EventSubscriber, InMemoryBus, ProducerConfig, StartOffset,
            TopicProducer,
        },
        item_store::ItemRepository,
        notification_channels::{
            ChannelDispatcher, ChannelKind, InAppChannel, NotificationChannel, RelayChannel, WebhookChannel,
        },
        rate_limiter::RateLimiter,
        shard_router::{ShardRouter, connect_pool},
        sharded_store::ShardedItemStore,
        steam_market::SteamMarketClient,
    },
};

const CONSUMER_RESTART_DELAY: Duration = Duration::from_secs(5);
const CACHE_SWEEP_INTERVAL: Duration = Duration::from_secs(60);
const DELIVERY_TIMEOUT: Duration = Duration::from_secs(10);

#[tokio::main]
async fn main() {
    // Initialize tracing
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "info,skinwatch_backend=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    // Load environment variables
    dotenvy::dotenv().ok();

    if let Err(e) = run().await {
        tracing::error!("Fatal: {}", e);
        std::process::exit(1);
    }
}

async fn migrate(db: &DatabaseConnection, name: &str) -> Result<()> {
    tracing::info!(store = name, "Running migrations...");
    migration::Migrator::up(db, None)
        .await
        .map_err(|e| PipelineError::Fatal(format!("Migrations failed on {}: {}", name, e)))
}

async fn build_store(config: &Config) -> Result<Arc<dyn ItemRepository>> {
    let db = &config.database;

    tracing::info!("Connecting to database...");
    let primary = connect_pool(&db.url, db.pool_max)
        .await
        .map_err(|e| PipelineError::Fatal(format!("Primary database unreachable: {}", e)))?;
    migrate(&primary, "primary").await?;

    if !db.shard_enabled {
        return Ok(Arc::new(DbItemStore::new(primary)));
    }

    let router = ShardRouter::connect(&db.shard_urls, db.pool_max).await?;
    for (family, conn) in router.shards() {
        migrate(conn, family.as_str()).await?;
    }
    tracing::info!("Sharded storage enabled across {} shards", db.shard_urls.len());

    Ok(Arc::new(ShardedItemStore::new(router, primary)))
}

fn build_dispatcher(config: &Config) -> Result<ChannelDispatcher> {
    let channels: Vec<Arc<dyn NotificationChannel>> = vec![
        Arc::new(InAppChannel::new(1024)),
        Arc::new(WebhookChannel::new(DELIVERY_TIMEOUT)?),
        Arc::new(RelayChannel::new(
            ChannelKind::Email,
            config.notify.email_relay_url.clone(),
            DELIVERY_TIMEOUT,
        )?),
        Arc::new(RelayChannel::new(
            ChannelKind::Push,
            config.notify.push_relay_url.clone(),
            DELIVERY_TIMEOUT,
        )?),
    ];
    Ok(ChannelDispatcher::new(channels))
}

fn start_cache_sweeper(cache: Arc<MemoryCache>, cancel: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(CACHE_SWEEP_INTERVAL);
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    let purged = cache.purge_expired();
                    if purged > 0 {
                        tracing::debug!(purged = purged, remaining = cache.len(), "Swept expired cache keys");
                    }
                }
            }
        }
    })
}

async fn shutdown_signal(cancel: CancellationToken) {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            tracing::error!("Failed to listen for ctrl-c: {}", e);
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                tracing::error!("Failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }

    tracing::info!("Shutdown signal received");
    cancel.cancel();
}

async fn run() -> Result<()> {
    let config = Config::from_env()?;
    let cancel = CancellationToken::new();

    let store = build_store(&config).await?;

    if config.cache.addr.is_some() {
        tracing::warn!("REDIS_ADDR is set but this build uses the in-process cache");
    }
    let memory_cache = Arc::new(MemoryCache::new());
    let cache: Arc<dyn Cache> = memory_cache.clone();

    if !config.bus.brokers.is_empty() {
        tracing::warn!(brokers = ?config.bus.brokers, "Broker list ignored, using in-process event bus");
    }
    let bus = Arc::new(InMemoryBus::new(config.bus.partitions));
    let publisher: Arc<dyn EventPublisher> = bus.clone();

    let price_updates = TopicProducer::new(
        publisher.clone(),
        config.bus.topic_price_updates.clone(),
        ProducerConfig::for_price_updates(),
    );
    let discovered = TopicProducer::new(
        publisher.clone(),
        config.bus.topic_skin_discovered.clone(),
        ProducerConfig::for_discovery(),
    );
    let alerts = TopicProducer::new(
        publisher.clone(),
        config.bus.topic_price_alerts.clone(),
        ProducerConfig::for_alerts(),
    );

    let market = Arc::new(SteamMarketClient::new(
        config.market.base_url.clone(),
        config.market.app_id,
        config.market.currency,
        config.parser.request_timeout,
    )?);

    let engine = Arc::new(PriceAcquisitionEngine::new(
        store.clone(),
        market.clone(),
        RateLimiter::for_parser(cache.clone(), config.parser.rate_limit_per_minute),
        cache.clone(),
        price_updates,
        AcquisitionSettings {
            interval: config.parser.interval,
            workers: config.parser.workers,
            request_timeout: config.parser.request_timeout,
        },
    ));

    let dispatcher = build_dispatcher(&config)?;

    let mut handles = vec![
        start_cache_sweeper(memory_cache, cancel.clone()),
        start_price_history_retention_job(store.clone(), config.retention_days, cancel.clone()),
    ];

    if config.parser.discovery_enabled {
        let discovery = Arc::new(SkinDiscovery::new(
            store.clone(),
            market.clone(),
            discovered,
            config.parser.discovery_queries.clone(),
        ));
        handles.push(start_skin_discovery_job(
            discovery,
            config.parser.discovery_interval,
            cancel.clone(),
        ));
    }

    // Price consumer starts at the newest record on first join
    let price_consumer = Arc::new(PriceConsumer::new(store.clone(), cache.clone(), alerts));
    let price_subscription = ConsumerConfig::new(
        config.bus.topic_price_updates.clone(),
        config.bus.group_price_consumer.clone(),
    )
    .start_offset(StartOffset::Latest);
    let price_bus = bus.clone();
    handles.push(supervise_consumer(
        price_consumer,
        move || Box::new(price_bus.subscribe(price_subscription.clone())) as Box<dyn EventSubscriber>,
        RetryPolicy::default(),
        CONSUMER_RESTART_DELAY,
        cancel.clone(),
    ));

    // Notification consumer must not miss alerts published before it joined
    let notification_consumer = Arc::new(NotificationConsumer::with_clock(
        store.clone(),
        cache.clone(),
        dispatcher,
        Arc::new(SystemClock::new(config.notify.quiet_hours_offset)),
    ));
    let alert_subscription = ConsumerConfig::new(
        config.bus.topic_price_alerts.clone(),
        config.bus.group_notification_consumer.clone(),
    )
    .start_offset(StartOffset::Earliest);
    let alert_bus = bus.clone();
    handles.push(supervise_consumer(
        notification_consumer,
        move || Box::new(alert_bus.subscribe(alert_subscription.clone())) as Box<dyn EventSubscriber>,
        RetryPolicy::default(),
        CONSUMER_RESTART_DELAY,
        cancel.clone(),
    ));

    // Consumers attach first so the opening cycle's events are not skipped
    handles.push(start_price_acquisition_job(engine.clone(), cancel.clone()));

    let state = AppState {
        store: store.clone(),
        engine: engine.clone(),
    };
    let app = ops_router(state);

    let listener = tokio::net::TcpListener::bind(("0.0.0.0", config.http_port))
        .await
        .map_err(|e| PipelineError::Fatal(format!("Failed to bind port {}: {}", config.http_port, e)))?;
    if let Ok(addr) = listener.local_addr() {
        tracing::info!("Server listening on {}", addr);
    }

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel.clone()))
        .await
        .map_err(|e| PipelineError::Fatal(format!("Server error: {}", e)))?;

    // Server only returns after the signal; make sure workers see it too
    cancel.cancel();
    for handle in handles {
        if let Err(e) = handle.await {
            tracing::error!("Background task failed during shutdown: {}", e);
        }
    }

    tracing::info!("Shutdown complete");
    Ok(())
}
