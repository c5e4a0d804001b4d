use std::sync::Arc;
use std::time::Duration;

use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use cabpool_core::GeoPoint;
use cabpool_engine::dispatch::{Dispatcher, READY_TIMEOUT};
use cabpool_engine::WorkerContext;
use cabpool_routing::{DirectionsClient, RouteIndexer};
use cabpool_store::{Config, DbClient, PgTripStore, RedisBus, RedisPool};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cabpool=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer())
        .init();

    let config = Config::load()?;
    tracing::info!("Starting route-pooling matcher");

    // One bootstrap connection runs migrations before any worker starts.
    let bootstrap = DbClient::new(&config.database.url).await?;
    bootstrap.migrate().await?;
    drop(bootstrap);

    let workers = config.matching.worker_count();
    let config = Arc::new(config);
    let factory_config = config.clone();

    let dispatcher = Dispatcher::init(workers, READY_TIMEOUT, move |worker_id| {
        let config = factory_config.clone();
        async move {
            let pool = RedisPool::connect(&config.redis.url).await?;
            let bus = RedisBus::connect(&config.redis.url).await?;
            let db = DbClient::new(&config.database.url).await?;
            let directions = DirectionsClient::new(
                &config.routing.endpoint,
                config.routing.api_key.clone(),
                Duration::from_secs(config.routing.timeout_seconds),
            )?;
            let indexer = RouteIndexer::new(
                directions,
                GeoPoint {
                    lat: config.origin.lat,
                    lng: config.origin.lng,
                },
                config.matching.hex_resolution,
            )?;
            tracing::info!(worker_id, "worker clients connected");
            Ok(WorkerContext {
                pool: Arc::new(pool),
                trips: Arc::new(PgTripStore::new(db)),
                bus: Arc::new(bus),
                routes: Arc::new(indexer),
                rules: config.matching.clone(),
            })
        }
    })
    .await?;

    tracing::info!(workers, "Matcher ready; transport layer may submit tasks");
    tokio::signal::ctrl_c().await?;

    tracing::info!("Shutdown signal received");
    dispatcher.shutdown().await;
    Ok(())
}
