//! IP Tracking Service
//!
//! This is the main entry point for the IP tracking service.
//! It wires the stores, the geolocation resolver and the interception
//! middleware together, schedules the anomaly scanner and starts the web server.

use std::sync::Arc;
use std::time::Duration;

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use dotenv::dotenv;
use log::{info, warn};
use metrics_exporter_prometheus::PrometheusBuilder;
use redis::aio::ConnectionManager;
use redis::Client;

use ip_tracking_service::api::{self, ApiState};
use ip_tracking_service::config;
use ip_tracking_service::core::{
    run_every, AnomalyScanner, GeoCache, GeoResolver, HttpGeoLookup, Interceptor,
    MemoryGeoCache, RedisGeoCache, RequestInterception,
};
use ip_tracking_service::models::{CacheBackend, Config};
use ip_tracking_service::storage::{init_pool, SqliteStore};

async fn build_cache(config: &Config) -> anyhow::Result<Arc<dyn GeoCache>> {
    match config.geo.cache_backend {
        CacheBackend::Redis => {
            let client = Client::open(config.redis.url.as_str())
                .context("Failed to create Redis client")?;
            let manager = ConnectionManager::new(client)
                .await
                .context("Failed to connect to Redis")?;
            Ok(Arc::new(RedisGeoCache::new(manager)))
        }
        CacheBackend::Memory => {
            warn!("Using in-process geolocation cache; entries are not shared between instances");
            Ok(Arc::new(MemoryGeoCache::new()))
        }
    }
}

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables
    dotenv().ok();

    // Initialize logging
    env_logger::init();

    info!("Starting IP Tracking Service...");

    // Load configuration
    let config = config::load_config().context("Failed to load configuration")?;
    let config = Arc::new(config);

    let metrics = match PrometheusBuilder::new().install_recorder() {
        Ok(handle) => Some(handle),
        Err(e) => {
            warn!("Prometheus recorder not installed: {}", e);
            None
        }
    };

    // Stores
    let pool = init_pool(&config.database)
        .await
        .context("Failed to initialize database")?;
    let store = Arc::new(SqliteStore::new(pool));

    // Geolocation
    let lookup = HttpGeoLookup::new(
        config.geo.base_url.clone(),
        Duration::from_millis(config.geo.timeout_ms),
    )
    .context("Failed to build geolocation client")?;
    let resolver = Arc::new(GeoResolver::new(
        Arc::new(lookup),
        build_cache(&config).await?,
        Duration::from_secs(config.geo.cache_ttl_seconds),
    ));

    let interceptor = Arc::new(Interceptor::new(resolver, store.clone(), store.clone()));

    if config.scanner.enabled {
        let scanner = Arc::new(AnomalyScanner::new(
            store.clone(),
            store.clone(),
            config.scanner.upsert_concurrency,
        ));
        actix_rt::spawn(run_every(
            scanner,
            Duration::from_secs(config.scanner.interval_seconds.max(1)),
        ));
    }

    // Create API state
    let state = web::Data::new(ApiState {
        suspicious: store.clone(),
        metrics,
    });

    info!("Listening on {}:{}", config.server.host, config.server.port);

    // Start HTTP server
    HttpServer::new(move || {
        App::new()
            .wrap(RequestInterception::new(interceptor.clone()))
            .app_data(state.clone())
            .configure(api::config)
    })
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    Ok(())
}
