//! Balance engine HTTP server binary

use actix_web::{middleware, web, App, HttpServer};
use anyhow::Context;
use balance_engine::{
    cache::RedisBalanceCache,
    config::Config,
    handlers,
    metrics::{self, REGISTRY},
    notifier::NatsNotifier,
    store::PgLedgerStore,
    Services, ServicesDependencies,
};
use dotenv::dotenv;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenv().ok();

    let config = Config::from_env().context("Failed to load configuration")?;
    config
        .validate()
        .map_err(|e| anyhow::anyhow!("Invalid configuration: {}", e))?;

    // Initialize tracing
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(config.log.level.clone()));
    if config.log.format == "json" {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(filter)
            .with_target(false)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_file(true)
            .with_line_number(true)
            .with_target(false)
            .init();
    }

    info!("Starting Balance Engine on port {}", config.server.port);

    metrics::register_metrics(&REGISTRY).context("Failed to register metrics")?;

    let store = PgLedgerStore::connect(
        &config.database.url,
        config.database.max_connections,
        config.database.min_connections,
    )
    .await
    .context("Failed to connect to database")?;
    store.migrate().await.context("Failed to run migrations")?;

    let cache = RedisBalanceCache::connect(&config.redis.url)
        .await
        .context("Failed to connect to Redis")?;

    let notifier = NatsNotifier::connect(&config.nats.url, &config.nats.subject_prefix)
        .await
        .context("Failed to connect to NATS")?;

    let services = Arc::new(Services::new(ServicesDependencies {
        store: Arc::new(store),
        cache: Arc::new(cache),
        notifier: Arc::new(notifier),
        balance_ttl: config.redis.balance_ttl(),
        history_page_limit: config.ledger.history_page_limit,
    }));

    HttpServer::new(move || {
        App::new()
            .wrap(middleware::Logger::default())
            .wrap(middleware::NormalizePath::trim())
            .app_data(web::Data::new(services.clone()))
            .configure(handlers::configure_routes)
    })
    .workers(config.server.workers)
    .bind((config.server.host.as_str(), config.server.port))?
    .run()
    .await?;

    info!("Balance Engine stopped");
    Ok(())
}
