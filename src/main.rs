//! Courier message dispatch service.
//!
//! Main entry point for the courier server. Initializes all subsystems
//! and coordinates graceful startup and shutdown.

use std::{sync::Arc, time::Duration};

use anyhow::{Context, Result};
use courier_api::{AppState, Config};
use courier_core::storage::Storage;
use courier_delivery::{
    Dispatcher, PostgresMessageStore, RedisMetadataCache, Scheduler, WebhookClient,
};
use sqlx::postgres::PgPoolOptions;
use tracing::{error, info, warn};

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing()?;

    info!("Starting courier dispatch service");

    let config = Config::load()?;
    let server_addr = config.parse_server_addr()?;
    info!(
        database_url = %config.database_url_masked(),
        server_addr = %server_addr,
        batch_size = config.batch_size,
        tick_interval_seconds = config.tick_interval_seconds,
        max_retries = config.max_retries,
        "Configuration loaded"
    );

    let db_pool = create_database_pool(&config).await?;
    info!("Database connection pool established");

    let storage = Arc::new(Storage::new(db_pool.clone()));
    storage.ensure_schema().await.context("Failed to ensure database schema")?;
    info!("Database schema ready");

    let store = Arc::new(PostgresMessageStore::new(storage));
    let provider = Arc::new(WebhookClient::new(config.to_client_config())?);
    let cache = Arc::new(RedisMetadataCache::new(config.to_cache_config())?);
    let dispatcher = Arc::new(
        Dispatcher::new(store.clone(), provider, config.to_dispatcher_config()).with_cache(cache),
    );
    let scheduler =
        Arc::new(Scheduler::new(store.clone(), dispatcher, config.to_scheduler_config())?);

    let listener =
        courier_api::bind(server_addr).await.context("Failed to bind HTTP listener")?;

    if config.scheduler_autostart {
        scheduler.start()?;
        info!("Scheduler started on boot");
    }

    let state = AppState {
        store,
        scheduler: scheduler.clone(),
        max_message_chars: config.max_message_chars,
    };

    let server_result = courier_api::serve(
        listener,
        state,
        Duration::from_secs(config.request_timeout),
        courier_api::shutdown_signal(),
    )
    .await;
    if let Err(e) = &server_result {
        error!(error = %e, "Server failed");
    }

    match scheduler.shutdown(config.shutdown_timeout()).await {
        Ok(()) => info!("Scheduler stopped"),
        Err(e) => warn!(error = %e, "Scheduler did not stop cleanly"),
    }

    db_pool.close().await;
    info!("Database connections closed");

    server_result.context("HTTP server failed")?;
    info!("Courier shutdown complete");
    Ok(())
}

/// Initializes tracing with environment-based configuration.
fn init_tracing() -> Result<()> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new("info,courier=debug,tower_http=debug"))
        .context("Invalid RUST_LOG environment variable")?;

    let fmt_layer = fmt::layer().with_target(true).with_file(true).with_line_number(true);

    tracing_subscriber::registry().with(filter).with(fmt_layer).init();
    Ok(())
}

/// Creates the database connection pool with retry logic.
async fn create_database_pool(config: &Config) -> Result<sqlx::PgPool> {
    const MAX_ATTEMPTS: u32 = 5;
    const RETRY_DELAY: Duration = Duration::from_secs(2);

    let mut attempt = 1;

    loop {
        match PgPoolOptions::new()
            .max_connections(config.database_max_connections)
            .min_connections(config.database_min_connections)
            .acquire_timeout(Duration::from_secs(config.database_connection_timeout))
            .connect(&config.database_url)
            .await
        {
            Ok(pool) => return Ok(pool),
            Err(e) if attempt < MAX_ATTEMPTS => {
                warn!(
                    attempt,
                    max_attempts = MAX_ATTEMPTS,
                    error = %e,
                    "Database connection failed, retrying"
                );
                attempt += 1;
                tokio::time::sleep(RETRY_DELAY).await;
            },
            Err(e) => {
                return Err(e).context("Failed to create database connection pool after retries");
            },
        }
    }
}
