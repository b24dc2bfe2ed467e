use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tokio::sync::watch;
use tracing::{debug, error, info};
use tracing_subscriber::EnvFilter;

use sale_service::api;
use sale_service::cache::{MemoryReservationCache, RedisReservationCache, ReservationCache};
use sale_service::clock::SystemClock;
use sale_service::config::{Args, StoreBackend};
use sale_service::service::SaleService;
use sale_service::store::{run_migrations, MemoryStore, PgSaleStore, SaleStore};

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();
    let args = Args::parse();
    let settings = args.sale_settings()?;
    let request_timeout = args.request_timeout()?;

    let (store, cache): (Arc<dyn SaleStore>, Arc<dyn ReservationCache>) = match args.store_backend {
        StoreBackend::Postgres => {
            // Run migrations first
            info!("Running database migrations...");
            run_migrations(&args.database_url)?;
            info!("Migrations completed successfully");

            let store: Arc<dyn SaleStore> =
                Arc::new(PgSaleStore::connect(&args.database_url, args.db_pool_size).await?);
            let cache: Arc<dyn ReservationCache> =
                Arc::new(RedisReservationCache::connect(&args.redis_url).await?);
            (store, cache)
        }
        StoreBackend::Memory => {
            info!("Using in-memory store and cache; state will not survive a restart");
            let store: Arc<dyn SaleStore> = Arc::new(MemoryStore::new());
            let cache: Arc<dyn ReservationCache> = Arc::new(MemoryReservationCache::new());
            (store, cache)
        }
    };

    let service = Arc::new(SaleService::new(store, cache, Arc::new(SystemClock), settings));

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let scheduler = service.scheduler();
    let scheduler_task = tokio::spawn(async move {
        scheduler.run(shutdown_rx).await;
    });

    let app = api::create_router(api::AppState {
        service,
        request_timeout,
    });
    let listener = tokio::net::TcpListener::bind(format!("0.0.0.0:{}", args.port)).await?;

    info!("Sale service listening on port {}", args.port);

    axum::serve(listener, app)
        .with_graceful_shutdown(async move {
            if let Err(e) = tokio::signal::ctrl_c().await {
                error!("Failed to listen for shutdown signal: {}", e);
            }
            info!("Shutting down");
            if shutdown_tx.send(true).is_err() {
                debug!("Sale scheduler already stopped before shutdown signal");
            }
        })
        .await?;

    if let Err(e) = scheduler_task.await {
        error!("Sale scheduler task failed: {}", e);
    }

    info!("Application shut down complete");
    Ok(())
}
