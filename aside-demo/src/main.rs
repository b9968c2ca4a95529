mod profile_db;

use aside::{CacheAside, CacheEvent, KeyValueStore, WorkerPool};
use profile_db::{Profile, ProfileDb};
use shared::config::Config;
use std::sync::Arc;
use storage_engine::MokaStore;
use tokio::sync::broadcast;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    info!("Starting cache-aside demo");

    // Load environment variables
    match dotenvy::dotenv() {
        Ok(_) => info!("Loaded environment variables from .env file"),
        Err(_) => info!("No .env file found, using system environment variables"),
    }

    let config = Config::from_env();
    config.validate()?;

    // ============================================
    // STEP 1: Store, worker pool and event feed
    // ============================================
    let store: Arc<dyn KeyValueStore<Profile>> =
        Arc::new(MokaStore::new("profiles", config.store_max_entries));
    let pool = WorkerPool::start(config.pool.clone())?;

    let (events_tx, mut events_rx) = broadcast::channel::<CacheEvent>(256);
    tokio::spawn(async move {
        while let Ok(event) = events_rx.recv().await {
            debug!("cache event: {event:?}");
        }
    });

    let profiles = CacheAside::new(store, pool.clone(), &config)
        .namespaced("profile")
        .with_event_broadcaster(events_tx);

    // ============================================
    // STEP 2: Run the scenario
    // ============================================
    let db = Arc::new(ProfileDb::seeded());
    run_scenario(&profiles, &db).await?;

    // ============================================
    // STEP 3: Let delayed invalidation finish, or stop early on a signal
    // ============================================
    info!("Waiting for delayed invalidation to finish (Ctrl+C to stop now)");
    tokio::select! {
        _ = pool.drain() => info!("All delayed invalidations completed"),
        _ = shutdown_signal() => {
            pool.shutdown().await;
            info!("Pending invalidations cancelled");
        }
    }

    info!("Cache-aside demo shutting down");
    Ok(())
}

async fn run_scenario(
    profiles: &CacheAside<Profile>,
    db: &Arc<ProfileDb>,
) -> Result<(), shared::Error> {
    // Miss, loaded from the database and cached
    let ada = profiles.get("1", move || db.find(1)).await?;
    info!("profile 1: {ada:?}");

    // Hit, the database is not queried
    let again = profiles.get("1", move || db.find(1)).await?;
    info!("profile 1 again: {again:?} (db queries so far: {})", db.queries());

    // Unknown id: the empty marker absorbs the second lookup
    let missing = profiles.get("404", move || db.find(404)).await?;
    let still_missing = profiles.get("404", move || db.find(404)).await?;
    info!(
        "profile 404: {missing:?} / {still_missing:?} (db queries so far: {})",
        db.queries()
    );

    // Write through the invalidator, then read the new value back
    let updated = profiles
        .remove_with("1", move || db.rename(1, "Ada King"))
        .await?;
    info!("rename applied: {updated}");

    let renamed = profiles.get("1", move || db.find(1)).await?;
    info!("profile 1 after rename: {renamed:?}");

    Ok(())
}

// Graceful shutdown handler
async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            tracing::warn!("Failed to install Ctrl+C handler: {e}");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                tracing::warn!("Failed to install signal handler: {e}");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            info!("Received Ctrl+C signal");
        },
        _ = terminate => {
            info!("Received terminate signal");
        },
    }

    info!("Shutting down gracefully...");
}
