//! Vestibule - caching request router

use clap::Parser;
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

use vestibule::{
    cache::{MemoryBackend, SledBackend, StoreBackend},
    clock::SystemClock,
    config::Args,
    connectivity::spawn_connectivity_probe_task,
    fetch::HttpFetcher,
    queue::DeferredSubmissionQueue,
    server::{self, AppState},
    RequestCacheRouter,
};

/// sled tree journaling deferred submissions
const DEFERRED_TREE: &str = "deferred";

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Load environment variables from .env file if present
    let _ = dotenvy::dotenv();

    let args = Args::parse();

    let log_level = args.log_level.clone();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| format!("vestibule={},info", log_level).into());
    if args.json_logs() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().json())
            .init();
    } else {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer())
            .init();
    }

    if let Err(e) = args.validate() {
        error!("Configuration error: {}", e);
        std::process::exit(1);
    }

    let config = args.router_config()?;

    info!("======================================");
    info!("  Vestibule - caching request router");
    info!("======================================");
    info!("Listen: {}", args.listen);
    info!("Origin: {}", config.origin);
    info!("Cache version: {}", config.stores.version_id());
    info!(
        "Store: {}",
        if args.memory_store {
            "memory".to_string()
        } else {
            args.cache_dir.display().to_string()
        }
    );
    info!("Critical resources: {}", config.critical_resources.len());
    match config.fetch_timeout {
        Some(timeout) => info!("Fetch timeout: {:?}", timeout),
        None => info!("Fetch timeout: none"),
    }
    info!("======================================");

    let clock = Arc::new(SystemClock);
    let fetcher = Arc::new(HttpFetcher::with_defaults()?);

    let (backend, journal): (Arc<dyn StoreBackend>, Option<sled::Tree>) = if args.memory_store {
        if args.durable_queue {
            warn!("DURABLE_QUEUE ignored with MEMORY_STORE, deferred submissions stay in memory");
        }
        (Arc::new(MemoryBackend::new()), None)
    } else {
        let sled = SledBackend::open(&args.cache_dir).await?;
        let journal = if args.durable_queue {
            Some(sled.db().open_tree(DEFERRED_TREE)?)
        } else {
            None
        };
        (Arc::new(sled), journal)
    };

    let mut router = RequestCacheRouter::new(config, backend, fetcher, clock.clone());
    if let Some(tree) = journal {
        let queue = DeferredSubmissionQueue::durable(tree, clock)?;
        router = router.with_queue(Arc::new(queue));
    }
    let router = Arc::new(router);

    if let Err(e) = router.boot().await {
        warn!(error = %e, "Boot did not complete, serving in pass-through until the origin is reachable");
    }

    spawn_connectivity_probe_task(
        Arc::clone(&router),
        router.config().origin.clone(),
        args.probe_interval(),
    );

    let shutdown = router.shutdown_token();
    tokio::spawn({
        let shutdown = shutdown.clone();
        async move {
            match tokio::signal::ctrl_c().await {
                Ok(()) => {
                    info!("Shutdown signal received");
                    shutdown.cancel();
                }
                Err(e) => warn!(error = %e, "Could not listen for shutdown signal"),
            }
        }
    });

    let state = Arc::new(AppState::new(args.listen, Arc::clone(&router)));
    let result = server::run(state, shutdown).await;
    router.shutdown().await;

    if let Err(e) = result {
        error!("Server error: {}", e);
        return Err(e.into());
    }
    Ok(())
}
