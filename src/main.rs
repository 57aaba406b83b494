//! Live Price Curve - Entry Point
//!
//! Wires configuration, logging, the aggregate client, the realtime
//! change feed and one synchronizer plus pricer per catalog product.
//! Runs until SIGINT.
//!
//! Wiring sequence:
//! 1. Load config.toml + validate
//! 2. Init tracing (JSON structured logging)
//! 3. Create the stats cache and its in-process backend
//! 4. Create AggregateClient (HTTP + rate limit, key from AGGREGATE_API_KEY)
//! 5. Create RealtimeFeed (change-feed transport)
//! 6. Create StatsHub and observe every configured product
//! 7. Spawn one LivePricer per product, fed by stats + catalog reloads
//! 8. Spawn health (/live, /ready) and Prometheus servers
//! 9. Wait for SIGINT → graceful shutdown (unsubscribe→stop→exit)

#[cfg(not(target_env = "msvc"))]
#[global_allocator]
static GLOBAL: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use tokio::signal;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{error, info, warn};

use live_price_curve::adapters::api::AggregateClient;
use live_price_curve::adapters::cache::MemoryCacheBackend;
use live_price_curve::adapters::feeds::RealtimeFeed;
use live_price_curve::adapters::metrics::{HealthServer, HealthState, MetricsRegistry};
use live_price_curve::config::hot_reload::ConfigWatcher;
use live_price_curve::config::{self, AppConfig};
use live_price_curve::domain::product::Product;
use live_price_curve::domain::stats::{ProductId, ProductStatsSnapshot};
use live_price_curve::ports::order_count::OrderCountSource;
use live_price_curve::usecases::{LivePricer, StatsCache, StatsHub, StatsSubscription};

/// Cadence of the source health probe and cache pruning.
const HEALTH_CHECK_INTERVAL: Duration = Duration::from_secs(30);

#[tokio::main]
async fn main() -> Result<()> {
    // ── 1. Load configuration ────────────────────────────────
    let config_path = std::env::var("CONFIG_PATH").unwrap_or_else(|_| "config.toml".to_string());
    let config =
        config::loader::load_config(&config_path).context("Failed to load configuration")?;

    // ── 2. Initialize structured JSON logging ───────────────
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(&config.service.log_level)),
        )
        .json()
        .init();

    info!(
        name = %config.service.name,
        version = env!("CARGO_PKG_VERSION"),
        products = config.products.len(),
        "Starting live price curve service"
    );

    // ── 3. Shutdown channel + monitoring state ──────────────
    let (shutdown_tx, _shutdown_rx) = broadcast::channel::<()>(1);
    let health = Arc::new(HealthState::new());
    let metrics = Arc::new(MetricsRegistry::new().context("Failed to create metrics registry")?);

    // ── 4. Stats cache ───────────────────────────────────────
    let backend = Arc::new(MemoryCacheBackend::<u64>::new(config.cache.max_entries));
    let cache = Arc::new(StatsCache::new(backend.clone(), config.cache_policy()));

    // ── 5. Ground-truth source + change feed ────────────────
    let client_config = config.aggregate_client_config();
    if client_config.api_key.is_none() {
        warn!("AGGREGATE_API_KEY not set, requests are unauthenticated");
    }
    let realtime = RealtimeFeed::new(config.realtime_config(client_config.api_key.clone()));
    let source = Arc::new(AggregateClient::new(client_config).context("Failed to create aggregate client")?);

    let hub = StatsHub::new(
        cache,
        source.clone(),
        Arc::new(realtime),
        config.sync_settings(),
    );

    // ── 6. Catalog hot-reload ────────────────────────────────
    let (mut watcher, config_rx) = ConfigWatcher::new(&config_path, config.clone());
    let watcher_shutdown = shutdown_tx.subscribe();
    let watcher_handle = tokio::spawn(async move {
        if let Err(e) = watcher.run(watcher_shutdown).await {
            error!(error = %e, "Config watcher failed");
        }
    });

    // ── 7. Observe + price every product ────────────────────
    let mut subscriptions = Vec::with_capacity(config.products.len());
    let mut catalogs = HashMap::with_capacity(config.products.len());
    let mut pricer_handles = Vec::with_capacity(config.products.len());

    for product_config in &config.products {
        let product = product_config.to_product();
        let subscription = hub.observe_stats(&product.id, product_config.sync_options());
        let (catalog_tx, catalog_rx) = watch::channel(product.clone());

        pricer_handles.push(spawn_pricer(product, &subscription, catalog_rx, Arc::clone(&metrics)));
        catalogs.insert(product_config.id.clone(), catalog_tx);
        subscriptions.push(subscription);
    }
    metrics.set_active_products(hub.active_products().len());

    let catalog_handle = tokio::spawn(forward_catalog(config_rx, catalogs, shutdown_tx.subscribe()));

    // ── 8. Health + metrics servers ──────────────────────────
    let health_server = HealthServer::new(Arc::clone(&health), config.metrics.health_port);
    let health_handle = tokio::spawn({
        let shutdown = shutdown_tx.subscribe();
        async move {
            if let Err(e) = health_server.run(shutdown).await {
                error!(error = %e, "Health server failed");
            }
        }
    });

    let metrics_handle = config.metrics.enabled.then(|| {
        let metrics = Arc::clone(&metrics);
        let bind = config.metrics.bind_address.clone();
        let shutdown = shutdown_tx.subscribe();
        tokio::spawn(async move {
            if let Err(e) = metrics.serve(bind, shutdown).await {
                error!(error = %e, "Metrics server failed");
            }
        })
    });

    let monitor_handle = tokio::spawn(monitor_source(
        source,
        backend,
        Arc::clone(&health),
        shutdown_tx.subscribe(),
    ));

    health.set_engine_running(true);
    info!(products = ?hub.active_products(), "All tasks spawned - service is running");

    // ── 9. Wait for SIGINT ───────────────────────────────────
    if let Err(e) = signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for SIGINT, shutting down");
    } else {
        info!("SIGINT received, initiating graceful shutdown");
    }

    // 1. Readiness probe → 503
    health.set_engine_running(false);

    // 2. Signal all tasks to stop
    let _ = shutdown_tx.send(());

    // 3. Release observers; the last one stops each synchronizer
    for mut subscription in subscriptions {
        subscription.unsubscribe();
    }
    hub.shutdown();
    metrics.set_active_products(0);

    // 4. Pricers end once their stats channel closes (up to 5s)
    for handle in pricer_handles {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    // 5. Background tasks
    let _ = tokio::time::timeout(Duration::from_secs(5), watcher_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), catalog_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), monitor_handle).await;
    let _ = tokio::time::timeout(Duration::from_secs(5), health_handle).await;
    if let Some(handle) = metrics_handle {
        let _ = tokio::time::timeout(Duration::from_secs(5), handle).await;
    }

    info!("Shutdown complete");
    Ok(())
}

/// Spawn the pricer for one product. Every priced view is logged and
/// exported; each new snapshot is counted once by origin.
fn spawn_pricer(
    product: Product,
    subscription: &StatsSubscription,
    catalog_rx: watch::Receiver<Product>,
    metrics: Arc<MetricsRegistry>,
) -> JoinHandle<()> {
    let stats_rx = subscription.receiver();
    let mut last_snapshot: Option<ProductStatsSnapshot> = None;

    tokio::spawn(LivePricer::new(product, None).run(stats_rx, catalog_rx, move |priced| {
        metrics.record(priced);

        let stats = &priced.stats;
        if let Some(snapshot) = &stats.snapshot {
            if last_snapshot.as_ref() != Some(snapshot) {
                metrics.count_snapshot(&stats.product_id, snapshot.origin);
                last_snapshot = Some(snapshot.clone());
            }
        }

        info!(
            product = %stats.product_id,
            orders = stats.current_orders,
            state = %stats.state,
            price = %priced.display_price(),
            modification_pct = priced.price.modification_percentage,
            error = stats.error.as_deref().unwrap_or(""),
            "Price updated"
        );
    }))
}

/// Push reloaded curves to the pricers. Products added by a reload are
/// not observed until restart.
async fn forward_catalog(
    mut config_rx: watch::Receiver<AppConfig>,
    catalogs: HashMap<ProductId, watch::Sender<Product>>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            changed = config_rx.changed() => {
                if changed.is_err() {
                    return;
                }
                let config = config_rx.borrow_and_update().clone();
                for product in config.products() {
                    match catalogs.get(&product.id) {
                        Some(tx) => {
                            tx.send_if_modified(|current| {
                                if *current == product {
                                    return false;
                                }
                                *current = product;
                                true
                            });
                        }
                        None => warn!(product = %product.id, "New product requires a restart to observe"),
                    }
                }
            }
        }
    }
}

/// Probe the aggregate endpoint for readiness and prune expired cache
/// entries on a fixed cadence.
async fn monitor_source(
    source: Arc<AggregateClient>,
    backend: Arc<MemoryCacheBackend<u64>>,
    health: Arc<HealthState>,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut interval = tokio::time::interval(HEALTH_CHECK_INTERVAL);
    loop {
        tokio::select! {
            biased;
            _ = shutdown_rx.recv() => return,
            _ = interval.tick() => {
                let healthy = source.is_healthy().await;
                health.set_source_healthy(healthy);
                if !healthy {
                    warn!("Aggregate endpoint unhealthy");
                }
                let pruned = backend.prune_expired().await;
                if pruned > 0 {
                    info!(pruned, "Expired cache entries pruned");
                }
            }
        }
    }
}
