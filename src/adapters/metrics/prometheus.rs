//! Prometheus Metrics Registry - Order Sync Observability
//!
//! Registers and exposes Prometheus metrics for Grafana dashboards.
//! Covers live order counts, computed prices and the health of each
//! product's synchronization path.

use std::sync::Arc;

use anyhow::Context;
use axum::routing::get;
use axum::Router;
use prometheus::{
    Encoder, GaugeVec, IntCounterVec, IntGauge, IntGaugeVec, Opts, Registry, TextEncoder,
};
use rust_decimal::prelude::ToPrimitive;
use tokio::sync::broadcast;
use tracing::{info, instrument, warn};

use crate::domain::stats::{SnapshotOrigin, SyncState};
use crate::usecases::live_pricing::PricedView;

/// Centralized Prometheus metrics for the service.
///
/// All metrics follow the naming convention `order_sync_*` and carry a
/// `product` label.
pub struct MetricsRegistry {
    /// Prometheus registry.
    registry: Registry,
    /// Last published order count.
    pub current_orders: IntGaugeVec,
    /// Price after the active curve modifier or override.
    pub modified_price: GaugeVec,
    /// Signed whole-percent modification.
    pub modification_pct: IntGaugeVec,
    /// 1 while the product is served by fallback polling.
    pub degraded: IntGaugeVec,
    /// 1 while fetch retries are exhausted.
    pub fetch_error: IntGaugeVec,
    /// Published snapshots by origin.
    pub snapshot_updates: IntCounterVec,
    /// Products currently being synchronized.
    pub active_products: IntGauge,
}

impl MetricsRegistry {
    /// Create and register all Prometheus metrics.
    pub fn new() -> anyhow::Result<Self> {
        let registry = Registry::new();

        let current_orders = IntGaugeVec::new(
            Opts::new("order_sync_current_orders", "Last published order count"),
            &["product"],
        )?;

        let modified_price = GaugeVec::new(
            Opts::new(
                "order_sync_modified_price",
                "Current price after curve modifier or variant override",
            ),
            &["product"],
        )?;

        let modification_pct = IntGaugeVec::new(
            Opts::new(
                "order_sync_modification_percentage",
                "Signed price modification in whole percent",
            ),
            &["product"],
        )?;

        let degraded = IntGaugeVec::new(
            Opts::new(
                "order_sync_degraded",
                "Change feed down, served by polling (1=yes, 0=no)",
            ),
            &["product"],
        )?;

        let fetch_error = IntGaugeVec::new(
            Opts::new(
                "order_sync_fetch_error",
                "Ground-truth fetch retries exhausted (1=yes, 0=no)",
            ),
            &["product"],
        )?;

        let snapshot_updates = IntCounterVec::new(
            Opts::new(
                "order_sync_snapshot_updates_total",
                "Published order-count snapshots by origin",
            ),
            &["product", "origin"],
        )?;

        let active_products = IntGauge::new(
            "order_sync_active_products",
            "Products with a running synchronizer",
        )?;

        // Register all metrics
        registry.register(Box::new(current_orders.clone()))?;
        registry.register(Box::new(modified_price.clone()))?;
        registry.register(Box::new(modification_pct.clone()))?;
        registry.register(Box::new(degraded.clone()))?;
        registry.register(Box::new(fetch_error.clone()))?;
        registry.register(Box::new(snapshot_updates.clone()))?;
        registry.register(Box::new(active_products.clone()))?;

        Ok(Self {
            registry,
            current_orders,
            modified_price,
            modification_pct,
            degraded,
            fetch_error,
            snapshot_updates,
            active_products,
        })
    }

    /// Update every per-product gauge from a priced view.
    pub fn record(&self, priced: &PricedView) {
        let product = priced.stats.product_id.as_str();
        let orders = i64::try_from(priced.stats.current_orders).unwrap_or(i64::MAX);

        self.current_orders.with_label_values(&[product]).set(orders);
        self.modified_price
            .with_label_values(&[product])
            .set(priced.price.modified_price.to_f64().unwrap_or_default());
        self.modification_pct
            .with_label_values(&[product])
            .set(i64::from(priced.price.modification_percentage));
        self.degraded
            .with_label_values(&[product])
            .set(i64::from(priced.stats.state == SyncState::DegradedPolling));
        self.fetch_error
            .with_label_values(&[product])
            .set(i64::from(priced.stats.error.is_some()));
    }

    /// Count one newly published snapshot.
    pub fn count_snapshot(&self, product: &str, origin: SnapshotOrigin) {
        self.snapshot_updates
            .with_label_values(&[product, origin.as_str()])
            .inc();
    }

    pub fn set_active_products(&self, count: usize) {
        self.active_products
            .set(i64::try_from(count).unwrap_or(i64::MAX));
    }

    /// Encode every registered metric in the text exposition format.
    pub fn render(&self) -> anyhow::Result<String> {
        let encoder = TextEncoder::new();
        let mut buffer = Vec::new();
        encoder
            .encode(&self.registry.gather(), &mut buffer)
            .context("Failed to encode metrics")?;
        String::from_utf8(buffer).context("Metrics output is not UTF-8")
    }

    /// Serve Prometheus metrics on the configured bind address.
    #[instrument(skip(self, shutdown_rx))]
    pub async fn serve(
        self: Arc<Self>,
        bind_address: String,
        mut shutdown_rx: broadcast::Receiver<()>,
    ) -> anyhow::Result<()> {
        let metrics_self = Arc::clone(&self);

        let app = Router::new().route(
            "/metrics",
            get(move || {
                let metrics = Arc::clone(&metrics_self);
                async move {
                    metrics.render().unwrap_or_else(|e| {
                        warn!(error = %e, "Metrics render failed");
                        String::new()
                    })
                }
            }),
        );

        let listener = tokio::net::TcpListener::bind(&bind_address).await?;
        info!(address = %bind_address, "Prometheus metrics server started");

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown_rx.recv().await;
            })
            .await?;

        Ok(())
    }
}
