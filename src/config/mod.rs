//! Configuration Module - TOML-based Service Configuration
//!
//! Loads and validates configuration from `config.toml`. Endpoints,
//! timer tuning and every product's price curve are externalized
//! here - nothing is hardcoded in the domain layer. Secrets come from
//! the environment, never from the file.

pub mod hot_reload;
pub mod loader;

use std::collections::BTreeMap;
use std::time::Duration;

use rust_decimal::Decimal;
use serde::Deserialize;

use crate::adapters::api::AggregateClientConfig;
use crate::adapters::feeds::RealtimeFeedConfig;
use crate::domain::backoff::BackoffPolicy;
use crate::domain::pricing::{PriceCurve, StockLimit, VariantPriceOverride, VariantSelection};
use crate::domain::product::Product;
use crate::usecases::change_feed_channel::ChannelSettings;
use crate::usecases::order_stats_sync::{SyncOptions, SyncSettings};
use crate::usecases::stats_cache::CachePolicy;

/// Top-level service configuration.
///
/// Loaded from `config.toml` at startup. All fields are validated
/// before the engine begins operation.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct AppConfig {
  /// Service identity and metadata.
  pub service: ServiceConfig,
  /// Aggregate and realtime endpoints.
  pub api: ApiConfig,
  /// Stats cache freshness.
  #[serde(default)]
  pub cache: CacheConfig,
  /// Synchronizer timers and fetch retries.
  #[serde(default)]
  pub sync: SyncConfig,
  /// Change-feed reconnect policy.
  #[serde(default)]
  pub channel: ChannelConfig,
  /// Metrics and monitoring.
  #[serde(default)]
  pub metrics: MetricsConfig,
  /// Catalog of priced products.
  pub products: Vec<ProductConfig>,
}

/// Service identity configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ServiceConfig {
  /// Human-readable service name.
  pub name: String,
  /// Log level (trace, debug, info, warn, error).
  #[serde(default = "default_log_level")]
  pub log_level: String,
}

/// API endpoint configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ApiConfig {
  /// REST base URL of the aggregate view.
  pub base_url: String,
  /// Aggregate view name.
  #[serde(default = "default_aggregate_view")]
  pub aggregate_view: String,
  /// Realtime WebSocket URL.
  pub realtime_url: String,
  /// Request timeout in seconds.
  #[serde(default = "default_timeout")]
  pub timeout_seconds: u64,
  /// Maximum concurrent aggregate requests.
  #[serde(default = "default_max_concurrent")]
  pub max_concurrent: usize,
  /// Sustained aggregate request rate.
  #[serde(default = "default_requests_per_second")]
  pub requests_per_second: u32,
  /// Realtime connect plus acknowledgement timeout in seconds.
  #[serde(default = "default_handshake_timeout")]
  pub handshake_timeout_seconds: u64,
}

/// Stats cache configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CacheConfig {
  /// Age after which entries are absent.
  #[serde(default = "default_ttl_ms")]
  pub ttl_ms: u64,
  /// Age after which entries trigger a background refresh.
  #[serde(default = "default_stale_ms")]
  pub stale_ms: u64,
  /// Soft cap on in-process entries.
  #[serde(default = "default_max_entries")]
  pub max_entries: usize,
}

/// Synchronizer configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct SyncConfig {
  /// Order table the change feed watches.
  #[serde(default = "default_order_table")]
  pub order_table: String,
  /// Raw mutation debounce.
  #[serde(default = "default_debounce_ms")]
  pub debounce_ms: u64,
  /// Fallback poll cadence for main views.
  #[serde(default = "default_poll_interval_ms")]
  pub poll_interval_ms: u64,
  /// Fallback poll cadence for secondary views.
  #[serde(default = "default_secondary_poll_interval_ms")]
  pub secondary_poll_interval_ms: u64,
  /// Total fetch attempts before the view reports an error.
  #[serde(default = "default_fetch_max_attempts")]
  pub fetch_max_attempts: u32,
  #[serde(default = "default_fetch_base_delay_ms")]
  pub fetch_base_delay_ms: u64,
  #[serde(default = "default_fetch_max_delay_ms")]
  pub fetch_max_delay_ms: u64,
}

/// Change-feed channel configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ChannelConfig {
  /// Reconnect attempts per failure episode.
  #[serde(default = "default_channel_max_attempts")]
  pub max_attempts: u32,
  #[serde(default = "default_channel_base_delay_ms")]
  pub base_delay_ms: u64,
  #[serde(default = "default_channel_max_delay_ms")]
  pub max_delay_ms: u64,
  /// Recovery cadence while failed (0 disables recovery).
  #[serde(default = "default_recovery_interval_ms")]
  pub recovery_interval_ms: u64,
}

/// Metrics and monitoring configuration.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct MetricsConfig {
  /// Enable Prometheus metrics export.
  #[serde(default = "default_true")]
  pub enabled: bool,
  /// Metrics server bind address.
  #[serde(default = "default_metrics_addr")]
  pub bind_address: String,
  /// Health check endpoint port.
  #[serde(default = "default_health_port")]
  pub health_port: u16,
}

/// One catalog product and its price curve.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ProductConfig {
  pub id: String,
  pub name: String,
  pub base_price: Decimal,
  pub min_orders: u64,
  /// Stock cap; absent means unlimited.
  #[serde(default)]
  pub max_stock: Option<u64>,
  #[serde(default)]
  pub modifier_before_min: Option<Decimal>,
  #[serde(default)]
  pub modifier_after_min: Option<Decimal>,
  /// Observe as a product page (fast polling) rather than a listing.
  #[serde(default = "default_true")]
  pub main_view: bool,
  /// Absolute prices for specific variant selections.
  #[serde(default)]
  pub variants: Vec<VariantConfig>,
}

/// Absolute price for one variant selection.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct VariantConfig {
  /// Option name to option value, e.g. `{ size = "XL" }`.
  pub selection: BTreeMap<String, String>,
  pub price: Decimal,
}

impl ProductConfig {
  pub fn curve(&self) -> PriceCurve {
    PriceCurve {
      base_price: self.base_price,
      min_orders: self.min_orders,
      max_stock: StockLimit::from(self.max_stock),
      modifier_before_min: self.modifier_before_min,
      modifier_after_min: self.modifier_after_min,
    }
  }

  pub fn to_product(&self) -> Product {
    let mut variant_overrides = VariantPriceOverride::new();
    for variant in &self.variants {
      let selection: VariantSelection = variant.selection.clone().into_iter().collect();
      variant_overrides.insert(&selection, variant.price);
    }
    Product {
      id: self.id.clone(),
      name: self.name.clone(),
      curve: self.curve(),
      variant_overrides,
    }
  }

  pub const fn sync_options(&self) -> SyncOptions {
    SyncOptions {
      is_main_view: self.main_view,
    }
  }
}

impl AppConfig {
  pub fn products(&self) -> Vec<Product> {
    self.products.iter().map(ProductConfig::to_product).collect()
  }

  pub fn product(&self, id: &str) -> Option<&ProductConfig> {
    self.products.iter().find(|p| p.id == id)
  }

  pub const fn cache_policy(&self) -> CachePolicy {
    CachePolicy {
      ttl: Duration::from_millis(self.cache.ttl_ms),
      stale_time: Duration::from_millis(self.cache.stale_ms),
    }
  }

  pub fn sync_settings(&self) -> SyncSettings {
    let recovery = self.channel.recovery_interval_ms;
    SyncSettings {
      debounce: Duration::from_millis(self.sync.debounce_ms),
      poll_interval: Duration::from_millis(self.sync.poll_interval_ms),
      secondary_poll_interval: Duration::from_millis(self.sync.secondary_poll_interval_ms),
      fetch_retry: BackoffPolicy::new(
        self.sync.fetch_max_attempts,
        Duration::from_millis(self.sync.fetch_base_delay_ms),
        Duration::from_millis(self.sync.fetch_max_delay_ms),
      ),
      table: self.sync.order_table.clone(),
      channel: ChannelSettings {
        reconnect: BackoffPolicy::new(
          self.channel.max_attempts,
          Duration::from_millis(self.channel.base_delay_ms),
          Duration::from_millis(self.channel.max_delay_ms),
        ),
        recovery_interval: (recovery > 0).then(|| Duration::from_millis(recovery)),
      },
    }
  }

  /// Aggregate client settings, with the API key taken from the environment.
  pub fn aggregate_client_config(&self) -> AggregateClientConfig {
    AggregateClientConfig {
      base_url: self.api.base_url.clone(),
      view: self.api.aggregate_view.clone(),
      timeout: Duration::from_secs(self.api.timeout_seconds),
      max_concurrent: self.api.max_concurrent,
      requests_per_second: self.api.requests_per_second,
      api_key: None,
    }
    .with_env_key()
  }

  pub fn realtime_config(&self, api_key: Option<String>) -> RealtimeFeedConfig {
    RealtimeFeedConfig {
      url: self.api.realtime_url.clone(),
      api_key,
      handshake_timeout: Duration::from_secs(self.api.handshake_timeout_seconds),
    }
  }
}

impl Default for CacheConfig {
  fn default() -> Self {
    Self {
      ttl_ms: default_ttl_ms(),
      stale_ms: default_stale_ms(),
      max_entries: default_max_entries(),
    }
  }
}

impl Default for SyncConfig {
  fn default() -> Self {
    Self {
      order_table: default_order_table(),
      debounce_ms: default_debounce_ms(),
      poll_interval_ms: default_poll_interval_ms(),
      secondary_poll_interval_ms: default_secondary_poll_interval_ms(),
      fetch_max_attempts: default_fetch_max_attempts(),
      fetch_base_delay_ms: default_fetch_base_delay_ms(),
      fetch_max_delay_ms: default_fetch_max_delay_ms(),
    }
  }
}

impl Default for ChannelConfig {
  fn default() -> Self {
    Self {
      max_attempts: default_channel_max_attempts(),
      base_delay_ms: default_channel_base_delay_ms(),
      max_delay_ms: default_channel_max_delay_ms(),
      recovery_interval_ms: default_recovery_interval_ms(),
    }
  }
}

impl Default for MetricsConfig {
  fn default() -> Self {
    Self {
      enabled: true,
      bind_address: default_metrics_addr(),
      health_port: default_health_port(),
    }
  }
}

// Default value functions for serde

fn default_log_level() -> String {
  "info".to_string()
}

const fn default_true() -> bool {
  true
}

fn default_aggregate_view() -> String {
  "product_order_stats".to_string()
}

const fn default_timeout() -> u64 {
  10
}

const fn default_max_concurrent() -> usize {
  8
}

const fn default_requests_per_second() -> u32 {
  20
}

const fn default_handshake_timeout() -> u64 {
  10
}

const fn default_ttl_ms() -> u64 {
  300_000 // 5 min
}

const fn default_stale_ms() -> u64 {
  30_000
}

const fn default_max_entries() -> usize {
  10_000
}

fn default_order_table() -> String {
  "orders".to_string()
}

const fn default_debounce_ms() -> u64 {
  500
}

const fn default_poll_interval_ms() -> u64 {
  30_000
}

const fn default_secondary_poll_interval_ms() -> u64 {
  60_000
}

const fn default_fetch_max_attempts() -> u32 {
  3
}

const fn default_fetch_base_delay_ms() -> u64 {
  1_000
}

const fn default_fetch_max_delay_ms() -> u64 {
  4_000
}

const fn default_channel_max_attempts() -> u32 {
  5
}

const fn default_channel_base_delay_ms() -> u64 {
  1_000
}

const fn default_channel_max_delay_ms() -> u64 {
  30_000
}

const fn default_recovery_interval_ms() -> u64 {
  60_000
}

fn default_metrics_addr() -> String {
  "0.0.0.0:9090".to_string()
}

const fn default_health_port() -> u16 {
  8080
}
