//! Configuration Loader - File Loading and Validation
//!
//! Handles loading `config.toml`, validating all parameters,
//! and providing clear error messages for misconfiguration.

use std::collections::HashSet;
use std::path::Path;

use anyhow::{Context, Result};
use tracing::info;

use super::AppConfig;

/// Load and validate configuration from a TOML file.
///
/// # Errors
/// Returns detailed error if:
/// - File doesn't exist or can't be read
/// - TOML parsing fails
/// - Validation rules are violated
pub fn load_config(path: &str) -> Result<AppConfig> {
  let path = Path::new(path);

  let content = std::fs::read_to_string(path)
    .with_context(|| format!("Failed to read config file: {}", path.display()))?;

  let config = parse_config(&content)?;

  info!(
    products = config.products.len(),
    ttl_ms = config.cache.ttl_ms,
    poll_ms = config.sync.poll_interval_ms,
    "Configuration loaded successfully"
  );

  Ok(config)
}

/// Parse and validate configuration from TOML text.
pub fn parse_config(content: &str) -> Result<AppConfig> {
  let config: AppConfig = toml::from_str(content).context("Failed to parse config.toml")?;
  validate_config(&config)?;
  Ok(config)
}

/// Validate all configuration parameters.
///
/// Checks for:
/// - Non-empty, unique product definitions with valid curves
/// - Positive timer values and sane backoff bounds
/// - Non-empty endpoints
fn validate_config(config: &AppConfig) -> Result<()> {
  // Product validation
  anyhow::ensure!(
    !config.products.is_empty(),
    "At least one product must be configured"
  );

  let mut seen = HashSet::new();
  for (i, product) in config.products.iter().enumerate() {
    anyhow::ensure!(!product.id.is_empty(), "Product {} ({}) has empty id", i, product.name);
    anyhow::ensure!(
      seen.insert(product.id.as_str()),
      "Product id {} is configured twice",
      product.id
    );
    product
      .curve()
      .validate()
      .with_context(|| format!("Product {} has an invalid price curve", product.id))?;

    for variant in &product.variants {
      anyhow::ensure!(
        !variant.selection.is_empty(),
        "Product {} has a variant override with an empty selection",
        product.id
      );
      anyhow::ensure!(
        !variant.price.is_sign_negative(),
        "Product {} has a negative variant price {}",
        product.id,
        variant.price
      );
    }
  }

  // Cache validation
  anyhow::ensure!(config.cache.ttl_ms > 0, "cache.ttl_ms must be positive");
  anyhow::ensure!(
    config.cache.stale_ms <= config.cache.ttl_ms,
    "cache.stale_ms ({}) must not exceed cache.ttl_ms ({})",
    config.cache.stale_ms,
    config.cache.ttl_ms
  );

  // Sync validation
  anyhow::ensure!(
    !config.sync.order_table.is_empty(),
    "sync.order_table must not be empty"
  );
  anyhow::ensure!(
    config.sync.poll_interval_ms > 0 && config.sync.secondary_poll_interval_ms > 0,
    "Poll intervals must be positive"
  );
  anyhow::ensure!(
    config.sync.fetch_max_attempts >= 1,
    "sync.fetch_max_attempts must be at least 1"
  );
  anyhow::ensure!(
    config.sync.fetch_base_delay_ms <= config.sync.fetch_max_delay_ms,
    "sync.fetch_base_delay_ms must not exceed sync.fetch_max_delay_ms"
  );

  // Channel validation
  anyhow::ensure!(
    config.channel.max_attempts >= 1,
    "channel.max_attempts must be at least 1"
  );
  anyhow::ensure!(
    config.channel.base_delay_ms <= config.channel.max_delay_ms,
    "channel.base_delay_ms must not exceed channel.max_delay_ms"
  );

  // API validation
  anyhow::ensure!(!config.api.base_url.is_empty(), "API base URL must not be empty");
  anyhow::ensure!(
    !config.api.realtime_url.is_empty(),
    "Realtime URL must not be empty"
  );
  anyhow::ensure!(
    config.api.max_concurrent > 0 && config.api.requests_per_second > 0,
    "API concurrency and rate must be positive"
  );

  Ok(())
}
