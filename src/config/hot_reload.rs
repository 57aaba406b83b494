//! Catalog Hot-Reload - Re-read config.toml on a Fixed Cadence
//!
//! Price curves and variant overrides change while the service runs.
//! The watcher re-reads the file, validates it and publishes the new
//! `AppConfig` on a `tokio::sync::watch` channel. Pricers listening on
//! that channel reprice from their current stats without refetching.
//!
//! An invalid edit is logged and ignored; the last good config stays live.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::time::Duration;

use anyhow::Result;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info, instrument, warn};

use super::AppConfig;

/// Default re-read cadence.
pub const DEFAULT_RELOAD_INTERVAL: Duration = Duration::from_secs(60);

/// Watches config.toml for changes and broadcasts updates.
///
/// Polls the file rather than using a filesystem watcher, which behaves
/// differently across Linux, macOS and container volume mounts.
pub struct ConfigWatcher {
    config_path: String,
    config_tx: watch::Sender<AppConfig>,
    /// Hash of the last file contents that were applied or rejected.
    last_hash: Option<u64>,
    interval: Duration,
}

impl ConfigWatcher {
    /// Create a watcher seeded with the config loaded at startup.
    pub fn new(config_path: &str, initial_config: AppConfig) -> (Self, watch::Receiver<AppConfig>) {
        let (config_tx, config_rx) = watch::channel(initial_config);

        let watcher = Self {
            config_path: config_path.to_string(),
            config_tx,
            last_hash: None,
            interval: DEFAULT_RELOAD_INTERVAL,
        };

        (watcher, config_rx)
    }

    #[must_use]
    pub const fn with_interval(mut self, interval: Duration) -> Self {
        self.interval = interval;
        self
    }

    /// Run until shutdown, re-reading the file every `interval`.
    #[instrument(skip(self, shutdown_rx), fields(path = %self.config_path))]
    pub async fn run(&mut self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!(interval_s = self.interval.as_secs(), "Config watcher started");

        self.last_hash = self.compute_hash().await;

        loop {
            tokio::select! {
                biased;
                _ = shutdown_rx.recv() => {
                    info!("Config watcher shutting down");
                    return Ok(());
                }
                () = tokio::time::sleep(self.interval) => {
                    self.check_and_reload().await;
                }
            }
        }
    }

    /// Reload when the file contents changed. Returns true when a new
    /// config was published.
    async fn check_and_reload(&mut self) -> bool {
        let new_hash = self.compute_hash().await;

        if new_hash.is_none() || new_hash == self.last_hash {
            debug!("Config unchanged");
            return false;
        }
        // A rejected edit is not retried until the file changes again.
        self.last_hash = new_hash;

        let content = match tokio::fs::read_to_string(&self.config_path).await {
            Ok(content) => content,
            Err(e) => {
                warn!(error = %e, "Config vanished between hash and read");
                return false;
            }
        };

        match super::loader::parse_config(&content) {
            Ok(new_config) => {
                let changed = self.config_tx.send_if_modified(|current| {
                    if *current == new_config {
                        return false;
                    }
                    *current = new_config;
                    true
                });
                if changed {
                    info!(
                        products = self.config_tx.borrow().products.len(),
                        "Config reloaded"
                    );
                }
                changed
            }
            Err(e) => {
                warn!(error = format!("{e:#}"), "Rejected config edit, keeping current");
                false
            }
        }
    }

    async fn compute_hash(&self) -> Option<u64> {
        let content = tokio::fs::read_to_string(&self.config_path).await.ok()?;
        let mut hasher = DefaultHasher::new();
        content.hash(&mut hasher);
        Some(hasher.finish())
    }
}
