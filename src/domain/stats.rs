//! Order-count snapshot types.
//!
//! A snapshot is one observation of a product's order count together with
//! where it came from. The synchronizer publishes them; pricing and
//! consumers only ever read them.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Storefront product identifier.
pub type ProductId = String;

/// Cache key under which a product's order count is stored.
pub fn stats_key(product_id: &str) -> String {
    format!("order_stats:{product_id}")
}

/// Provenance of a published order count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SnapshotOrigin {
    /// Served from the shared stats cache.
    Cache,
    /// Confirmed by a ground-truth aggregate query.
    Fresh,
    /// Applied directly from a change-feed aggregate update. Provisional.
    Push,
    /// Confirmed by a fallback poll while the change feed is down.
    Poll,
}

impl SnapshotOrigin {
    /// Whether this value came straight from the aggregate view.
    pub const fn is_ground_truth(self) -> bool {
        matches!(self, Self::Fresh | Self::Poll)
    }

    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Cache => "cache",
            Self::Fresh => "fresh",
            Self::Push => "push",
            Self::Poll => "poll",
        }
    }
}

impl fmt::Display for SnapshotOrigin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One observation of a product's order count.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProductStatsSnapshot {
    pub product_id: ProductId,
    pub order_count: u64,
    pub observed_at: DateTime<Utc>,
    pub origin: SnapshotOrigin,
}

impl ProductStatsSnapshot {
    pub fn now(product_id: impl Into<ProductId>, order_count: u64, origin: SnapshotOrigin) -> Self {
        Self {
            product_id: product_id.into(),
            order_count,
            observed_at: Utc::now(),
            origin,
        }
    }
}

/// Lifecycle of a per-product synchronizer.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncState {
    /// No value available yet.
    Initializing,
    /// Value available, change feed carrying updates.
    Live,
    /// Value available, background refresh in flight.
    Revalidating,
    /// Change feed gave up; fixed-interval polling keeps the value fresh.
    DegradedPolling,
    /// Ground-truth fetch retries exhausted; last value retained.
    Error,
}

impl SyncState {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Initializing => "initializing",
            Self::Live => "live",
            Self::Revalidating => "revalidating",
            Self::DegradedPolling => "degraded_polling",
            Self::Error => "error",
        }
    }
}

impl fmt::Display for SyncState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Reactive value handed to consumers of a product's stats.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct StatsView {
    pub product_id: ProductId,
    /// Last known order count (0 until the first value arrives).
    pub current_orders: u64,
    /// True until the first value is available.
    pub loading: bool,
    /// Soft, user-visible notice once fetch retries are exhausted.
    pub error: Option<String>,
    pub state: SyncState,
    /// Snapshot behind `current_orders`, if any.
    pub snapshot: Option<ProductStatsSnapshot>,
}

impl StatsView {
    /// View of a product whose first value is still pending.
    pub fn initializing(product_id: impl Into<ProductId>) -> Self {
        Self {
            product_id: product_id.into(),
            current_orders: 0,
            loading: true,
            error: None,
            state: SyncState::Initializing,
            snapshot: None,
        }
    }

    pub fn origin(&self) -> Option<SnapshotOrigin> {
        self.snapshot.as_ref().map(|s| s.origin)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_stats_key_namespaces_product() {
        assert_eq!(stats_key("sku-1"), "order_stats:sku-1");
    }

    #[test]
    fn test_ground_truth_origins() {
        assert!(SnapshotOrigin::Fresh.is_ground_truth());
        assert!(SnapshotOrigin::Poll.is_ground_truth());
        assert!(!SnapshotOrigin::Push.is_ground_truth());
        assert!(!SnapshotOrigin::Cache.is_ground_truth());
    }

    #[test]
    fn test_initializing_view() {
        let view = StatsView::initializing("sku-1");
        assert!(view.loading);
        assert_eq!(view.current_orders, 0);
        assert_eq!(view.state, SyncState::Initializing);
        assert_eq!(view.origin(), None);
    }
}
