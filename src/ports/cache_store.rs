//! Cache Store Port - Key/Value Backend for the Stats Cache
//!
//! Defines the storage trait behind `StatsCache`. Backends store whole
//! `CacheEntry` values and replace them atomically; freshness policy
//! (TTL, stale window, single-flight) is applied above the backend.
//! A backend error is never fatal: the cache demotes it to a miss.

use std::time::Duration;

use async_trait::async_trait;
use tokio::time::Instant;

/// A stored value with its freshness metadata.
///
/// Immutable once stored; updates replace the entry wholesale.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheEntry<V> {
  /// Cached value.
  pub value: V,
  /// When the value was written.
  pub stored_at: Instant,
  /// Age after which the entry is treated as absent.
  pub ttl: Duration,
  /// Age after which readers should trigger revalidation.
  pub stale_after: Duration,
}

impl<V> CacheEntry<V> {
  /// Create an entry stamped with the current time.
  pub fn new(value: V, ttl: Duration, stale_after: Duration) -> Self {
    Self {
      value,
      stored_at: Instant::now(),
      ttl,
      stale_after,
    }
  }

  /// Entry age at `now`.
  pub fn age(&self, now: Instant) -> Duration {
    now.saturating_duration_since(self.stored_at)
  }

  /// Past TTL: must not be served.
  pub fn is_expired(&self, now: Instant) -> bool {
    self.age(now) > self.ttl
  }

  /// Past the stale window: serve, but revalidate.
  pub fn is_stale(&self, now: Instant) -> bool {
    self.age(now) > self.stale_after
  }
}

/// Trait for stats cache storage backends.
#[async_trait]
pub trait CacheBackend<V>: Send + Sync + 'static
where
  V: Clone + Send + Sync + 'static,
{
  /// Load the entry for `key`, if any.
  async fn load(&self, key: &str) -> anyhow::Result<Option<CacheEntry<V>>>;

  /// Store `entry` under `key`, replacing any previous entry.
  async fn store(&self, key: &str, entry: CacheEntry<V>) -> anyhow::Result<()>;

  /// Remove the entry for `key`.
  async fn remove(&self, key: &str) -> anyhow::Result<()>;
}
