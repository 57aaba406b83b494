//! Stats Cache - Stale-While-Revalidate Cache with Single-Flight Refresh
//!
//! Shared, explicitly constructed cache used by every synchronizer:
//! - `get` serves any entry younger than its TTL and flags it for
//!   revalidation once it is older than its stale window
//! - `refresh` coalesces concurrent refreshes of one key into a single
//!   in-flight fetch whose result every caller receives; the fetch is
//!   cancelled once every caller has dropped out
//! - backend failures degrade to a miss and are never raised

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::task::{Context, Poll};
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt, Shared};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::ports::cache_store::{CacheBackend, CacheEntry};
use crate::ports::order_count::FetchError;

type SharedFetch<V> = Shared<BoxFuture<'static, Result<V, FetchError>>>;

/// Registered refresh of one key.
struct FlightSlot<V> {
  id: u64,
  fetch: SharedFetch<V>,
  /// Live `Flight`s that have not yet observed the result.
  waiters: usize,
}

type FlightRegistry<V> = Mutex<HashMap<String, FlightSlot<V>>>;

/// Default freshness policy applied by `put` and `refresh`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CachePolicy {
  /// Age after which entries are treated as absent.
  pub ttl: Duration,
  /// Age after which entries are served but flagged for revalidation.
  pub stale_time: Duration,
}

impl Default for CachePolicy {
  fn default() -> Self {
    Self {
      ttl: Duration::from_secs(300),
      stale_time: Duration::from_secs(30),
    }
  }
}

/// Result of a cache read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CacheLookup<V> {
  /// Stored value, if present and within TTL.
  pub value: Option<V>,
  /// Whether the caller should trigger a background refresh.
  pub needs_revalidation: bool,
}

impl<V> CacheLookup<V> {
  /// Nothing usable stored.
  pub const fn miss() -> Self {
    Self {
      value: None,
      needs_revalidation: false,
    }
  }

  pub const fn is_hit(&self) -> bool {
    self.value.is_some()
  }
}

/// Stale-while-revalidate cache over a pluggable backend.
pub struct StatsCache<V> {
  /// Storage backend.
  backend: Arc<dyn CacheBackend<V>>,
  /// Default TTL and stale window.
  policy: CachePolicy,
  /// In-flight refreshes keyed by cache key.
  inflight: Arc<FlightRegistry<V>>,
  /// Monotonic flight id, so a finished flight never evicts its successor.
  next_flight: AtomicU64,
}

impl<V> StatsCache<V>
where
  V: Clone + Send + Sync + 'static,
{
  /// Create a cache over `backend` with a default policy.
  pub fn new(backend: Arc<dyn CacheBackend<V>>, policy: CachePolicy) -> Self {
    Self {
      backend,
      policy,
      inflight: Arc::new(Mutex::new(HashMap::new())),
      next_flight: AtomicU64::new(0),
    }
  }

  pub const fn policy(&self) -> CachePolicy {
    self.policy
  }

  /// Read `key`, serving stale values until they pass their TTL.
  pub async fn get(&self, key: &str) -> CacheLookup<V> {
    match self.backend.load(key).await {
      Ok(Some(entry)) => {
        let now = Instant::now();
        if entry.is_expired(now) {
          debug!(key, age_ms = entry.age(now).as_millis(), "Cache entry expired");
          return CacheLookup::miss();
        }
        CacheLookup {
          needs_revalidation: entry.is_stale(now),
          value: Some(entry.value),
        }
      }
      Ok(None) => CacheLookup::miss(),
      Err(e) => {
        warn!(key, error = %e, "Cache backend unavailable, treating as miss");
        CacheLookup::miss()
      }
    }
  }

  /// Store `value` under `key` with an explicit TTL and stale window.
  pub async fn set(&self, key: &str, value: V, ttl: Duration, stale_time: Duration) {
    store_entry(self.backend.as_ref(), key, CacheEntry::new(value, ttl, stale_time)).await;
  }

  /// Store `value` under `key` with the default policy.
  pub async fn put(&self, key: &str, value: V) {
    self
      .set(key, value, self.policy.ttl, self.policy.stale_time)
      .await;
  }

  /// Drop whatever is stored under `key`.
  pub async fn invalidate(&self, key: &str) {
    if let Err(e) = self.backend.remove(key).await {
      warn!(key, error = %e, "Cache backend unavailable, invalidate skipped");
    }
  }

  /// Whether a refresh of `key` is currently in flight.
  pub fn is_refreshing(&self, key: &str) -> bool {
    lock(&self.inflight).contains_key(key)
  }

  /// Refresh `key` through a single in-flight fetch.
  ///
  /// The first caller's `fetch` runs; later callers join it and `fetch` is
  /// dropped unused. On success the value is stored with the default
  /// policy before any caller observes it. When the last unfinished
  /// `Flight` for a key is dropped the fetch is cancelled and nothing is
  /// stored; the next caller starts over.
  pub fn refresh<F, Fut>(&self, key: &str, fetch: F) -> Flight<V>
  where
    F: FnOnce() -> Fut,
    Fut: Future<Output = Result<V, FetchError>> + Send + 'static,
  {
    let registry = Arc::downgrade(&self.inflight);
    let mut inflight = lock(&self.inflight);
    if let Some(slot) = inflight.get_mut(key) {
      debug!(key, waiters = slot.waiters, "Joining in-flight refresh");
      slot.waiters += 1;
      return Flight::new(key, slot.id, slot.fetch.clone(), registry);
    }

    let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
    let backend = Arc::clone(&self.backend);
    let release_to = registry.clone();
    let policy = self.policy;
    let owned_key = key.to_string();
    let pending = fetch();

    let shared = async move {
      let result = pending.await;
      if let Ok(value) = &result {
        let entry = CacheEntry::new(value.clone(), policy.ttl, policy.stale_time);
        store_entry(backend.as_ref(), &owned_key, entry).await;
      }
      release(&release_to, &owned_key, id);
      result
    }
    .boxed()
    .shared();

    inflight.insert(
      key.to_string(),
      FlightSlot {
        id,
        fetch: shared.clone(),
        waiters: 1,
      },
    );
    Flight::new(key, id, shared, registry)
  }
}

/// One caller's share of a coalesced refresh.
///
/// Resolves to the fetch result. Dropping it before it resolves withdraws
/// the caller; the fetch itself is dropped with the last caller.
#[must_use = "a flight is cancelled once every caller drops it"]
pub struct Flight<V> {
  key: String,
  id: u64,
  fetch: SharedFetch<V>,
  registry: Weak<FlightRegistry<V>>,
  finished: bool,
}

impl<V> Flight<V> {
  fn new(key: &str, id: u64, fetch: SharedFetch<V>, registry: Weak<FlightRegistry<V>>) -> Self {
    Self {
      key: key.to_string(),
      id,
      fetch,
      registry,
      finished: false,
    }
  }
}

impl<V> Future for Flight<V>
where
  V: Clone,
{
  type Output = Result<V, FetchError>;

  fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
    let this = &mut *self;
    match Pin::new(&mut this.fetch).poll(cx) {
      Poll::Ready(result) => {
        this.finished = true;
        Poll::Ready(result)
      }
      Poll::Pending => Poll::Pending,
    }
  }
}

impl<V> Drop for Flight<V> {
  fn drop(&mut self) {
    if self.finished {
      return;
    }
    let Some(registry) = self.registry.upgrade() else {
      return;
    };
    let cancelled = {
      let mut inflight = lock(&registry);
      let Some(slot) = inflight.get_mut(&self.key) else {
        return;
      };
      if slot.id != self.id {
        return;
      }
      slot.waiters = slot.waiters.saturating_sub(1);
      if slot.waiters > 0 {
        return;
      }
      inflight.remove(&self.key)
    };
    debug!(key = %self.key, "Refresh abandoned by every caller, cancelled");
    // The fetch itself drops with our clone, after the lock is released.
    drop(cancelled);
  }
}

async fn store_entry<V>(backend: &dyn CacheBackend<V>, key: &str, entry: CacheEntry<V>)
where
  V: Clone + Send + Sync + 'static,
{
  if let Err(e) = backend.store(key, entry).await {
    warn!(key, error = %e, "Cache backend unavailable, write dropped");
  }
}

fn release<V>(registry: &Weak<FlightRegistry<V>>, key: &str, id: u64) {
  let Some(registry) = registry.upgrade() else {
    return;
  };
  let mut inflight = lock(&registry);
  if inflight.get(key).is_some_and(|slot| slot.id == id) {
    inflight.remove(key);
  }
}

fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
  mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

#[cfg(test)]
mod tests {
  use super::*;
  use std::sync::atomic::AtomicUsize;

  use async_trait::async_trait;

  use crate::adapters::cache::MemoryCacheBackend;

  fn cache() -> StatsCache<u64> {
    StatsCache::new(
      Arc::new(MemoryCacheBackend::<u64>::new(64)),
      CachePolicy {
        ttl: Duration::from_secs(300),
        stale_time: Duration::from_secs(30),
      },
    )
  }

  struct UnavailableBackend;

  #[async_trait]
  impl CacheBackend<u64> for UnavailableBackend {
    async fn load(&self, _key: &str) -> anyhow::Result<Option<CacheEntry<u64>>> {
      anyhow::bail!("connection refused")
    }
    async fn store(&self, _key: &str, _entry: CacheEntry<u64>) -> anyhow::Result<()> {
      anyhow::bail!("connection refused")
    }
    async fn remove(&self, _key: &str) -> anyhow::Result<()> {
      anyhow::bail!("connection refused")
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_fresh_entry_needs_no_revalidation() {
    let cache = cache();
    cache.put("k", 7).await;
    tokio::time::advance(Duration::from_secs(10)).await;

    for _ in 0..3 {
      let lookup = cache.get("k").await;
      assert_eq!(lookup.value, Some(7));
      assert!(!lookup.needs_revalidation);
    }
    assert!(!cache.is_refreshing("k"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_stale_entry_is_served_and_flagged() {
    let cache = cache();
    cache.put("k", 7).await;
    tokio::time::advance(Duration::from_secs(31)).await;

    let lookup = cache.get("k").await;
    assert_eq!(lookup.value, Some(7));
    assert!(lookup.needs_revalidation);
  }

  #[tokio::test(start_paused = true)]
  async fn test_expired_entry_is_absent() {
    let cache = cache();
    cache.set("k", 7, Duration::from_secs(60), Duration::from_secs(5)).await;
    tokio::time::advance(Duration::from_secs(61)).await;

    assert_eq!(cache.get("k").await, CacheLookup::miss());
  }

  #[tokio::test(start_paused = true)]
  async fn test_concurrent_refreshes_share_one_fetch() {
    let cache = Arc::new(cache());
    let fetches = Arc::new(AtomicUsize::new(0));

    let mut handles = Vec::new();
    for _ in 0..10 {
      let cache = Arc::clone(&cache);
      let fetches = Arc::clone(&fetches);
      handles.push(tokio::spawn(async move {
        cache
          .refresh("k", move || {
            fetches.fetch_add(1, Ordering::SeqCst);
            async {
              tokio::time::sleep(Duration::from_millis(200)).await;
              Ok(42)
            }
          })
          .await
      }));
    }

    for handle in handles {
      assert_eq!(handle.await.unwrap(), Ok(42));
    }
    assert_eq!(fetches.load(Ordering::SeqCst), 1);
    assert_eq!(cache.get("k").await.value, Some(42));
    assert!(!cache.is_refreshing("k"));
  }

  #[tokio::test(start_paused = true)]
  async fn test_completed_flight_is_not_reused() {
    let cache = cache();
    let fetches = Arc::new(AtomicUsize::new(0));

    for expected in 1..=2 {
      let counter = Arc::clone(&fetches);
      let value = cache
        .refresh("k", move || {
          counter.fetch_add(1, Ordering::SeqCst);
          async { Ok(5) }
        })
        .await;
      assert_eq!(value, Ok(5));
      assert_eq!(fetches.load(Ordering::SeqCst), expected);
    }
  }

  #[tokio::test(start_paused = true)]
  async fn test_failed_refresh_is_shared_and_not_stored() {
    let cache = cache();
    let first = cache.refresh("k", || async {
      tokio::time::sleep(Duration::from_millis(50)).await;
      Err(FetchError::Transport("timeout".into()))
    });
    let second = cache.refresh("k", || async { Ok(1) });

    let (a, b) = tokio::join!(first, second);
    assert!(matches!(a, Err(FetchError::Transport(_))));
    assert_eq!(a, b);
    assert!(!cache.get("k").await.is_hit());
  }

  #[tokio::test(start_paused = true)]
  async fn test_abandoned_flight_is_cancelled() {
    let cache = cache();
    let fetches = Arc::new(AtomicUsize::new(0));
    let permits = Arc::new(tokio::sync::Semaphore::new(1));

    let counter = Arc::clone(&fetches);
    let gate = Arc::clone(&permits);
    let mut abandoned = tokio_test::task::spawn(cache.refresh("k", move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async move {
        let _permit = gate.acquire_owned().await.unwrap();
        tokio::time::sleep(Duration::from_millis(100)).await;
        Ok(9)
      }
    }));
    tokio_test::assert_pending!(abandoned.poll());
    assert_eq!(permits.available_permits(), 0);

    drop(abandoned);
    assert!(!cache.is_refreshing("k"));
    assert_eq!(permits.available_permits(), 1);

    tokio::time::advance(Duration::from_millis(200)).await;
    assert!(!cache.get("k").await.is_hit());

    let counter = Arc::clone(&fetches);
    let next = cache.refresh("k", move || {
      counter.fetch_add(1, Ordering::SeqCst);
      async { Ok(4) }
    });
    assert_eq!(next.await, Ok(4));
    assert_eq!(fetches.load(Ordering::SeqCst), 2);
    assert_eq!(cache.get("k").await.value, Some(4));
  }

  #[tokio::test(start_paused = true)]
  async fn test_flight_survives_while_any_caller_remains() {
    let cache = cache();
    let first = cache.refresh("k", || async {
      tokio::time::sleep(Duration::from_millis(100)).await;
      Ok(6)
    });
    let second = cache.refresh("k", || async { Ok(0) });

    drop(first);
    assert!(cache.is_refreshing("k"));
    assert_eq!(second.await, Ok(6));
    assert!(!cache.is_refreshing("k"));
    assert_eq!(cache.get("k").await.value, Some(6));
  }

  #[test]
  fn test_flight_stays_registered_while_pending() {
    let cache = cache();
    let mut flight = tokio_test::task::spawn(
      cache.refresh("k", || std::future::pending::<Result<u64, FetchError>>()),
    );

    tokio_test::assert_pending!(flight.poll());
    tokio_test::assert_pending!(flight.poll());
    assert!(cache.is_refreshing("k"));

    drop(flight);
    assert!(!cache.is_refreshing("k"));
  }

  #[tokio::test]
  async fn test_unavailable_backend_degrades_to_miss() {
    let cache = StatsCache::new(Arc::new(UnavailableBackend), CachePolicy::default());
    cache.put("k", 3).await;
    assert_eq!(cache.get("k").await, CacheLookup::miss());
    cache.invalidate("k").await;

    let value = cache.refresh("k", || async { Ok(3) }).await;
    assert_eq!(value, Ok(3));
  }
}
