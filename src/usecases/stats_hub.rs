//! Stats Hub - Shared Synchronizers for Every Observed Product
//!
//! Consumer-facing entry point for live order counts:
//! - The first `observe_stats` for a product spawns its synchronizer
//! - Later observers share it (and its change-feed subscription)
//! - The last observer leaving shuts it down; cache entries survive
//! - A main-view observer promotes a secondary-view synchronizer

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::watch;
use tracing::{debug, info, instrument};
use uuid::Uuid;

use crate::domain::stats::{ProductId, StatsView};
use crate::ports::change_feed::ChangeFeedTransport;
use crate::ports::order_count::OrderCountSource;
use crate::usecases::order_stats_sync::{
  OrderStatsSynchronizer, SyncDeps, SyncHandle, SyncOptions, SyncSettings,
};
use crate::usecases::stats_cache::StatsCache;

struct HubEntry {
  handle: SyncHandle,
  subscribers: HashSet<Uuid>,
  is_main_view: bool,
}

struct HubShared {
  deps: SyncDeps,
  entries: Mutex<HashMap<ProductId, HubEntry>>,
}

impl HubShared {
  fn lock(&self) -> MutexGuard<'_, HashMap<ProductId, HubEntry>> {
    self.entries.lock().unwrap_or_else(PoisonError::into_inner)
  }

  fn release(&self, product_id: &str, id: Uuid) {
    let mut entries = self.lock();
    let Some(entry) = entries.get_mut(product_id) else {
      return;
    };
    entry.subscribers.remove(&id);
    debug!(
      product = %product_id,
      subscriber = %id,
      remaining = entry.subscribers.len(),
      "Stats observer left"
    );

    if entry.subscribers.is_empty() {
      if let Some(entry) = entries.remove(product_id) {
        entry.handle.shutdown();
        info!(product = %product_id, "Last observer left, synchronizer stopped");
      }
    }
  }
}

/// Registry of running synchronizers, keyed by product.
#[derive(Clone)]
pub struct StatsHub {
  shared: Arc<HubShared>,
}

impl StatsHub {
  /// Build a hub over an injected cache and transports.
  pub fn new(
    cache: Arc<StatsCache<u64>>,
    source: Arc<dyn OrderCountSource>,
    transport: Arc<dyn ChangeFeedTransport>,
    settings: SyncSettings,
  ) -> Self {
    Self {
      shared: Arc::new(HubShared {
        deps: SyncDeps {
          cache,
          source,
          transport,
          settings: Arc::new(settings),
        },
        entries: Mutex::new(HashMap::new()),
      }),
    }
  }

  pub fn cache(&self) -> &Arc<StatsCache<u64>> {
    &self.shared.deps.cache
  }

  /// Start observing `product_id`. Must be called from within a runtime.
  #[instrument(skip(self))]
  pub fn observe_stats(&self, product_id: &str, options: SyncOptions) -> StatsSubscription {
    let id = Uuid::new_v4();
    let mut entries = self.shared.lock();

    let entry = entries.entry(product_id.to_string()).or_insert_with(|| {
      info!(main_view = options.is_main_view, "Spawning synchronizer");
      HubEntry {
        handle: OrderStatsSynchronizer::spawn(product_id, options, self.shared.deps.clone()),
        subscribers: HashSet::new(),
        is_main_view: options.is_main_view,
      }
    });

    if options.is_main_view && !entry.is_main_view {
      entry.is_main_view = true;
      entry.handle.promote();
    }
    entry.subscribers.insert(id);
    debug!(subscriber = %id, observers = entry.subscribers.len(), "Stats observer joined");

    StatsSubscription {
      id,
      product_id: product_id.to_string(),
      view: entry.handle.subscribe(),
      hub: Arc::clone(&self.shared),
      active: true,
    }
  }

  /// Products with a running synchronizer.
  pub fn active_products(&self) -> Vec<ProductId> {
    let mut products: Vec<_> = self.shared.lock().keys().cloned().collect();
    products.sort();
    products
  }

  pub fn observer_count(&self, product_id: &str) -> usize {
    self
      .shared
      .lock()
      .get(product_id)
      .map_or(0, |entry| entry.subscribers.len())
  }

  /// Force a ground-truth fetch for `product_id`, if observed.
  pub fn refresh(&self, product_id: &str) -> bool {
    match self.shared.lock().get(product_id) {
      Some(entry) => {
        entry.handle.refresh();
        true
      }
      None => false,
    }
  }

  /// Stop every synchronizer. Outstanding subscriptions see their view
  /// channel close.
  pub fn shutdown(&self) {
    let entries = std::mem::take(&mut *self.shared.lock());
    for (product_id, entry) in entries {
      entry.handle.shutdown();
      debug!(product = %product_id, "Synchronizer stopped by hub shutdown");
    }
    info!("Stats hub shut down");
  }
}

/// One consumer's view of a product's stats. Unsubscribes on drop.
pub struct StatsSubscription {
  id: Uuid,
  product_id: ProductId,
  view: watch::Receiver<StatsView>,
  hub: Arc<HubShared>,
  active: bool,
}

impl StatsSubscription {
  pub const fn id(&self) -> Uuid {
    self.id
  }

  pub fn product_id(&self) -> &str {
    &self.product_id
  }

  /// Latest published view.
  pub fn current(&self) -> StatsView {
    self.view.borrow().clone()
  }

  /// Independent receiver over the same view.
  pub fn receiver(&self) -> watch::Receiver<StatsView> {
    self.view.clone()
  }

  /// Wait for the next published view. `None` once the synchronizer stopped.
  pub async fn changed(&mut self) -> Option<StatsView> {
    self.view.changed().await.ok()?;
    Some(self.view.borrow_and_update().clone())
  }

  /// Consumer-triggered refetch.
  pub fn refresh(&self) {
    if let Some(entry) = self.hub.lock().get(&self.product_id) {
      entry.handle.refresh();
    }
  }

  /// Stop observing. Idempotent.
  pub fn unsubscribe(&mut self) {
    if std::mem::replace(&mut self.active, false) {
      self.hub.release(&self.product_id, self.id);
    }
  }
}

impl Drop for StatsSubscription {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}
