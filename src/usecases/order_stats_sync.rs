//! Order Stats Synchronizer - Per-Product Cache/Fetch/Push Orchestrator
//!
//! One actor task per observed product. It keeps a `StatsView` current
//! by layering three sources of truth:
//!
//! 1. The shared `StatsCache` (served immediately, revalidated when stale)
//! 2. The change feed (aggregate updates applied directly, raw row
//!    mutations debounced into one ground-truth fetch)
//! 3. Fixed-interval polling once the change feed gives up
//!
//! Every fetch goes through the cache's single-flight refresh and is
//! retried with exponential backoff before the view is marked in error.
//! Results are tagged with the generation that issued them; anything
//! from an abandoned product is dropped without a publication.

use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;

use futures_util::future::{BoxFuture, FutureExt};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior, Sleep};
use tracing::{debug, info, instrument, warn};

use crate::domain::backoff::BackoffPolicy;
use crate::domain::feed::{ChannelStatus, FeedEvent, FeedFilter};
use crate::domain::stats::{
  stats_key, ProductId, ProductStatsSnapshot, SnapshotOrigin, StatsView, SyncState,
};
use crate::ports::change_feed::ChangeFeedTransport;
use crate::ports::order_count::{FetchError, OrderCountSource};
use crate::usecases::change_feed_channel::{ChangeFeedChannel, ChannelSettings, ChannelSubscription};
use crate::usecases::stats_cache::StatsCache;

/// Timer and retry tuning shared by every synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncSettings {
  /// Quiet period after the last raw mutation before fetching.
  pub debounce: Duration,
  /// Fallback poll cadence for main-view consumers.
  pub poll_interval: Duration,
  /// Fallback poll cadence for secondary views.
  pub secondary_poll_interval: Duration,
  /// Ground-truth fetch retries.
  pub fetch_retry: BackoffPolicy,
  /// Order table watched by the change feed.
  pub table: String,
  pub channel: ChannelSettings,
}

impl Default for SyncSettings {
  fn default() -> Self {
    Self {
      debounce: Duration::from_millis(500),
      poll_interval: Duration::from_secs(30),
      secondary_poll_interval: Duration::from_secs(60),
      fetch_retry: BackoffPolicy::fetch_default(),
      table: "orders".to_string(),
      channel: ChannelSettings::default(),
    }
  }
}

/// Per-consumer observation options.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncOptions {
  /// Product detail page (fast polling) versus listing or card.
  pub is_main_view: bool,
}

impl Default for SyncOptions {
  fn default() -> Self {
    Self { is_main_view: true }
  }
}

/// Collaborators injected into every synchronizer.
#[derive(Clone)]
pub struct SyncDeps {
  pub cache: Arc<StatsCache<u64>>,
  pub source: Arc<dyn OrderCountSource>,
  pub transport: Arc<dyn ChangeFeedTransport>,
  pub settings: Arc<SyncSettings>,
}

/// Control messages accepted by a running synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncCommand {
  /// Force a ground-truth fetch.
  Refresh,
  /// Switch to another product, discarding everything about the current one.
  Retarget(ProductId),
  /// Switch to main-view polling cadence.
  Promote,
  Shutdown,
}

/// Why a fetch was issued.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum FetchReason {
  /// Nothing cached at start.
  Initial,
  /// Cached value past its stale window.
  Revalidate,
  /// Burst of raw row mutations settled.
  Debounced,
  /// Channel resubscribed; events may have been missed.
  Reconcile,
  /// Consumer asked for it.
  Manual,
  /// Fallback poll tick.
  Poll,
}

impl FetchReason {
  const fn as_str(self) -> &'static str {
    match self {
      Self::Initial => "initial",
      Self::Revalidate => "revalidate",
      Self::Debounced => "debounced",
      Self::Reconcile => "reconcile",
      Self::Manual => "manual",
      Self::Poll => "poll",
    }
  }

  /// Requests that must not be lost when a fetch is already running,
  /// since that fetch may predate the change they react to.
  const fn queues(self) -> bool {
    matches!(self, Self::Debounced | Self::Reconcile | Self::Manual)
  }

  const fn origin(self) -> SnapshotOrigin {
    match self {
      Self::Poll => SnapshotOrigin::Poll,
      _ => SnapshotOrigin::Fresh,
    }
  }
}

struct FetchDone {
  generation: u64,
  reason: FetchReason,
  result: Result<u64, FetchError>,
}

enum NoticeKind {
  Event(FeedEvent),
  Status(ChannelStatus),
}

/// Channel callback payload, tagged with the generation that opened it.
struct Notice {
  generation: u64,
  kind: NoticeKind,
}

/// Handle to a running synchronizer. Dropping it stops the actor.
pub struct SyncHandle {
  commands: mpsc::UnboundedSender<SyncCommand>,
  view: watch::Receiver<StatsView>,
  task: JoinHandle<()>,
}

impl SyncHandle {
  /// Receiver of every published view.
  pub fn subscribe(&self) -> watch::Receiver<StatsView> {
    self.view.clone()
  }

  pub fn current(&self) -> StatsView {
    self.view.borrow().clone()
  }

  pub fn refresh(&self) {
    self.send(SyncCommand::Refresh);
  }

  pub fn retarget(&self, product_id: impl Into<ProductId>) {
    self.send(SyncCommand::Retarget(product_id.into()));
  }

  pub fn promote(&self) {
    self.send(SyncCommand::Promote);
  }

  pub fn shutdown(&self) {
    self.send(SyncCommand::Shutdown);
  }

  pub fn is_finished(&self) -> bool {
    self.task.is_finished()
  }

  /// Stop the actor and wait for its teardown to complete.
  pub async fn stop(self) {
    self.shutdown();
    let _ = self.task.await;
  }

  fn send(&self, command: SyncCommand) {
    if self.commands.send(command).is_err() {
      debug!("Synchronizer already stopped");
    }
  }
}

/// Actor state for one product.
pub struct OrderStatsSynchronizer {
  product_id: ProductId,
  is_main_view: bool,
  /// Bumped on every retarget; late results from older generations are dropped.
  generation: u64,
  deps: SyncDeps,
  view_tx: watch::Sender<StatsView>,
  commands: mpsc::UnboundedReceiver<SyncCommand>,
  notices_tx: mpsc::UnboundedSender<Notice>,
  notices_rx: mpsc::UnboundedReceiver<Notice>,
  channel: Option<ChannelSubscription>,
  /// Has the current channel ever reached `Subscribed`.
  seen_subscribed: bool,
  debounce: Option<Pin<Box<Sleep>>>,
  poll: Option<Interval>,
  fetch: Option<BoxFuture<'static, FetchDone>>,
  refetch_pending: bool,
}

impl OrderStatsSynchronizer {
  /// Spawn a synchronizer for `product_id` and return its handle.
  pub fn spawn(product_id: impl Into<ProductId>, options: SyncOptions, deps: SyncDeps) -> SyncHandle {
    let product_id = product_id.into();
    let (view_tx, view) = watch::channel(StatsView::initializing(product_id.clone()));
    let (commands_tx, commands) = mpsc::unbounded_channel();
    let (notices_tx, notices_rx) = mpsc::unbounded_channel();

    let actor = Self {
      product_id,
      is_main_view: options.is_main_view,
      generation: 0,
      deps,
      view_tx,
      commands,
      notices_tx,
      notices_rx,
      channel: None,
      seen_subscribed: false,
      debounce: None,
      poll: None,
      fetch: None,
      refetch_pending: false,
    };
    let task = tokio::spawn(actor.run());

    SyncHandle {
      commands: commands_tx,
      view,
      task,
    }
  }

  #[instrument(skip_all, fields(product = %self.product_id, main_view = self.is_main_view))]
  async fn run(mut self) {
    info!("Order stats synchronizer starting");
    self.start().await;

    loop {
      tokio::select! {
        command = self.commands.recv() => match command {
          None | Some(SyncCommand::Shutdown) => break,
          Some(command) => self.handle_command(command).await,
        },
        Some(notice) = self.notices_rx.recv() => self.handle_notice(notice).await,
        done = next_fetch(&mut self.fetch), if self.fetch.is_some() => {
          self.fetch = None;
          self.handle_fetch(done);
        }
        () = next_debounce(&mut self.debounce), if self.debounce.is_some() => {
          self.debounce = None;
          self.request_fetch(FetchReason::Debounced);
        }
        () = next_poll(&mut self.poll), if self.poll.is_some() => {
          self.request_fetch(FetchReason::Poll);
        }
      }
    }

    self.teardown();
    info!(product = %self.product_id, "Order stats synchronizer stopped");
  }

  /// Cache lookup, then fetch if needed, then open the change feed.
  async fn start(&mut self) {
    let key = stats_key(&self.product_id);
    let lookup = self.deps.cache.get(&key).await;

    match lookup.value {
      Some(count) => {
        debug!(
          product = %self.product_id,
          count,
          stale = lookup.needs_revalidation,
          "Serving cached order count"
        );
        self.publish(count, SnapshotOrigin::Cache);
        if lookup.needs_revalidation {
          self.request_fetch(FetchReason::Revalidate);
        }
      }
      None => self.request_fetch(FetchReason::Initial),
    }

    self.open_channel();
  }

  fn open_channel(&mut self) {
    let generation = self.generation;
    let events = self.notices_tx.clone();
    let statuses = self.notices_tx.clone();
    let filter = FeedFilter::new(&self.deps.settings.table, &self.product_id);
    let channel = ChangeFeedChannel::new(
      Arc::clone(&self.deps.transport),
      filter,
      self.deps.settings.channel,
    );

    self.seen_subscribed = false;
    self.channel = Some(channel.subscribe(
      move |event| {
        let _ = events.send(Notice {
          generation,
          kind: NoticeKind::Event(event),
        });
      },
      move |status| {
        let _ = statuses.send(Notice {
          generation,
          kind: NoticeKind::Status(status),
        });
      },
    ));
  }

  async fn handle_command(&mut self, command: SyncCommand) {
    match command {
      SyncCommand::Refresh => self.request_fetch(FetchReason::Manual),
      SyncCommand::Promote => self.promote(),
      SyncCommand::Retarget(product_id) => {
        if product_id == self.product_id {
          return;
        }
        info!(from = %self.product_id, to = %product_id, "Retargeting synchronizer");
        self.teardown();
        self.generation += 1;
        self.product_id = product_id;
        self
          .view_tx
          .send_replace(StatsView::initializing(self.product_id.clone()));
        self.start().await;
      }
      // Handled by the run loop.
      SyncCommand::Shutdown => {}
    }
  }

  async fn handle_notice(&mut self, notice: Notice) {
    if notice.generation != self.generation {
      debug!(
        generation = notice.generation,
        current = self.generation,
        "Dropping notice from abandoned channel"
      );
      return;
    }

    match notice.kind {
      NoticeKind::Event(FeedEvent::RowMutation { op, .. }) => {
        debug!(product = %self.product_id, ?op, "Row mutation, debouncing fetch");
        let deadline = Instant::now() + self.deps.settings.debounce;
        match self.debounce.as_mut() {
          Some(timer) => timer.as_mut().reset(deadline),
          None => self.debounce = Some(Box::pin(tokio::time::sleep_until(deadline))),
        }
      }
      NoticeKind::Event(FeedEvent::AggregateUpdate { total_orders, .. }) => {
        debug!(product = %self.product_id, total_orders, "Applying pushed aggregate");
        self
          .deps
          .cache
          .put(&stats_key(&self.product_id), total_orders)
          .await;
        self.publish(total_orders, SnapshotOrigin::Push);
      }
      NoticeKind::Status(ChannelStatus::Subscribed) => {
        if self.poll.take().is_some() {
          info!(product = %self.product_id, "Change feed resumed, polling stopped");
        }
        if self.seen_subscribed {
          self.request_fetch(FetchReason::Reconcile);
        }
        self.seen_subscribed = true;
        self.refresh_state();
      }
      NoticeKind::Status(ChannelStatus::Reconnecting { attempt, delay }) => {
        debug!(
          product = %self.product_id,
          attempt,
          delay_ms = delay.as_millis(),
          "Change feed reconnecting"
        );
      }
      NoticeKind::Status(ChannelStatus::MaxRetriesExceeded) => {
        warn!(
          product = %self.product_id,
          interval_ms = self.poll_period().as_millis(),
          "Change feed failed, falling back to polling"
        );
        self.start_polling();
        self.refresh_state();
      }
    }
  }

  fn handle_fetch(&mut self, done: FetchDone) {
    if done.generation != self.generation {
      debug!(
        generation = done.generation,
        current = self.generation,
        "Discarding fetch result for abandoned product"
      );
      return;
    }

    match done.result {
      Ok(count) => {
        debug!(product = %self.product_id, count, reason = done.reason.as_str(), "Fetch completed");
        self.publish(count, done.reason.origin());
      }
      Err(e) => {
        warn!(
          product = %self.product_id,
          reason = done.reason.as_str(),
          error = %e,
          "Order count fetch retries exhausted, keeping last value"
        );
        let message = format!("Order count unavailable: {e}");
        self.update_view(|view| {
          view.loading = false;
          view.error = Some(message);
        });
      }
    }

    if std::mem::take(&mut self.refetch_pending) {
      self.request_fetch(FetchReason::Debounced);
    }
  }

  /// Issue a fetch unless one is already running. Queueable reasons are
  /// remembered and issued once it completes.
  fn request_fetch(&mut self, reason: FetchReason) {
    if self.fetch.is_some() {
      if reason.queues() {
        debug!(product = %self.product_id, reason = reason.as_str(), "Fetch in flight, queueing");
        self.refetch_pending = true;
      } else {
        debug!(product = %self.product_id, reason = reason.as_str(), "Fetch in flight, skipping");
      }
      return;
    }

    let generation = self.generation;
    let pending = fetch_with_retry(
      Arc::clone(&self.deps.cache),
      Arc::clone(&self.deps.source),
      self.product_id.clone(),
      self.deps.settings.fetch_retry,
    );
    self.fetch = Some(
      async move {
        FetchDone {
          generation,
          reason,
          result: pending.await,
        }
      }
      .boxed(),
    );
    self.refresh_state();
  }

  fn promote(&mut self) {
    if self.is_main_view {
      return;
    }
    self.is_main_view = true;
    info!(product = %self.product_id, "Synchronizer promoted to main view");
    if self.poll.is_some() {
      self.start_polling();
    }
  }

  fn poll_period(&self) -> Duration {
    if self.is_main_view {
      self.deps.settings.poll_interval
    } else {
      self.deps.settings.secondary_poll_interval
    }
  }

  /// (Re)arm the poll interval; the first tick lands one period from now.
  fn start_polling(&mut self) {
    let period = self.poll_period();
    let mut interval = tokio::time::interval_at(Instant::now() + period, period);
    interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
    self.poll = Some(interval);
  }

  /// Drop the channel, every timer and the in-flight fetch.
  fn teardown(&mut self) {
    if let Some(channel) = self.channel.take() {
      channel.unsubscribe();
    }
    self.debounce = None;
    self.poll = None;
    if self.fetch.take().is_some() {
      debug!(product = %self.product_id, "Dropping in-flight fetch");
    }
    self.refetch_pending = false;
    self.seen_subscribed = false;
  }

  fn publish(&self, count: u64, origin: SnapshotOrigin) {
    let snapshot = ProductStatsSnapshot::now(self.product_id.clone(), count, origin);
    self.update_view(|view| {
      view.current_orders = count;
      view.loading = false;
      if origin.is_ground_truth() {
        view.error = None;
      }
      view.snapshot = Some(snapshot);
    });
  }

  fn refresh_state(&self) {
    self.update_view(|_| {});
  }

  /// Apply `change` and re-derive the state; consumers are only woken
  /// when something actually changed.
  fn update_view(&self, change: impl FnOnce(&mut StatsView)) {
    let polling = self.poll.is_some();
    let fetching = self.fetch.is_some();
    self.view_tx.send_if_modified(|view| {
      let before = view.clone();
      change(view);
      view.state = derive_state(view, polling, fetching);
      *view != before
    });
  }
}

fn derive_state(view: &StatsView, polling: bool, fetching: bool) -> SyncState {
  if view.loading {
    SyncState::Initializing
  } else if view.error.is_some() {
    SyncState::Error
  } else if polling {
    SyncState::DegradedPolling
  } else if fetching {
    SyncState::Revalidating
  } else {
    SyncState::Live
  }
}

/// Ground-truth fetch through the single-flight cache, retried with backoff.
async fn fetch_with_retry(
  cache: Arc<StatsCache<u64>>,
  source: Arc<dyn OrderCountSource>,
  product_id: ProductId,
  policy: BackoffPolicy,
) -> Result<u64, FetchError> {
  let key = stats_key(&product_id);
  let mut attempt = 1;

  loop {
    let source = Arc::clone(&source);
    let id = product_id.clone();
    let flight = cache.refresh(&key, move || async move {
      source
        .fetch_order_count(&id)
        .await
        .map(|count| count.total_orders)
    });

    match flight.await {
      Ok(count) => return Ok(count),
      Err(e) if policy.allows(attempt) => {
        let delay = policy.delay(attempt);
        warn!(
          product = %product_id,
          attempt,
          delay_ms = delay.as_millis(),
          error = %e,
          "Order count fetch failed, retrying"
        );
        tokio::time::sleep(delay).await;
        attempt += 1;
      }
      Err(e) => return Err(e),
    }
  }
}

async fn next_fetch(fetch: &mut Option<BoxFuture<'static, FetchDone>>) -> FetchDone {
  match fetch.as_mut() {
    Some(pending) => pending.await,
    None => std::future::pending().await,
  }
}

async fn next_debounce(timer: &mut Option<Pin<Box<Sleep>>>) {
  match timer.as_mut() {
    Some(sleep) => sleep.as_mut().await,
    None => std::future::pending().await,
  }
}

async fn next_poll(interval: &mut Option<Interval>) {
  match interval.as_mut() {
    Some(interval) => {
      interval.tick().await;
    }
    None => std::future::pending().await,
  }
}

#[cfg(test)]
mod tests {
  use super::*;

  use crate::adapters::api::InMemoryOrderCounts;
  use crate::adapters::cache::MemoryCacheBackend;
  use crate::adapters::feeds::InMemoryFeed;
  use crate::domain::feed::MutationKind;
  use crate::usecases::stats_cache::CachePolicy;

  struct Rig {
    cache: Arc<StatsCache<u64>>,
    counts: Arc<InMemoryOrderCounts>,
    feed: Arc<InMemoryFeed>,
    deps: SyncDeps,
  }

  fn rig(settings: SyncSettings) -> Rig {
    let cache = Arc::new(StatsCache::new(
      Arc::new(MemoryCacheBackend::<u64>::new(64)),
      CachePolicy::default(),
    ));
    let counts = Arc::new(InMemoryOrderCounts::new());
    let feed = Arc::new(InMemoryFeed::new());
    let deps = SyncDeps {
      cache: Arc::clone(&cache),
      source: counts.clone(),
      transport: feed.clone(),
      settings: Arc::new(settings),
    };
    Rig {
      cache,
      counts,
      feed,
      deps,
    }
  }

  fn mutation(product: &str) -> FeedEvent {
    FeedEvent::RowMutation {
      product_id: product.into(),
      op: MutationKind::Insert,
    }
  }

  async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_debounce_collapses_burst_into_one_fetch() {
    let rig = rig(SyncSettings::default());
    rig.counts.set("p", 3);
    let handle = OrderStatsSynchronizer::spawn("p", SyncOptions::default(), rig.deps.clone());
    settle(10).await;
    assert_eq!(rig.counts.fetch_count(), 1);
    assert_eq!(handle.current().current_orders, 3);

    rig.counts.set("p", 8);
    for _ in 0..5 {
      rig.feed.publish(&mutation("p"));
      settle(100).await;
    }
    assert_eq!(rig.counts.fetch_count(), 1);

    settle(600).await;
    assert_eq!(rig.counts.fetch_count(), 2);
    let view = handle.current();
    assert_eq!(view.current_orders, 8);
    assert_eq!(view.origin(), Some(SnapshotOrigin::Fresh));
    assert_eq!(view.state, SyncState::Live);
  }

  #[tokio::test(start_paused = true)]
  async fn test_mutation_during_fetch_queues_one_refetch() {
    let rig = rig(SyncSettings::default());
    rig.counts.set("p", 1);
    rig.counts.set_latency(Duration::from_secs(1));
    let handle = OrderStatsSynchronizer::spawn("p", SyncOptions::default(), rig.deps.clone());

    settle(10).await;
    rig.counts.set("p", 2);
    rig.feed.publish(&mutation("p"));
    settle(100).await;
    rig.feed.publish(&mutation("p"));

    settle(3_000).await;
    assert_eq!(rig.counts.fetch_count(), 2);
    assert_eq!(handle.current().current_orders, 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_channel_failure_polls_until_resubscribed() {
    let mut settings = SyncSettings::default();
    settings.channel = ChannelSettings {
      reconnect: BackoffPolicy::new(2, Duration::from_millis(100), Duration::from_secs(1)),
      recovery_interval: Some(Duration::from_secs(50)),
    };
    let rig = rig(settings);
    rig.counts.set("p", 4);
    rig.feed.set_available(false);
    let handle = OrderStatsSynchronizer::spawn("p", SyncOptions::default(), rig.deps.clone());

    settle(1_000).await;
    assert_eq!(handle.current().state, SyncState::DegradedPolling);
    assert_eq!(rig.counts.fetch_count(), 1);

    // Polls at 30.3s, 60.3s and 90.3s.
    settle(94_000).await;
    assert_eq!(rig.counts.fetch_count(), 4);
    assert_eq!(handle.current().origin(), Some(SnapshotOrigin::Poll));

    // Recovery attempt at 100.3s succeeds; polling stops.
    rig.feed.set_available(true);
    settle(100_000).await;
    assert_eq!(rig.counts.fetch_count(), 4);
    assert_eq!(handle.current().state, SyncState::Live);
  }

  #[tokio::test(start_paused = true)]
  async fn test_secondary_view_polls_slower_until_promoted() {
    let mut settings = SyncSettings::default();
    settings.channel = ChannelSettings {
      reconnect: BackoffPolicy::new(1, Duration::from_millis(100), Duration::from_secs(1)),
      recovery_interval: None,
    };
    let rig = rig(settings);
    rig.feed.set_available(false);
    let handle = OrderStatsSynchronizer::spawn(
      "p",
      SyncOptions {
        is_main_view: false,
      },
      rig.deps.clone(),
    );

    // Failed at 0.1s; secondary cadence polls at 60.1s only.
    settle(90_000).await;
    assert_eq!(rig.counts.fetch_count(), 2);

    // Promoted at 90s; main cadence re-arms at 120s and 150s.
    handle.promote();
    settle(61_000).await;
    assert_eq!(rig.counts.fetch_count(), 4);
  }

  #[tokio::test(start_paused = true)]
  async fn test_resubscribe_reconciles_with_fetch() {
    let rig = rig(SyncSettings::default());
    rig.counts.set("p", 1);
    let handle = OrderStatsSynchronizer::spawn("p", SyncOptions::default(), rig.deps.clone());
    settle(10).await;
    assert_eq!(rig.counts.fetch_count(), 1);

    rig.counts.set("p", 6);
    rig.feed.disconnect_all();
    settle(1_500).await;
    assert_eq!(rig.counts.fetch_count(), 2);
    assert_eq!(handle.current().current_orders, 6);
  }

  #[tokio::test(start_paused = true)]
  async fn test_retarget_discards_abandoned_fetch() {
    let rig = rig(SyncSettings::default());
    rig.counts.set("a", 5);
    rig.counts.set("b", 7);
    rig.counts.set_latency(Duration::from_secs(1));
    let handle = OrderStatsSynchronizer::spawn("a", SyncOptions::default(), rig.deps.clone());
    let seen = Arc::new(std::sync::Mutex::new(Vec::new()));
    let mut views = handle.subscribe();
    let collector = {
      let seen = Arc::clone(&seen);
      tokio::spawn(async move {
        while views.changed().await.is_ok() {
          let view = views.borrow_and_update().clone();
          seen.lock().unwrap().push(view);
        }
      })
    };

    settle(10).await;
    handle.retarget("b");
    settle(3_000).await;

    let view = handle.current();
    assert_eq!(view.product_id, "b");
    assert_eq!(view.current_orders, 7);
    assert!(!rig.cache.get(&stats_key("a")).await.is_hit());
    assert_eq!(rig.feed.active_sessions(), 1);

    // No publication ever carried a value for the abandoned product.
    assert!(seen
      .lock()
      .unwrap()
      .iter()
      .all(|view| view.product_id != "a" || view.loading));
    collector.abort();
  }

  #[tokio::test(start_paused = true)]
  async fn test_drop_handle_tears_down() {
    let rig = rig(SyncSettings::default());
    let handle = OrderStatsSynchronizer::spawn("p", SyncOptions::default(), rig.deps.clone());
    settle(10).await;
    assert_eq!(rig.feed.active_sessions(), 1);

    handle.stop().await;
    settle(10).await;
    assert_eq!(rig.feed.active_sessions(), 0);
  }
}
