//! Change Feed Channel - One Product Subscription with Reconnect/Backoff
//!
//! Wraps a single logical subscription on the change-feed transport and
//! drives its connection state machine:
//!
//! `Idle → Connecting → Subscribed`, on disconnect
//! `Subscribed → Reconnecting(n)` with bounded exponential backoff, and
//! `Reconnecting → Failed` once the reconnect budget is spent.
//!
//! `MaxRetriesExceeded` is reported once per failure episode. While
//! failed, the channel keeps probing at a slow recovery interval; the
//! first successful recovery attempt ends the episode and reports `Subscribed`.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use futures_util::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, instrument, warn};

use crate::domain::backoff::BackoffPolicy;
use crate::domain::feed::{ChannelState, ChannelStatus, FeedEvent, FeedFilter};
use crate::ports::change_feed::{ChangeFeedTransport, FeedStream};

/// Reconnect tuning for one channel.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ChannelSettings {
  /// Reconnect budget and delays.
  pub reconnect: BackoffPolicy,
  /// Recovery cadence while failed; `None` stops for good.
  pub recovery_interval: Option<Duration>,
}

impl Default for ChannelSettings {
  fn default() -> Self {
    Self {
      reconnect: BackoffPolicy::reconnect_default(),
      recovery_interval: Some(Duration::from_secs(60)),
    }
  }
}

type EventCallback = Box<dyn Fn(FeedEvent) + Send + Sync>;
type StatusCallback = Box<dyn Fn(ChannelStatus) + Send + Sync>;

/// Owner callbacks, muted as soon as the subscription is cancelled.
struct Listener {
  on_event: EventCallback,
  on_status: StatusCallback,
  active: Arc<AtomicBool>,
}

impl Listener {
  fn event(&self, event: FeedEvent) {
    if self.active.load(Ordering::Acquire) {
      (self.on_event)(event);
    }
  }

  fn status(&self, status: ChannelStatus) {
    if self.active.load(Ordering::Acquire) {
      (self.on_status)(status);
    }
  }
}

/// An unsubscribed change-feed channel for one product.
pub struct ChangeFeedChannel {
  transport: Arc<dyn ChangeFeedTransport>,
  filter: FeedFilter,
  settings: ChannelSettings,
}

impl ChangeFeedChannel {
  pub fn new(
    transport: Arc<dyn ChangeFeedTransport>,
    filter: FeedFilter,
    settings: ChannelSettings,
  ) -> Self {
    Self {
      transport,
      filter,
      settings,
    }
  }

  /// Start the subscription.
  ///
  /// `on_event` receives row mutations and aggregate updates for this
  /// product while subscribed; `on_status` receives state notifications.
  /// Dropping the returned handle unsubscribes.
  pub fn subscribe<E, S>(self, on_event: E, on_status: S) -> ChannelSubscription
  where
    E: Fn(FeedEvent) + Send + Sync + 'static,
    S: Fn(ChannelStatus) + Send + Sync + 'static,
  {
    let (state_tx, _) = watch::channel(ChannelState::Idle);
    let state = Arc::new(state_tx);
    let active = Arc::new(AtomicBool::new(true));
    let listener = Listener {
      on_event: Box::new(on_event),
      on_status: Box::new(on_status),
      active: Arc::clone(&active),
    };
    let product_id = self.filter.product_id.clone();
    let task = tokio::spawn(self.run(listener, Arc::clone(&state)));

    ChannelSubscription {
      product_id,
      task,
      state,
      active,
    }
  }

  /// Connection loop. Runs until the subscription is aborted, or until
  /// the channel fails with recovery disabled.
  #[instrument(skip_all, fields(product = %self.filter.product_id))]
  async fn run(self, listener: Listener, state: Arc<watch::Sender<ChannelState>>) {
    let policy = self.settings.reconnect;
    let mut attempt: u32 = 0;
    let mut failed = false;

    state.send_replace(ChannelState::Connecting);

    loop {
      match self.transport.open(&self.filter).await {
        Ok(stream) => {
          if failed {
            info!("Change feed recovered after failure episode");
          }
          attempt = 0;
          failed = false;
          state.send_replace(ChannelState::Subscribed);
          info!(table = %self.filter.table, "Change feed subscribed");
          listener.status(ChannelStatus::Subscribed);

          let reason = self.pump(stream, &listener).await;
          warn!(reason, "Change feed disconnected");
        }
        Err(e) => {
          debug!(error = %e, attempt, "Change feed connect failed");
        }
      }

      if !failed {
        attempt += 1;
        if attempt <= policy.max_attempts {
          let delay = policy.delay(attempt);
          state.send_replace(ChannelState::Reconnecting { attempt });
          info!(attempt, delay_ms = delay.as_millis(), "Change feed reconnecting");
          listener.status(ChannelStatus::Reconnecting { attempt, delay });
          tokio::time::sleep(delay).await;
          continue;
        }

        failed = true;
        state.send_replace(ChannelState::Failed);
        warn!(
          max_attempts = policy.max_attempts,
          "Change feed exhausted reconnect attempts"
        );
        listener.status(ChannelStatus::MaxRetriesExceeded);
      }

      match self.settings.recovery_interval {
        Some(interval) => tokio::time::sleep(interval).await,
        None => {
          info!("Change feed recovery disabled, channel stays failed");
          return;
        }
      }
    }
  }

  /// Forward events until the stream ends or errors.
  async fn pump(&self, mut stream: FeedStream, listener: &Listener) -> &'static str {
    while let Some(item) = stream.next().await {
      match item {
        Ok(event) if self.filter.matches(&event) => listener.event(event),
        Ok(event) => {
          debug!(other = %event.product_id(), "Dropping event for another product");
        }
        Err(e) => {
          warn!(error = %e, "Change feed stream error");
          return "stream error";
        }
      }
    }
    "stream ended"
  }
}

/// Handle to a running channel. Unsubscribes on drop.
pub struct ChannelSubscription {
  product_id: String,
  task: JoinHandle<()>,
  state: Arc<watch::Sender<ChannelState>>,
  active: Arc<AtomicBool>,
}

impl ChannelSubscription {
  /// Current connection state.
  pub fn state(&self) -> ChannelState {
    *self.state.borrow()
  }

  /// Receiver notified on every state transition.
  pub fn watch_state(&self) -> watch::Receiver<ChannelState> {
    self.state.subscribe()
  }

  pub fn is_active(&self) -> bool {
    self.active.load(Ordering::Acquire)
  }

  /// Stop the subscription and any pending reconnect timer. Idempotent.
  pub fn unsubscribe(&self) {
    if self.active.swap(false, Ordering::AcqRel) {
      self.task.abort();
      self.state.send_replace(ChannelState::Idle);
      debug!(product = %self.product_id, "Change feed unsubscribed");
    }
  }
}

impl Drop for ChannelSubscription {
  fn drop(&mut self) {
    self.unsubscribe();
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use tokio::sync::mpsc;

  use crate::adapters::feeds::InMemoryFeed;
  use crate::domain::feed::MutationKind;

  fn settings() -> ChannelSettings {
    ChannelSettings {
      reconnect: BackoffPolicy::new(3, Duration::from_secs(1), Duration::from_secs(30)),
      recovery_interval: Some(Duration::from_secs(60)),
    }
  }

  fn drain<T>(rx: &mut mpsc::UnboundedReceiver<T>) -> Vec<T> {
    let mut out = Vec::new();
    while let Ok(item) = rx.try_recv() {
      out.push(item);
    }
    out
  }

  struct Harness {
    sub: ChannelSubscription,
    events: mpsc::UnboundedReceiver<FeedEvent>,
    statuses: mpsc::UnboundedReceiver<ChannelStatus>,
  }

  fn start(feed: &Arc<InMemoryFeed>, product: &str) -> Harness {
    let (event_tx, events) = mpsc::unbounded_channel();
    let (status_tx, statuses) = mpsc::unbounded_channel();
    let transport: Arc<dyn ChangeFeedTransport> = feed.clone();
    let channel = ChangeFeedChannel::new(transport, FeedFilter::new("orders", product), settings());
    let sub = channel.subscribe(
      move |e| {
        let _ = event_tx.send(e);
      },
      move |s| {
        let _ = status_tx.send(s);
      },
    );
    Harness {
      sub,
      events,
      statuses,
    }
  }

  async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
  }

  #[tokio::test(start_paused = true)]
  async fn test_subscribes_and_filters_events() {
    let feed = Arc::new(InMemoryFeed::new());
    let mut h = start(&feed, "sku-1");
    settle(10).await;

    assert_eq!(h.sub.state(), ChannelState::Subscribed);
    assert_eq!(drain(&mut h.statuses), vec![ChannelStatus::Subscribed]);

    let mine = FeedEvent::RowMutation {
      product_id: "sku-1".into(),
      op: MutationKind::Insert,
    };
    let theirs = FeedEvent::AggregateUpdate {
      product_id: "sku-2".into(),
      total_orders: 9,
    };
    feed.publish(&mine);
    feed.publish_unfiltered(&theirs);
    settle(10).await;

    assert_eq!(drain(&mut h.events), vec![mine]);
  }

  #[tokio::test(start_paused = true)]
  async fn test_backoff_then_single_max_retries_report() {
    let feed = Arc::new(InMemoryFeed::new());
    feed.set_available(false);
    let mut h = start(&feed, "sku-1");

    settle(30_000).await;
    assert_eq!(
      drain(&mut h.statuses),
      vec![
        ChannelStatus::Reconnecting {
          attempt: 1,
          delay: Duration::from_secs(1)
        },
        ChannelStatus::Reconnecting {
          attempt: 2,
          delay: Duration::from_secs(2)
        },
        ChannelStatus::Reconnecting {
          attempt: 3,
          delay: Duration::from_secs(4)
        },
        ChannelStatus::MaxRetriesExceeded,
      ]
    );
    assert_eq!(h.sub.state(), ChannelState::Failed);
    assert_eq!(feed.open_count(), 4);

    // Recovery attempts keep failing without re-reporting the episode.
    settle(70_000).await;
    assert!(drain(&mut h.statuses).is_empty());
    assert_eq!(feed.open_count(), 5);

    feed.set_available(true);
    settle(60_000).await;
    assert_eq!(drain(&mut h.statuses), vec![ChannelStatus::Subscribed]);
    assert_eq!(h.sub.state(), ChannelState::Subscribed);
  }

  #[tokio::test(start_paused = true)]
  async fn test_disconnect_reconnects_with_backoff() {
    let feed = Arc::new(InMemoryFeed::new());
    let mut h = start(&feed, "sku-1");
    settle(10).await;

    feed.disconnect_all();
    settle(10).await;
    assert_eq!(h.sub.state(), ChannelState::Reconnecting { attempt: 1 });

    settle(2_000).await;
    assert_eq!(
      drain(&mut h.statuses),
      vec![
        ChannelStatus::Subscribed,
        ChannelStatus::Reconnecting {
          attempt: 1,
          delay: Duration::from_secs(1)
        },
        ChannelStatus::Subscribed,
      ]
    );
    assert_eq!(feed.open_count(), 2);
  }

  #[tokio::test(start_paused = true)]
  async fn test_unsubscribe_is_idempotent_and_cancels_timer() {
    let feed = Arc::new(InMemoryFeed::new());
    feed.set_available(false);
    let mut h = start(&feed, "sku-1");
    settle(500).await;
    assert_eq!(h.sub.state(), ChannelState::Reconnecting { attempt: 1 });

    h.sub.unsubscribe();
    h.sub.unsubscribe();
    assert!(!h.sub.is_active());
    assert_eq!(h.sub.state(), ChannelState::Idle);

    drain(&mut h.statuses);
    settle(10_000).await;
    assert_eq!(feed.open_count(), 1);
    assert!(drain(&mut h.statuses).is_empty());
  }

  #[tokio::test(start_paused = true)]
  async fn test_drop_unsubscribes() {
    let feed = Arc::new(InMemoryFeed::new());
    let h = start(&feed, "sku-1");
    settle(10).await;
    assert_eq!(feed.active_sessions(), 1);

    drop(h);
    settle(10).await;
    assert_eq!(feed.active_sessions(), 0);
  }
}
