//! In-Memory Change Feed - Local Transport with Failure Injection
//!
//! Implements `ChangeFeedTransport` without a network. Events published
//! here are delivered to every open session whose filter matches. The
//! feed can refuse handshakes or drop live sessions on demand, which is
//! how reconnect and fallback paths are exercised locally.

use std::sync::{Mutex, MutexGuard, PoisonError};

use anyhow::{bail, Result};
use async_trait::async_trait;
use futures_util::StreamExt;
use tokio::sync::mpsc;
use tracing::debug;

use crate::domain::feed::{FeedEvent, FeedFilter};
use crate::ports::change_feed::{ChangeFeedTransport, FeedStream};

/// One open subscription.
struct Session {
    filter: FeedFilter,
    tx: mpsc::UnboundedSender<Result<FeedEvent>>,
}

struct FeedInner {
    /// Whether handshakes succeed at all.
    available: bool,
    /// Handshakes to reject before accepting again.
    fail_next: u32,
    /// Total `open` calls observed.
    opens: u32,
    sessions: Vec<Session>,
}

/// Channel-backed change feed for tests and local runs.
pub struct InMemoryFeed {
    inner: Mutex<FeedInner>,
}

impl InMemoryFeed {
    pub fn new() -> Self {
        Self {
            inner: Mutex::new(FeedInner {
                available: true,
                fail_next: 0,
                opens: 0,
                sessions: Vec::new(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, FeedInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Accept (`true`) or refuse (`false`) every future handshake.
    pub fn set_available(&self, available: bool) {
        self.lock().available = available;
    }

    /// Refuse the next `count` handshakes.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Number of `open` calls seen so far.
    pub fn open_count(&self) -> u32 {
        self.lock().opens
    }

    /// Number of sessions whose subscriber is still listening.
    pub fn active_sessions(&self) -> usize {
        let mut inner = self.lock();
        inner.sessions.retain(|s| !s.tx.is_closed());
        inner.sessions.len()
    }

    /// Deliver `event` to every session subscribed to its product.
    ///
    /// Returns the number of sessions that received it.
    pub fn publish(&self, event: &FeedEvent) -> usize {
        let mut inner = self.lock();
        inner.sessions.retain(|s| !s.tx.is_closed());
        inner
            .sessions
            .iter()
            .filter(|s| s.filter.matches(event))
            .filter(|s| s.tx.send(Ok(event.clone())).is_ok())
            .count()
    }

    /// Deliver `event` to every session, ignoring filters.
    pub fn publish_unfiltered(&self, event: &FeedEvent) -> usize {
        let inner = self.lock();
        inner
            .sessions
            .iter()
            .filter(|s| s.tx.send(Ok(event.clone())).is_ok())
            .count()
    }

    /// End every open session as if the server closed the socket.
    pub fn disconnect_all(&self) {
        let dropped = std::mem::take(&mut self.lock().sessions);
        debug!(sessions = dropped.len(), "In-memory feed dropping sessions");
    }
}

impl Default for InMemoryFeed {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl ChangeFeedTransport for InMemoryFeed {
    async fn open(&self, filter: &FeedFilter) -> Result<FeedStream> {
        let mut inner = self.lock();
        inner.opens += 1;
        if !inner.available {
            bail!("change feed unavailable");
        }
        if inner.fail_next > 0 {
            inner.fail_next -= 1;
            bail!("change feed handshake rejected");
        }

        let (tx, rx) = mpsc::unbounded_channel();
        inner.sessions.push(Session {
            filter: filter.clone(),
            tx,
        });

        let stream = futures_util::stream::unfold(rx, |mut rx| async move {
            rx.recv().await.map(|item| (item, rx))
        });
        Ok(stream.boxed())
    }
}
