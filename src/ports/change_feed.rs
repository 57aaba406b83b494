//! Change Feed Port - Push-based Order Mutation Stream
//!
//! Defines the trait for opening a realtime subscription on the order
//! table for one product. The transport owns the wire protocol; the
//! domain only sees `FeedEvent`s. A stream that ends or yields an error
//! counts as a disconnect, and reconnect policy lives in the
//! `ChangeFeedChannel` use case, never in the adapter.

use async_trait::async_trait;
use futures_util::stream::BoxStream;

use crate::domain::feed::{FeedEvent, FeedFilter};

/// Live stream of events for one subscription.
pub type FeedStream = BoxStream<'static, anyhow::Result<FeedEvent>>;

/// Trait for realtime change-feed providers.
#[async_trait]
pub trait ChangeFeedTransport: Send + Sync + 'static {
  /// Open a subscription matching `filter`.
  ///
  /// Resolves once the subscription is acknowledged; events flow on the
  /// returned stream until it ends or errors.
  async fn open(&self, filter: &FeedFilter) -> anyhow::Result<FeedStream>;
}
