//! Use Cases Layer - Application Business Logic
//!
//! Orchestrates domain logic with port interfaces to keep order counts
//! and prices live. Each use case owns one concern and receives its
//! collaborators explicitly.
//!
//! Use cases:
//! - `StatsCache`: Stale-while-revalidate cache with single-flight refresh
//! - `ChangeFeedChannel`: One product subscription with reconnect/backoff
//! - `OrderStatsSynchronizer`: Per-product cache/fetch/push/poll actor
//! - `StatsHub`: Shares synchronizers between observers of a product
//! - `LivePricer`: Reprices a product on every stats change

pub mod change_feed_channel;
pub mod live_pricing;
pub mod order_stats_sync;
pub mod stats_cache;
pub mod stats_hub;

pub use change_feed_channel::{ChangeFeedChannel, ChannelSettings, ChannelSubscription};
pub use live_pricing::{LivePricer, PricedView};
pub use order_stats_sync::{
  OrderStatsSynchronizer, SyncCommand, SyncDeps, SyncHandle, SyncOptions, SyncSettings,
};
pub use stats_cache::{CacheLookup, CachePolicy, Flight, StatsCache};
pub use stats_hub::{StatsHub, StatsSubscription};
