//! Ports Layer - Hexagonal Architecture Boundaries
//!
//! Defines the interfaces (traits) that the use-case layer
//! requires from the outside world. Adapters implement these traits.
//!
//! Port categories:
//! - `OrderCountSource`: Ground-truth aggregate order count
//! - `ChangeFeedTransport`: Realtime row/aggregate change stream
//! - `CacheBackend`: Storage behind the shared stats cache

pub mod cache_store;
pub mod change_feed;
pub mod order_count;

pub use cache_store::{CacheBackend, CacheEntry};
pub use change_feed::{ChangeFeedTransport, FeedStream};
pub use order_count::{FetchError, OrderCount, OrderCountSource};
