//! Change Feed Adapters - Push-based Order Updates
//!
//! Provides `ChangeFeedTransport` implementations:
//! - Realtime: JSON-over-WebSocket subscription per product
//! - In-memory: Channel-backed feed with failure injection

pub mod in_memory;
pub mod realtime_ws;

pub use in_memory::InMemoryFeed;
pub use realtime_ws::{RealtimeFeed, RealtimeFeedConfig};
