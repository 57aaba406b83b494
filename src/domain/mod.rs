//! Domain layer - Core business logic and models.
//!
//! Pure pricing math and the value types exchanged between the
//! synchronization use cases and their consumers. No I/O here
//! (hexagonal architecture inner ring); everything is testable in isolation.

pub mod backoff;
pub mod feed;
pub mod pricing;
pub mod product;
pub mod stats;

// Re-export core types for convenience
pub use backoff::BackoffPolicy;
pub use feed::{ChannelState, ChannelStatus, FeedEvent, FeedFilter, MutationKind};
pub use pricing::{
    compute_price, progress, CurveProgress, PriceCurve, PriceResult, StockLimit,
    VariantPriceOverride, VariantSelection,
};
pub use product::Product;
pub use stats::{ProductId, ProductStatsSnapshot, SnapshotOrigin, StatsView, SyncState};
