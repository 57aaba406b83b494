//! Order Count Port - Ground-Truth Aggregate Query Interface
//!
//! Defines the trait for reading a product's authoritative order count
//! from the aggregate view. Every fresh fetch and fallback poll goes
//! through this port; adapters never retry on their own (retry policy
//! belongs to the synchronizer).

use async_trait::async_trait;
use serde::Deserialize;
use thiserror::Error;

/// One row of the aggregate view.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct OrderCount {
  /// Authoritative number of orders for the product.
  pub total_orders: u64,
}

/// Failure of a ground-truth fetch.
///
/// Cloneable so a single in-flight fetch can hand the same outcome to
/// every caller coalesced onto it.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FetchError {
  /// The endpoint could not be reached or timed out.
  #[error("aggregate endpoint unreachable: {0}")]
  Transport(String),
  /// The endpoint answered with a non-success status.
  #[error("aggregate endpoint returned {status}: {body}")]
  Status {
    /// HTTP status code.
    status: u16,
    /// Response body (truncated by the adapter).
    body: String,
  },
  /// The response could not be decoded.
  #[error("invalid aggregate response: {0}")]
  Decode(String),
}

/// Trait for ground-truth order count providers.
#[async_trait]
pub trait OrderCountSource: Send + Sync + 'static {
  /// Fetch the current order count for `product_id`.
  ///
  /// A product with no orders yet yields `total_orders == 0`, not an error.
  async fn fetch_order_count(&self, product_id: &str) -> Result<OrderCount, FetchError>;

  /// Check if the endpoint is reachable.
  async fn is_healthy(&self) -> bool;
}
