//! Aggregate View Adapter
//!
//! Implements `OrderCountSource` for the ground-truth order counts.
//!
//! Sub-modules:
//! - `client`: HTTP client with concurrency and rate limiting
//! - `in_memory`: HashMap-backed source with failure injection
//! - `types`: Aggregate response row types

pub mod client;
pub mod in_memory;
pub mod types;

pub use client::{AggregateClient, AggregateClientConfig};
pub use in_memory::InMemoryOrderCounts;
