//! In-Memory Order Counts - Local Aggregate Source with Failure Injection
//!
//! Implements `OrderCountSource` over a HashMap. Supports per-call
//! latency, one-shot failures and a persistent outage switch so retry
//! and degraded paths can be driven deterministically.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::ports::order_count::{FetchError, OrderCount, OrderCountSource};

#[derive(Default)]
struct CountsInner {
    counts: HashMap<String, u64>,
    /// Calls to fail before succeeding again.
    fail_next: u32,
    /// Fail every call while set.
    failing: bool,
    latency: Duration,
    fetches: u32,
}

/// HashMap-backed order-count source.
#[derive(Default)]
pub struct InMemoryOrderCounts {
    inner: Mutex<CountsInner>,
}

impl InMemoryOrderCounts {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, CountsInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Set the aggregate count returned for `product_id`.
    pub fn set(&self, product_id: &str, total_orders: u64) {
        self.lock().counts.insert(product_id.to_string(), total_orders);
    }

    /// Fail the next `count` calls with a transport error.
    pub fn fail_next(&self, count: u32) {
        self.lock().fail_next = count;
    }

    /// Fail every call until cleared.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Delay applied to every call before it resolves.
    pub fn set_latency(&self, latency: Duration) {
        self.lock().latency = latency;
    }

    /// Number of calls made so far.
    pub fn fetch_count(&self) -> u32 {
        self.lock().fetches
    }
}

#[async_trait]
impl OrderCountSource for InMemoryOrderCounts {
    async fn fetch_order_count(&self, product_id: &str) -> Result<OrderCount, FetchError> {
        let (latency, fail) = {
            let mut inner = self.lock();
            inner.fetches += 1;
            let fail = inner.failing || inner.fail_next > 0;
            inner.fail_next = inner.fail_next.saturating_sub(1);
            (inner.latency, fail)
        };

        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }
        if fail {
            return Err(FetchError::Transport("injected failure".into()));
        }

        let total_orders = self.lock().counts.get(product_id).copied().unwrap_or(0);
        Ok(OrderCount { total_orders })
    }

    async fn is_healthy(&self) -> bool {
        !self.lock().failing
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_unknown_product_has_zero_orders() {
        let source = InMemoryOrderCounts::new();
        let count = source.fetch_order_count("missing").await.unwrap();
        assert_eq!(count.total_orders, 0);
    }

    #[tokio::test]
    async fn test_fail_next_then_recover() {
        let source = InMemoryOrderCounts::new();
        source.set("sku-1", 12);
        source.fail_next(2);

        assert!(source.fetch_order_count("sku-1").await.is_err());
        assert!(source.fetch_order_count("sku-1").await.is_err());
        assert_eq!(source.fetch_order_count("sku-1").await.unwrap().total_orders, 12);
        assert_eq!(source.fetch_count(), 3);
        assert!(source.is_healthy().await);
    }

    #[tokio::test(start_paused = true)]
    async fn test_latency_reads_value_at_completion() {
        let source = std::sync::Arc::new(InMemoryOrderCounts::new());
        source.set("sku-1", 1);
        source.set_latency(Duration::from_secs(1));

        let pending = {
            let source = std::sync::Arc::clone(&source);
            tokio::spawn(async move { source.fetch_order_count("sku-1").await })
        };
        tokio::time::sleep(Duration::from_millis(500)).await;
        source.set("sku-1", 2);

        assert_eq!(pending.await.unwrap().unwrap().total_orders, 2);
    }
}
