//! Aggregate HTTP Client - Rate-limited Order Count Queries
//!
//! Wraps reqwest with a concurrency cap and a request-rate quota for
//! reading `total_orders` from the aggregate view. Retries are left to
//! the synchronizer so every attempt is visible to its backoff policy.

use std::num::NonZeroU32;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use async_trait::async_trait;
use governor::{DefaultDirectRateLimiter, Quota, RateLimiter};
use reqwest::{Client, RequestBuilder};
use tokio::sync::Semaphore;
use tracing::{debug, instrument, warn};

use super::types::{total_from_rows, AggregateRow};
use crate::ports::order_count::{FetchError, OrderCount, OrderCountSource};

/// Environment variable holding the endpoint's API key.
pub const API_KEY_ENV: &str = "AGGREGATE_API_KEY";

/// Longest response body kept in a `FetchError::Status`.
const MAX_ERROR_BODY: usize = 512;

/// Configuration for the aggregate HTTP client.
#[derive(Debug, Clone)]
pub struct AggregateClientConfig {
  /// Base URL of the REST endpoint (without `/rest/v1`).
  pub base_url: String,
  /// Aggregate view name.
  pub view: String,
  /// Request timeout.
  pub timeout: Duration,
  /// Maximum concurrent requests.
  pub max_concurrent: usize,
  /// Sustained request rate.
  pub requests_per_second: u32,
  /// Sent as `apikey` and bearer token when present.
  pub api_key: Option<String>,
}

impl Default for AggregateClientConfig {
  fn default() -> Self {
    Self {
      base_url: "http://localhost:54321".to_string(),
      view: "product_order_stats".to_string(),
      timeout: Duration::from_secs(10),
      max_concurrent: 8,
      requests_per_second: 20,
      api_key: None,
    }
  }
}

impl AggregateClientConfig {
  /// Fill `api_key` from the environment unless already set.
  pub fn with_env_key(mut self) -> Self {
    if self.api_key.is_none() {
      self.api_key = std::env::var(API_KEY_ENV).ok().filter(|key| !key.is_empty());
    }
    self
  }
}

/// Rate-limited client for the aggregate view.
pub struct AggregateClient {
  /// Underlying HTTP client.
  http: Client,
  /// Client configuration.
  config: AggregateClientConfig,
  /// Concurrency limiter.
  semaphore: Arc<Semaphore>,
  /// Request-rate limiter.
  limiter: DefaultDirectRateLimiter,
}

impl AggregateClient {
  /// Create a new aggregate client.
  pub fn new(config: AggregateClientConfig) -> Result<Self> {
    let http = Client::builder()
      .timeout(config.timeout)
      .pool_max_idle_per_host(4)
      .build()
      .context("Failed to build HTTP client")?;

    let semaphore = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
    let rate = NonZeroU32::new(config.requests_per_second).unwrap_or(NonZeroU32::MIN);
    let limiter = RateLimiter::direct(Quota::per_second(rate));

    Ok(Self {
      http,
      config,
      semaphore,
      limiter,
    })
  }

  fn rest_root(&self) -> String {
    format!("{}/rest/v1", self.config.base_url.trim_end_matches('/'))
  }

  /// `GET {base}/rest/v1/{view}?product_id=eq.{id}&select=total_orders`
  fn order_count_request(&self, product_id: &str) -> RequestBuilder {
    let url = format!("{}/{}", self.rest_root(), self.config.view);
    let request = self
      .http
      .get(url)
      .query(&[
        ("product_id", format!("eq.{product_id}")),
        ("select", "total_orders".to_string()),
      ])
      .header("Accept", "application/json");
    self.authorize(request)
  }

  fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
    match &self.config.api_key {
      Some(key) => request.header("apikey", key).bearer_auth(key),
      None => request,
    }
  }
}

#[async_trait]
impl OrderCountSource for AggregateClient {
  #[instrument(skip(self))]
  async fn fetch_order_count(&self, product_id: &str) -> Result<OrderCount, FetchError> {
    let _permit = self
      .semaphore
      .acquire()
      .await
      .map_err(|_| FetchError::Transport("client shut down".into()))?;
    self.limiter.until_ready().await;

    let response = self
      .order_count_request(product_id)
      .send()
      .await
      .map_err(|e| {
        warn!(error = %e, "Aggregate request failed");
        FetchError::Transport(e.to_string())
      })?;

    let status = response.status();
    if !status.is_success() {
      let mut body = response.text().await.unwrap_or_default();
      truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
      warn!(status = %status, "Aggregate endpoint error");
      return Err(FetchError::Status {
        status: status.as_u16(),
        body,
      });
    }

    let rows: Vec<AggregateRow> = response
      .json()
      .await
      .map_err(|e| FetchError::Decode(e.to_string()))?;
    let total_orders = total_from_rows(&rows);
    debug!(total_orders, rows = rows.len(), "Aggregate fetched");

    Ok(OrderCount { total_orders })
  }

  async fn is_healthy(&self) -> bool {
    let request = self.authorize(self.http.get(format!("{}/", self.rest_root())));
    request
      .send()
      .await
      .is_ok_and(|response| !response.status().is_server_error())
  }
}

fn truncate_at_char_boundary(text: &mut String, max: usize) {
  if text.len() <= max {
    return;
  }
  let mut end = max;
  while !text.is_char_boundary(end) {
    end -= 1;
  }
  text.truncate(end);
}

#[cfg(test)]
mod tests {
  use super::*;

  fn client(api_key: Option<&str>) -> AggregateClient {
    AggregateClient::new(AggregateClientConfig {
      base_url: "https://db.example.com/".into(),
      api_key: api_key.map(str::to_string),
      ..AggregateClientConfig::default()
    })
    .unwrap()
  }

  #[test]
  fn test_order_count_url() {
    let request = client(None).order_count_request("sku-1").build().unwrap();
    assert_eq!(
      request.url().as_str(),
      "https://db.example.com/rest/v1/product_order_stats?product_id=eq.sku-1&select=total_orders"
    );
    assert!(request.headers().get("apikey").is_none());
  }

  #[test]
  fn test_api_key_headers() {
    let request = client(Some("anon")).order_count_request("sku-1").build().unwrap();
    assert_eq!(request.headers()["apikey"], "anon");
    assert_eq!(request.headers()["authorization"], "Bearer anon");
  }

  #[test]
  fn test_truncate_error_body() {
    let mut body = "é".repeat(400);
    truncate_at_char_boundary(&mut body, MAX_ERROR_BODY);
    assert!(body.len() <= MAX_ERROR_BODY);
    assert!(body.chars().all(|c| c == 'é'));
  }
}
