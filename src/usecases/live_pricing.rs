//! Live Pricer - Reprices a Product on Every Stats Change
//!
//! Joins a product's static curve (and the consumer's variant selection)
//! with its synchronized order count. Pricing never waits on
//! reconciliation: a provisional pushed count is priced like any other.

use rust_decimal::Decimal;
use serde::Serialize;
use tokio::sync::watch;
use tracing::{debug, info};

use crate::domain::pricing::{progress, CurveProgress, PriceResult, VariantSelection};
use crate::domain::product::Product;
use crate::domain::stats::StatsView;

/// Stats view together with the price it implies.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PricedView {
  pub stats: StatsView,
  pub price: PriceResult,
  pub progress: CurveProgress,
}

impl PricedView {
  /// Price rounded for display.
  pub fn display_price(&self) -> Decimal {
    self.price.display_price()
  }
}

/// Prices one product for one variant selection.
#[derive(Debug, Clone)]
pub struct LivePricer {
  product: Product,
  selection: Option<VariantSelection>,
}

impl LivePricer {
  pub const fn new(product: Product, selection: Option<VariantSelection>) -> Self {
    Self { product, selection }
  }

  pub const fn product(&self) -> &Product {
    &self.product
  }

  /// Swap in new catalog parameters (curve and overrides).
  pub fn set_product(&mut self, product: Product) {
    if product.curve != self.product.curve {
      info!(product = %product.id, "Price curve updated");
    }
    self.product = product;
  }

  pub fn select(&mut self, selection: Option<VariantSelection>) {
    self.selection = selection;
  }

  /// Price `stats` against the current curve.
  pub fn price(&self, stats: &StatsView) -> PricedView {
    let count = stats.current_orders;
    PricedView {
      stats: stats.clone(),
      price: self.product.price_at(count, self.selection.as_ref()),
      progress: progress(&self.product.curve, count),
    }
  }

  /// Reprice on every stats or catalog change until the stats channel
  /// closes. `catalog` may close early; pricing continues on the last
  /// product it delivered.
  pub async fn run<F>(
    mut self,
    mut stats: watch::Receiver<StatsView>,
    mut catalog: watch::Receiver<Product>,
    mut on_price: F,
  ) where
    F: FnMut(&PricedView) + Send,
  {
    let mut catalog_open = true;
    let initial = stats.borrow_and_update().clone();
    on_price(&self.price(&initial));

    loop {
      tokio::select! {
        changed = stats.changed() => {
          if changed.is_err() {
            debug!(product = %self.product.id, "Stats channel closed, pricer stopping");
            break;
          }
          let view = stats.borrow_and_update().clone();
          on_price(&self.price(&view));
        }
        changed = catalog.changed(), if catalog_open => match changed {
          Ok(()) => {
            let product = catalog.borrow_and_update().clone();
            self.set_product(product);
            let view = stats.borrow().clone();
            on_price(&self.price(&view));
          }
          Err(_) => catalog_open = false,
        },
      }
    }
  }
}
