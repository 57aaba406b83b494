//! Catalog product: identity plus its static pricing parameters.

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use super::pricing::{compute_price, PriceCurve, PriceResult, VariantPriceOverride, VariantSelection};
use super::stats::ProductId;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Product {
    pub id: ProductId,
    pub name: String,
    pub curve: PriceCurve,
    #[serde(default)]
    pub variant_overrides: VariantPriceOverride,
}

impl Product {
    /// Override price for `selection`, if the catalog defines one.
    pub fn override_for(&self, selection: Option<&VariantSelection>) -> Option<Decimal> {
        selection.and_then(|s| self.variant_overrides.price_for(s))
    }

    /// Price at `order_count` for an optional variant selection.
    pub fn price_at(&self, order_count: u64, selection: Option<&VariantSelection>) -> PriceResult {
        compute_price(&self.curve, order_count, self.override_for(selection))
    }
}
