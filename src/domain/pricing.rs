//! Bonding-curve price engine.
//!
//! Turns a product's static curve parameters and its live order count into
//! the price shown to buyers. The price moves by a signed modifier that
//! switches once the order count reaches the curve's minimum-order
//! threshold. A variant override, when one exists for the selected option
//! combination, replaces the curve entirely.
//!
//! Everything here is pure and total: no I/O, no shared state, safe to call
//! from any task on every snapshot change.

use std::collections::{BTreeMap, HashMap};

use rust_decimal::prelude::*;
use rust_decimal::{Decimal, RoundingStrategy};
use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Upper bound on how many units of a product can ever be sold.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum StockLimit {
    /// A finite stock of this many units.
    Limited(u64),
    /// No stock cap.
    Unlimited,
}

impl From<Option<u64>> for StockLimit {
    fn from(value: Option<u64>) -> Self {
        value.map_or(Self::Unlimited, Self::Limited)
    }
}

/// Price-curve descriptor supplied by the product catalog.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceCurve {
    /// Undiscounted list price.
    pub base_price: Decimal,
    /// Order count at which the after-minimum modifier takes over.
    pub min_orders: u64,
    /// Stock cap, used only for progress display.
    pub max_stock: StockLimit,
    /// Fractional modifier applied while `order_count < min_orders`.
    pub modifier_before_min: Option<Decimal>,
    /// Fractional modifier applied once `order_count >= min_orders`.
    pub modifier_after_min: Option<Decimal>,
}

/// Rejected curve parameters.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CurveError {
    #[error("base price must not be negative, got {0}")]
    NegativeBasePrice(Decimal),
    #[error("{which} modifier must be greater than -1, got {value}")]
    ModifierOutOfRange { which: &'static str, value: Decimal },
}

impl PriceCurve {
    /// A curve that never moves off its base price.
    pub fn flat(base_price: Decimal, min_orders: u64) -> Self {
        Self {
            base_price,
            min_orders,
            max_stock: StockLimit::Unlimited,
            modifier_before_min: None,
            modifier_after_min: None,
        }
    }

    /// The modifier in force at `order_count`, if that side of the curve has one.
    pub fn active_modifier(&self, order_count: u64) -> Option<Decimal> {
        if order_count < self.min_orders {
            self.modifier_before_min
        } else {
            self.modifier_after_min
        }
    }

    /// Check that every reachable price stays strictly positive.
    pub fn validate(&self) -> Result<(), CurveError> {
        if self.base_price.is_sign_negative() && !self.base_price.is_zero() {
            return Err(CurveError::NegativeBasePrice(self.base_price));
        }
        let sides = [
            ("before-min", self.modifier_before_min),
            ("after-min", self.modifier_after_min),
        ];
        for (which, modifier) in sides {
            if let Some(value) = modifier {
                if value <= Decimal::NEGATIVE_ONE {
                    return Err(CurveError::ModifierOutOfRange { which, value });
                }
            }
        }
        Ok(())
    }
}

/// Price shown for a product at a given order count.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PriceResult {
    /// Price after the active modifier (or the override).
    pub modified_price: Decimal,
    /// Price before any modifier.
    pub original_price: Decimal,
    /// Signed whole-percent change; negative is a discount.
    pub modification_percentage: i32,
}

impl PriceResult {
    /// Modified price rounded to cents for display.
    pub fn display_price(&self) -> Decimal {
        self.modified_price
            .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
    }

    /// Whether the buyer currently pays less than list price.
    pub fn is_discounted(&self) -> bool {
        self.modified_price < self.original_price
    }
}

/// Compute the live price of a product.
///
/// `variant_override` is the absolute price resolved for the buyer's
/// current option selection, if any (see [`VariantPriceOverride::price_for`]).
pub fn compute_price(
    curve: &PriceCurve,
    order_count: u64,
    variant_override: Option<Decimal>,
) -> PriceResult {
    if let Some(price) = variant_override {
        return PriceResult {
            modified_price: price,
            original_price: price,
            modification_percentage: 0,
        };
    }

    match curve.active_modifier(order_count) {
        Some(modifier) => PriceResult {
            modified_price: apply_modifier(curve.base_price, modifier),
            original_price: curve.base_price,
            modification_percentage: whole_percent(modifier),
        },
        None => PriceResult {
            modified_price: curve.base_price,
            original_price: curve.base_price,
            modification_percentage: 0,
        },
    }
}

/// `base * (1 + m)`, saturating at the `Decimal` range.
fn apply_modifier(base: Decimal, modifier: Decimal) -> Decimal {
    let factor = Decimal::ONE.checked_add(modifier).unwrap_or(Decimal::MAX);
    let saturated = if base.is_sign_negative() == factor.is_sign_negative() {
        Decimal::MAX
    } else {
        Decimal::MIN
    };
    base.checked_mul(factor).unwrap_or(saturated)
}

/// `round(m * 100)`, half away from zero, saturating at the i32 range.
fn whole_percent(modifier: Decimal) -> i32 {
    let saturated = if modifier.is_sign_negative() {
        i32::MIN
    } else {
        i32::MAX
    };
    modifier
        .checked_mul(Decimal::ONE_HUNDRED)
        .map(|pct| pct.round_dp_with_strategy(0, RoundingStrategy::MidpointAwayFromZero))
        .and_then(|pct| pct.to_i32())
        .unwrap_or(saturated)
}

// ────────────────────────────────────────────
// Variant overrides
// ────────────────────────────────────────────

/// A buyer's option choices, e.g. `{"size": "M", "color": "black"}`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantSelection(BTreeMap<String, String>);

impl VariantSelection {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert of one option choice.
    #[must_use]
    pub fn with(mut self, option: impl Into<String>, value: impl Into<String>) -> Self {
        self.0.insert(option.into(), value.into());
        self
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Canonical key: `name=value` pairs sorted by option name, joined by `|`.
    pub fn canonical_key(&self) -> String {
        self.0
            .iter()
            .map(|(option, value)| format!("{option}={value}"))
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl<K: Into<String>, V: Into<String>> FromIterator<(K, V)> for VariantSelection {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

/// Absolute prices for specific option combinations.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct VariantPriceOverride {
    prices: HashMap<String, Decimal>,
}

impl VariantPriceOverride {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, selection: &VariantSelection, price: Decimal) {
        self.prices.insert(selection.canonical_key(), price);
    }

    /// Override price for `selection`, if one is defined.
    pub fn price_for(&self, selection: &VariantSelection) -> Option<Decimal> {
        if selection.is_empty() {
            return None;
        }
        self.prices.get(&selection.canonical_key()).copied()
    }

    pub fn len(&self) -> usize {
        self.prices.len()
    }

    pub fn is_empty(&self) -> bool {
        self.prices.is_empty()
    }
}

// ────────────────────────────────────────────
// Display-only progress
// ────────────────────────────────────────────

/// Progress bars rendered next to the price.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CurveProgress {
    /// Percent of `min_orders` reached, clamped to `[0, 100]`.
    pub min_orders_pct: Decimal,
    /// Percent of `max_stock` sold; equals `min_orders_pct` when unlimited.
    pub stock_pct: Decimal,
}

/// Compute progress toward the curve's thresholds.
pub fn progress(curve: &PriceCurve, order_count: u64) -> CurveProgress {
    let min_orders_pct = percent_of(order_count, curve.min_orders);
    let stock_pct = match curve.max_stock {
        StockLimit::Limited(max) => percent_of(order_count, max),
        StockLimit::Unlimited => min_orders_pct,
    };
    CurveProgress {
        min_orders_pct,
        stock_pct,
    }
}

/// Units left before the stock cap, `None` when unlimited.
pub fn remaining_stock(curve: &PriceCurve, order_count: u64) -> Option<u64> {
    match curve.max_stock {
        StockLimit::Limited(max) => Some(max.saturating_sub(order_count)),
        StockLimit::Unlimited => None,
    }
}

fn percent_of(count: u64, total: u64) -> Decimal {
    if total == 0 {
        return Decimal::ONE_HUNDRED;
    }
    let pct = Decimal::from(count) * Decimal::ONE_HUNDRED / Decimal::from(total);
    pct.min(Decimal::ONE_HUNDRED)
        .round_dp_with_strategy(2, RoundingStrategy::MidpointAwayFromZero)
}
