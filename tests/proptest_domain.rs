//! Property-Based Tests - Domain Layer Invariants
//!
//! Uses `proptest` to verify that the price curve, progress and
//! backoff schedule hold their invariants across random inputs.

use std::time::Duration;

use proptest::prelude::*;
use rust_decimal::Decimal;

use live_price_curve::domain::backoff::BackoffPolicy;
use live_price_curve::domain::pricing::{
    compute_price, progress, remaining_stock, PriceCurve, StockLimit, VariantSelection,
};

/// Modifiers in basis points, strictly above -100%.
fn modifier() -> impl Strategy<Value = Option<Decimal>> {
    prop::option::of((-9_999i64..=20_000).prop_map(|bp| Decimal::new(bp, 4)))
}

fn curve() -> impl Strategy<Value = PriceCurve> {
    (
        0i64..10_000_000,
        0u64..10_000,
        prop::option::of(0u64..20_000),
        modifier(),
        modifier(),
    )
        .prop_map(|(cents, min_orders, max_stock, before, after)| PriceCurve {
            base_price: Decimal::new(cents, 2),
            min_orders,
            max_stock: StockLimit::from(max_stock),
            modifier_before_min: before,
            modifier_after_min: after,
        })
}

// ── Price Curve Properties ──────────────────────────────────

proptest! {
    /// Generated curves always pass validation.
    #[test]
    fn generated_curves_are_valid(curve in curve()) {
        prop_assert!(curve.validate().is_ok());
    }

    /// The modified price is base × (1 + active modifier), and never negative.
    #[test]
    fn price_follows_active_side(curve in curve(), count in 0u64..30_000) {
        let result = compute_price(&curve, count, None);
        let modifier = if count < curve.min_orders {
            curve.modifier_before_min
        } else {
            curve.modifier_after_min
        };
        let expected = curve.base_price * (Decimal::ONE + modifier.unwrap_or_default());

        prop_assert_eq!(result.modified_price, expected);
        prop_assert_eq!(result.original_price, curve.base_price);
        prop_assert!(!result.modified_price.is_sign_negative() || result.modified_price.is_zero());
    }

    /// The whole-percent label agrees in sign with the modifier.
    #[test]
    fn percentage_sign_matches_modifier(curve in curve(), count in 0u64..30_000) {
        let result = compute_price(&curve, count, None);
        let modifier = curve.active_modifier(count).unwrap_or_default();
        let pct = result.modification_percentage;

        prop_assert!(pct >= -100 && pct <= 200, "pct out of range: {pct}");
        if pct != 0 {
            prop_assert_eq!(pct.is_negative(), modifier.is_sign_negative());
        }
    }

    /// Within one side of the threshold the price does not depend on the count.
    #[test]
    fn price_is_piecewise_constant(curve in curve(), a in 0u64..30_000, b in 0u64..30_000) {
        let same_side = (a < curve.min_orders) == (b < curve.min_orders);
        prop_assume!(same_side);
        prop_assert_eq!(compute_price(&curve, a, None), compute_price(&curve, b, None));
    }

    /// An override replaces the curve outright.
    #[test]
    fn override_wins(curve in curve(), count in 0u64..30_000, cents in 0i64..1_000_000) {
        let price = Decimal::new(cents, 2);
        let result = compute_price(&curve, count, Some(price));
        prop_assert_eq!(result.modified_price, price);
        prop_assert_eq!(result.original_price, price);
        prop_assert_eq!(result.modification_percentage, 0);
    }

    /// Progress is clamped to [0, 100] and grows with the count.
    #[test]
    fn progress_is_bounded_and_monotonic(curve in curve(), a in 0u64..30_000, delta in 0u64..5_000) {
        let low = progress(&curve, a);
        let high = progress(&curve, a + delta);
        for pct in [low.min_orders_pct, low.stock_pct, high.min_orders_pct, high.stock_pct] {
            prop_assert!(pct >= Decimal::ZERO && pct <= Decimal::ONE_HUNDRED, "pct {pct}");
        }
        prop_assert!(high.min_orders_pct >= low.min_orders_pct);
        prop_assert!(high.stock_pct >= low.stock_pct);
    }

    /// Remaining stock never underflows.
    #[test]
    fn remaining_stock_saturates(max in 0u64..20_000, count in 0u64..40_000) {
        let mut curve = PriceCurve::flat(Decimal::ONE, 10);
        curve.max_stock = StockLimit::Limited(max);
        let left = remaining_stock(&curve, count).unwrap();
        prop_assert!(left <= max);
        prop_assert_eq!(left, max.saturating_sub(count));
    }
}

// ── Variant Selection Properties ────────────────────────────

proptest! {
    /// The canonical key ignores the order options were chosen in.
    #[test]
    fn canonical_key_is_order_independent(
        options in prop::collection::btree_map("[a-z]{1,6}", "[A-Z0-9]{1,4}", 1..5),
    ) {
        let forward: VariantSelection = options.clone().into_iter().collect();
        let reversed: VariantSelection = options.into_iter().rev().collect();
        prop_assert_eq!(forward.canonical_key(), reversed.canonical_key());
    }
}

// ── Backoff Properties ──────────────────────────────────────

proptest! {
    /// Delays never shrink and never exceed the cap.
    #[test]
    fn backoff_is_monotonic_and_capped(
        base_ms in 1u64..5_000,
        cap_factor in 1u64..64,
        attempts in 1u32..40,
    ) {
        let policy = BackoffPolicy::new(
            attempts,
            Duration::from_millis(base_ms),
            Duration::from_millis(base_ms * cap_factor),
        );
        let mut previous = Duration::ZERO;
        for attempt in 1..=attempts {
            let delay = policy.delay(attempt);
            prop_assert!(delay >= previous);
            prop_assert!(delay <= policy.max_delay);
            previous = delay;
        }
        prop_assert!(!policy.allows(attempts));
    }
}
