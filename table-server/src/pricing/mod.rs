//! Pricing & discount engine.
//!
//! Pure, side-effect-free calculations evaluated in a fixed order:
//! coupon → points (on the remainder) → promotions (on the remainder).
//! Uses rust_decimal internally, f64 at the boundary, 2 decimal places
//! rounded half-up.

pub mod coupon;
pub mod points;
pub mod promotion;

use rust_decimal::prelude::*;

pub use coupon::{CouponRejection, compute_coupon_discount};
pub use points::compute_points;
pub use promotion::{AppliedPromotion, compute_promotions};

/// Rounding for monetary values (2 decimal places, half-up)
const DECIMAL_PLACES: u32 = 2;

/// Convert f64 to Decimal for calculation
#[inline]
pub fn to_decimal(value: f64) -> Decimal {
    Decimal::from_f64(value).unwrap_or_default()
}

/// Convert Decimal back to f64 for storage, rounded to 2 decimal places
#[inline]
pub fn to_f64(value: Decimal) -> f64 {
    value
        .round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
        .to_f64()
        .unwrap_or_default()
}

/// Round a monetary Decimal to 2 decimal places, half-up.
#[inline]
pub fn round_money(value: Decimal) -> Decimal {
    value.round_dp_with_strategy(DECIMAL_PLACES, RoundingStrategy::MidpointAwayFromZero)
}

/// One order line as the engine sees it: snapshot price and quantity plus
/// the identities promotion allow-lists filter on.
#[derive(Debug, Clone)]
pub struct PricedLine {
    pub product_id: String,
    pub category_id: String,
    pub price: f64,
    pub quantity: i32,
}

impl PricedLine {
    pub fn line_total(&self) -> Decimal {
        to_decimal(self.price) * Decimal::from(self.quantity)
    }
}

/// Sum of line totals, rounded.
pub fn sum_lines(lines: &[PricedLine]) -> Decimal {
    round_money(lines.iter().map(|l| l.line_total()).sum())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_to_decimal_precision() {
        // Classic floating point problem: 0.1 + 0.2 != 0.3
        let sum = to_decimal(0.1) + to_decimal(0.2);
        assert_eq!(to_f64(sum), 0.3);
    }

    #[test]
    fn test_rounding_half_up() {
        assert_eq!(to_f64(Decimal::new(10005, 3)), 10.01); // 10.005 → 10.01
        assert_eq!(to_f64(Decimal::new(10004, 3)), 10.0); // 10.004 → 10.00
    }

    #[test]
    fn test_sum_lines() {
        let lines = vec![
            PricedLine {
                product_id: "p1".into(),
                category_id: "c1".into(),
                price: 18.0,
                quantity: 2,
            },
            PricedLine {
                product_id: "p2".into(),
                category_id: "c1".into(),
                price: 20.0,
                quantity: 1,
            },
        ];
        assert_eq!(to_f64(sum_lines(&lines)), 56.0);
    }
}
