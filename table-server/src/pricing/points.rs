//! Points redemption calculation.
//!
//! 100 points = ¥1. Redemption is capped at half of the amount remaining
//! after the coupon, so an order is never fully paid with points.

use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;

use super::round_money;

/// Points applied to an order and the resulting discount.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct PointsUse {
    pub points_used: i64,
    pub discount: Decimal,
}

/// Cap redeemed points at `min(requested, balance, floor(remaining × 0.5 × 100))`.
pub fn compute_points(requested: i64, balance: i64, remaining: Decimal) -> PointsUse {
    if requested <= 0 || balance <= 0 || remaining <= Decimal::ZERO {
        return PointsUse {
            points_used: 0,
            discount: Decimal::ZERO,
        };
    }

    let cap = (remaining * Decimal::from(50)).floor().to_i64().unwrap_or(0);
    let points_used = requested.min(balance).min(cap);
    let discount = round_money(Decimal::from(points_used) / Decimal::from(100));

    PointsUse {
        points_used,
        discount,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pricing::{to_decimal, to_f64};

    #[test]
    fn test_scenario_b_half_remaining_cap() {
        // Remaining ¥46 after coupon, balance 3000, requested 3000
        // cap = floor(46 × 0.5 × 100) = 2300 ⇒ used 2300, discount ¥23
        let used = compute_points(3000, 3000, to_decimal(46.0));
        assert_eq!(used.points_used, 2300);
        assert_eq!(to_f64(used.discount), 23.0);
    }

    #[test]
    fn test_capped_by_balance() {
        let used = compute_points(5000, 1200, to_decimal(100.0));
        assert_eq!(used.points_used, 1200);
        assert_eq!(to_f64(used.discount), 12.0);
    }

    #[test]
    fn test_capped_by_request() {
        let used = compute_points(500, 9999, to_decimal(100.0));
        assert_eq!(used.points_used, 500);
        assert_eq!(to_f64(used.discount), 5.0);
    }

    #[test]
    fn test_fractional_remaining_floors() {
        // floor(10.01 × 50) = 500
        let used = compute_points(10_000, 10_000, to_decimal(10.01));
        assert_eq!(used.points_used, 500);
        assert_eq!(to_f64(used.discount), 5.0);
    }

    #[test]
    fn test_zero_and_negative_inputs() {
        assert_eq!(compute_points(0, 100, to_decimal(10.0)).points_used, 0);
        assert_eq!(compute_points(100, 0, to_decimal(10.0)).points_used, 0);
        assert_eq!(compute_points(100, 100, Decimal::ZERO).points_used, 0);
        assert_eq!(compute_points(-5, 100, to_decimal(10.0)).points_used, 0);
    }
}
