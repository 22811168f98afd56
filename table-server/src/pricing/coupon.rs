//! Coupon discount calculation.

use rust_decimal::Decimal;
use shared::models::{ClaimedCoupon, Coupon, CouponStatus, CouponType};

use super::{round_money, to_decimal};

/// Why a coupon cannot be applied to an order.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CouponRejection {
    #[error("coupon is not active")]
    NotActive,
    #[error("coupon is outside its validity window")]
    OutsideWindow,
    #[error("coupon belongs to a different store")]
    StoreMismatch,
    #[error("coupon already used")]
    AlreadyUsed,
    #[error("order amount below coupon minimum")]
    BelowMinimum,
}

/// Validate a claimed coupon against an order and compute its discount.
///
/// The discount never exceeds the order amount.
pub fn compute_coupon_discount(
    coupon: &Coupon,
    claimed: &ClaimedCoupon,
    store_id: &str,
    amount: Decimal,
    now: i64,
) -> Result<Decimal, CouponRejection> {
    if claimed.used {
        return Err(CouponRejection::AlreadyUsed);
    }
    if coupon.status != CouponStatus::Active {
        return Err(CouponRejection::NotActive);
    }
    if now < coupon.start_time || now > coupon.end_time {
        return Err(CouponRejection::OutsideWindow);
    }
    if coupon.store_id != store_id {
        return Err(CouponRejection::StoreMismatch);
    }
    if amount < to_decimal(coupon.min_amount) {
        return Err(CouponRejection::BelowMinimum);
    }

    let discount = match coupon.coupon_type {
        CouponType::Fixed | CouponType::NoThreshold => to_decimal(coupon.value),
        CouponType::Percent => {
            let raw = amount * (Decimal::ONE - to_decimal(coupon.rate));
            match coupon.max_discount {
                Some(cap) => raw.min(to_decimal(cap)),
                None => raw,
            }
        }
    };

    Ok(round_money(discount.min(amount).max(Decimal::ZERO)))
}
