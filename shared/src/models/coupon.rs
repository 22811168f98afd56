//! Coupon templates and per-user claimed instances.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponType {
    /// Flat value, requires `min_amount`
    Fixed,
    /// Flat value, no minimum spend
    NoThreshold,
    /// `amount * (1 - rate)`, optionally capped by `max_discount`
    Percent,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CouponStatus {
    Active,
    Paused,
    Expired,
}

/// A coupon template published by a store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Coupon {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub coupon_type: CouponType,
    /// Flat discount for Fixed / NoThreshold
    pub value: f64,
    /// Pay-rate for Percent (0.8 = pay 80%)
    pub rate: f64,
    /// Minimum order amount to apply (0 = none)
    pub min_amount: f64,
    /// Cap for Percent discounts (None = uncapped)
    pub max_discount: Option<f64>,
    pub status: CouponStatus,
    pub start_time: i64,
    pub end_time: i64,
    /// None = unlimited issuance
    pub total_count: Option<u32>,
    pub claimed_count: u32,
    pub per_user_limit: u32,
}

/// A coupon instance claimed by a user.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimedCoupon {
    pub id: String,
    pub coupon_id: String,
    pub user_id: String,
    pub used: bool,
    /// Set when marked used
    pub order_id: Option<String>,
    pub claimed_at: i64,
}
