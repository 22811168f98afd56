//! Store promotions evaluated by the pricing engine.

use serde::{Deserialize, Serialize};

/// One threshold tier of a FULL_REDUCE or QUANTITY_DISCOUNT promotion.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PromotionTier {
    /// Minimum amount (FullReduce) or minimum quantity (QuantityDiscount)
    pub minimum: f64,
    /// Reduction amount (FullReduce) or pay-rate (QuantityDiscount)
    pub value: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PromotionKind {
    FullReduce,
    Discount,
    TimeLimited,
    SecondHalfPrice,
    QuantityDiscount,
    BuyOneGetOne,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Promotion {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub kind: PromotionKind,
    /// Higher priority evaluated first
    pub priority: i32,
    /// Whether further promotions may apply after this one
    pub stackable: bool,
    /// Restricted to first-time customers
    pub new_user_only: bool,
    pub active: bool,
    pub start_time: i64,
    pub end_time: i64,

    /// FullReduce / QuantityDiscount threshold tiers
    #[serde(default)]
    pub tiers: Vec<PromotionTier>,
    /// Discount / TimeLimited pay-rate (0.8 = pay 80%)
    pub discount_rate: Option<f64>,
    /// Cap on Discount / TimeLimited discount amount
    pub max_discount: Option<f64>,
    /// SecondHalfPrice rate applied to the second unit (0.5 = half price)
    pub second_item_rate: Option<f64>,
    /// SecondHalfPrice cap on discounted item count
    pub max_discounted_items: Option<u32>,
    /// Product/category allow-list for QuantityDiscount (empty = all)
    #[serde(default)]
    pub product_ids: Vec<String>,
    #[serde(default)]
    pub category_ids: Vec<String>,
    /// BuyOneGetOne parameters
    pub buy_quantity: Option<u32>,
    pub get_quantity: Option<u32>,
    pub max_sets: Option<u32>,
}

impl Promotion {
    /// In-window and switched on
    pub fn is_live(&self, now: i64) -> bool {
        self.active && self.start_time <= now && now <= self.end_time
    }
}
