//! Orders and order items.
//!
//! Identity and amount fields are immutable once the order is created;
//! only `status` and the refund bookkeeping on items may change.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    Pending,
    Paid,
    Preparing,
    Completed,
    Cancelled,
    Refunded,
}

impl OrderStatus {
    /// Legal transitions of the order state machine.
    ///
    /// Completed / Cancelled / Refunded are terminal.
    pub fn can_transition(self, to: OrderStatus) -> bool {
        use OrderStatus::*;
        matches!(
            (self, to),
            (Pending, Paid)
                | (Pending, Cancelled)
                | (Paid, Preparing)
                | (Paid, Refunded)
                | (Preparing, Completed)
                | (Preparing, Refunded)
        )
    }

    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            OrderStatus::Completed | OrderStatus::Cancelled | OrderStatus::Refunded
        )
    }
}

/// Immutable price/name/spec snapshot taken at order creation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OrderItem {
    pub id: String,
    pub order_id: String,
    pub variant_id: String,
    pub product_id: String,
    pub category_id: String,
    pub name: String,
    pub spec: Option<String>,
    /// Attribute selections rendered on tickets, e.g. "no ice/extra shot"
    pub attrs: Option<String>,
    pub price: f64,
    pub quantity: i32,
    /// Refund bookkeeping, bounded by `quantity`
    pub refunded_quantity: i32,
    pub refunded_amount: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Order {
    pub id: String,
    pub order_no: String,
    pub store_id: String,
    pub table_id: String,
    pub user_id: Option<String>,
    pub status: OrderStatus,
    pub total_amount: f64,
    pub coupon_id: Option<String>,
    pub coupon_discount: f64,
    pub points_used: i64,
    pub points_discount: f64,
    /// max(total - coupon_discount - points_discount, 0); never mutated
    pub pay_amount: f64,
    pub remark: Option<String>,
    /// Set on add-on orders billed against an earlier order
    pub parent_order_id: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
