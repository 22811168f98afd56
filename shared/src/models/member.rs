//! Member points wallets and their ledger.
//!
//! Ledger entries are keyed `(order_id, reason)` by the storage layer, so
//! crediting the same order twice is a uniqueness violation rather than a
//! read-then-check race.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PointsReason {
    EarnOrder,
    RedeemOrder,
    RefundOrder,
    ManualAdjust,
}

impl PointsReason {
    pub fn as_str(self) -> &'static str {
        match self {
            PointsReason::EarnOrder => "EARN_ORDER",
            PointsReason::RedeemOrder => "REDEEM_ORDER",
            PointsReason::RefundOrder => "REFUND_ORDER",
            PointsReason::ManualAdjust => "MANUAL_ADJUST",
        }
    }
}

/// Store-scoped wallet, created lazily on first use.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsWallet {
    pub store_id: String,
    pub user_id: String,
    pub balance: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PointsEntry {
    pub order_id: String,
    pub reason: PointsReason,
    /// Positive = credit, negative = debit
    pub change: i64,
    pub created_at: i64,
}
