//! Ephemeral per-table collaborative cart.
//!
//! A cart session lives in a TTL-bound keyed cache; the whole value is
//! rewritten on every mutation. Items are unique per
//! `(variant_id, attrs signature)`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartItem {
    pub variant_id: String,
    pub product_id: String,
    pub category_id: String,
    pub name: String,
    pub spec: Option<String>,
    /// Attribute selections; part of the item identity
    pub attrs: Option<String>,
    pub price: f64,
    pub quantity: i32,
    pub added_by: String,
    pub added_at: i64,
}

impl CartItem {
    /// Identity key inside one session.
    pub fn merge_key(&self) -> (&str, Option<&str>) {
        (self.variant_id.as_str(), self.attrs.as_deref())
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CartSession {
    pub store_id: String,
    pub table_id: String,
    /// Insertion-ordered items
    pub items: Vec<CartItem>,
    pub updated_at: i64,
}

impl CartSession {
    pub fn new(store_id: impl Into<String>, table_id: impl Into<String>) -> Self {
        Self {
            store_id: store_id.into(),
            table_id: table_id.into(),
            items: Vec::new(),
            updated_at: 0,
        }
    }

    pub fn find_item(&self, variant_id: &str, attrs: Option<&str>) -> Option<usize> {
        self.items
            .iter()
            .position(|i| i.merge_key() == (variant_id, attrs))
    }
}

/// One step of a multi-device batch reconciliation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum CartOp {
    Add {
        variant_id: String,
        quantity: i32,
        attrs: Option<String>,
    },
    Update {
        variant_id: String,
        quantity: i32,
        attrs: Option<String>,
    },
    Remove {
        variant_id: String,
        attrs: Option<String>,
    },
}

/// Read shape: raw items plus computed totals.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CartView {
    pub store_id: String,
    pub table_id: String,
    pub items: Vec<CartItem>,
    pub total_amount: f64,
    pub item_count: i32,
}
