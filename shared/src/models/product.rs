//! Catalog types: products, variants and categories.
//!
//! The catalog itself is an external collaborator; these are the snapshot
//! shapes the fulfillment pipeline reads through the `Catalog` seam.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Category {
    pub id: String,
    pub store_id: String,
    pub name: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Product {
    pub id: String,
    pub store_id: String,
    pub category_id: String,
    pub name: String,
    /// Whether the product can currently be ordered
    pub available: bool,
}

/// A sellable variant of a product (size, portion, set).
///
/// Prices are snapshotted from here at order-creation time and never
/// re-read afterwards.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Variant {
    pub id: String,
    pub product_id: String,
    /// Spec label, e.g. "Large" / "Set A"
    pub spec: Option<String>,
    pub price: f64,
    pub stock: i64,
}
