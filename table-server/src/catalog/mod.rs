//! Catalog and stock primitives.
//!
//! The product catalog is owned elsewhere; the pipeline consumes it through
//! this seam. `InMemoryCatalog` backs tests and single-node deployments.

use async_trait::async_trait;
use dashmap::DashMap;
use serde::Deserialize;
use shared::models::{Category, Product, Variant};

use crate::common::{AppError, AppResult};

/// Everything the pipeline needs to know about a sellable line at the
/// moment it is added to a cart or snapshotted into an order.
#[derive(Debug, Clone)]
pub struct ResolvedVariant {
    pub variant_id: String,
    pub product_id: String,
    pub category_id: String,
    pub store_id: String,
    pub name: String,
    pub spec: Option<String>,
    pub price: f64,
    pub available: bool,
    pub stock: i64,
}

#[async_trait]
pub trait Catalog: Send + Sync {
    /// Resolve a variant with its product context. NotFound if unknown.
    async fn resolve_variant(&self, variant_id: &str) -> AppResult<ResolvedVariant>;

    /// True when the table is registered to the store.
    async fn table_in_store(&self, store_id: &str, table_id: &str) -> AppResult<bool>;

    /// True when at least `quantity` units are in stock.
    async fn check_stock(&self, variant_id: &str, quantity: i32) -> AppResult<bool>;

    /// Deduct stock, returning the remaining level. Conflict when the
    /// requested quantity is not available.
    async fn deduct_stock(&self, variant_id: &str, quantity: i32) -> AppResult<i64>;

    /// Return stock after a cancellation or refund.
    async fn restore_stock(&self, variant_id: &str, quantity: i32) -> AppResult<()>;
}

#[derive(Debug, Clone)]
struct VariantRecord {
    variant: Variant,
    product: Product,
    category: Category,
}

/// One sellable line in a catalog seed file.
#[derive(Debug, Deserialize)]
pub struct CatalogEntry {
    pub product: Product,
    pub variant: Variant,
    pub category: Category,
}

/// Catalog seed file: sellable lines plus the store's table registry.
#[derive(Debug, Deserialize)]
pub struct CatalogSeed {
    pub entries: Vec<CatalogEntry>,
    #[serde(default)]
    pub tables: Vec<TableSeed>,
}

#[derive(Debug, Deserialize)]
pub struct TableSeed {
    pub store_id: String,
    pub table_id: String,
}

/// DashMap-backed catalog used by tests and default wiring.
pub struct InMemoryCatalog {
    by_variant: DashMap<String, VariantRecord>,
    tables: DashMap<(String, String), ()>,
}

impl InMemoryCatalog {
    pub fn new() -> Self {
        Self {
            by_variant: DashMap::new(),
            tables: DashMap::new(),
        }
    }

    pub fn seed_table(&self, store_id: &str, table_id: &str) {
        self.tables
            .insert((store_id.to_string(), table_id.to_string()), ());
    }

    pub fn seed(&self, product: Product, variant: Variant, category: Category) {
        self.by_variant.insert(
            variant.id.clone(),
            VariantRecord {
                variant,
                product,
                category,
            },
        );
    }

    /// Load a JSON seed file holding `{entries, tables}`. Single-node
    /// deployments populate the catalog and table registry this way.
    pub fn from_json_file(path: &str) -> AppResult<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| AppError::infra(format!("read catalog {path}: {e}")))?;
        let seed: CatalogSeed = serde_json::from_str(&raw)
            .map_err(|e| AppError::validation(format!("parse catalog {path}: {e}")))?;
        let catalog = Self::new();
        for entry in seed.entries {
            catalog.seed(entry.product, entry.variant, entry.category);
        }
        for table in seed.tables {
            catalog.seed_table(&table.store_id, &table.table_id);
        }
        Ok(catalog)
    }

    fn record(&self, variant_id: &str) -> AppResult<VariantRecord> {
        self.by_variant
            .get(variant_id)
            .map(|r| r.clone())
            .ok_or_else(|| AppError::not_found(format!("Variant {} not found", variant_id)))
    }
}

impl Default for InMemoryCatalog {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Catalog for InMemoryCatalog {
    async fn resolve_variant(&self, variant_id: &str) -> AppResult<ResolvedVariant> {
        let rec = self.record(variant_id)?;
        Ok(ResolvedVariant {
            variant_id: rec.variant.id,
            product_id: rec.product.id,
            category_id: rec.category.id,
            store_id: rec.product.store_id,
            name: rec.product.name,
            spec: rec.variant.spec,
            price: rec.variant.price,
            available: rec.product.available,
            stock: rec.variant.stock,
        })
    }

    async fn table_in_store(&self, store_id: &str, table_id: &str) -> AppResult<bool> {
        Ok(self
            .tables
            .contains_key(&(store_id.to_string(), table_id.to_string())))
    }

    async fn check_stock(&self, variant_id: &str, quantity: i32) -> AppResult<bool> {
        let rec = self.record(variant_id)?;
        Ok(rec.variant.stock >= quantity as i64)
    }

    async fn deduct_stock(&self, variant_id: &str, quantity: i32) -> AppResult<i64> {
        let mut entry = self
            .by_variant
            .get_mut(variant_id)
            .ok_or_else(|| AppError::not_found(format!("Variant {} not found", variant_id)))?;
        if entry.variant.stock < quantity as i64 {
            return Err(AppError::conflict(format!(
                "Insufficient stock for variant {}",
                variant_id
            )));
        }
        entry.variant.stock -= quantity as i64;
        Ok(entry.variant.stock)
    }

    async fn restore_stock(&self, variant_id: &str, quantity: i32) -> AppResult<()> {
        let mut entry = self
            .by_variant
            .get_mut(variant_id)
            .ok_or_else(|| AppError::not_found(format!("Variant {} not found", variant_id)))?;
        entry.variant.stock += quantity as i64;
        Ok(())
    }
}
