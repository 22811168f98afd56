//! redb-based storage for orders, coupons, wallets and the point ledger.
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `orders` | `order_id` | `Order` | Order rows |
//! | `order_items` | `(order_id, item_id)` | `OrderItem` | Line items |
//! | `store_orders` | `(store_id, order_id)` | `()` | Per-store index |
//! | `coupons` | `coupon_id` | `Coupon` | Coupon definitions |
//! | `claimed_coupons` | `(user_id, coupon_id)` | `ClaimedCoupon` | Claims |
//! | `wallets` | `(store_id, user_id)` | `PointsWallet` | Point balances |
//! | `points_ledger` | `(order_id, reason)` | `PointsEntry` | Point movements |
//! | `promotions` | `(store_id, promotion_id)` | `Promotion` | Promotion rules |
//! | `counters` | `&str` | `u64` | Receipt numbering |
//!
//! The ledger key `(order_id, reason)` makes the PAID point credit a
//! uniqueness check instead of a read-then-check race.
//!
//! # Durability
//!
//! redb commits with `Durability::Immediate`; a commit that returns is on
//! disk. The coupon/wallet/order sequence of order creation runs inside
//! one `WriteTransaction` so a mid-sequence failure rolls back all of it.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition, WriteTransaction};
use shared::models::{
    ClaimedCoupon, Coupon, Order, OrderItem, PointsEntry, PointsWallet, Promotion,
};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;

use crate::common::AppError;

const ORDERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("orders");
const ORDER_ITEMS_TABLE: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("order_items");
const STORE_ORDERS_TABLE: TableDefinition<(&str, &str), ()> = TableDefinition::new("store_orders");
const COUPONS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("coupons");
const CLAIMED_COUPONS_TABLE: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("claimed_coupons");
const WALLETS_TABLE: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("wallets");
const POINTS_LEDGER_TABLE: TableDefinition<(&str, &str), &[u8]> =
    TableDefinition::new("points_ledger");
const PROMOTIONS_TABLE: TableDefinition<(&str, &str), &[u8]> = TableDefinition::new("promotions");
const COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("counters");

const ORDER_COUNT_KEY: &str = "order_count";
const ORDER_DATE_KEY: &str = "order_date";

/// High key component for composite-key range scans.
const RANGE_END: &str = "\u{ffff}";

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Database error: {0}")]
    Database(#[from] redb::DatabaseError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] redb::TransactionError),

    #[error("Table error: {0}")]
    Table(#[from] redb::TableError),

    #[error("Storage error: {0}")]
    Storage(#[from] redb::StorageError),

    #[error("Commit error: {0}")]
    Commit(#[from] redb::CommitError),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

pub type StorageResult<T> = Result<T, StorageError>;

impl From<StorageError> for AppError {
    fn from(e: StorageError) -> Self {
        AppError::infra(e.to_string())
    }
}

/// Order-side persistence backed by redb.
#[derive(Clone)]
pub struct OrderStorage {
    db: Arc<Database>,
}

impl OrderStorage {
    /// Open or create the database at the given path.
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    /// In-memory database for tests and ephemeral deployments.
    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(ORDERS_TABLE)?;
            let _ = write_txn.open_table(ORDER_ITEMS_TABLE)?;
            let _ = write_txn.open_table(STORE_ORDERS_TABLE)?;
            let _ = write_txn.open_table(COUPONS_TABLE)?;
            let _ = write_txn.open_table(CLAIMED_COUPONS_TABLE)?;
            let _ = write_txn.open_table(WALLETS_TABLE)?;
            let _ = write_txn.open_table(POINTS_LEDGER_TABLE)?;
            let _ = write_txn.open_table(PROMOTIONS_TABLE)?;
            let _ = write_txn.open_table(COUNTERS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    pub fn begin_write(&self) -> StorageResult<WriteTransaction> {
        Ok(self.db.begin_write()?)
    }

    // ========== Receipt Numbering ==========

    /// Next daily order number, e.g. `20260825-0042`. Resets when the
    /// date key changes; runs inside the caller's transaction.
    pub fn next_order_no(&self, txn: &WriteTransaction, today: u64) -> StorageResult<String> {
        let mut table = txn.open_table(COUNTERS_TABLE)?;
        let stored_date = table.get(ORDER_DATE_KEY)?.map(|g| g.value()).unwrap_or(0);

        let next = if stored_date != today {
            table.insert(ORDER_DATE_KEY, today)?;
            1
        } else {
            table.get(ORDER_COUNT_KEY)?.map(|g| g.value()).unwrap_or(0) + 1
        };
        table.insert(ORDER_COUNT_KEY, next)?;

        Ok(format!("{today}-{next:04}"))
    }

    // ========== Orders ==========

    pub fn insert_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut orders = txn.open_table(ORDERS_TABLE)?;
        orders.insert(order.id.as_str(), serde_json::to_vec(order)?.as_slice())?;
        let mut index = txn.open_table(STORE_ORDERS_TABLE)?;
        index.insert((order.store_id.as_str(), order.id.as_str()), ())?;
        Ok(())
    }

    /// Overwrite an order row (status transitions only).
    pub fn update_order(&self, txn: &WriteTransaction, order: &Order) -> StorageResult<()> {
        let mut orders = txn.open_table(ORDERS_TABLE)?;
        orders.insert(order.id.as_str(), serde_json::to_vec(order)?.as_slice())?;
        Ok(())
    }

    pub fn get_order(&self, order_id: &str) -> StorageResult<Option<Order>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDERS_TABLE)?;
        match table.get(order_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_order_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
    ) -> StorageResult<Option<Order>> {
        let table = txn.open_table(ORDERS_TABLE)?;
        let order = match table.get(order_id)? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(order)
    }

    pub fn list_orders_for_store(&self, store_id: &str) -> StorageResult<Vec<Order>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(STORE_ORDERS_TABLE)?;
        let orders = read_txn.open_table(ORDERS_TABLE)?;

        let mut result = Vec::new();
        for entry in index.range((store_id, "")..(store_id, RANGE_END))? {
            let (key, _) = entry?;
            if let Some(value) = orders.get(key.value().1)? {
                result.push(serde_json::from_slice(value.value())?);
            }
        }
        result.sort_by_key(|o: &Order| o.created_at);
        Ok(result)
    }

    pub fn list_orders_for_table(
        &self,
        store_id: &str,
        table_id: &str,
    ) -> StorageResult<Vec<Order>> {
        let mut orders = self.list_orders_for_store(store_id)?;
        orders.retain(|o| o.table_id == table_id);
        Ok(orders)
    }

    // ========== Order Items ==========

    pub fn insert_order_item(&self, txn: &WriteTransaction, item: &OrderItem) -> StorageResult<()> {
        let mut table = txn.open_table(ORDER_ITEMS_TABLE)?;
        table.insert(
            (item.order_id.as_str(), item.id.as_str()),
            serde_json::to_vec(item)?.as_slice(),
        )?;
        Ok(())
    }

    /// Overwrite one item row (refund bookkeeping only).
    pub fn update_order_item(&self, txn: &WriteTransaction, item: &OrderItem) -> StorageResult<()> {
        self.insert_order_item(txn, item)
    }

    pub fn get_order_items(&self, order_id: &str) -> StorageResult<Vec<OrderItem>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(ORDER_ITEMS_TABLE)?;

        let mut items = Vec::new();
        for entry in table.range((order_id, "")..(order_id, RANGE_END))? {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(value.value())?);
        }
        Ok(items)
    }

    pub fn get_order_items_txn(
        &self,
        txn: &WriteTransaction,
        order_id: &str,
    ) -> StorageResult<Vec<OrderItem>> {
        let table = txn.open_table(ORDER_ITEMS_TABLE)?;
        let mut items = Vec::new();
        for entry in table.range((order_id, "")..(order_id, RANGE_END))? {
            let (_, value) = entry?;
            items.push(serde_json::from_slice(value.value())?);
        }
        Ok(items)
    }

    // ========== Coupons ==========

    pub fn put_coupon(&self, coupon: &Coupon) -> StorageResult<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(COUPONS_TABLE)?;
            table.insert(coupon.id.as_str(), serde_json::to_vec(coupon)?.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_coupon(&self, coupon_id: &str) -> StorageResult<Option<Coupon>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(COUPONS_TABLE)?;
        match table.get(coupon_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_coupon_txn(
        &self,
        txn: &WriteTransaction,
        coupon_id: &str,
    ) -> StorageResult<Option<Coupon>> {
        let table = txn.open_table(COUPONS_TABLE)?;
        let coupon = match table.get(coupon_id)? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(coupon)
    }

    pub fn put_claimed_coupon(&self, claimed: &ClaimedCoupon) -> StorageResult<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(CLAIMED_COUPONS_TABLE)?;
            table.insert(
                (claimed.user_id.as_str(), claimed.coupon_id.as_str()),
                serde_json::to_vec(claimed)?.as_slice(),
            )?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_claimed_coupon(
        &self,
        user_id: &str,
        coupon_id: &str,
    ) -> StorageResult<Option<ClaimedCoupon>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(CLAIMED_COUPONS_TABLE)?;
        match table.get((user_id, coupon_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_claimed_coupon_txn(
        &self,
        txn: &WriteTransaction,
        user_id: &str,
        coupon_id: &str,
    ) -> StorageResult<Option<ClaimedCoupon>> {
        let table = txn.open_table(CLAIMED_COUPONS_TABLE)?;
        let claimed = match table.get((user_id, coupon_id))? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(claimed)
    }

    pub fn update_claimed_coupon(
        &self,
        txn: &WriteTransaction,
        claimed: &ClaimedCoupon,
    ) -> StorageResult<()> {
        let mut table = txn.open_table(CLAIMED_COUPONS_TABLE)?;
        table.insert(
            (claimed.user_id.as_str(), claimed.coupon_id.as_str()),
            serde_json::to_vec(claimed)?.as_slice(),
        )?;
        Ok(())
    }

    // ========== Wallets ==========

    pub fn put_wallet(&self, wallet: &PointsWallet) -> StorageResult<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(WALLETS_TABLE)?;
            table.insert(
                (wallet.store_id.as_str(), wallet.user_id.as_str()),
                serde_json::to_vec(wallet)?.as_slice(),
            )?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_wallet(&self, store_id: &str, user_id: &str) -> StorageResult<Option<PointsWallet>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(WALLETS_TABLE)?;
        match table.get((store_id, user_id))? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn get_wallet_txn(
        &self,
        txn: &WriteTransaction,
        store_id: &str,
        user_id: &str,
    ) -> StorageResult<Option<PointsWallet>> {
        let table = txn.open_table(WALLETS_TABLE)?;
        let wallet = match table.get((store_id, user_id))? {
            Some(value) => Some(serde_json::from_slice(value.value())?),
            None => None,
        };
        Ok(wallet)
    }

    pub fn update_wallet(&self, txn: &WriteTransaction, wallet: &PointsWallet) -> StorageResult<()> {
        let mut table = txn.open_table(WALLETS_TABLE)?;
        table.insert(
            (wallet.store_id.as_str(), wallet.user_id.as_str()),
            serde_json::to_vec(wallet)?.as_slice(),
        )?;
        Ok(())
    }

    // ========== Points Ledger ==========

    /// Insert a ledger entry unless one with the same `(order_id, reason)`
    /// key exists. Returns false on the duplicate.
    pub fn try_insert_ledger_entry(
        &self,
        txn: &WriteTransaction,
        entry: &PointsEntry,
    ) -> StorageResult<bool> {
        let mut table = txn.open_table(POINTS_LEDGER_TABLE)?;
        let key = (entry.order_id.as_str(), entry.reason.as_str());
        if table.get(key)?.is_some() {
            return Ok(false);
        }
        table.insert(key, serde_json::to_vec(entry)?.as_slice())?;
        Ok(true)
    }

    // ========== Promotions ==========

    pub fn put_promotion(&self, promotion: &Promotion) -> StorageResult<()> {
        let txn = self.begin_write()?;
        {
            let mut table = txn.open_table(PROMOTIONS_TABLE)?;
            table.insert(
                (promotion.store_id.as_str(), promotion.id.as_str()),
                serde_json::to_vec(promotion)?.as_slice(),
            )?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn list_promotions_for_store(&self, store_id: &str) -> StorageResult<Vec<Promotion>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PROMOTIONS_TABLE)?;

        let mut promotions = Vec::new();
        for entry in table.range((store_id, "")..(store_id, RANGE_END))? {
            let (_, value) = entry?;
            promotions.push(serde_json::from_slice(value.value())?);
        }
        Ok(promotions)
    }

    pub fn get_ledger_entries(&self, order_id: &str) -> StorageResult<Vec<PointsEntry>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(POINTS_LEDGER_TABLE)?;

        let mut entries = Vec::new();
        for entry in table.range((order_id, "")..(order_id, RANGE_END))? {
            let (_, value) = entry?;
            entries.push(serde_json::from_slice(value.value())?);
        }
        Ok(entries)
    }
}
