//! Per-table collaborative cart.
//!
//! Sessions live in the versioned TTL cache keyed by (store, table).
//! Every mutation rewrites the whole session through a compare-and-swap
//! loop, so two devices editing the same table never lose each other's
//! updates. Mutations reset the TTL and broadcast `cart_updated` to the
//! table room.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rust_decimal::Decimal;
use serde_json::json;
use shared::cart::{CartItem, CartOp, CartSession, CartView};
use shared::event::{EventName, LiveEvent};

use crate::cache::{CasError, TtlCache};
use crate::catalog::Catalog;
use crate::common::{AppError, AppResult};
use crate::live::RoomManager;
use crate::pricing::{to_decimal, to_f64};

/// Bound on CAS retries before giving up on a contended key.
const MAX_CAS_RETRIES: usize = 16;

pub struct CartStore {
    sessions: TtlCache<CartSession>,
    catalog: Arc<dyn Catalog>,
    rooms: Arc<RoomManager>,
    ttl: Duration,
}

impl CartStore {
    pub fn new(catalog: Arc<dyn Catalog>, rooms: Arc<RoomManager>, ttl: Duration) -> Self {
        Self {
            sessions: TtlCache::new(),
            catalog,
            rooms,
            ttl,
        }
    }

    fn session_key(store_id: &str, table_id: &str) -> String {
        format!("cart:{store_id}:{table_id}")
    }

    /// Read the session with computed totals. A missing or expired session
    /// reads as an empty cart.
    pub fn get(&self, store_id: &str, table_id: &str) -> CartView {
        let session = self
            .sessions
            .get(&Self::session_key(store_id, table_id))
            .map(|v| v.value)
            .unwrap_or_else(|| CartSession::new(store_id, table_id));
        view_of(&session)
    }

    pub async fn add_item(
        &self,
        store_id: &str,
        table_id: &str,
        variant_id: &str,
        quantity: i32,
        attrs: Option<String>,
        operator: &str,
    ) -> AppResult<CartView> {
        if quantity <= 0 {
            return Err(AppError::validation("quantity must be positive"));
        }

        let resolved = self.catalog.resolve_variant(variant_id).await?;
        if !resolved.available {
            return Err(AppError::conflict(format!(
                "Product {} is not available",
                resolved.name
            )));
        }

        let item = CartItem {
            variant_id: resolved.variant_id.clone(),
            product_id: resolved.product_id,
            category_id: resolved.category_id,
            name: resolved.name,
            spec: resolved.spec,
            attrs,
            price: resolved.price,
            quantity,
            added_by: operator.to_string(),
            added_at: Utc::now().timestamp_millis(),
        };

        let session = self
            .mutate(store_id, table_id, |session| {
                let in_cart = session
                    .find_item(&item.variant_id, item.attrs.as_deref())
                    .map(|i| session.items[i].quantity)
                    .unwrap_or(0);
                if resolved.stock < (in_cart + quantity) as i64 {
                    return Err(AppError::conflict(format!(
                        "Insufficient stock for {}",
                        item.name
                    )));
                }
                apply_add(session, item.clone());
                Ok(())
            })
            .await?;

        self.notify(&session, "add", Some(&item), operator);
        Ok(view_of(&session))
    }

    /// Set an item's quantity; zero or negative removes it.
    pub async fn update_item(
        &self,
        store_id: &str,
        table_id: &str,
        variant_id: &str,
        quantity: i32,
        attrs: Option<String>,
        operator: &str,
    ) -> AppResult<CartView> {
        let mut updated: Option<CartItem> = None;
        let session = self
            .mutate(store_id, table_id, |session| {
                let idx = session
                    .find_item(variant_id, attrs.as_deref())
                    .ok_or_else(|| AppError::not_found("item not in cart"))?;
                if quantity <= 0 {
                    updated = Some(session.items.remove(idx));
                } else {
                    session.items[idx].quantity = quantity;
                    updated = Some(session.items[idx].clone());
                }
                Ok(())
            })
            .await?;

        let action = if quantity <= 0 { "remove" } else { "update" };
        self.notify(&session, action, updated.as_ref(), operator);
        Ok(view_of(&session))
    }

    pub async fn remove_item(
        &self,
        store_id: &str,
        table_id: &str,
        variant_id: &str,
        attrs: Option<String>,
        operator: &str,
    ) -> AppResult<CartView> {
        let mut removed: Option<CartItem> = None;
        let session = self
            .mutate(store_id, table_id, |session| {
                let idx = session
                    .find_item(variant_id, attrs.as_deref())
                    .ok_or_else(|| AppError::not_found("item not in cart"))?;
                removed = Some(session.items.remove(idx));
                Ok(())
            })
            .await?;

        self.notify(&session, "remove", removed.as_ref(), operator);
        Ok(view_of(&session))
    }

    pub async fn clear(&self, store_id: &str, table_id: &str, operator: &str) -> AppResult<CartView> {
        let session = self
            .mutate(store_id, table_id, |session| {
                session.items.clear();
                Ok(())
            })
            .await?;
        self.notify(&session, "clear", None, operator);
        Ok(view_of(&session))
    }

    /// Apply an ordered batch of operations in one round-trip. The whole
    /// batch lands in a single session write; one bad op fails the batch.
    pub async fn sync_operations(
        &self,
        store_id: &str,
        table_id: &str,
        ops: Vec<CartOp>,
        operator: &str,
    ) -> AppResult<CartView> {
        // Resolve every added variant before entering the CAS loop
        let mut resolved = Vec::with_capacity(ops.len());
        for op in &ops {
            if let CartOp::Add {
                variant_id,
                quantity,
                ..
            } = op
            {
                if *quantity <= 0 {
                    return Err(AppError::validation("quantity must be positive"));
                }
                let r = self.catalog.resolve_variant(variant_id).await?;
                if !r.available {
                    return Err(AppError::conflict(format!(
                        "Product {} is not available",
                        r.name
                    )));
                }
                resolved.push(r);
            }
        }

        let now = Utc::now().timestamp_millis();
        let session = self
            .mutate(store_id, table_id, |session| {
                let mut adds = resolved.iter();
                for op in &ops {
                    match op {
                        CartOp::Add {
                            quantity, attrs, ..
                        } => {
                            let r = adds
                                .next()
                                .ok_or_else(|| AppError::internal("sync op/resolve mismatch"))?;
                            let in_cart = session
                                .find_item(&r.variant_id, attrs.as_deref())
                                .map(|i| session.items[i].quantity)
                                .unwrap_or(0);
                            if r.stock < (in_cart + quantity) as i64 {
                                return Err(AppError::conflict(format!(
                                    "Insufficient stock for {}",
                                    r.name
                                )));
                            }
                            apply_add(
                                session,
                                CartItem {
                                    variant_id: r.variant_id.clone(),
                                    product_id: r.product_id.clone(),
                                    category_id: r.category_id.clone(),
                                    name: r.name.clone(),
                                    spec: r.spec.clone(),
                                    attrs: attrs.clone(),
                                    price: r.price,
                                    quantity: *quantity,
                                    added_by: operator.to_string(),
                                    added_at: now,
                                },
                            );
                        }
                        CartOp::Update {
                            variant_id,
                            quantity,
                            attrs,
                        } => {
                            let idx = session
                                .find_item(variant_id, attrs.as_deref())
                                .ok_or_else(|| AppError::not_found("item not in cart"))?;
                            if *quantity <= 0 {
                                session.items.remove(idx);
                            } else {
                                session.items[idx].quantity = *quantity;
                            }
                        }
                        CartOp::Remove { variant_id, attrs } => {
                            let idx = session
                                .find_item(variant_id, attrs.as_deref())
                                .ok_or_else(|| AppError::not_found("item not in cart"))?;
                            session.items.remove(idx);
                        }
                    }
                }
                Ok(())
            })
            .await?;

        self.notify(&session, "sync", None, operator);
        Ok(view_of(&session))
    }

    /// Drop expired sessions.
    pub fn sweep(&self) -> usize {
        self.sessions.sweep()
    }

    /// Read-modify-write through the versioned cache. On a version
    /// conflict the mutation re-runs against the fresh session.
    async fn mutate<F>(&self, store_id: &str, table_id: &str, mut f: F) -> AppResult<CartSession>
    where
        F: FnMut(&mut CartSession) -> AppResult<()>,
    {
        let key = Self::session_key(store_id, table_id);
        for _ in 0..MAX_CAS_RETRIES {
            let read = self.sessions.get(&key);
            let (mut session, version) = match read {
                Some(v) => (v.value, v.version),
                None => (CartSession::new(store_id, table_id), 0),
            };

            f(&mut session)?;
            session.updated_at = Utc::now().timestamp_millis();

            match self
                .sessions
                .compare_swap(&key, version, session.clone(), self.ttl)
            {
                Ok(_) => return Ok(session),
                Err(CasError::VersionConflict) => {
                    tracing::debug!(key, "cart write conflict, retrying");
                    tokio::task::yield_now().await;
                }
            }
        }
        Err(AppError::conflict("cart is too contended, try again"))
    }

    fn notify(&self, session: &CartSession, action: &str, item: Option<&CartItem>, operator: &str) {
        let event = LiveEvent::new(
            EventName::CartUpdated,
            json!({
                "cart": view_of(session),
                "action": action,
                "item": item,
                "operator": operator,
            }),
        );
        self.rooms
            .broadcast_to_table(&session.store_id, &session.table_id, &event);
    }
}

/// Merge into a matching item or append.
fn apply_add(session: &mut CartSession, item: CartItem) {
    match session.find_item(&item.variant_id, item.attrs.as_deref()) {
        Some(idx) => session.items[idx].quantity += item.quantity,
        None => session.items.push(item),
    }
}

fn view_of(session: &CartSession) -> CartView {
    let total: Decimal = session
        .items
        .iter()
        .map(|i| to_decimal(i.price) * Decimal::from(i.quantity))
        .sum();
    CartView {
        store_id: session.store_id.clone(),
        table_id: session.table_id.clone(),
        items: session.items.clone(),
        total_amount: to_f64(total),
        item_count: session.items.iter().map(|i| i.quantity).sum(),
    }
}
