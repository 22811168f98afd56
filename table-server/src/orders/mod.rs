//! Order ledger.
//!
//! Creation snapshots catalog prices into immutable rows, runs the pricing
//! engine, and commits coupon, wallet and order writes in one redb
//! transaction so a mid-sequence failure cannot apply them partially.
//! Status changes go through a finite state machine; the PAID transition
//! credits points idempotently through the ledger's `(order_id, reason)`
//! key. Stock moves through the catalog seam with compensation on abort.

pub mod storage;

use std::sync::Arc;

use chrono::Utc;
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use serde::Deserialize;
use serde_json::json;
use shared::event::{EventName, LiveEvent};
use shared::models::{
    Order, OrderItem, OrderStatus, PointsEntry, PointsReason, PointsWallet,
};
use uuid::Uuid;

use crate::catalog::{Catalog, ResolvedVariant};
use crate::common::{AppError, AppResult};
use crate::live::RoomManager;
use crate::pricing::{
    self, AppliedPromotion, CouponRejection, PricedLine, compute_coupon_discount, compute_points,
    compute_promotions, to_decimal, to_f64,
};
use crate::printing::PrintDispatcher;

pub use storage::{OrderStorage, StorageError};

/// One requested line of a new order.
#[derive(Debug, Clone, Deserialize)]
pub struct NewOrderItem {
    pub variant_id: String,
    pub quantity: i32,
    pub attrs: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CreateOrderRequest {
    pub store_id: String,
    pub table_id: String,
    pub user_id: Option<String>,
    pub items: Vec<NewOrderItem>,
    pub coupon_id: Option<String>,
    /// Points the caller wants to redeem; capped by balance and by half
    /// the amount remaining after the coupon.
    pub use_points: Option<i64>,
    pub remark: Option<String>,
}

/// Order together with its line items.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OrderDetail {
    pub order: Order,
    pub items: Vec<OrderItem>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct QuoteRequest {
    pub store_id: String,
    pub table_id: String,
    pub user_id: Option<String>,
    pub items: Vec<NewOrderItem>,
    pub coupon_id: Option<String>,
    pub use_points: Option<i64>,
    /// Unlocks new-user-only promotions; asserted by the caller since
    /// account age lives outside this service.
    #[serde(default)]
    pub new_user: bool,
}

/// Advisory price breakdown for a prospective order.
#[derive(Debug, Clone, serde::Serialize)]
pub struct Quote {
    pub total_amount: f64,
    pub coupon_discount: f64,
    pub points_used: i64,
    pub points_discount: f64,
    pub promotion_discount: f64,
    pub promotions: Vec<AppliedPromotion>,
    pub pay_amount: f64,
}

pub struct OrderLedger {
    storage: OrderStorage,
    catalog: Arc<dyn Catalog>,
    rooms: Arc<RoomManager>,
    dispatcher: Arc<PrintDispatcher>,
    low_stock_threshold: i64,
}

impl OrderLedger {
    pub fn new(
        storage: OrderStorage,
        catalog: Arc<dyn Catalog>,
        rooms: Arc<RoomManager>,
        dispatcher: Arc<PrintDispatcher>,
        low_stock_threshold: i64,
    ) -> Self {
        Self {
            storage,
            catalog,
            rooms,
            dispatcher,
            low_stock_threshold,
        }
    }

    pub async fn create_order(&self, req: CreateOrderRequest) -> AppResult<OrderDetail> {
        if req.items.is_empty() {
            return Err(AppError::validation("order must contain at least one item"));
        }
        for line in &req.items {
            if line.quantity <= 0 {
                return Err(AppError::validation("item quantity must be positive"));
            }
        }
        if !self
            .catalog
            .table_in_store(&req.store_id, &req.table_id)
            .await?
        {
            return Err(AppError::not_found(format!(
                "Table {} not found in store {}",
                req.table_id, req.store_id
            )));
        }

        // Snapshot prices and validate store membership before touching
        // stock or money.
        let mut resolved = Vec::with_capacity(req.items.len());
        for line in &req.items {
            let r = self.catalog.resolve_variant(&line.variant_id).await?;
            if r.store_id != req.store_id {
                return Err(AppError::validation(format!(
                    "Product {} does not belong to store {}",
                    r.name, req.store_id
                )));
            }
            if !r.available {
                return Err(AppError::conflict(format!(
                    "Product {} is not available",
                    r.name
                )));
            }
            resolved.push(r);
        }

        let lines: Vec<PricedLine> = resolved
            .iter()
            .zip(&req.items)
            .map(|(r, line)| PricedLine {
                product_id: r.product_id.clone(),
                category_id: r.category_id.clone(),
                price: r.price,
                quantity: line.quantity,
            })
            .collect();
        let total = pricing::sum_lines(&lines);

        // Deduct stock up front; compensated if the money transaction
        // fails to commit.
        let deducted = self.deduct_all(&req.items).await?;

        let now = Utc::now().timestamp_millis();
        let order_id = Uuid::new_v4().to_string();

        let result = self
            .commit_order(&req, &resolved, total, &order_id, now)
            .await;

        let detail = match result {
            Ok(detail) => detail,
            Err(e) => {
                self.restore_all(&deducted).await;
                return Err(e);
            }
        };

        self.emit_stock_events(&req.store_id, &deducted);

        // Print failures never fail the order; jobs are parked for retry.
        if let Err(e) = self.dispatcher.dispatch(&detail.order, &detail.items).await {
            tracing::warn!(order_id = %detail.order.id, error = %e, "print dispatch failed");
        }

        self.rooms.broadcast_to_store(
            &req.store_id,
            &LiveEvent::new(
                EventName::NewOrder,
                json!({ "order": detail.order, "items": detail.items, "addition": false }),
            ),
        );

        Ok(detail)
    }

    /// The coupon/wallet/order writes, all inside one transaction.
    async fn commit_order(
        &self,
        req: &CreateOrderRequest,
        resolved: &[ResolvedVariant],
        total: Decimal,
        order_id: &str,
        now: i64,
    ) -> AppResult<OrderDetail> {
        let txn = self.storage.begin_write().map_err(AppError::from)?;

        let mut coupon_discount = Decimal::ZERO;
        if let Some(coupon_id) = &req.coupon_id {
            let user_id = req
                .user_id
                .as_deref()
                .ok_or_else(|| AppError::validation("coupon use requires a signed-in user"))?;

            let coupon = self
                .storage
                .get_coupon_txn(&txn, coupon_id)
                .map_err(AppError::from)?
                .ok_or_else(|| AppError::not_found(format!("Coupon {coupon_id} not found")))?;
            let mut claimed = self
                .storage
                .get_claimed_coupon_txn(&txn, user_id, coupon_id)
                .map_err(AppError::from)?
                .ok_or_else(|| {
                    AppError::not_found(format!("Coupon {coupon_id} not claimed by user"))
                })?;

            coupon_discount =
                compute_coupon_discount(&coupon, &claimed, &req.store_id, total, now)
                    .map_err(coupon_rejection_to_error)?;

            claimed.used = true;
            claimed.order_id = Some(order_id.to_string());
            self.storage
                .update_claimed_coupon(&txn, &claimed)
                .map_err(AppError::from)?;
        }

        let mut points_used = 0i64;
        let mut points_discount = Decimal::ZERO;
        if let Some(requested) = req.use_points.filter(|p| *p > 0) {
            let user_id = req
                .user_id
                .as_deref()
                .ok_or_else(|| AppError::validation("point use requires a signed-in user"))?;

            let mut wallet = self
                .storage
                .get_wallet_txn(&txn, &req.store_id, user_id)
                .map_err(AppError::from)?
                .unwrap_or_else(|| PointsWallet {
                    store_id: req.store_id.clone(),
                    user_id: user_id.to_string(),
                    balance: 0,
                });

            let remaining = (total - coupon_discount).max(Decimal::ZERO);
            let usage = compute_points(requested, wallet.balance, remaining);
            if usage.points_used > 0 {
                points_used = usage.points_used;
                points_discount = usage.discount;

                wallet.balance -= points_used;
                self.storage
                    .update_wallet(&txn, &wallet)
                    .map_err(AppError::from)?;
                let entry = PointsEntry {
                    order_id: order_id.to_string(),
                    reason: PointsReason::RedeemOrder,
                    change: -points_used,
                    created_at: now,
                };
                if !self
                    .storage
                    .try_insert_ledger_entry(&txn, &entry)
                    .map_err(AppError::from)?
                {
                    return Err(AppError::conflict("points already redeemed for this order"));
                }
            }
        }

        let pay = (total - coupon_discount - points_discount).max(Decimal::ZERO);

        let today: u64 = Utc::now().format("%Y%m%d").to_string().parse().unwrap_or(0);
        let order_no = self
            .storage
            .next_order_no(&txn, today)
            .map_err(AppError::from)?;

        let order = Order {
            id: order_id.to_string(),
            order_no,
            store_id: req.store_id.clone(),
            table_id: req.table_id.clone(),
            user_id: req.user_id.clone(),
            status: OrderStatus::Pending,
            total_amount: to_f64(total),
            coupon_id: req.coupon_id.clone(),
            coupon_discount: to_f64(coupon_discount),
            points_used,
            points_discount: to_f64(points_discount),
            pay_amount: to_f64(pay),
            remark: req.remark.clone(),
            parent_order_id: None,
            created_at: now,
            updated_at: now,
        };
        self.storage
            .insert_order(&txn, &order)
            .map_err(AppError::from)?;

        let mut items = Vec::with_capacity(resolved.len());
        for (r, line) in resolved.iter().zip(&req.items) {
            let item = OrderItem {
                id: Uuid::new_v4().to_string(),
                order_id: order_id.to_string(),
                variant_id: r.variant_id.clone(),
                product_id: r.product_id.clone(),
                category_id: r.category_id.clone(),
                name: r.name.clone(),
                spec: r.spec.clone(),
                attrs: line.attrs.clone(),
                price: r.price,
                quantity: line.quantity,
                refunded_quantity: 0,
                refunded_amount: 0.0,
            };
            self.storage
                .insert_order_item(&txn, &item)
                .map_err(AppError::from)?;
            items.push(item);
        }

        txn.commit().map_err(|e| AppError::infra(e.to_string()))?;
        Ok(OrderDetail { order, items })
    }

    /// Price a prospective order without touching any state.
    ///
    /// Runs the same coupon, points and promotion pipeline the checkout
    /// screen needs: the coupon is validated but not consumed, the wallet
    /// is read but not debited, and stock stays put. Promotions discount
    /// the amount remaining after coupon and points; persisted orders
    /// carry only the coupon and point discounts.
    pub async fn quote(&self, req: QuoteRequest) -> AppResult<Quote> {
        if req.items.is_empty() {
            return Err(AppError::validation("order must contain at least one item"));
        }
        for line in &req.items {
            if line.quantity <= 0 {
                return Err(AppError::validation("item quantity must be positive"));
            }
        }
        if !self
            .catalog
            .table_in_store(&req.store_id, &req.table_id)
            .await?
        {
            return Err(AppError::not_found(format!(
                "Table {} not found in store {}",
                req.table_id, req.store_id
            )));
        }

        let mut lines = Vec::with_capacity(req.items.len());
        for line in &req.items {
            let r = self.catalog.resolve_variant(&line.variant_id).await?;
            if r.store_id != req.store_id {
                return Err(AppError::validation(format!(
                    "Product {} does not belong to store {}",
                    r.name, req.store_id
                )));
            }
            if !r.available {
                return Err(AppError::conflict(format!(
                    "Product {} is not available",
                    r.name
                )));
            }
            lines.push(PricedLine {
                product_id: r.product_id,
                category_id: r.category_id,
                price: r.price,
                quantity: line.quantity,
            });
        }
        let total = pricing::sum_lines(&lines);
        let now = Utc::now().timestamp_millis();

        let mut coupon_discount = Decimal::ZERO;
        if let Some(coupon_id) = &req.coupon_id {
            let user_id = req
                .user_id
                .as_deref()
                .ok_or_else(|| AppError::validation("coupon use requires a signed-in user"))?;
            let coupon = self
                .storage
                .get_coupon(coupon_id)
                .map_err(AppError::from)?
                .ok_or_else(|| AppError::not_found(format!("Coupon {coupon_id} not found")))?;
            let claimed = self
                .storage
                .get_claimed_coupon(user_id, coupon_id)
                .map_err(AppError::from)?
                .ok_or_else(|| {
                    AppError::not_found(format!("Coupon {coupon_id} not claimed by user"))
                })?;
            coupon_discount =
                compute_coupon_discount(&coupon, &claimed, &req.store_id, total, now)
                    .map_err(coupon_rejection_to_error)?;
        }

        let mut points_used = 0i64;
        let mut points_discount = Decimal::ZERO;
        if let Some(requested) = req.use_points.filter(|p| *p > 0) {
            let user_id = req
                .user_id
                .as_deref()
                .ok_or_else(|| AppError::validation("point use requires a signed-in user"))?;
            let balance = self
                .storage
                .get_wallet(&req.store_id, user_id)
                .map_err(AppError::from)?
                .map(|w| w.balance)
                .unwrap_or(0);
            let remaining = (total - coupon_discount).max(Decimal::ZERO);
            let usage = compute_points(requested, balance, remaining);
            points_used = usage.points_used;
            points_discount = usage.discount;
        }

        let promotions = self
            .storage
            .list_promotions_for_store(&req.store_id)
            .map_err(AppError::from)?;
        let remaining = (total - coupon_discount - points_discount).max(Decimal::ZERO);
        let (promotion_discount, applied) =
            compute_promotions(&promotions, &lines, remaining, &req.store_id, req.new_user, now);

        let pay =
            (total - coupon_discount - points_discount - promotion_discount).max(Decimal::ZERO);
        Ok(Quote {
            total_amount: to_f64(total),
            coupon_discount: to_f64(coupon_discount),
            points_used,
            points_discount: to_f64(points_discount),
            promotion_discount: to_f64(promotion_discount),
            promotions: applied,
            pay_amount: to_f64(pay),
        })
    }

    pub fn get_order(&self, order_id: &str) -> AppResult<OrderDetail> {
        let order = self
            .storage
            .get_order(order_id)
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::not_found(format!("Order {order_id} not found")))?;
        let items = self
            .storage
            .get_order_items(order_id)
            .map_err(AppError::from)?;
        Ok(OrderDetail { order, items })
    }

    pub fn list_orders(&self, store_id: &str, table_id: Option<&str>) -> AppResult<Vec<Order>> {
        let orders = match table_id {
            Some(table_id) => self.storage.list_orders_for_table(store_id, table_id),
            None => self.storage.list_orders_for_store(store_id),
        };
        orders.map_err(AppError::from)
    }

    /// Drive the order state machine. The PAID transition credits
    /// `floor(pay_amount)` points exactly once per order.
    pub async fn update_status(&self, order_id: &str, to: OrderStatus) -> AppResult<Order> {
        if to == OrderStatus::Refunded {
            // Refunds carry bookkeeping; route through the refund op
            return Ok(self.refund(order_id).await?.order);
        }

        let now = Utc::now().timestamp_millis();
        let txn = self.storage.begin_write().map_err(AppError::from)?;

        let mut order = self
            .storage
            .get_order_txn(&txn, order_id)
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::not_found(format!("Order {order_id} not found")))?;

        let from = order.status;
        if !from.can_transition(to) {
            return Err(AppError::state(format!(
                "illegal transition {from:?} -> {to:?}"
            )));
        }
        order.status = to;
        order.updated_at = now;
        self.storage
            .update_order(&txn, &order)
            .map_err(AppError::from)?;

        if to == OrderStatus::Paid {
            self.credit_earned_points(&txn, &order, now)?;
        }

        let items = if to == OrderStatus::Cancelled {
            self.storage
                .get_order_items_txn(&txn, order_id)
                .map_err(AppError::from)?
        } else {
            Vec::new()
        };

        txn.commit().map_err(|e| AppError::infra(e.to_string()))?;

        // Cancellation returns the reserved stock
        for item in &items {
            if let Err(e) = self
                .catalog
                .restore_stock(&item.variant_id, item.quantity)
                .await
            {
                tracing::warn!(order_id, variant_id = %item.variant_id, error = %e,
                    "stock restore failed after cancellation");
            }
        }

        self.broadcast_status_change(&order, from, to);
        Ok(order)
    }

    /// Full refund. Legal only where the state machine allows the
    /// REFUNDED transition; returns remaining stock and redeemed points.
    pub async fn refund(&self, order_id: &str) -> AppResult<OrderDetail> {
        let now = Utc::now().timestamp_millis();
        let txn = self.storage.begin_write().map_err(AppError::from)?;

        let mut order = self
            .storage
            .get_order_txn(&txn, order_id)
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::not_found(format!("Order {order_id} not found")))?;

        let from = order.status;
        if !from.can_transition(OrderStatus::Refunded) {
            return Err(AppError::state(format!(
                "cannot refund an order in state {from:?}"
            )));
        }
        order.status = OrderStatus::Refunded;
        order.updated_at = now;
        self.storage
            .update_order(&txn, &order)
            .map_err(AppError::from)?;

        let mut items = self
            .storage
            .get_order_items_txn(&txn, order_id)
            .map_err(AppError::from)?;
        let mut restore = Vec::new();
        let mut refunded_total = Decimal::ZERO;
        for item in &mut items {
            let open_qty = item.quantity - item.refunded_quantity;
            if open_qty > 0 {
                let amount = to_decimal(item.price) * Decimal::from(open_qty);
                item.refunded_quantity = item.quantity;
                item.refunded_amount = to_f64(to_decimal(item.refunded_amount) + amount);
                refunded_total += amount;
                restore.push((item.variant_id.clone(), open_qty));
                self.storage
                    .update_order_item(&txn, item)
                    .map_err(AppError::from)?;
            }
        }

        // Redeemed points come back, once
        if order.points_used > 0 {
            if let Some(user_id) = order.user_id.as_deref() {
                let entry = PointsEntry {
                    order_id: order_id.to_string(),
                    reason: PointsReason::RefundOrder,
                    change: order.points_used,
                    created_at: now,
                };
                if self
                    .storage
                    .try_insert_ledger_entry(&txn, &entry)
                    .map_err(AppError::from)?
                {
                    let mut wallet = self
                        .storage
                        .get_wallet_txn(&txn, &order.store_id, user_id)
                        .map_err(AppError::from)?
                        .unwrap_or_else(|| PointsWallet {
                            store_id: order.store_id.clone(),
                            user_id: user_id.to_string(),
                            balance: 0,
                        });
                    wallet.balance += order.points_used;
                    self.storage
                        .update_wallet(&txn, &wallet)
                        .map_err(AppError::from)?;
                }
            }
        }

        txn.commit().map_err(|e| AppError::infra(e.to_string()))?;

        for (variant_id, qty) in &restore {
            if let Err(e) = self.catalog.restore_stock(variant_id, *qty).await {
                tracing::warn!(order_id, variant_id = %variant_id, error = %e,
                    "stock restore failed after refund");
            }
        }

        self.broadcast_status_change(&order, from, OrderStatus::Refunded);
        self.broadcast_refund(&order, None, to_f64(refunded_total));
        Ok(OrderDetail { order, items })
    }

    /// Refund part of one line. Bounded by the quantity not yet refunded;
    /// the order status does not change.
    pub async fn partial_refund(
        &self,
        order_id: &str,
        item_id: &str,
        quantity: i32,
    ) -> AppResult<OrderItem> {
        if quantity <= 0 {
            return Err(AppError::validation("refund quantity must be positive"));
        }

        let now = Utc::now().timestamp_millis();
        let txn = self.storage.begin_write().map_err(AppError::from)?;

        let mut order = self
            .storage
            .get_order_txn(&txn, order_id)
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::not_found(format!("Order {order_id} not found")))?;
        if !matches!(order.status, OrderStatus::Paid | OrderStatus::Preparing) {
            return Err(AppError::state(format!(
                "cannot refund items of an order in state {:?}",
                order.status
            )));
        }

        let mut items = self
            .storage
            .get_order_items_txn(&txn, order_id)
            .map_err(AppError::from)?;
        let item = items
            .iter_mut()
            .find(|i| i.id == item_id)
            .ok_or_else(|| AppError::not_found(format!("Item {item_id} not found")))?;

        let open_qty = item.quantity - item.refunded_quantity;
        if quantity > open_qty {
            return Err(AppError::validation(format!(
                "only {open_qty} units left to refund"
            )));
        }

        let amount = to_decimal(item.price) * Decimal::from(quantity);
        item.refunded_quantity += quantity;
        item.refunded_amount = to_f64(to_decimal(item.refunded_amount) + amount);
        self.storage
            .update_order_item(&txn, item)
            .map_err(AppError::from)?;

        order.updated_at = now;
        self.storage
            .update_order(&txn, &order)
            .map_err(AppError::from)?;

        let result = item.clone();
        txn.commit().map_err(|e| AppError::infra(e.to_string()))?;

        if let Err(e) = self.catalog.restore_stock(&result.variant_id, quantity).await {
            tracing::warn!(order_id, variant_id = %result.variant_id, error = %e,
                "stock restore failed after partial refund");
        }

        self.broadcast_refund(&order, Some(&result), to_f64(amount));
        Ok(result)
    }

    /// Add-on order billed against a parent. Creates a new PAID order
    /// with `parent_order_id` set; no coupon or points apply.
    pub async fn add_items(
        &self,
        parent_order_id: &str,
        new_items: Vec<NewOrderItem>,
    ) -> AppResult<OrderDetail> {
        if new_items.is_empty() {
            return Err(AppError::validation("add-on must contain at least one item"));
        }
        for line in &new_items {
            if line.quantity <= 0 {
                return Err(AppError::validation("item quantity must be positive"));
            }
        }

        let parent = self
            .storage
            .get_order(parent_order_id)
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::not_found(format!("Order {parent_order_id} not found")))?;
        if !matches!(parent.status, OrderStatus::Paid | OrderStatus::Preparing) {
            return Err(AppError::state(format!(
                "cannot add items to an order in state {:?}",
                parent.status
            )));
        }

        let mut resolved = Vec::with_capacity(new_items.len());
        for line in &new_items {
            let r = self.catalog.resolve_variant(&line.variant_id).await?;
            if r.store_id != parent.store_id {
                return Err(AppError::validation(format!(
                    "Product {} does not belong to store {}",
                    r.name, parent.store_id
                )));
            }
            if !r.available {
                return Err(AppError::conflict(format!(
                    "Product {} is not available",
                    r.name
                )));
            }
            resolved.push(r);
        }

        let total: Decimal = resolved
            .iter()
            .zip(&new_items)
            .map(|(r, line)| to_decimal(r.price) * Decimal::from(line.quantity))
            .sum();
        let total = pricing::round_money(total);

        let deducted = self.deduct_all(&new_items).await?;

        let now = Utc::now().timestamp_millis();
        let order_id = Uuid::new_v4().to_string();

        let commit = || -> AppResult<OrderDetail> {
            let txn = self.storage.begin_write().map_err(AppError::from)?;
            let today: u64 = Utc::now().format("%Y%m%d").to_string().parse().unwrap_or(0);
            let order_no = self
                .storage
                .next_order_no(&txn, today)
                .map_err(AppError::from)?;

            let order = Order {
                id: order_id.clone(),
                order_no,
                store_id: parent.store_id.clone(),
                table_id: parent.table_id.clone(),
                user_id: parent.user_id.clone(),
                status: OrderStatus::Paid,
                total_amount: to_f64(total),
                coupon_id: None,
                coupon_discount: 0.0,
                points_used: 0,
                points_discount: 0.0,
                pay_amount: to_f64(total),
                remark: None,
                parent_order_id: Some(parent_order_id.to_string()),
                created_at: now,
                updated_at: now,
            };
            self.storage
                .insert_order(&txn, &order)
                .map_err(AppError::from)?;

            let mut items = Vec::with_capacity(resolved.len());
            for (r, line) in resolved.iter().zip(&new_items) {
                let item = OrderItem {
                    id: Uuid::new_v4().to_string(),
                    order_id: order_id.clone(),
                    variant_id: r.variant_id.clone(),
                    product_id: r.product_id.clone(),
                    category_id: r.category_id.clone(),
                    name: r.name.clone(),
                    spec: r.spec.clone(),
                    attrs: line.attrs.clone(),
                    price: r.price,
                    quantity: line.quantity,
                    refunded_quantity: 0,
                    refunded_amount: 0.0,
                };
                self.storage
                    .insert_order_item(&txn, &item)
                    .map_err(AppError::from)?;
                items.push(item);
            }

            txn.commit().map_err(|e| AppError::infra(e.to_string()))?;
            Ok(OrderDetail { order, items })
        };

        let detail = match commit() {
            Ok(detail) => detail,
            Err(e) => {
                self.restore_all(&deducted).await;
                return Err(e);
            }
        };

        self.emit_stock_events(&parent.store_id, &deducted);

        if let Err(e) = self.dispatcher.dispatch(&detail.order, &detail.items).await {
            tracing::warn!(order_id = %detail.order.id, error = %e, "print dispatch failed");
        }

        self.rooms.broadcast_to_store(
            &parent.store_id,
            &LiveEvent::new(
                EventName::NewOrder,
                json!({
                    "order": detail.order,
                    "items": detail.items,
                    "addition": true,
                    "parent_order_id": parent_order_id,
                }),
            ),
        );

        Ok(detail)
    }

    pub fn points_balance(&self, store_id: &str, user_id: &str) -> AppResult<i64> {
        Ok(self
            .storage
            .get_wallet(store_id, user_id)
            .map_err(AppError::from)?
            .map(|w| w.balance)
            .unwrap_or(0))
    }

    fn credit_earned_points(
        &self,
        txn: &redb::WriteTransaction,
        order: &Order,
        now: i64,
    ) -> AppResult<()> {
        let Some(user_id) = order.user_id.as_deref() else {
            return Ok(());
        };
        let earned = to_decimal(order.pay_amount)
            .floor()
            .to_i64()
            .unwrap_or(0);
        if earned <= 0 {
            return Ok(());
        }

        let entry = PointsEntry {
            order_id: order.id.clone(),
            reason: PointsReason::EarnOrder,
            change: earned,
            created_at: now,
        };
        // Duplicate delivery of the PAID transition: the ledger key
        // already exists, skip the credit.
        if !self
            .storage
            .try_insert_ledger_entry(txn, &entry)
            .map_err(AppError::from)?
        {
            return Ok(());
        }

        let mut wallet = self
            .storage
            .get_wallet_txn(txn, &order.store_id, user_id)
            .map_err(AppError::from)?
            .unwrap_or_else(|| PointsWallet {
                store_id: order.store_id.clone(),
                user_id: user_id.to_string(),
                balance: 0,
            });
        wallet.balance += earned;
        self.storage
            .update_wallet(txn, &wallet)
            .map_err(AppError::from)
    }

    async fn deduct_all(&self, items: &[NewOrderItem]) -> AppResult<Vec<(String, i32, i64)>> {
        let mut deducted: Vec<(String, i32, i64)> = Vec::with_capacity(items.len());
        for line in items {
            match self
                .catalog
                .deduct_stock(&line.variant_id, line.quantity)
                .await
            {
                Ok(remaining) => deducted.push((line.variant_id.clone(), line.quantity, remaining)),
                Err(e) => {
                    // Roll back the lines already taken
                    self.restore_all(&deducted).await;
                    return Err(e);
                }
            }
        }
        Ok(deducted)
    }

    async fn restore_all(&self, deducted: &[(String, i32, i64)]) {
        for (variant_id, qty, _) in deducted {
            if let Err(e) = self.catalog.restore_stock(variant_id, *qty).await {
                tracing::error!(variant_id = %variant_id, error = %e,
                    "stock compensation failed, manual correction needed");
            }
        }
    }

    fn emit_stock_events(&self, store_id: &str, deducted: &[(String, i32, i64)]) {
        for (variant_id, _, remaining) in deducted {
            if *remaining == 0 {
                self.rooms.broadcast_to_store(
                    store_id,
                    &LiveEvent::new(EventName::StockOut, json!({ "variant_id": variant_id })),
                );
            } else if *remaining <= self.low_stock_threshold {
                self.rooms.broadcast_to_store(
                    store_id,
                    &LiveEvent::new(
                        EventName::StockLow,
                        json!({ "variant_id": variant_id, "remaining": remaining }),
                    ),
                );
            }
        }
    }

    fn broadcast_status_change(&self, order: &Order, from: OrderStatus, to: OrderStatus) {
        let event = LiveEvent::new(
            EventName::OrderStatusChanged,
            json!({ "order_id": order.id, "from": from, "to": to }),
        );
        self.rooms.broadcast_to_store(&order.store_id, &event);
        self.rooms
            .broadcast_to_table(&order.store_id, &order.table_id, &event);
    }

    fn broadcast_refund(&self, order: &Order, item: Option<&OrderItem>, amount: f64) {
        let event = LiveEvent::new(
            EventName::OrderRefunded,
            json!({
                "order_id": order.id,
                "item_id": item.map(|i| i.id.clone()),
                "amount": amount,
            }),
        );
        self.rooms.broadcast_to_store(&order.store_id, &event);
        self.rooms
            .broadcast_to_table(&order.store_id, &order.table_id, &event);
    }
}

fn coupon_rejection_to_error(r: CouponRejection) -> AppError {
    match r {
        CouponRejection::BelowMinimum => {
            AppError::validation("order amount below coupon minimum")
        }
        CouponRejection::NotActive
        | CouponRejection::OutsideWindow
        | CouponRejection::StoreMismatch
        | CouponRejection::AlreadyUsed => AppError::conflict(r.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::catalog::InMemoryCatalog;
    use crate::catalog::testing::catalog_with;
    use crate::printing::queue::PrintQueue;
    use crate::printing::storage::PrintStorage;
    use shared::models::{ClaimedCoupon, Coupon, CouponStatus, CouponType};

    fn ledger_with(catalog: InMemoryCatalog) -> OrderLedger {
        let pstore = PrintStorage::open_in_memory().unwrap();
        let queue = Arc::new(PrintQueue::new(pstore.clone()));
        let dispatcher = Arc::new(PrintDispatcher::new(pstore, queue));
        OrderLedger::new(
            OrderStorage::open_in_memory().unwrap(),
            Arc::new(catalog),
            Arc::new(RoomManager::new()),
            dispatcher,
            5,
        )
    }

    fn basic_request(items: Vec<NewOrderItem>) -> CreateOrderRequest {
        CreateOrderRequest {
            store_id: "s1".to_string(),
            table_id: "t1".to_string(),
            user_id: Some("u1".to_string()),
            items,
            coupon_id: None,
            use_points: None,
            remark: None,
        }
    }

    fn line(variant: &str, qty: i32) -> NewOrderItem {
        NewOrderItem {
            variant_id: variant.to_string(),
            quantity: qty,
            attrs: None,
        }
    }

    fn seed_coupon(ledger: &OrderLedger, value: f64, min_amount: f64) {
        ledger
            .storage
            .put_coupon(&Coupon {
                id: "cp1".to_string(),
                store_id: "s1".to_string(),
                name: "Welcome".to_string(),
                coupon_type: CouponType::Fixed,
                value,
                rate: 0.0,
                min_amount,
                max_discount: None,
                status: CouponStatus::Active,
                start_time: 0,
                end_time: i64::MAX,
                total_count: None,
                claimed_count: 1,
                per_user_limit: 1,
            })
            .unwrap();
        ledger
            .storage
            .put_claimed_coupon(&ClaimedCoupon {
                id: "cl1".to_string(),
                coupon_id: "cp1".to_string(),
                user_id: "u1".to_string(),
                used: false,
                order_id: None,
                claimed_at: 0,
            })
            .unwrap();
    }

    #[tokio::test]
    async fn test_create_order_rejects_foreign_table() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 10)]));
        let mut req = basic_request(vec![line("v1", 1)]);
        req.table_id = "t99".to_string();

        let err = ledger.create_order(req).await.unwrap_err();
        assert!(matches!(err, AppError::NotFound(_)));

        // Nothing was deducted for the rejected order
        assert!(ledger.catalog.check_stock("v1", 10).await.unwrap());
    }

    #[tokio::test]
    async fn test_create_order_snapshots_and_prices() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 10), ("v2", "c1", 20.0, 10)]));
        let detail = ledger
            .create_order(basic_request(vec![line("v1", 2), line("v2", 1)]))
            .await
            .unwrap();

        assert_eq!(detail.order.total_amount, 56.0);
        assert_eq!(detail.order.pay_amount, 56.0);
        assert_eq!(detail.order.status, OrderStatus::Pending);
        assert_eq!(detail.items.len(), 2);
        assert_eq!(detail.items[0].name, "Product v1");

        // Stock was deducted
        assert!(!ledger.catalog.check_stock("v1", 9).await.unwrap());
        assert!(ledger.catalog.check_stock("v1", 8).await.unwrap());
    }

    #[tokio::test]
    async fn test_scenario_a_coupon_and_points() {
        // Subtotal 56, FIXED coupon 10 (min 30), 3000 points requested
        // against balance 3000: cap = floor(46 * 50) = 2300 -> pay 23.
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 10), ("v2", "c1", 20.0, 10)]));
        seed_coupon(&ledger, 10.0, 30.0);
        ledger
            .storage
            .put_wallet(&PointsWallet {
                store_id: "s1".to_string(),
                user_id: "u1".to_string(),
                balance: 3000,
            })
            .unwrap();

        let mut req = basic_request(vec![line("v1", 2), line("v2", 1)]);
        req.coupon_id = Some("cp1".to_string());
        req.use_points = Some(3000);
        let detail = ledger.create_order(req).await.unwrap();

        assert_eq!(detail.order.coupon_discount, 10.0);
        assert_eq!(detail.order.points_used, 2300);
        assert_eq!(detail.order.points_discount, 23.0);
        assert_eq!(detail.order.pay_amount, 23.0);

        // Wallet debited, coupon consumed
        assert_eq!(ledger.points_balance("s1", "u1").unwrap(), 700);
        let mut req2 = basic_request(vec![line("v1", 1)]);
        req2.coupon_id = Some("cp1".to_string());
        let err = ledger.create_order(req2).await.unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_quote_layers_promotion_after_coupon_and_points() {
        use shared::models::{Promotion, PromotionKind, PromotionTier};

        // Subtotal 56, coupon 10, points capped at 2300 (=23.00); the
        // FullReduce tier then fires on the remaining 23.
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 10), ("v2", "c1", 20.0, 10)]));
        seed_coupon(&ledger, 10.0, 30.0);
        ledger
            .storage
            .put_wallet(&PointsWallet {
                store_id: "s1".to_string(),
                user_id: "u1".to_string(),
                balance: 3000,
            })
            .unwrap();
        ledger
            .storage
            .put_promotion(&Promotion {
                id: "pr1".to_string(),
                store_id: "s1".to_string(),
                name: "Spend & Save".to_string(),
                kind: PromotionKind::FullReduce,
                priority: 0,
                stackable: false,
                new_user_only: false,
                active: true,
                start_time: 0,
                end_time: i64::MAX,
                tiers: vec![PromotionTier { minimum: 20.0, value: 5.0 }],
                discount_rate: None,
                max_discount: None,
                second_item_rate: None,
                max_discounted_items: None,
                product_ids: vec![],
                category_ids: vec![],
                buy_quantity: None,
                get_quantity: None,
                max_sets: None,
            })
            .unwrap();

        let quote = ledger
            .quote(QuoteRequest {
                store_id: "s1".to_string(),
                table_id: "t1".to_string(),
                user_id: Some("u1".to_string()),
                items: vec![line("v1", 2), line("v2", 1)],
                coupon_id: Some("cp1".to_string()),
                use_points: Some(3000),
                new_user: false,
            })
            .await
            .unwrap();

        assert_eq!(quote.total_amount, 56.0);
        assert_eq!(quote.coupon_discount, 10.0);
        assert_eq!(quote.points_used, 2300);
        assert_eq!(quote.points_discount, 23.0);
        assert_eq!(quote.promotion_discount, 5.0);
        assert_eq!(quote.promotions[0].promotion_id, "pr1");
        assert_eq!(quote.pay_amount, 18.0);
    }

    #[tokio::test]
    async fn test_quote_leaves_coupon_wallet_and_stock_untouched() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 10)]));
        seed_coupon(&ledger, 5.0, 10.0);
        ledger
            .storage
            .put_wallet(&PointsWallet {
                store_id: "s1".to_string(),
                user_id: "u1".to_string(),
                balance: 500,
            })
            .unwrap();

        ledger
            .quote(QuoteRequest {
                store_id: "s1".to_string(),
                table_id: "t1".to_string(),
                user_id: Some("u1".to_string()),
                items: vec![line("v1", 1)],
                coupon_id: Some("cp1".to_string()),
                use_points: Some(500),
                new_user: false,
            })
            .await
            .unwrap();

        // Nothing moved: full stock, full balance, coupon still usable
        assert!(ledger.catalog.check_stock("v1", 10).await.unwrap());
        assert_eq!(ledger.points_balance("s1", "u1").unwrap(), 500);
        let mut req = basic_request(vec![line("v1", 1)]);
        req.coupon_id = Some("cp1".to_string());
        let detail = ledger.create_order(req).await.unwrap();
        assert_eq!(detail.order.coupon_discount, 5.0);
    }

    #[tokio::test]
    async fn test_failed_coupon_restores_stock() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 5)]));
        seed_coupon(&ledger, 10.0, 100.0); // Minimum not met

        let mut req = basic_request(vec![line("v1", 2)]);
        req.coupon_id = Some("cp1".to_string());
        let err = ledger.create_order(req).await.unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        // Compensation put the stock back
        assert!(ledger.catalog.check_stock("v1", 5).await.unwrap());
        // And the coupon stayed unused
        let mut req = basic_request(vec![line("v1", 2), line("v1", 4)]);
        req.coupon_id = None;
        assert!(ledger.create_order(req).await.is_err()); // 6 > 5 stock
    }

    #[tokio::test]
    async fn test_insufficient_stock_is_conflict() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 1)]));
        let err = ledger
            .create_order(basic_request(vec![line("v1", 2)]))
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Conflict(_)));
    }

    #[tokio::test]
    async fn test_paid_transition_credits_points_once() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.5, 10)]));
        let detail = ledger
            .create_order(basic_request(vec![line("v1", 1)]))
            .await
            .unwrap();

        let order = ledger
            .update_status(&detail.order.id, OrderStatus::Paid)
            .await
            .unwrap();
        assert_eq!(order.status, OrderStatus::Paid);
        // floor(18.5) = 18 points
        assert_eq!(ledger.points_balance("s1", "u1").unwrap(), 18);

        // Replayed PAID is an illegal transition, balance untouched
        let err = ledger
            .update_status(&detail.order.id, OrderStatus::Paid)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::State(_)));
        assert_eq!(ledger.points_balance("s1", "u1").unwrap(), 18);
    }

    #[tokio::test]
    async fn test_cancel_restores_stock() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 5)]));
        let detail = ledger
            .create_order(basic_request(vec![line("v1", 3)]))
            .await
            .unwrap();
        assert!(!ledger.catalog.check_stock("v1", 3).await.unwrap());

        ledger
            .update_status(&detail.order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert!(ledger.catalog.check_stock("v1", 5).await.unwrap());
    }

    #[tokio::test]
    async fn test_refund_returns_points_and_stock() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 50.0, 5)]));
        ledger
            .storage
            .put_wallet(&PointsWallet {
                store_id: "s1".to_string(),
                user_id: "u1".to_string(),
                balance: 1000,
            })
            .unwrap();

        let mut req = basic_request(vec![line("v1", 1)]);
        req.use_points = Some(1000);
        let detail = ledger.create_order(req).await.unwrap();
        assert_eq!(detail.order.points_used, 1000);
        assert_eq!(ledger.points_balance("s1", "u1").unwrap(), 0);

        ledger
            .update_status(&detail.order.id, OrderStatus::Paid)
            .await
            .unwrap();
        let earned = ledger.points_balance("s1", "u1").unwrap();

        let refunded = ledger.refund(&detail.order.id).await.unwrap();
        assert_eq!(refunded.order.status, OrderStatus::Refunded);
        assert_eq!(refunded.items[0].refunded_quantity, 1);
        // Redeemed points came back on top of the earn credit
        assert_eq!(ledger.points_balance("s1", "u1").unwrap(), earned + 1000);
        assert!(ledger.catalog.check_stock("v1", 5).await.unwrap());

        // Refunding again is illegal
        let err = ledger.refund(&detail.order.id).await.unwrap_err();
        assert!(matches!(err, AppError::State(_)));
    }

    #[tokio::test]
    async fn test_refund_illegal_from_pending_and_cancelled() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 10)]));
        let detail = ledger
            .create_order(basic_request(vec![line("v1", 1)]))
            .await
            .unwrap();

        // PENDING cannot refund
        assert!(matches!(
            ledger.refund(&detail.order.id).await,
            Err(AppError::State(_))
        ));

        ledger
            .update_status(&detail.order.id, OrderStatus::Cancelled)
            .await
            .unwrap();
        assert!(matches!(
            ledger.refund(&detail.order.id).await,
            Err(AppError::State(_))
        ));
    }

    #[tokio::test]
    async fn test_partial_refund_bounded_and_accumulates() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 10.0, 10)]));
        let detail = ledger
            .create_order(basic_request(vec![line("v1", 3)]))
            .await
            .unwrap();
        ledger
            .update_status(&detail.order.id, OrderStatus::Paid)
            .await
            .unwrap();
        let item_id = detail.items[0].id.clone();

        let item = ledger
            .partial_refund(&detail.order.id, &item_id, 2)
            .await
            .unwrap();
        assert_eq!(item.refunded_quantity, 2);
        assert_eq!(item.refunded_amount, 20.0);

        // Only 1 unit left
        let err = ledger
            .partial_refund(&detail.order.id, &item_id, 2)
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::Validation(_)));

        let item = ledger
            .partial_refund(&detail.order.id, &item_id, 1)
            .await
            .unwrap();
        assert_eq!(item.refunded_quantity, 3);
        assert_eq!(item.refunded_amount, 30.0);
    }

    #[tokio::test]
    async fn test_add_items_creates_paid_child_order() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 18.0, 10), ("v2", "c1", 6.0, 10)]));
        let detail = ledger
            .create_order(basic_request(vec![line("v1", 1)]))
            .await
            .unwrap();

        // Only PAID/PREPARING accept add-ons
        assert!(matches!(
            ledger.add_items(&detail.order.id, vec![line("v2", 2)]).await,
            Err(AppError::State(_))
        ));

        ledger
            .update_status(&detail.order.id, OrderStatus::Paid)
            .await
            .unwrap();
        let addon = ledger
            .add_items(&detail.order.id, vec![line("v2", 2)])
            .await
            .unwrap();

        assert_eq!(addon.order.parent_order_id.as_deref(), Some(detail.order.id.as_str()));
        assert_eq!(addon.order.status, OrderStatus::Paid);
        assert_eq!(addon.order.pay_amount, 12.0);

        let listed = ledger.list_orders("s1", Some("t1")).unwrap();
        assert_eq!(listed.len(), 2);
    }

    #[tokio::test]
    async fn test_pay_amount_clamped_at_zero() {
        let ledger = ledger_with(catalog_with(&[("v1", "c1", 5.0, 10)]));
        seed_coupon(&ledger, 100.0, 0.0);

        let mut req = basic_request(vec![line("v1", 1)]);
        req.coupon_id = Some("cp1".to_string());
        let detail = ledger.create_order(req).await.unwrap();
        // Discount capped at the amount, pay clamps at zero
        assert_eq!(detail.order.coupon_discount, 5.0);
        assert_eq!(detail.order.pay_amount, 0.0);
    }
}
