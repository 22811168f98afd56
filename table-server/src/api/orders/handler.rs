//! Order API Handlers

use axum::{
    Json,
    extract::{Path, Query, State},
    http::HeaderMap,
};
use serde::Deserialize;
use std::time::Duration;

use crate::common::{AppError, AppResponse, AppResult};
use crate::guard::{FailMode, RateLimit};
use crate::orders::{CreateOrderRequest, NewOrderItem, OrderDetail, Quote, QuoteRequest};
use crate::server::ServerState;
use shared::models::{Order, OrderItem, OrderStatus};

/// Caller-supplied key for duplicate suppression on mutations.
const IDEMPOTENCY_HEADER: &str = "idempotency-key";

/// Refunds are rare by nature; a tight window catches replay storms.
const REFUND_RATE: RateLimit = RateLimit::new(5, Duration::from_secs(60));

fn idempotency_key(headers: &HeaderMap) -> Option<&str> {
    headers
        .get(IDEMPOTENCY_HEADER)
        .and_then(|v| v.to_str().ok())
}

/// Create an order from explicit line items
pub async fn create(
    State(state): State<ServerState>,
    headers: HeaderMap,
    Json(req): Json<CreateOrderRequest>,
) -> AppResult<Json<AppResponse<OrderDetail>>> {
    let actor = req
        .user_id
        .clone()
        .unwrap_or_else(|| format!("{}:{}", req.store_id, req.table_id));
    state
        .guard
        .check_rate("order_create", &actor, state.order_rate, FailMode::Open)?;

    // Money moves here, so an unavailable marker store rejects the call
    let ticket = state
        .guard
        .begin("order_create", idempotency_key(&headers), FailMode::Closed)?;
    match state.ledger.create_order(req).await {
        Ok(detail) => {
            ticket.commit();
            Ok(AppResponse::success(detail))
        }
        Err(e) => {
            // A failed attempt must stay retryable under the same key
            ticket.release();
            Err(e)
        }
    }
}

/// Price a prospective order, promotions included, without creating it
pub async fn quote(
    State(state): State<ServerState>,
    Json(req): Json<QuoteRequest>,
) -> AppResult<Json<AppResponse<Quote>>> {
    let actor = req
        .user_id
        .clone()
        .unwrap_or_else(|| format!("{}:{}", req.store_id, req.table_id));
    state
        .guard
        .check_rate("order_quote", &actor, state.order_rate, FailMode::Open)?;
    Ok(AppResponse::success(state.ledger.quote(req).await?))
}

#[derive(Debug, Deserialize)]
pub struct ListQuery {
    pub store_id: String,
    pub table_id: Option<String>,
}

/// List orders for a store, optionally narrowed to one table
pub async fn list(
    State(state): State<ServerState>,
    Query(query): Query<ListQuery>,
) -> AppResult<Json<AppResponse<Vec<Order>>>> {
    let orders = state
        .ledger
        .list_orders(&query.store_id, query.table_id.as_deref())?;
    Ok(AppResponse::success(orders))
}

/// Get one order with its items
pub async fn get_by_id(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<OrderDetail>>> {
    Ok(AppResponse::success(state.ledger.get_order(&id)?))
}

#[derive(Debug, Deserialize)]
pub struct UpdateStatusRequest {
    pub status: OrderStatus,
}

/// Drive the order state machine one step
pub async fn update_status(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<UpdateStatusRequest>,
) -> AppResult<Json<AppResponse<Order>>> {
    let ticket = state
        .guard
        .begin("order_status", idempotency_key(&headers), FailMode::Closed)?;
    match state.ledger.update_status(&id, req.status).await {
        Ok(order) => {
            ticket.commit();
            Ok(AppResponse::success(order))
        }
        Err(e) => {
            ticket.release();
            Err(e)
        }
    }
}

/// Refund a whole order, returning points and stock
pub async fn refund(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
) -> AppResult<Json<AppResponse<OrderDetail>>> {
    state
        .guard
        .check_rate("order_refund", &id, REFUND_RATE, FailMode::Closed)?;
    let ticket = state
        .guard
        .begin("order_refund", idempotency_key(&headers), FailMode::Closed)?;
    match state.ledger.refund(&id).await {
        Ok(detail) => {
            ticket.commit();
            Ok(AppResponse::success(detail))
        }
        Err(e) => {
            ticket.release();
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct PartialRefundRequest {
    pub item_id: String,
    pub quantity: i32,
}

/// Refund part of one line item
pub async fn partial_refund(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<PartialRefundRequest>,
) -> AppResult<Json<AppResponse<OrderItem>>> {
    state
        .guard
        .check_rate("order_refund", &id, REFUND_RATE, FailMode::Closed)?;
    let ticket = state.guard.begin(
        "order_partial_refund",
        idempotency_key(&headers),
        FailMode::Closed,
    )?;
    match state
        .ledger
        .partial_refund(&id, &req.item_id, req.quantity)
        .await
    {
        Ok(item) => {
            ticket.commit();
            Ok(AppResponse::success(item))
        }
        Err(e) => {
            ticket.release();
            Err(e)
        }
    }
}

#[derive(Debug, Deserialize)]
pub struct AddItemsRequest {
    pub items: Vec<NewOrderItem>,
}

/// Add-on order billed against a parent order
pub async fn add_items(
    State(state): State<ServerState>,
    Path(id): Path<String>,
    headers: HeaderMap,
    Json(req): Json<AddItemsRequest>,
) -> AppResult<Json<AppResponse<OrderDetail>>> {
    state
        .guard
        .check_rate("order_create", &id, state.order_rate, FailMode::Open)?;
    let ticket = state.guard.begin(
        "order_add_items",
        idempotency_key(&headers),
        FailMode::Closed,
    )?;
    match state.ledger.add_items(&id, req.items).await {
        Ok(detail) => {
            ticket.commit();
            Ok(AppResponse::success(detail))
        }
        Err(e) => {
            ticket.release();
            Err(e)
        }
    }
}

#[derive(serde::Serialize)]
pub struct PointsBalance {
    pub balance: i64,
}

/// Current points balance of a member in a store
pub async fn points_balance(
    State(state): State<ServerState>,
    Path((store_id, user_id)): Path<(String, String)>,
) -> AppResult<Json<AppResponse<PointsBalance>>> {
    if user_id.is_empty() {
        return Err(AppError::validation("user_id must not be empty"));
    }
    let balance = state.ledger.points_balance(&store_id, &user_id)?;
    Ok(AppResponse::success(PointsBalance { balance }))
}
