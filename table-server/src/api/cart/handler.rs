//! Cart API Handlers

use axum::{
    Json,
    extract::{Path, State},
};
use serde::Deserialize;
use std::time::Duration;

use crate::common::{AppResponse, AppResult};
use crate::guard::{FailMode, RateLimit};
use crate::server::ServerState;
use shared::cart::{CartOp, CartView};

/// Per-table ceiling, generous enough for a busy table of eight.
const CART_RATE: RateLimit = RateLimit::new(120, Duration::from_secs(60));

fn check_rate(state: &ServerState, store_id: &str, table_id: &str) -> AppResult<()> {
    // Availability over strictness for cart edits
    state.guard.check_rate(
        "cart",
        &format!("{store_id}:{table_id}"),
        CART_RATE,
        FailMode::Open,
    )
}

fn operator_or_guest(operator: Option<String>) -> String {
    operator.unwrap_or_else(|| "guest".to_string())
}

#[derive(Debug, Deserialize)]
pub struct AddItemRequest {
    pub variant_id: String,
    pub quantity: i32,
    pub attrs: Option<String>,
    pub operator: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct UpdateItemRequest {
    pub variant_id: String,
    pub quantity: i32,
    pub attrs: Option<String>,
    pub operator: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct RemoveItemRequest {
    pub variant_id: String,
    pub attrs: Option<String>,
    pub operator: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct ClearRequest {
    pub operator: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct SyncRequest {
    pub operations: Vec<CartOp>,
    pub operator: Option<String>,
}

/// Get the current cart view
pub async fn get_cart(
    State(state): State<ServerState>,
    Path((store_id, table_id)): Path<(String, String)>,
) -> AppResult<Json<AppResponse<CartView>>> {
    Ok(AppResponse::success(state.carts.get(&store_id, &table_id)))
}

/// Add an item (merges with an existing line of the same variant+attrs)
pub async fn add_item(
    State(state): State<ServerState>,
    Path((store_id, table_id)): Path<(String, String)>,
    Json(req): Json<AddItemRequest>,
) -> AppResult<Json<AppResponse<CartView>>> {
    check_rate(&state, &store_id, &table_id)?;
    let view = state
        .carts
        .add_item(
            &store_id,
            &table_id,
            &req.variant_id,
            req.quantity,
            req.attrs,
            &operator_or_guest(req.operator),
        )
        .await?;
    Ok(AppResponse::success(view))
}

/// Set an item's quantity; zero removes the line
pub async fn update_item(
    State(state): State<ServerState>,
    Path((store_id, table_id)): Path<(String, String)>,
    Json(req): Json<UpdateItemRequest>,
) -> AppResult<Json<AppResponse<CartView>>> {
    check_rate(&state, &store_id, &table_id)?;
    let view = state
        .carts
        .update_item(
            &store_id,
            &table_id,
            &req.variant_id,
            req.quantity,
            req.attrs,
            &operator_or_guest(req.operator),
        )
        .await?;
    Ok(AppResponse::success(view))
}

/// Remove one line from the cart
pub async fn remove_item(
    State(state): State<ServerState>,
    Path((store_id, table_id)): Path<(String, String)>,
    Json(req): Json<RemoveItemRequest>,
) -> AppResult<Json<AppResponse<CartView>>> {
    check_rate(&state, &store_id, &table_id)?;
    let view = state
        .carts
        .remove_item(
            &store_id,
            &table_id,
            &req.variant_id,
            req.attrs,
            &operator_or_guest(req.operator),
        )
        .await?;
    Ok(AppResponse::success(view))
}

/// Empty the cart
pub async fn clear_cart(
    State(state): State<ServerState>,
    Path((store_id, table_id)): Path<(String, String)>,
    Json(req): Json<ClearRequest>,
) -> AppResult<Json<AppResponse<CartView>>> {
    check_rate(&state, &store_id, &table_id)?;
    let view = state
        .carts
        .clear(&store_id, &table_id, &operator_or_guest(req.operator))
        .await?;
    Ok(AppResponse::success(view))
}

/// Apply a batch of operations as one cart write (offline catch-up)
pub async fn sync_cart(
    State(state): State<ServerState>,
    Path((store_id, table_id)): Path<(String, String)>,
    Json(req): Json<SyncRequest>,
) -> AppResult<Json<AppResponse<CartView>>> {
    check_rate(&state, &store_id, &table_id)?;
    let view = state
        .carts
        .sync_operations(
            &store_id,
            &table_id,
            req.operations,
            &operator_or_guest(req.operator),
        )
        .await?;
    Ok(AppResponse::success(view))
}
