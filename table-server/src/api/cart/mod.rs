//! Cart API Module
//!
//! One shared cart per (store, table). Every mutation returns the full
//! cart view and broadcasts `cart_updated` to the table room.

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::server::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().nest("/cart/{store_id}/{table_id}", routes())
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", get(handler::get_cart).delete(handler::clear_cart))
        .route(
            "/items",
            post(handler::add_item)
                .put(handler::update_item)
                .delete(handler::remove_item),
        )
        .route("/sync", post(handler::sync_cart))
}
