//! Order API Module
//!
//! All mutations go through [`crate::orders::OrderLedger`] behind the
//! idempotency and rate-limit guard. Money-moving endpoints fail closed
//! when the guard store is unavailable.

mod handler;

use axum::{
    Router,
    routing::{get, post, put},
};

use crate::server::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .nest("/orders", routes())
        .route(
            "/points/{store_id}/{user_id}",
            get(handler::points_balance),
        )
}

fn routes() -> Router<ServerState> {
    Router::new()
        .route("/", post(handler::create).get(handler::list))
        .route("/quote", post(handler::quote))
        .route("/{id}", get(handler::get_by_id))
        .route("/{id}/status", put(handler::update_status))
        .route("/{id}/refund", post(handler::refund))
        .route("/{id}/partial-refund", post(handler::partial_refund))
        .route("/{id}/add-items", post(handler::add_items))
}
