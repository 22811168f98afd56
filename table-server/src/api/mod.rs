//! HTTP API routes.
//!
//! | Prefix | Module | Purpose |
//! |--------|--------|---------|
//! | /health | [`health`] | Liveness check |
//! | /cart | [`cart`] | Collaborative table cart |
//! | /orders, /points | [`orders`] | Order creation and lifecycle |
//! | /printers, /print-jobs | [`print_jobs`] | Printer registry and job recovery |

pub mod cart;
pub mod health;
pub mod orders;
pub mod print_jobs;

use axum::Router;

use crate::server::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .merge(health::router())
        .merge(cart::router())
        .merge(orders::router())
        .merge(print_jobs::router())
}
