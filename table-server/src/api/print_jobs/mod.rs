//! Print API Module
//!
//! Printer registry, category bindings and print job recovery. Jobs are
//! created by order dispatch, never directly through this API; the only
//! job mutation offered here is requeueing a DEAD job.

mod handler;

use axum::{
    Router,
    routing::{get, post},
};

use crate::server::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new()
        .route("/printers", post(handler::upsert_printer))
        .route("/printers/{store_id}", get(handler::list_printers))
        .route("/printers/bindings", post(handler::bind_category))
        .route("/print-jobs/order/{order_id}", get(handler::jobs_for_order))
        .route("/print-jobs/dead", get(handler::dead_jobs))
        .route("/print-jobs/{id}/requeue", post(handler::requeue))
}
