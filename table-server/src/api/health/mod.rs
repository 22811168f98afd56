//! Health check route (public, no guard).

use axum::{Json, Router, routing::get};
use serde::Serialize;

use crate::common::AppResponse;
use crate::server::ServerState;

pub fn router() -> Router<ServerState> {
    Router::new().route("/health", get(health))
}

#[derive(Serialize)]
struct HealthData {
    status: &'static str,
    version: &'static str,
}

async fn health() -> Json<AppResponse<HealthData>> {
    AppResponse::success(HealthData {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
    })
}
