//! Server assembly: config, shared state, router, lifecycle.

mod config;
mod state;

use std::net::SocketAddr;
use std::sync::Arc;

use axum::Router;
use tokio_util::sync::CancellationToken;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub use config::Config;
pub use state::ServerState;

use crate::api;
use crate::catalog::Catalog;
use crate::common::AppResult;
use crate::live;

/// Build the application router with middleware applied.
pub fn build_app(state: ServerState) -> Router {
    Router::new()
        .merge(api::router())
        .merge(live::ws::router())
        .layer(CorsLayer::permissive())
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

pub struct Server {
    config: Config,
    catalog: Arc<dyn Catalog>,
}

impl Server {
    pub fn new(config: Config, catalog: Arc<dyn Catalog>) -> Self {
        Self { config, catalog }
    }

    /// Initialize state, start background tasks and serve until ctrl-c.
    pub async fn run(&self) -> AppResult<()> {
        let state = ServerState::initialize(&self.config, self.catalog.clone())?;
        let shutdown = CancellationToken::new();
        state.start_background_tasks(shutdown.clone());

        let app = build_app(state);
        let addr = SocketAddr::from(([0, 0, 0, 0], self.config.http_port));
        let listener = tokio::net::TcpListener::bind(addr)
            .await
            .map_err(|e| crate::common::AppError::infra(format!("bind {addr}: {e}")))?;
        tracing::info!("listening on {addr}");

        let serve_shutdown = shutdown.clone();
        let result = axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                shutdown_signal().await;
                serve_shutdown.cancel();
            })
            .await;

        shutdown.cancel();
        result.map_err(|e| crate::common::AppError::internal(format!("server error: {e}")))?;
        tracing::info!("server shutdown complete");
        Ok(())
    }
}

async fn shutdown_signal() {
    if tokio::signal::ctrl_c().await.is_err() {
        tracing::error!("failed to listen for ctrl-c, shutting down");
    }
}
