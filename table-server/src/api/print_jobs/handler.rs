//! Print API Handlers

use axum::{
    Json,
    extract::{Path, State},
};

use crate::common::{AppError, AppResponse, AppResult};
use crate::server::ServerState;
use shared::models::{CategoryBinding, PrintJob, Printer};

/// Create or replace a printer
pub async fn upsert_printer(
    State(state): State<ServerState>,
    Json(printer): Json<Printer>,
) -> AppResult<Json<AppResponse<Printer>>> {
    if printer.id.is_empty() || printer.store_id.is_empty() {
        return Err(AppError::validation("printer id and store_id are required"));
    }
    if printer.address.is_empty() {
        return Err(AppError::validation("printer address is required"));
    }
    state.print_storage.put_printer(&printer)?;
    Ok(AppResponse::success(printer))
}

/// List a store's printers
pub async fn list_printers(
    State(state): State<ServerState>,
    Path(store_id): Path<String>,
) -> AppResult<Json<AppResponse<Vec<Printer>>>> {
    Ok(AppResponse::success(
        state.print_storage.list_printers(&store_id)?,
    ))
}

/// Route a category to a printer
pub async fn bind_category(
    State(state): State<ServerState>,
    Json(binding): Json<CategoryBinding>,
) -> AppResult<Json<AppResponse<CategoryBinding>>> {
    state
        .print_storage
        .get_printer(&binding.printer_id)?
        .ok_or_else(|| AppError::not_found(format!("Printer {} not found", binding.printer_id)))?;
    state.print_storage.put_binding(&binding)?;
    Ok(AppResponse::success(binding))
}

/// All print jobs of one order
pub async fn jobs_for_order(
    State(state): State<ServerState>,
    Path(order_id): Path<String>,
) -> AppResult<Json<AppResponse<Vec<PrintJob>>>> {
    Ok(AppResponse::success(state.dispatcher.jobs_for_order(&order_id)?))
}

/// Jobs that exhausted their retry budget
pub async fn dead_jobs(
    State(state): State<ServerState>,
) -> AppResult<Json<AppResponse<Vec<PrintJob>>>> {
    Ok(AppResponse::success(state.dispatcher.dead_jobs()?))
}

/// Put a DEAD job back on the queue with a fresh budget
pub async fn requeue(
    State(state): State<ServerState>,
    Path(id): Path<String>,
) -> AppResult<Json<AppResponse<PrintJob>>> {
    Ok(AppResponse::success(state.dispatcher.requeue_dead(&id)?))
}
