//! Print dispatch.
//!
//! Two-step printer resolution for a new order: item categories route to
//! their bound printers; a store with no bindings at all falls back to
//! printing everything on its kitchen printers; every enabled receipt
//! printer gets the full bill. One durable job per (order, printer); the
//! job row is persisted PENDING before its queue entry is published.

use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::Utc;
use shared::models::{Order, OrderItem, PrintJob, PrintJobStatus, Printer, PrinterClass};
use uuid::Uuid;

use super::queue::PrintQueue;
use super::renderer::TicketRenderer;
use super::storage::{PrintStorage, QueueMessage};
use crate::common::{AppError, AppResult};

pub struct PrintDispatcher {
    storage: PrintStorage,
    queue: Arc<PrintQueue>,
    renderer: TicketRenderer,
}

impl PrintDispatcher {
    pub fn new(storage: PrintStorage, queue: Arc<PrintQueue>) -> Self {
        Self {
            storage,
            queue,
            renderer: TicketRenderer::new(),
        }
    }

    /// Create and enqueue the jobs for one order. A store with no
    /// printers dispatches nothing.
    pub async fn dispatch(&self, order: &Order, items: &[OrderItem]) -> AppResult<Vec<PrintJob>> {
        let printers: BTreeMap<String, Printer> = self
            .storage
            .list_printers(&order.store_id)
            .map_err(AppError::from)?
            .into_iter()
            .filter(|p| p.enabled)
            .map(|p| (p.id.clone(), p))
            .collect();
        if printers.is_empty() {
            tracing::debug!(order_id = %order.id, "no enabled printers, skipping dispatch");
            return Ok(Vec::new());
        }

        // Step 1: with bindings, items follow their category routes; a
        // store with no bindings at all prints everything on its kitchen
        // printers
        let mut per_printer: BTreeMap<String, Vec<OrderItem>> = BTreeMap::new();
        if self
            .storage
            .store_has_bindings(&order.store_id)
            .map_err(AppError::from)?
        {
            for item in items {
                let targets: Vec<String> = self
                    .storage
                    .bound_printers(&order.store_id, &item.category_id)
                    .map_err(AppError::from)?
                    .into_iter()
                    .filter(|id| printers.contains_key(id))
                    .collect();
                for id in targets {
                    per_printer.entry(id).or_default().push(item.clone());
                }
            }
        } else {
            for printer in printers.values() {
                if printer.class == PrinterClass::Kitchen {
                    per_printer.insert(printer.id.clone(), items.to_vec());
                }
            }
        }

        // Step 2: receipt printers get the whole bill, merged with any
        // category-bound lines already routed to them
        for printer in printers.values() {
            if printer.class == PrinterClass::Receipt {
                let slot = per_printer.entry(printer.id.clone()).or_default();
                for item in items {
                    if !slot.iter().any(|existing| existing.id == item.id) {
                        slot.push(item.clone());
                    }
                }
            }
        }

        let now = Utc::now().timestamp_millis();
        let mut jobs = Vec::with_capacity(per_printer.len());
        for (printer_id, job_items) in per_printer {
            let printer = &printers[&printer_id];
            let content = self.renderer.render(order, &job_items, printer.class);
            let job = PrintJob {
                id: Uuid::new_v4().to_string(),
                order_id: order.id.clone(),
                printer_id: printer_id.clone(),
                content,
                status: PrintJobStatus::Pending,
                retries: 0,
                error: None,
                created_at: now,
                updated_at: now,
            };
            self.storage.insert_job(&job).map_err(AppError::from)?;
            self.queue.publish(&QueueMessage {
                job_id: job.id.clone(),
                order_id: job.order_id.clone(),
                printer_id,
            })?;
            jobs.push(job);
        }

        tracing::debug!(order_id = %order.id, jobs = jobs.len(), "print jobs dispatched");
        Ok(jobs)
    }

    pub fn jobs_for_order(&self, order_id: &str) -> AppResult<Vec<PrintJob>> {
        self.storage
            .list_jobs_for_order(order_id)
            .map_err(AppError::from)
    }

    pub fn dead_jobs(&self) -> AppResult<Vec<PrintJob>> {
        self.storage.list_dead_jobs().map_err(AppError::from)
    }

    /// Operator action: put a DEAD job back on the queue with a fresh
    /// retry budget.
    pub fn requeue_dead(&self, job_id: &str) -> AppResult<PrintJob> {
        let mut job = self
            .storage
            .get_job(job_id)
            .map_err(AppError::from)?
            .ok_or_else(|| AppError::not_found(format!("Print job {job_id} not found")))?;
        if job.status != PrintJobStatus::Dead {
            return Err(AppError::state(format!(
                "job {job_id} is {:?}, only DEAD jobs can be requeued",
                job.status
            )));
        }

        job.status = PrintJobStatus::Pending;
        job.retries = 0;
        job.error = None;
        job.updated_at = Utc::now().timestamp_millis();
        self.storage.update_job(&job).map_err(AppError::from)?;
        self.queue.publish(&QueueMessage {
            job_id: job.id.clone(),
            order_id: job.order_id.clone(),
            printer_id: job.printer_id.clone(),
        })?;
        Ok(job)
    }
}
