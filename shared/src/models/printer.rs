//! Printers, category bindings and print jobs.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrinterClass {
    /// Back-of-house ticket printers; also the dispatch fallback target
    Kitchen,
    /// Front-of-house receipt printers
    Receipt,
    Label,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Printer {
    pub id: String,
    pub store_id: String,
    pub name: String,
    pub class: PrinterClass,
    /// Transport address, e.g. "192.168.1.40:9100"
    pub address: String,
    pub enabled: bool,
}

/// Category → printer routing (many-to-many).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CategoryBinding {
    pub store_id: String,
    pub category_id: String,
    pub printer_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PrintJobStatus {
    Pending,
    Printing,
    Success,
    Failed,
    /// Retry budget exhausted; waits for operator requeue
    Dead,
}

/// One durable print job per (order, printer) pair.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrintJob {
    pub id: String,
    pub order_id: String,
    pub printer_id: String,
    /// Rendered receipt content
    pub content: String,
    pub status: PrintJobStatus,
    pub retries: u32,
    pub error: Option<String>,
    pub created_at: i64,
    pub updated_at: i64,
}
