//! Realtime events pushed to store and table rooms.
//!
//! Wire shape is `{event, data, timestamp}`; delivery is best-effort, so
//! clients reconcile through the pull APIs after a reconnect.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EventName {
    NewOrder,
    OrderStatusChanged,
    OrderRefunded,
    CartUpdated,
    PrintJobCompleted,
    PrintJobFailed,
    StockLow,
    StockOut,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LiveEvent {
    pub event: EventName,
    pub data: serde_json::Value,
    /// Unix millis at emit time
    pub timestamp: i64,
}

impl LiveEvent {
    pub fn new(event: EventName, data: impl Serialize) -> Self {
        Self {
            event,
            data: serde_json::to_value(data).unwrap_or(serde_json::Value::Null),
            timestamp: chrono::Utc::now().timestamp_millis(),
        }
    }
}
