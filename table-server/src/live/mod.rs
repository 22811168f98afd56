//! Realtime broadcast hub.
//!
//! Rooms are volatile sets of connection handles scoped to a store or a
//! (store, table) pair. Delivery is best-effort/at-most-once: a failed or
//! lagging connection is logged and dropped from the room, never retried;
//! clients reconcile through the pull APIs after a reconnect.

pub mod ws;

use dashmap::DashMap;
use shared::event::LiveEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::mpsc;

/// Room address: per-store or per-(store, table).
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum Room {
    Store(String),
    Table(String, String),
}

impl Room {
    pub fn store(store_id: impl Into<String>) -> Self {
        Room::Store(store_id.into())
    }

    pub fn table(store_id: impl Into<String>, table_id: impl Into<String>) -> Self {
        Room::Table(store_id.into(), table_id.into())
    }
}

pub type ConnId = u64;

/// Injected room registry with an explicit register/unregister/broadcast
/// lifecycle. Single-instance scope; a fan-out backplane would replace
/// this type behind the same methods.
pub struct RoomManager {
    rooms: DashMap<Room, HashMap<ConnId, mpsc::UnboundedSender<String>>>,
    next_conn_id: AtomicU64,
}

impl RoomManager {
    pub fn new() -> Self {
        Self {
            rooms: DashMap::new(),
            next_conn_id: AtomicU64::new(1),
        }
    }

    /// Add a connection to a room; returns its id and the outbound frame
    /// stream the socket task drains.
    pub fn register(&self, room: Room) -> (ConnId, mpsc::UnboundedReceiver<String>) {
        let conn_id = self.next_conn_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        self.rooms.entry(room).or_default().insert(conn_id, tx);
        (conn_id, rx)
    }

    /// Remove a connection; empty rooms are dropped.
    pub fn unregister(&self, room: &Room, conn_id: ConnId) {
        if let Some(mut members) = self.rooms.get_mut(room) {
            members.remove(&conn_id);
            let empty = members.is_empty();
            drop(members);
            if empty {
                self.rooms.remove_if(room, |_, m| m.is_empty());
            }
        }
    }

    /// Fan an event out to every member of one room. Per-connection send
    /// failures are logged and the member dropped; the fan-out continues.
    fn broadcast(&self, room: &Room, event: &LiveEvent) {
        let Some(mut members) = self.rooms.get_mut(room) else {
            return;
        };
        let frame = match serde_json::to_string(event) {
            Ok(f) => f,
            Err(e) => {
                tracing::error!(error = %e, "Failed to serialize live event");
                return;
            }
        };

        let mut dead = Vec::new();
        for (conn_id, tx) in members.iter() {
            if let Err(e) = tx.send(frame.clone()) {
                tracing::warn!(conn_id = *conn_id, error = %e, "Dropping dead room member");
                dead.push(*conn_id);
            }
        }
        for conn_id in dead {
            members.remove(&conn_id);
        }
    }

    pub fn broadcast_to_store(&self, store_id: &str, event: &LiveEvent) {
        self.broadcast(&Room::store(store_id), event);
    }

    pub fn broadcast_to_table(&self, store_id: &str, table_id: &str, event: &LiveEvent) {
        self.broadcast(&Room::table(store_id, table_id), event);
    }

    pub fn member_count(&self, room: &Room) -> usize {
        self.rooms.get(room).map(|m| m.len()).unwrap_or(0)
    }
}

impl Default for RoomManager {
    fn default() -> Self {
        Self::new()
    }
}
