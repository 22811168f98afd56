//! Table-ordering fulfillment server.
//!
//! Core pipeline: collaborative per-table cart → pricing engine → atomic
//! order creation → printer fan-out → durable retrying print queue →
//! realtime broadcast to store/table rooms.
//!
//! # Module structure
//!
//! ```text
//! table-server/src/
//! ├── server/        # Config, state, router assembly
//! ├── api/           # HTTP routes and handlers
//! ├── cache/         # Versioned TTL cache (CAS, fixed-window counters)
//! ├── cart/          # Collaborative cart store
//! ├── pricing/       # Coupon / points / promotion calculations
//! ├── orders/        # Order ledger + redb storage
//! ├── guard/         # Idempotency & rate-limit guard
//! ├── printing/      # Dispatcher, durable queue, worker, renderer
//! ├── live/          # Room manager + WebSocket endpoints
//! ├── catalog/       # External catalog/stock seam
//! └── common/        # Errors, logging
//! ```

pub mod api;
pub mod cache;
pub mod cart;
pub mod catalog;
pub mod common;
pub mod guard;
pub mod live;
pub mod orders;
pub mod pricing;
pub mod printing;
pub mod server;

pub use cart::CartStore;
pub use catalog::{Catalog, InMemoryCatalog};
pub use common::{AppError, AppResponse, AppResult};
pub use guard::{FailMode, Guard};
pub use live::RoomManager;
pub use orders::{OrderLedger, OrderStorage};
pub use printing::{PrintDispatcher, PrintQueue, PrintWorker};
pub use server::{Config, Server, ServerState};
