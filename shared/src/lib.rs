//! Shared domain models for the table-ordering platform.
//!
//! Pure data types with serde support, consumed by the server crate and by
//! clients. No I/O lives here.

pub mod cart;
pub mod event;
pub mod models;

pub use cart::{CartItem, CartOp, CartSession, CartView};
pub use event::{EventName, LiveEvent};
