//! Print pipeline: dispatch, durable queue, worker and transport.
//!
//! Dispatch creates one durable job per (order, printer) and publishes a
//! reference onto the queue; workers consume, send over TCP, and retry
//! with a fixed budget before parking a job DEAD.

pub mod dispatcher;
pub mod queue;
pub mod renderer;
pub mod storage;
pub mod transport;
pub mod worker;

pub use dispatcher::PrintDispatcher;
pub use queue::PrintQueue;
pub use renderer::TicketRenderer;
pub use storage::{PrintStorage, QueueMessage};
pub use transport::{PrinterTransport, TcpPrinterTransport};
pub use worker::{CONSUMER_GROUP, PrintWorker};
