//! Shared application state.

use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use super::config::Config;
use crate::cart::CartStore;
use crate::catalog::Catalog;
use crate::common::{AppError, AppResult};
use crate::guard::{Guard, RateLimit};
use crate::live::RoomManager;
use crate::orders::{OrderLedger, OrderStorage};
use crate::printing::{
    CONSUMER_GROUP, PrintDispatcher, PrintQueue, PrintStorage, PrintWorker, PrinterTransport,
    TcpPrinterTransport,
};

/// Everything the handlers need, cloned per request.
#[derive(Clone)]
pub struct ServerState {
    pub config: Arc<Config>,
    pub rooms: Arc<RoomManager>,
    pub catalog: Arc<dyn Catalog>,
    pub carts: Arc<CartStore>,
    pub guard: Arc<Guard>,
    pub ledger: Arc<OrderLedger>,
    pub order_storage: OrderStorage,
    pub print_storage: PrintStorage,
    pub queue: Arc<PrintQueue>,
    pub dispatcher: Arc<PrintDispatcher>,
    pub order_rate: RateLimit,
}

impl ServerState {
    /// Open storage and wire the services. An empty `work_dir` opens
    /// in-memory databases.
    pub fn initialize(config: &Config, catalog: Arc<dyn Catalog>) -> AppResult<Self> {
        let (order_storage, print_storage) = if config.work_dir.is_empty() {
            (
                OrderStorage::open_in_memory()?,
                PrintStorage::open_in_memory()?,
            )
        } else {
            std::fs::create_dir_all(&config.work_dir)
                .map_err(|e| AppError::infra(format!("create {}: {e}", config.work_dir)))?;
            (
                OrderStorage::open(format!("{}/orders.redb", config.work_dir))?,
                PrintStorage::open(format!("{}/printing.redb", config.work_dir))?,
            )
        };

        let rooms = Arc::new(RoomManager::new());
        let carts = Arc::new(CartStore::new(
            catalog.clone(),
            rooms.clone(),
            Duration::from_secs(config.cart_ttl_secs),
        ));
        let guard = Arc::new(Guard::in_memory(Duration::from_secs(
            config.idempotency_ttl_secs,
        )));
        let queue = Arc::new(PrintQueue::new(print_storage.clone()));
        queue.ensure_group(CONSUMER_GROUP)?;
        let dispatcher = Arc::new(PrintDispatcher::new(print_storage.clone(), queue.clone()));
        let ledger = Arc::new(OrderLedger::new(
            order_storage.clone(),
            catalog.clone(),
            rooms.clone(),
            dispatcher.clone(),
            config.low_stock_threshold,
        ));

        Ok(Self {
            config: Arc::new(config.clone()),
            rooms,
            catalog,
            carts,
            guard,
            ledger,
            order_storage,
            print_storage,
            queue,
            dispatcher,
            order_rate: RateLimit::new(
                config.order_rate_limit,
                Duration::from_secs(config.order_rate_window_secs),
            ),
        })
    }

    /// Spawn the print workers and the cache sweeper. All tasks stop on
    /// `shutdown`.
    pub fn start_background_tasks(&self, shutdown: CancellationToken) {
        let transport: Arc<dyn PrinterTransport> = Arc::new(TcpPrinterTransport::new(
            Duration::from_millis(self.config.printer_timeout_ms),
        ));

        for n in 0..self.config.print_workers.max(1) {
            let worker = PrintWorker::new(
                self.print_storage.clone(),
                self.queue.clone(),
                transport.clone(),
                self.rooms.clone(),
            );
            let token = shutdown.clone();
            tokio::spawn(async move {
                tracing::debug!(worker = n, "print worker started");
                worker.run(token).await;
            });
        }

        let carts = self.carts.clone();
        let guard = self.guard.clone();
        let interval = Duration::from_secs(self.config.sweep_interval_secs.max(1));
        let token = shutdown.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
            loop {
                tokio::select! {
                    _ = token.cancelled() => break,
                    _ = ticker.tick() => {
                        let expired = carts.sweep() + guard.sweep();
                        if expired > 0 {
                            tracing::debug!(expired, "swept expired entries");
                        }
                    }
                }
            }
        });
    }
}
