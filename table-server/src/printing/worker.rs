//! Print worker.
//!
//! Long-lived consumer of the print queue. Each delivery drives one job:
//! mark PRINTING, send the rendered content over the transport, then
//! SUCCESS or retry. A retry resets the job to PENDING and republishes
//! (ack-then-republish) up to MAX_RETRIES times; a job that fails again
//! with no budget left parks DEAD for operator requeue, never dropped.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use serde_json::json;
use shared::event::{EventName, LiveEvent};
use shared::models::{PrintJob, PrintJobStatus};
use tokio_util::sync::CancellationToken;

use super::queue::PrintQueue;
use super::storage::{PrintStorage, QueueMessage};
use super::transport::PrinterTransport;
use crate::common::AppResult;
use crate::live::RoomManager;

/// All workers share one consumer group; a delivery goes to exactly one.
pub const CONSUMER_GROUP: &str = "print-workers";

const MAX_RETRIES: u32 = 3;
const BATCH_SIZE: usize = 16;
const POLL_TIMEOUT: Duration = Duration::from_secs(5);

pub struct PrintWorker {
    storage: PrintStorage,
    queue: Arc<PrintQueue>,
    transport: Arc<dyn PrinterTransport>,
    rooms: Arc<RoomManager>,
    poll_timeout: Duration,
}

impl PrintWorker {
    pub fn new(
        storage: PrintStorage,
        queue: Arc<PrintQueue>,
        transport: Arc<dyn PrinterTransport>,
        rooms: Arc<RoomManager>,
    ) -> Self {
        Self {
            storage,
            queue,
            transport,
            rooms,
            poll_timeout: POLL_TIMEOUT,
        }
    }

    pub fn with_poll_timeout(mut self, timeout: Duration) -> Self {
        self.poll_timeout = timeout;
        self
    }

    /// Consume until shutdown. Deliveries left pending by an earlier
    /// crash are requeued first.
    pub async fn run(self, shutdown: CancellationToken) {
        if let Err(e) = self.queue.ensure_group(CONSUMER_GROUP) {
            tracing::error!(error = %e, "print worker cannot create consumer group");
            return;
        }
        if let Err(e) = self.queue.recover_pending(CONSUMER_GROUP) {
            tracing::warn!(error = %e, "print worker failed to recover pending deliveries");
        }
        tracing::info!("print worker started");

        loop {
            tokio::select! {
                _ = shutdown.cancelled() => {
                    tracing::info!("print worker received shutdown signal");
                    break;
                }
                polled = self.poll_once() => {
                    if let Err(e) = polled {
                        tracing::error!(error = %e, "print queue read failed");
                        tokio::time::sleep(Duration::from_secs(1)).await;
                    }
                }
            }
        }
    }

    /// One bounded blocking read plus processing; returns the number of
    /// deliveries handled.
    pub async fn poll_once(&self) -> AppResult<usize> {
        let batch = self
            .queue
            .read_batch(CONSUMER_GROUP, BATCH_SIZE, self.poll_timeout)
            .await?;
        let count = batch.len();
        for (seq, message) in batch {
            self.process(seq, &message).await;
        }
        Ok(count)
    }

    async fn process(&self, seq: u64, message: &QueueMessage) {
        let Some(mut job) = self.load_job(seq, &message.job_id) else {
            return;
        };

        let Ok(Some(printer)) = self.storage.get_printer(&message.printer_id) else {
            tracing::error!(job_id = %job.id, printer_id = %message.printer_id,
                "printer missing, parking job");
            self.finish(&mut job, seq, PrintJobStatus::Dead, Some("printer not found".into()));
            return;
        };

        job.status = PrintJobStatus::Printing;
        job.updated_at = Utc::now().timestamp_millis();
        if let Err(e) = self.storage.update_job(&job) {
            tracing::error!(job_id = %job.id, error = %e, "failed to mark job printing");
        }

        match self
            .transport
            .send(&printer.address, job.content.as_bytes())
            .await
        {
            Ok(()) => {
                self.finish(&mut job, seq, PrintJobStatus::Success, None);
                self.broadcast(&printer.store_id, EventName::PrintJobCompleted, &job, false);
            }
            Err(e) => {
                // Budget check before the increment: a job may fail
                // MAX_RETRIES times and still land on the next attempt
                if job.retries < MAX_RETRIES {
                    job.retries += 1;
                    tracing::warn!(job_id = %job.id, retries = job.retries, error = %e,
                        "print failed, republishing");
                    self.finish(&mut job, seq, PrintJobStatus::Pending, Some(e.to_string()));
                    if let Err(e) = self.queue.publish(message) {
                        tracing::error!(job_id = %job.id, error = %e,
                            "republish failed, job stalls until requeue");
                    }
                } else {
                    self.finish(&mut job, seq, PrintJobStatus::Dead, Some(e.to_string()));
                    self.broadcast(&printer.store_id, EventName::PrintJobFailed, &job, true);
                }
            }
        }
    }

    fn load_job(&self, seq: u64, job_id: &str) -> Option<PrintJob> {
        match self.storage.get_job(job_id) {
            Ok(Some(job)) => Some(job),
            Ok(None) => {
                tracing::warn!(job_id, "delivery references a missing job, acking");
                self.ack(seq, job_id);
                None
            }
            Err(e) => {
                tracing::error!(job_id, error = %e, "failed to load job, acking");
                self.ack(seq, job_id);
                None
            }
        }
    }

    /// Persist the terminal-or-retry status and ack the delivery.
    fn finish(&self, job: &mut PrintJob, seq: u64, status: PrintJobStatus, error: Option<String>) {
        job.status = status;
        job.error = error;
        job.updated_at = Utc::now().timestamp_millis();
        if let Err(e) = self.storage.update_job(job) {
            tracing::error!(job_id = %job.id, error = %e, "failed to persist job status");
        }
        self.ack(seq, &job.id);
    }

    fn ack(&self, seq: u64, job_id: &str) {
        if let Err(e) = self.queue.ack(CONSUMER_GROUP, seq) {
            tracing::error!(job_id, seq, error = %e, "ack failed");
        }
    }

    fn broadcast(&self, store_id: &str, event: EventName, job: &PrintJob, dead: bool) {
        self.rooms.broadcast_to_store(
            store_id,
            &LiveEvent::new(
                event,
                json!({
                    "job_id": job.id,
                    "order_id": job.order_id,
                    "printer_id": job.printer_id,
                    "retries": job.retries,
                    "dead": dead,
                }),
            ),
        );
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::live::Room;
    use crate::printing::dispatcher::PrintDispatcher;
    use crate::printing::transport::testing::ScriptedTransport;
    use shared::models::{Order, OrderItem, OrderStatus, Printer, PrinterClass};

    fn order() -> Order {
        Order {
            id: "o1".to_string(),
            order_no: "20260825-0001".to_string(),
            store_id: "s1".to_string(),
            table_id: "t1".to_string(),
            user_id: None,
            status: OrderStatus::Pending,
            total_amount: 18.0,
            coupon_id: None,
            coupon_discount: 0.0,
            points_used: 0,
            points_discount: 0.0,
            pay_amount: 18.0,
            remark: None,
            parent_order_id: None,
            created_at: 1,
            updated_at: 1,
        }
    }

    fn item() -> OrderItem {
        OrderItem {
            id: "i1".to_string(),
            order_id: "o1".to_string(),
            variant_id: "v1".to_string(),
            product_id: "p1".to_string(),
            category_id: "c1".to_string(),
            name: "Noodles".to_string(),
            spec: None,
            attrs: None,
            price: 18.0,
            quantity: 1,
            refunded_quantity: 0,
            refunded_amount: 0.0,
        }
    }

    struct Rig {
        storage: PrintStorage,
        queue: Arc<PrintQueue>,
        rooms: Arc<RoomManager>,
        worker: PrintWorker,
        job_id: String,
    }

    async fn rig(transport: ScriptedTransport) -> Rig {
        let storage = PrintStorage::open_in_memory().unwrap();
        let queue = Arc::new(PrintQueue::new(storage.clone()));
        let rooms = Arc::new(RoomManager::new());
        queue.ensure_group(CONSUMER_GROUP).unwrap();

        storage
            .put_printer(&Printer {
                id: "wok".to_string(),
                store_id: "s1".to_string(),
                name: "Wok".to_string(),
                class: PrinterClass::Kitchen,
                address: "127.0.0.1:9100".to_string(),
                enabled: true,
            })
            .unwrap();

        let dispatcher = PrintDispatcher::new(storage.clone(), queue.clone());
        let jobs = dispatcher.dispatch(&order(), &[item()]).await.unwrap();

        let worker = PrintWorker::new(
            storage.clone(),
            queue.clone(),
            Arc::new(transport),
            rooms.clone(),
        )
        .with_poll_timeout(Duration::from_millis(20));
        Rig {
            storage,
            queue,
            rooms,
            worker,
            job_id: jobs[0].id.clone(),
        }
    }

    #[tokio::test]
    async fn test_success_acks_and_broadcasts() {
        let rig = rig(ScriptedTransport::new(vec![])).await;
        let (_conn, mut rx) = rig.rooms.register(Room::store("s1"));

        assert_eq!(rig.worker.poll_once().await.unwrap(), 1);

        let job = rig.storage.get_job(&rig.job_id).unwrap().unwrap();
        assert_eq!(job.status, PrintJobStatus::Success);
        assert_eq!(job.retries, 0);

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "print_job_completed");

        // Delivery acked; nothing left to poll
        assert_eq!(rig.worker.poll_once().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_two_failures_then_success() {
        // Flaky printer: fails twice, third attempt lands
        let rig = rig(ScriptedTransport::new(vec![
            Err("connection refused".to_string()),
            Err("connection refused".to_string()),
        ]))
        .await;
        let (_conn, mut rx) = rig.rooms.register(Room::store("s1"));

        // Each failed attempt republishes, so three polls drain it
        assert_eq!(rig.worker.poll_once().await.unwrap(), 1);
        assert_eq!(rig.worker.poll_once().await.unwrap(), 1);
        assert_eq!(rig.worker.poll_once().await.unwrap(), 1);

        let job = rig.storage.get_job(&rig.job_id).unwrap().unwrap();
        assert_eq!(job.status, PrintJobStatus::Success);
        assert_eq!(job.retries, 2);

        // Exactly one completion event, no failure events
        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "print_job_completed");
        assert_eq!(frame["data"]["retries"], 2);
        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_retry_resets_job_to_pending() {
        let rig = rig(ScriptedTransport::new(vec![Err("busy".to_string())])).await;

        assert_eq!(rig.worker.poll_once().await.unwrap(), 1);
        let job = rig.storage.get_job(&rig.job_id).unwrap().unwrap();
        assert_eq!(job.status, PrintJobStatus::Pending);
        assert_eq!(job.retries, 1);
        assert!(job.error.is_some());

        assert_eq!(rig.worker.poll_once().await.unwrap(), 1);
        let job = rig.storage.get_job(&rig.job_id).unwrap().unwrap();
        assert_eq!(job.status, PrintJobStatus::Success);
    }

    #[tokio::test]
    async fn test_three_failures_then_fourth_attempt_succeeds() {
        // The budget covers MAX_RETRIES republishes, so three failures
        // still leave one live attempt
        let rig = rig(ScriptedTransport::new(vec![
            Err("down".to_string()),
            Err("down".to_string()),
            Err("down".to_string()),
        ]))
        .await;

        for _ in 0..MAX_RETRIES {
            assert_eq!(rig.worker.poll_once().await.unwrap(), 1);
        }
        let job = rig.storage.get_job(&rig.job_id).unwrap().unwrap();
        assert_eq!(job.status, PrintJobStatus::Pending);
        assert_eq!(job.retries, MAX_RETRIES);

        assert_eq!(rig.worker.poll_once().await.unwrap(), 1);
        let job = rig.storage.get_job(&rig.job_id).unwrap().unwrap();
        assert_eq!(job.status, PrintJobStatus::Success);
        assert_eq!(job.retries, MAX_RETRIES);
    }

    #[tokio::test]
    async fn test_exhausted_budget_parks_dead() {
        let rig = rig(ScriptedTransport::always_failing()).await;
        let (_conn, mut rx) = rig.rooms.register(Room::store("s1"));

        // MAX_RETRIES + 1 failures: the original attempt plus every republish
        for _ in 0..=MAX_RETRIES {
            assert_eq!(rig.worker.poll_once().await.unwrap(), 1);
        }

        let job = rig.storage.get_job(&rig.job_id).unwrap().unwrap();
        assert_eq!(job.status, PrintJobStatus::Dead);
        assert_eq!(job.retries, MAX_RETRIES);
        assert!(job.error.is_some());

        let frame: serde_json::Value = serde_json::from_str(&rx.try_recv().unwrap()).unwrap();
        assert_eq!(frame["event"], "print_job_failed");
        assert_eq!(frame["data"]["dead"], true);

        // Nothing republished after DEAD
        assert_eq!(rig.worker.poll_once().await.unwrap(), 0);
        assert_eq!(rig.storage.list_dead_jobs().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_dead_job_flows_through_requeue() {
        let rig = rig(ScriptedTransport::new(vec![
            Err("down".to_string()),
            Err("down".to_string()),
            Err("down".to_string()),
            Err("down".to_string()),
        ]))
        .await;

        for _ in 0..=MAX_RETRIES {
            rig.worker.poll_once().await.unwrap();
        }
        assert_eq!(
            rig.storage.get_job(&rig.job_id).unwrap().unwrap().status,
            PrintJobStatus::Dead
        );

        // Operator requeues; the script is exhausted so the send succeeds
        let dispatcher = PrintDispatcher::new(rig.storage.clone(), rig.queue.clone());
        dispatcher.requeue_dead(&rig.job_id).unwrap();
        assert_eq!(rig.worker.poll_once().await.unwrap(), 1);

        let job = rig.storage.get_job(&rig.job_id).unwrap().unwrap();
        assert_eq!(job.status, PrintJobStatus::Success);
    }
}
