//! Durable print queue.
//!
//! An append-only redb log consumed through a named consumer group. A
//! delivered entry stays pending until acked; the retry policy is
//! ack-then-republish, so a retried job re-enters the log tail and can be
//! redelivered behind newer jobs. Publishers wake blocked readers through
//! a `Notify`.

use std::time::Duration;
use tokio::sync::Notify;
use tokio::time::Instant;

use super::storage::{PrintStorage, QueueMessage};
use crate::common::{AppError, AppResult};

pub struct PrintQueue {
    storage: PrintStorage,
    notify: Notify,
}

impl PrintQueue {
    pub fn new(storage: PrintStorage) -> Self {
        Self {
            storage,
            notify: Notify::new(),
        }
    }

    /// Idempotent consumer-group creation at the current log head.
    pub fn ensure_group(&self, group: &str) -> AppResult<()> {
        self.storage.ensure_group(group).map_err(AppError::from)
    }

    pub fn publish(&self, message: &QueueMessage) -> AppResult<u64> {
        let seq = self.storage.append_log(message).map_err(AppError::from)?;
        self.notify.notify_waiters();
        Ok(seq)
    }

    /// Read up to `count` entries for the group, blocking up to `timeout`
    /// when the log has nothing new. Returns empty on timeout.
    pub async fn read_batch(
        &self,
        group: &str,
        count: usize,
        timeout: Duration,
    ) -> AppResult<Vec<(u64, QueueMessage)>> {
        let deadline = Instant::now() + timeout;
        loop {
            // Register for wakeups before the read so a publish between
            // the read and the wait is not missed.
            let notified = self.notify.notified();

            let batch = self
                .storage
                .read_group(group, count)
                .map_err(AppError::from)?;
            if !batch.is_empty() {
                return Ok(batch);
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Ok(Vec::new());
            }
            if tokio::time::timeout(remaining, notified).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    pub fn ack(&self, group: &str, seq: u64) -> AppResult<()> {
        self.storage.ack(group, seq).map_err(AppError::from)
    }

    /// Republish entries a crashed consumer left pending, acking the
    /// stale deliveries. Called once at worker startup.
    pub fn recover_pending(&self, group: &str) -> AppResult<usize> {
        let pending = self
            .storage
            .pending_entries(group)
            .map_err(AppError::from)?;
        let count = pending.len();
        for (seq, message) in pending {
            self.publish(&message)?;
            self.ack(group, seq)?;
        }
        if count > 0 {
            tracing::info!(group, count, "requeued pending print deliveries");
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn queue() -> PrintQueue {
        PrintQueue::new(PrintStorage::open_in_memory().unwrap())
    }

    fn message(job: &str) -> QueueMessage {
        QueueMessage {
            job_id: job.to_string(),
            order_id: "o1".to_string(),
            printer_id: "pr1".to_string(),
        }
    }

    #[tokio::test]
    async fn test_read_returns_published_batch() {
        let q = queue();
        q.ensure_group("workers").unwrap();
        q.publish(&message("j1")).unwrap();
        q.publish(&message("j2")).unwrap();

        let batch = q.read_batch("workers", 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].1.job_id, "j1");
        assert_eq!(batch[1].1.job_id, "j2");
    }

    #[tokio::test]
    async fn test_empty_read_times_out() {
        let q = queue();
        q.ensure_group("workers").unwrap();
        let batch = q.read_batch("workers", 10, Duration::from_millis(20)).await.unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_blocked_reader_wakes_on_publish() {
        let q = Arc::new(queue());
        q.ensure_group("workers").unwrap();

        let reader = {
            let q = q.clone();
            tokio::spawn(async move {
                q.read_batch("workers", 10, Duration::from_secs(5)).await.unwrap()
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        q.publish(&message("j1")).unwrap();

        let batch = reader.await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].1.job_id, "j1");
    }

    #[tokio::test]
    async fn test_recover_pending_republishes() {
        let q = queue();
        q.ensure_group("workers").unwrap();
        q.publish(&message("j1")).unwrap();

        // Delivered but never acked, as after a crash
        let batch = q.read_batch("workers", 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 1);

        assert_eq!(q.recover_pending("workers").unwrap(), 1);
        let batch = q.read_batch("workers", 10, Duration::from_millis(10)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].1.job_id, "j1");
        q.ack("workers", batch[0].0).unwrap();
        assert_eq!(q.recover_pending("workers").unwrap(), 0);
    }
}
