//! redb-based storage for the print pipeline.
//!
//! # Tables
//!
//! | Table | Key | Value | Purpose |
//! |-------|-----|-------|---------|
//! | `printers` | `printer_id` | `Printer` | Printer registry |
//! | `store_printers` | `(store_id, printer_id)` | `()` | Per-store index |
//! | `bindings` | `(store_id, category_id, printer_id)` | `()` | Routing |
//! | `print_jobs` | `job_id` | `PrintJob` | Durable job rows |
//! | `order_jobs` | `(order_id, job_id)` | `()` | Per-order index |
//! | `queue_log` | `sequence` | `QueueMessage` | Append-only delivery log |
//! | `queue_groups` | `group` | `u64` | Consumer group cursors |
//! | `queue_pending` | `(group, sequence)` | `QueueMessage` | Delivered, unacked |
//! | `queue_counters` | `&str` | `u64` | Log sequence |
//!
//! A job row survives restarts; the queue log only carries `(job_id,
//! order_id, printer_id)` references, the content lives on the job.

use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use serde::{Deserialize, Serialize};
use shared::models::{CategoryBinding, PrintJob, PrintJobStatus, Printer};
use std::path::Path;
use std::sync::Arc;

use crate::orders::storage::StorageResult;

const PRINTERS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("printers");
const STORE_PRINTERS_TABLE: TableDefinition<(&str, &str), ()> =
    TableDefinition::new("store_printers");
const BINDINGS_TABLE: TableDefinition<(&str, &str, &str), ()> = TableDefinition::new("bindings");
const PRINT_JOBS_TABLE: TableDefinition<&str, &[u8]> = TableDefinition::new("print_jobs");
const ORDER_JOBS_TABLE: TableDefinition<(&str, &str), ()> = TableDefinition::new("order_jobs");
const QUEUE_LOG_TABLE: TableDefinition<u64, &[u8]> = TableDefinition::new("queue_log");
const QUEUE_GROUPS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("queue_groups");
const QUEUE_PENDING_TABLE: TableDefinition<(&str, u64), &[u8]> =
    TableDefinition::new("queue_pending");
const QUEUE_COUNTERS_TABLE: TableDefinition<&str, u64> = TableDefinition::new("queue_counters");

const SEQUENCE_KEY: &str = "seq";

const RANGE_END: &str = "\u{ffff}";

/// Queue payload; the job row carries everything else.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QueueMessage {
    pub job_id: String,
    pub order_id: String,
    pub printer_id: String,
}

#[derive(Clone)]
pub struct PrintStorage {
    db: Arc<Database>,
}

impl PrintStorage {
    pub fn open(path: impl AsRef<Path>) -> StorageResult<Self> {
        let db = Database::create(path)?;
        Self::init(db)
    }

    pub fn open_in_memory() -> StorageResult<Self> {
        let db = Database::builder().create_with_backend(redb::backends::InMemoryBackend::new())?;
        Self::init(db)
    }

    fn init(db: Database) -> StorageResult<Self> {
        let write_txn = db.begin_write()?;
        {
            let _ = write_txn.open_table(PRINTERS_TABLE)?;
            let _ = write_txn.open_table(STORE_PRINTERS_TABLE)?;
            let _ = write_txn.open_table(BINDINGS_TABLE)?;
            let _ = write_txn.open_table(PRINT_JOBS_TABLE)?;
            let _ = write_txn.open_table(ORDER_JOBS_TABLE)?;
            let _ = write_txn.open_table(QUEUE_LOG_TABLE)?;
            let _ = write_txn.open_table(QUEUE_GROUPS_TABLE)?;
            let _ = write_txn.open_table(QUEUE_PENDING_TABLE)?;
            let _ = write_txn.open_table(QUEUE_COUNTERS_TABLE)?;
        }
        write_txn.commit()?;
        Ok(Self { db: Arc::new(db) })
    }

    // ========== Printer Registry ==========

    pub fn put_printer(&self, printer: &Printer) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PRINTERS_TABLE)?;
            table.insert(printer.id.as_str(), serde_json::to_vec(printer)?.as_slice())?;
            let mut index = txn.open_table(STORE_PRINTERS_TABLE)?;
            index.insert((printer.store_id.as_str(), printer.id.as_str()), ())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_printer(&self, printer_id: &str) -> StorageResult<Option<Printer>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRINTERS_TABLE)?;
        match table.get(printer_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_printers(&self, store_id: &str) -> StorageResult<Vec<Printer>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(STORE_PRINTERS_TABLE)?;
        let printers = read_txn.open_table(PRINTERS_TABLE)?;

        let mut result = Vec::new();
        for entry in index.range((store_id, "")..(store_id, RANGE_END))? {
            let (key, _) = entry?;
            if let Some(value) = printers.get(key.value().1)? {
                result.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(result)
    }

    pub fn put_binding(&self, binding: &CategoryBinding) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(BINDINGS_TABLE)?;
            table.insert(
                (
                    binding.store_id.as_str(),
                    binding.category_id.as_str(),
                    binding.printer_id.as_str(),
                ),
                (),
            )?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Printer ids bound to one category.
    pub fn bound_printers(&self, store_id: &str, category_id: &str) -> StorageResult<Vec<String>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BINDINGS_TABLE)?;

        let mut result = Vec::new();
        let start = (store_id, category_id, "");
        let end = (store_id, category_id, RANGE_END);
        for entry in table.range(start..end)? {
            let (key, _) = entry?;
            result.push(key.value().2.to_string());
        }
        Ok(result)
    }

    /// True when the store has at least one category binding.
    pub fn store_has_bindings(&self, store_id: &str) -> StorageResult<bool> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(BINDINGS_TABLE)?;

        let start = (store_id, "", "");
        let end = (store_id, RANGE_END, RANGE_END);
        let mut range = table.range(start..end)?;
        Ok(range.next().transpose()?.is_some())
    }

    // ========== Print Jobs ==========

    pub fn insert_job(&self, job: &PrintJob) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PRINT_JOBS_TABLE)?;
            table.insert(job.id.as_str(), serde_json::to_vec(job)?.as_slice())?;
            let mut index = txn.open_table(ORDER_JOBS_TABLE)?;
            index.insert((job.order_id.as_str(), job.id.as_str()), ())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn update_job(&self, job: &PrintJob) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut table = txn.open_table(PRINT_JOBS_TABLE)?;
            table.insert(job.id.as_str(), serde_json::to_vec(job)?.as_slice())?;
        }
        txn.commit()?;
        Ok(())
    }

    pub fn get_job(&self, job_id: &str) -> StorageResult<Option<PrintJob>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRINT_JOBS_TABLE)?;
        match table.get(job_id)? {
            Some(value) => Ok(Some(serde_json::from_slice(value.value())?)),
            None => Ok(None),
        }
    }

    pub fn list_jobs_for_order(&self, order_id: &str) -> StorageResult<Vec<PrintJob>> {
        let read_txn = self.db.begin_read()?;
        let index = read_txn.open_table(ORDER_JOBS_TABLE)?;
        let jobs = read_txn.open_table(PRINT_JOBS_TABLE)?;

        let mut result = Vec::new();
        for entry in index.range((order_id, "")..(order_id, RANGE_END))? {
            let (key, _) = entry?;
            if let Some(value) = jobs.get(key.value().1)? {
                result.push(serde_json::from_slice(value.value())?);
            }
        }
        Ok(result)
    }

    pub fn list_dead_jobs(&self) -> StorageResult<Vec<PrintJob>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(PRINT_JOBS_TABLE)?;

        let mut result = Vec::new();
        for entry in table.iter()? {
            let (_, value) = entry?;
            let job: PrintJob = serde_json::from_slice(value.value())?;
            if job.status == PrintJobStatus::Dead {
                result.push(job);
            }
        }
        Ok(result)
    }

    // ========== Queue Log ==========

    /// Append a message to the log; returns its sequence.
    pub fn append_log(&self, message: &QueueMessage) -> StorageResult<u64> {
        let txn = self.db.begin_write()?;
        let seq = {
            let mut counters = txn.open_table(QUEUE_COUNTERS_TABLE)?;
            let next = counters.get(SEQUENCE_KEY)?.map(|g| g.value()).unwrap_or(0) + 1;
            counters.insert(SEQUENCE_KEY, next)?;
            let mut log = txn.open_table(QUEUE_LOG_TABLE)?;
            log.insert(next, serde_json::to_vec(message)?.as_slice())?;
            next
        };
        txn.commit()?;
        Ok(seq)
    }

    /// Create a consumer group at the current end of the log. Tolerates
    /// an existing group.
    pub fn ensure_group(&self, group: &str) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let counters = txn.open_table(QUEUE_COUNTERS_TABLE)?;
            let head = counters.get(SEQUENCE_KEY)?.map(|g| g.value()).unwrap_or(0);
            drop(counters);
            let mut groups = txn.open_table(QUEUE_GROUPS_TABLE)?;
            if groups.get(group)?.is_none() {
                groups.insert(group, head)?;
            }
        }
        txn.commit()?;
        Ok(())
    }

    /// Deliver up to `count` entries past the group cursor, marking them
    /// pending and advancing the cursor.
    pub fn read_group(
        &self,
        group: &str,
        count: usize,
    ) -> StorageResult<Vec<(u64, QueueMessage)>> {
        let txn = self.db.begin_write()?;
        let delivered = {
            let mut groups = txn.open_table(QUEUE_GROUPS_TABLE)?;
            let cursor = groups.get(group)?.map(|g| g.value()).unwrap_or(0);
            let log = txn.open_table(QUEUE_LOG_TABLE)?;

            let mut delivered = Vec::new();
            for entry in log.range(cursor + 1..)? {
                let (key, value) = entry?;
                delivered.push((key.value(), serde_json::from_slice(value.value())?));
                if delivered.len() >= count {
                    break;
                }
            }
            drop(log);

            if let Some((last, _)) = delivered.last() {
                groups.insert(group, *last)?;
            }
            drop(groups);

            let mut pending = txn.open_table(QUEUE_PENDING_TABLE)?;
            for (seq, message) in &delivered {
                pending.insert((group, *seq), serde_json::to_vec(message)?.as_slice())?;
            }
            delivered
        };
        txn.commit()?;
        Ok(delivered)
    }

    pub fn ack(&self, group: &str, seq: u64) -> StorageResult<()> {
        let txn = self.db.begin_write()?;
        {
            let mut pending = txn.open_table(QUEUE_PENDING_TABLE)?;
            pending.remove((group, seq))?;
        }
        txn.commit()?;
        Ok(())
    }

    /// Entries delivered to the group but never acked, e.g. after a crash
    /// mid-job. The caller republishes them and acks the stale sequence.
    pub fn pending_entries(&self, group: &str) -> StorageResult<Vec<(u64, QueueMessage)>> {
        let read_txn = self.db.begin_read()?;
        let table = read_txn.open_table(QUEUE_PENDING_TABLE)?;

        let mut result = Vec::new();
        for entry in table.range((group, 0)..(group, u64::MAX))? {
            let (key, value) = entry?;
            result.push((key.value().1, serde_json::from_slice(value.value())?));
        }
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use shared::models::PrinterClass;

    fn message(job: &str) -> QueueMessage {
        QueueMessage {
            job_id: job.to_string(),
            order_id: "o1".to_string(),
            printer_id: "pr1".to_string(),
        }
    }

    #[test]
    fn test_printer_registry_and_bindings() {
        let storage = PrintStorage::open_in_memory().unwrap();
        storage
            .put_printer(&Printer {
                id: "pr1".to_string(),
                store_id: "s1".to_string(),
                name: "Kitchen".to_string(),
                class: PrinterClass::Kitchen,
                address: "127.0.0.1:9100".to_string(),
                enabled: true,
            })
            .unwrap();
        storage
            .put_binding(&CategoryBinding {
                store_id: "s1".to_string(),
                category_id: "c1".to_string(),
                printer_id: "pr1".to_string(),
            })
            .unwrap();

        assert_eq!(storage.list_printers("s1").unwrap().len(), 1);
        assert!(storage.list_printers("s2").unwrap().is_empty());
        assert_eq!(storage.bound_printers("s1", "c1").unwrap(), vec!["pr1"]);
        assert!(storage.bound_printers("s1", "c2").unwrap().is_empty());
        assert!(storage.store_has_bindings("s1").unwrap());
        assert!(!storage.store_has_bindings("s2").unwrap());
    }

    #[test]
    fn test_group_reads_only_new_entries() {
        let storage = PrintStorage::open_in_memory().unwrap();
        storage.append_log(&message("before")).unwrap();

        // Group starts at the log head; earlier entries are invisible
        storage.ensure_group("workers").unwrap();
        assert!(storage.read_group("workers", 10).unwrap().is_empty());

        storage.append_log(&message("j1")).unwrap();
        storage.append_log(&message("j2")).unwrap();

        let batch = storage.read_group("workers", 10).unwrap();
        assert_eq!(batch.len(), 2);
        assert_eq!(batch[0].1.job_id, "j1");

        // Cursor advanced; nothing new to read
        assert!(storage.read_group("workers", 10).unwrap().is_empty());
    }

    #[test]
    fn test_ensure_group_is_idempotent() {
        let storage = PrintStorage::open_in_memory().unwrap();
        storage.ensure_group("workers").unwrap();
        storage.append_log(&message("j1")).unwrap();
        // Second creation must not reset the cursor
        storage.ensure_group("workers").unwrap();
        assert_eq!(storage.read_group("workers", 10).unwrap().len(), 1);
    }

    #[test]
    fn test_pending_until_acked() {
        let storage = PrintStorage::open_in_memory().unwrap();
        storage.ensure_group("workers").unwrap();
        storage.append_log(&message("j1")).unwrap();

        let batch = storage.read_group("workers", 10).unwrap();
        let (seq, _) = batch[0];
        assert_eq!(storage.pending_entries("workers").unwrap().len(), 1);

        storage.ack("workers", seq).unwrap();
        assert!(storage.pending_entries("workers").unwrap().is_empty());
    }

    #[test]
    fn test_job_rows_and_order_index() {
        let storage = PrintStorage::open_in_memory().unwrap();
        let job = PrintJob {
            id: "j1".to_string(),
            order_id: "o1".to_string(),
            printer_id: "pr1".to_string(),
            content: "TICKET".to_string(),
            status: PrintJobStatus::Pending,
            retries: 0,
            error: None,
            created_at: 1,
            updated_at: 1,
        };
        storage.insert_job(&job).unwrap();

        let mut dead = job.clone();
        dead.id = "j2".to_string();
        dead.status = PrintJobStatus::Dead;
        storage.insert_job(&dead).unwrap();

        assert_eq!(storage.list_jobs_for_order("o1").unwrap().len(), 2);
        let dead_jobs = storage.list_dead_jobs().unwrap();
        assert_eq!(dead_jobs.len(), 1);
        assert_eq!(dead_jobs[0].id, "j2");
    }
}
