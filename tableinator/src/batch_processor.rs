//! Per-data-type batching: messages accumulate in FIFO queues and flush to PostgreSQL either
//! when a queue reaches `batch_size` or when `flush_interval` elapses, whichever comes first
//! (§4.6). Mirrors the graph consumer's batch processor one-for-one so the two consumers behave
//! identically from the broker's viewpoint.

use crate::record::TableRecord;
use crate::store::{PostgresStore, TableError};
use discogsography_common::DataType;
use lapin::message::Delivery;
use lapin::options::{BasicAckOptions, BasicNackOptions};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::interval;
use tracing::{error, info, warn};

#[derive(Debug, Clone, Copy)]
pub struct BatchConfig {
    pub batch_size: usize,
    pub flush_interval: Duration,
}

impl Default for BatchConfig {
    fn default() -> Self {
        Self { batch_size: 100, flush_interval: Duration::from_secs(5) }
    }
}

struct PendingEntry {
    record: TableRecord,
    delivery: Delivery,
}

#[derive(Default)]
struct StatsInner {
    processed: HashMap<DataType, u64>,
    skipped: HashMap<DataType, u64>,
    errors: HashMap<DataType, u64>,
    batches: HashMap<DataType, u64>,
}

/// Flush counters, shared independently of the store itself so the health endpoints can read
/// them without holding anything Postgres-shaped.
#[derive(Default)]
pub struct BatchStats(Mutex<StatsInner>);

/// Owns one FIFO queue of un-flushed deliveries per [`DataType`] and the Postgres store they
/// eventually flush into. Shared behind an `Arc` between the per-type consumer tasks and the
/// periodic flush timer.
pub struct BatchProcessor {
    store: Option<PostgresStore>,
    config: BatchConfig,
    queues: Mutex<HashMap<DataType, Vec<PendingEntry>>>,
    stats: Arc<BatchStats>,
}

impl BatchProcessor {
    pub fn new(store: PostgresStore, config: BatchConfig) -> Arc<Self> {
        let mut queues = HashMap::new();
        for data_type in DataType::all() {
            queues.insert(data_type, Vec::new());
        }
        Arc::new(Self { store: Some(store), config, queues: Mutex::new(queues), stats: Arc::new(BatchStats::default()) })
    }

    /// Store-less fixture for health-endpoint tests, which only ever read `get_stats()` and
    /// never flush a real batch. Never used by the running binary.
    #[doc(hidden)]
    pub fn new_for_test() -> Arc<Self> {
        let mut queues = HashMap::new();
        for data_type in DataType::all() {
            queues.insert(data_type, Vec::new());
        }
        Arc::new(Self { store: None, config: BatchConfig::default(), queues: Mutex::new(queues), stats: Arc::new(BatchStats::default()) })
    }

    /// Buffers one message's delivery, flushing the owning queue immediately if it has reached
    /// `batch_size`.
    pub async fn add_message(self: &Arc<Self>, data_type: DataType, record: TableRecord, delivery: Delivery) {
        let should_flush = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(data_type).or_default();
            queue.push(PendingEntry { record, delivery });
            queue.len() >= self.config.batch_size
        };
        if should_flush {
            self.flush_queue(data_type).await;
        }
    }

    pub async fn flush_queue(self: &Arc<Self>, data_type: DataType) {
        let entries = {
            let mut queues = self.queues.lock();
            let queue = queues.entry(data_type).or_default();
            std::mem::take(queue)
        };
        if entries.is_empty() {
            return;
        }

        let count = entries.len();
        let records: Vec<TableRecord> = entries.iter().map(|e| e.record.clone()).collect();
        let result = self.write_batch(data_type, &records).await;

        match result {
            Ok(written) => {
                for entry in &entries {
                    if let Err(e) = entry.delivery.ack(BasicAckOptions::default()).await {
                        warn!("⚠️ Failed to ack {} delivery: {}", data_type, e);
                    }
                }
                let mut stats = self.stats.0.lock();
                *stats.processed.entry(data_type).or_default() += written as u64;
                *stats.skipped.entry(data_type).or_default() += (count - written) as u64;
                *stats.batches.entry(data_type).or_default() += 1;
                info!("🐘 Flushed {} {} records ({} written, {} already current)", count, data_type, written, count - written);
            }
            Err(TableError::Transient(reason)) => {
                warn!("⚠️ Transient PostgreSQL failure on {} batch of {}, requeuing: {}", data_type, count, reason);
                for entry in entries {
                    if let Err(e) = entry.delivery.nack(BasicNackOptions { requeue: true, ..Default::default() }).await {
                        error!("❌ Failed to nack {} delivery for requeue: {}", data_type, e);
                    }
                }
                *self.stats.0.lock().errors.entry(data_type).or_default() += count as u64;
            }
            Err(TableError::Other(reason)) => {
                error!("❌ PostgreSQL write failed for {} batch of {}: {}", data_type, count, reason);
                for entry in entries {
                    if let Err(e) = entry.delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await {
                        error!("❌ Failed to nack {} delivery: {}", data_type, e);
                    }
                }
                *self.stats.0.lock().errors.entry(data_type).or_default() += count as u64;
            }
        }
    }

    async fn write_batch(&self, data_type: DataType, records: &[TableRecord]) -> Result<usize, TableError> {
        let Some(store) = self.store.as_ref() else {
            return Err(TableError::Other("no PostgreSQL store configured".to_string()));
        };
        store.upsert(data_type, records).await
    }

    pub async fn flush_all(self: &Arc<Self>) {
        for data_type in DataType::all() {
            self.flush_queue(data_type).await;
        }
    }

    /// Runs until the process shuts down, flushing every queue every `flush_interval`.
    pub async fn periodic_flush(self: Arc<Self>) {
        let mut ticker = interval(self.config.flush_interval);
        loop {
            ticker.tick().await;
            self.flush_all().await;
        }
    }

    pub fn get_stats(&self) -> HashMap<String, serde_json::Value> {
        let stats = self.stats.0.lock();
        let mut out = HashMap::new();
        for data_type in DataType::all() {
            out.insert(
                data_type.to_string(),
                serde_json::json!({
                    "processed": stats.processed.get(&data_type).copied().unwrap_or(0),
                    "skipped": stats.skipped.get(&data_type).copied().unwrap_or(0),
                    "errors": stats.errors.get(&data_type).copied().unwrap_or(0),
                    "batches": stats.batches.get(&data_type).copied().unwrap_or(0),
                }),
            );
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_batch_config_matches_documented_defaults() {
        let config = BatchConfig::default();
        assert_eq!(config.batch_size, 100);
        assert_eq!(config.flush_interval, Duration::from_secs(5));
    }
}
