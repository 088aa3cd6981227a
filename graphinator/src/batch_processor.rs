//! Per-data-type batching: messages accumulate in FIFO queues and flush to Neo4j either when a
//! queue reaches `batch_size` or when `flush_interval` elapses, whichever comes first (§4.5).

use crate::graph_store::{GraphError, Neo4jStore};
use crate::record::{ArtistRecord, LabelRecord, MasterRecord, ReleaseRecord};
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

enum PendingRecord {
    Artist(ArtistRecord),
    Label(LabelRecord),
    Master(MasterRecord),
    Release(ReleaseRecord),
}

struct PendingEntry {
    record: PendingRecord,
    delivery: Delivery,
}

#[derive(Default)]
struct StatsInner {
    processed: HashMap<DataType, u64>,
    skipped: HashMap<DataType, u64>,
    errors: HashMap<DataType, u64>,
}

/// Flush counters, shared independently of the store itself so the health endpoints can read
/// them without holding anything Neo4j-shaped.
#[derive(Default)]
pub struct BatchStats(Mutex<StatsInner>);

impl BatchStats {
    pub fn snapshot(&self) -> HashMap<String, serde_json::Value> {
        let stats = self.0.lock();
        let mut out = HashMap::new();
        for data_type in DataType::all() {
            out.insert(
                data_type.to_string(),
                serde_json::json!({
                    "processed": stats.processed.get(&data_type).copied().unwrap_or(0),
                    "skipped": stats.skipped.get(&data_type).copied().unwrap_or(0),
                    "errors": stats.errors.get(&data_type).copied().unwrap_or(0),
                }),
            );
        }
        out
    }
}

/// Owns one FIFO queue of un-flushed deliveries per [`DataType`] and the Neo4j store they
/// eventually flush into. Shared behind an `Arc` between the per-type consumer tasks and the
/// periodic flush timer.
pub struct BatchProcessor {
    store: Option<Neo4jStore>,
    config: BatchConfig,
    queues: Mutex<HashMap<DataType, Vec<PendingEntry>>>,
    stats: Arc<BatchStats>,
}

impl BatchProcessor {
    pub fn new(store: Neo4jStore, config: BatchConfig) -> Arc<Self> {
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

    pub fn stats(&self) -> Arc<BatchStats> {
        self.stats.clone()
    }

    /// Buffers one message's delivery, flushing the owning queue immediately if it has reached
    /// `batch_size`.
    pub async fn add_message(self: &Arc<Self>, data_type: DataType, record: PendingRecord, delivery: Delivery) {
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
        let result = self.write_batch(data_type, &entries).await;

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
                info!("💾 Flushed {} {} records ({} written, {} already current)", count, data_type, written, count - written);
            }
            Err(GraphError::Transient(reason)) => {
                warn!("⚠️ Transient Neo4j failure on {} batch of {}, requeuing: {}", data_type, count, reason);
                for entry in entries {
                    if let Err(e) = entry.delivery.nack(BasicNackOptions { requeue: true, ..Default::default() }).await {
                        error!("❌ Failed to nack {} delivery for requeue: {}", data_type, e);
                    }
                }
                *self.stats.0.lock().errors.entry(data_type).or_default() += count as u64;
            }
            Err(GraphError::Other(reason)) => {
                error!("❌ Neo4j write failed for {} batch of {}: {}", data_type, count, reason);
                for entry in entries {
                    if let Err(e) = entry.delivery.nack(BasicNackOptions { requeue: false, ..Default::default() }).await {
                        error!("❌ Failed to nack {} delivery: {}", data_type, e);
                    }
                }
                *self.stats.0.lock().errors.entry(data_type).or_default() += count as u64;
            }
        }
    }

    async fn write_batch(&self, data_type: DataType, entries: &[PendingEntry]) -> Result<usize, GraphError> {
        let Some(store) = self.store.as_ref() else {
            return Err(GraphError::Other("no Neo4j store configured".to_string()));
        };
        match data_type {
            DataType::Artists => {
                let records: Vec<ArtistRecord> = entries
                    .iter()
                    .filter_map(|e| match &e.record {
                        PendingRecord::Artist(r) => Some(r.clone()),
                        _ => None,
                    })
                    .collect();
                store.upsert_artists(&records).await
            }
            DataType::Labels => {
                let records: Vec<LabelRecord> = entries
                    .iter()
                    .filter_map(|e| match &e.record {
                        PendingRecord::Label(r) => Some(r.clone()),
                        _ => None,
                    })
                    .collect();
                store.upsert_labels(&records).await
            }
            DataType::Masters => {
                let records: Vec<MasterRecord> = entries
                    .iter()
                    .filter_map(|e| match &e.record {
                        PendingRecord::Master(r) => Some(r.clone()),
                        _ => None,
                    })
                    .collect();
                store.upsert_masters(&records).await
            }
            DataType::Releases => {
                let records: Vec<ReleaseRecord> = entries
                    .iter()
                    .filter_map(|e| match &e.record {
                        PendingRecord::Release(r) => Some(r.clone()),
                        _ => None,
                    })
                    .collect();
                store.upsert_releases(&records).await
            }
        }
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
                }),
            );
        }
        out
    }
}

pub use PendingRecord as Record;

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
