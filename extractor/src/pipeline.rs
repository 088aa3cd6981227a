//! The extractor's three-stage per-file pipeline: a parser task feeds raw records onto a
//! bounded channel, a pool of record workers hash each record into a shared pending buffer,
//! and a single flush worker drains that buffer onto the broker whenever it fills.
//!
//! Splitting hashing out of parsing and publishing out of hashing lets each stage's
//! concurrency be tuned independently: parsing is inherently single-threaded per file, hashing
//! is the one step worth fanning out across `max_workers`, and publishing must stay strictly
//! ordered per batch so only one task ever touches the broker channel for a given file.

use anyhow::Result;
use parking_lot::Mutex as SyncMutex;
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::sync::{Mutex as AsyncMutex, RwLock, mpsc};
use tokio::time::{Duration, Instant};
use tracing::{debug, error, warn};

use discogsography_common::hashing::record_hash;

use crate::extractor::ExtractorState;
use crate::message_queue::MessageQueue;
use crate::state_marker::StateMarker;
use crate::types::{DataMessage, DataType, RawRecord, process_clock_secs};

const FLUSH_QUEUE_CAPACITY: usize = 100;
const INITIAL_BACKOFF: Duration = Duration::from_secs(30);
const MAX_BACKOFF: Duration = Duration::from_secs(300);
const WARN_RATE_LIMIT: Duration = Duration::from_secs(60);

pub struct PipelineConfig {
    pub data_type: DataType,
    pub batch_size: usize,
    pub worker_count: usize,
    pub state: Arc<RwLock<ExtractorState>>,
    pub state_marker: Arc<AsyncMutex<StateMarker>>,
    pub marker_path: PathBuf,
    pub file_name: String,
    pub state_save_interval: usize,
}

/// Drive stages 2 and 3 for one file: hash incoming records, buffer them, and publish batches.
/// Returns once `receiver` is exhausted and every buffered record has been flushed.
pub async fn run_pipeline(receiver: mpsc::Receiver<RawRecord>, mq: Arc<MessageQueue>, config: PipelineConfig) -> Result<()> {
    let PipelineConfig { data_type, batch_size, worker_count, state, state_marker, marker_path, file_name, state_save_interval } = config;

    let receiver = Arc::new(AsyncMutex::new(receiver));
    let pending: Arc<SyncMutex<Vec<DataMessage>>> = Arc::new(SyncMutex::new(Vec::with_capacity(batch_size)));
    let (flush_tx, flush_rx) = mpsc::channel::<()>(FLUSH_QUEUE_CAPACITY);
    let total_records = Arc::new(AtomicU64::new(0));
    let batches_sent = Arc::new(AtomicU64::new(0));
    let last_state_save = Arc::new(AtomicU64::new(0));
    let last_warn = Arc::new(SyncMutex::new(None::<Instant>));

    let flush_handle = tokio::spawn({
        let pending = pending.clone();
        let mq = mq.clone();
        let batches_sent = batches_sent.clone();
        async move { flush_worker(flush_rx, pending, mq, data_type, batches_sent).await }
    });

    let mut worker_handles = Vec::with_capacity(worker_count.max(1));
    for _ in 0..worker_count.max(1) {
        let receiver = receiver.clone();
        let pending = pending.clone();
        let flush_tx = flush_tx.clone();
        let state = state.clone();
        let state_marker = state_marker.clone();
        let marker_path = marker_path.clone();
        let file_name = file_name.clone();
        let total_records = total_records.clone();
        let batches_sent = batches_sent.clone();
        let last_state_save = last_state_save.clone();
        let last_warn = last_warn.clone();

        worker_handles.push(tokio::spawn(async move {
            record_worker(RecordWorkerArgs {
                receiver,
                pending,
                flush_tx,
                batch_size,
                data_type,
                state,
                state_marker,
                marker_path,
                file_name,
                state_save_interval,
                total_records,
                batches_sent,
                last_state_save,
                last_warn,
            })
            .await;
        }));
    }
    drop(flush_tx);

    for handle in worker_handles {
        handle.await?;
    }
    flush_handle.await?;

    // Whatever sits in the buffer below batch_size never earned a flush token; drain it now.
    let remaining = {
        let mut guard = pending.lock();
        std::mem::take(&mut *guard)
    };
    if !remaining.is_empty() {
        mq.publish_batch(remaining, data_type).await?;
    }

    Ok(())
}

struct RecordWorkerArgs {
    receiver: Arc<AsyncMutex<mpsc::Receiver<RawRecord>>>,
    pending: Arc<SyncMutex<Vec<DataMessage>>>,
    flush_tx: mpsc::Sender<()>,
    batch_size: usize,
    data_type: DataType,
    state: Arc<RwLock<ExtractorState>>,
    state_marker: Arc<AsyncMutex<StateMarker>>,
    marker_path: PathBuf,
    file_name: String,
    state_save_interval: usize,
    total_records: Arc<AtomicU64>,
    batches_sent: Arc<AtomicU64>,
    last_state_save: Arc<AtomicU64>,
    last_warn: Arc<SyncMutex<Option<Instant>>>,
}

/// Stage 2: hash records off the shared parse channel into the pending buffer, signalling the
/// flush worker once the buffer crosses `batch_size`.
async fn record_worker(args: RecordWorkerArgs) {
    let RecordWorkerArgs {
        receiver,
        pending,
        flush_tx,
        batch_size,
        data_type,
        state,
        state_marker,
        marker_path,
        file_name,
        state_save_interval,
        total_records,
        batches_sent,
        last_state_save,
        last_warn,
    } = args;

    loop {
        let record = {
            let mut guard = receiver.lock().await;
            guard.recv().await
        };
        let Some(record) = record else { break };

        let sha256 = record_hash(&record.data);
        let message = DataMessage { id: record.id, sha256, data: record.data };

        let should_flush = {
            let mut buf = pending.lock();
            buf.push(message);
            buf.len() >= batch_size
        };

        let count = total_records.fetch_add(1, Ordering::Relaxed) + 1;
        {
            let mut s = state.write().await;
            s.extraction_progress.increment(data_type);
            s.last_extraction_time.insert(data_type, process_clock_secs());
        }

        if count.is_multiple_of(state_save_interval as u64) && last_state_save.swap(count, Ordering::Relaxed) != count {
            let mut marker = state_marker.lock().await;
            marker.update_file_progress(&file_name, count, count, batches_sent.load(Ordering::Relaxed));
            if let Err(e) = marker.save(&marker_path).await {
                warn!("⚠️ Failed to save state marker progress: {}", e);
            } else {
                debug!("💾 Saved state marker progress: {} records for {}", count, file_name);
            }
        }

        if should_flush {
            signal_flush(&flush_tx, &last_warn).await;
        }
    }
}

/// Push one flush token. If the flush-queue is full the worker must not block the record
/// pipeline, so the retry is handed to a detached task with exponential backoff.
async fn signal_flush(flush_tx: &mpsc::Sender<()>, last_warn: &Arc<SyncMutex<Option<Instant>>>) {
    if flush_tx.try_send(()).is_ok() {
        return;
    }

    let flush_tx = flush_tx.clone();
    let last_warn = last_warn.clone();
    tokio::spawn(async move {
        let mut backoff = INITIAL_BACKOFF;
        loop {
            {
                let mut guard = last_warn.lock();
                let now = Instant::now();
                let should_warn = guard.is_none_or(|last| now.duration_since(last) >= WARN_RATE_LIMIT);
                if should_warn {
                    warn!("⚠️ Flush queue full, retrying in {:?}", backoff);
                    *guard = Some(now);
                }
            }

            tokio::time::sleep(backoff).await;
            if flush_tx.try_send(()).is_ok() {
                break;
            }
            backoff = (backoff * 2).min(MAX_BACKOFF);
        }
    });
}

/// Stage 3: the single task that ever touches the broker channel for this file. Each token
/// atomically drains the pending buffer and publishes it; a publish failure re-prepends the
/// drained records so the next successful flush carries them too.
async fn flush_worker(mut flush_rx: mpsc::Receiver<()>, pending: Arc<SyncMutex<Vec<DataMessage>>>, mq: Arc<MessageQueue>, data_type: DataType, batches_sent: Arc<AtomicU64>) {
    while flush_rx.recv().await.is_some() {
        let drained = {
            let mut guard = pending.lock();
            std::mem::take(&mut *guard)
        };
        if drained.is_empty() {
            continue;
        }

        let batch_len = drained.len();
        let retry_copy = drained.clone();
        match mq.publish_batch(drained, data_type).await {
            Ok(()) => {
                batches_sent.fetch_add(1, Ordering::Relaxed);
                debug!("✅ Flushed batch of {} {} records", batch_len, data_type);
            }
            Err(e) => {
                error!("❌ Failed to publish batch of {} {} records, re-buffering: {}", batch_len, data_type, e);
                let mut guard = pending.lock();
                let mut restored = retry_copy;
                restored.append(&mut guard);
                *guard = restored;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use tempfile::TempDir;

    fn test_pipeline_config(data_type: DataType, batch_size: usize, worker_count: usize) -> (PipelineConfig, TempDir) {
        let temp_dir = TempDir::new().unwrap();
        let marker_path = temp_dir.path().join(".extraction_status_test.json");
        let config = PipelineConfig {
            data_type,
            batch_size,
            worker_count,
            state: Arc::new(RwLock::new(ExtractorState::default())),
            state_marker: Arc::new(AsyncMutex::new(StateMarker::new("test".to_string()))),
            marker_path,
            file_name: "discogs_test_artists.xml.gz".to_string(),
            state_save_interval: 5000,
        };
        (config, temp_dir)
    }

    #[tokio::test]
    async fn record_worker_fills_pending_buffer_and_signals_flush_at_batch_size() {
        let (config, _tmp) = test_pipeline_config(DataType::Artists, 3, 1);
        let (sender, receiver) = mpsc::channel::<RawRecord>(10);

        for i in 0..3 {
            sender.send(RawRecord { id: i.to_string(), data: json!({ "name": format!("artist-{i}") }) }).await.unwrap();
        }
        drop(sender);

        let receiver = Arc::new(AsyncMutex::new(receiver));
        let pending = Arc::new(SyncMutex::new(Vec::new()));
        let (flush_tx, mut flush_rx) = mpsc::channel::<()>(FLUSH_QUEUE_CAPACITY);

        record_worker(RecordWorkerArgs {
            receiver,
            pending: pending.clone(),
            flush_tx,
            batch_size: config.batch_size,
            data_type: config.data_type,
            state: config.state.clone(),
            state_marker: config.state_marker.clone(),
            marker_path: config.marker_path.clone(),
            file_name: config.file_name.clone(),
            state_save_interval: config.state_save_interval,
            total_records: Arc::new(AtomicU64::new(0)),
            batches_sent: Arc::new(AtomicU64::new(0)),
            last_state_save: Arc::new(AtomicU64::new(0)),
            last_warn: Arc::new(SyncMutex::new(None)),
        })
        .await;

        assert_eq!(pending.lock().len(), 3);
        assert!(flush_rx.try_recv().is_ok(), "reaching batch_size should push a flush token");
    }

    #[tokio::test]
    async fn record_worker_updates_extraction_progress() {
        let (config, _tmp) = test_pipeline_config(DataType::Labels, 100, 1);
        let state = config.state.clone();
        let (sender, receiver) = mpsc::channel::<RawRecord>(10);

        for i in 0..4 {
            sender.send(RawRecord { id: i.to_string(), data: json!({ "name": format!("label-{i}") }) }).await.unwrap();
        }
        drop(sender);

        let receiver = Arc::new(AsyncMutex::new(receiver));
        let pending = Arc::new(SyncMutex::new(Vec::new()));
        let (flush_tx, _flush_rx) = mpsc::channel::<()>(FLUSH_QUEUE_CAPACITY);

        record_worker(RecordWorkerArgs {
            receiver,
            pending: pending.clone(),
            flush_tx,
            batch_size: config.batch_size,
            data_type: config.data_type,
            state: state.clone(),
            state_marker: config.state_marker.clone(),
            marker_path: config.marker_path.clone(),
            file_name: config.file_name.clone(),
            state_save_interval: config.state_save_interval,
            total_records: Arc::new(AtomicU64::new(0)),
            batches_sent: Arc::new(AtomicU64::new(0)),
            last_state_save: Arc::new(AtomicU64::new(0)),
            last_warn: Arc::new(SyncMutex::new(None)),
        })
        .await;

        assert_eq!(pending.lock().len(), 4);
        let s = state.read().await;
        assert_eq!(s.extraction_progress.labels, 4);
    }

    #[tokio::test]
    async fn signal_flush_sends_a_token_when_the_queue_has_room() {
        let (flush_tx, mut flush_rx) = mpsc::channel::<()>(1);
        let last_warn = Arc::new(SyncMutex::new(None));
        signal_flush(&flush_tx, &last_warn).await;
        assert!(flush_rx.try_recv().is_ok());
    }
}
