use anyhow::Result;
use discogsography_common::consumer::AmqpConsumerConnection;
use discogsography_common::logging::build_tracing_filter;
use discogsography_common::message::Message;
use discogsography_common::topology::QUEUE_PREFIX_TABLEINATOR;
use discogsography_common::DataType;
use futures::StreamExt;
use lapin::options::BasicAckOptions;
use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;
use tokio::signal;
use tracing::{error, info, warn};

mod batch_processor;
mod config;
mod health;
mod record;
mod store;

use batch_processor::{BatchConfig, BatchProcessor};
use config::TableinatorConfig;
use health::{HealthServer, TableinatorState};
use record::TableRecord;
use store::PostgresStore;

#[tokio::main]
async fn main() -> Result<()> {
    let log_level = std::env::var("LOG_LEVEL").unwrap_or_else(|_| "INFO".to_string());
    let filter = build_tracing_filter("tableinator", &log_level);
    tracing_subscriber::fmt().with_env_filter(filter).with_target(false).with_thread_ids(false).with_line_number(true).json().init();

    info!("🚀 Starting Rust-based Discogs relational-store consumer");

    let config = match TableinatorConfig::from_env() {
        Ok(c) => c,
        Err(e) => {
            error!("❌ Configuration error: {}", e);
            std::process::exit(1);
        }
    };

    let state = Arc::new(TableinatorState::default());

    let store = match PostgresStore::connect(&config.postgres_dsn, config.pool_size).await {
        Ok(s) => s,
        Err(e) => {
            error!("❌ Failed to connect to PostgreSQL: {}", e);
            std::process::exit(1);
        }
    };
    if let Err(e) = store.ensure_tables().await {
        error!("❌ Failed to create PostgreSQL tables: {}", e);
        std::process::exit(1);
    }
    state.connected.store(true, Ordering::Relaxed);

    let batch_config = BatchConfig { batch_size: config.batch_size, flush_interval: Duration::from_secs(config.flush_interval_secs) };
    let processor = BatchProcessor::new(store, batch_config);

    let health_server = HealthServer::new(config.health_port, state.clone(), processor.clone());
    let health_handle = tokio::spawn(async move {
        if let Err(e) = health_server.run().await {
            error!("❌ Health server error: {}", e);
        }
    });

    let flush_handle = tokio::spawn(processor.clone().periodic_flush());

    let amqp = Arc::new(
        AmqpConsumerConnection::connect(&config.amqp_connection, QUEUE_PREFIX_TABLEINATOR, config.prefetch, config.max_retries).await?,
    );

    let shutdown = setup_shutdown_handler();

    let mut consumer_handles = Vec::new();
    for data_type in DataType::all() {
        let amqp = amqp.clone();
        let processor = processor.clone();
        let state = state.clone();
        let shutdown = shutdown.clone();
        consumer_handles.push(tokio::spawn(async move {
            if let Err(e) = consume_data_type(amqp, data_type, processor, state, shutdown).await {
                error!("❌ {} consumer task failed: {}", data_type, e);
            }
        }));
    }

    shutdown.notified().await;
    info!("🛑 Shutting down tableinator...");

    for handle in consumer_handles {
        handle.abort();
    }
    flush_handle.abort();
    health_handle.abort();

    processor.flush_all().await;

    info!("✅ Tableinator shutdown complete");
    Ok(())
}

/// Consumes one data type's queue for the lifetime of the process, converting each delivery
/// into a [`TableRecord`] and handing file-complete sentinels straight through to an ack
/// (§4.6 only materialises `data` messages).
async fn consume_data_type(
    amqp: Arc<AmqpConsumerConnection>,
    data_type: DataType,
    processor: Arc<BatchProcessor>,
    state: Arc<TableinatorState>,
    shutdown: Arc<tokio::sync::Notify>,
) -> Result<()> {
    let consumer_tag = format!("tableinator-{}", data_type);
    let mut consumer = amqp.consume(data_type, &consumer_tag).await?;

    loop {
        tokio::select! {
            _ = shutdown.notified() => {
                return Ok(());
            }
            delivery = consumer.next() => {
                let Some(delivery) = delivery else { return Ok(()) };
                let delivery = match delivery {
                    Ok(d) => d,
                    Err(e) => {
                        warn!("⚠️ Error receiving {} delivery: {}", data_type, e);
                        continue;
                    }
                };

                let message: Message = match serde_json::from_slice(&delivery.data) {
                    Ok(m) => m,
                    Err(e) => {
                        error!("❌ Failed to parse {} message, acking to drop poison payload: {}", data_type, e);
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                        continue;
                    }
                };

                state.messages_consumed.fetch_add(1, Ordering::Relaxed);

                match message {
                    Message::FileComplete(sentinel) => {
                        info!("🎉 {} file complete: {} ({} records)", data_type, sentinel.file, sentinel.total_processed);
                        let _ = delivery.ack(BasicAckOptions::default()).await;
                    }
                    Message::Data(data_message) => {
                        let record = TableRecord::from_message(&data_message);
                        processor.add_message(data_type, record, delivery).await;
                    }
                }
            }
        }
    }
}

fn setup_shutdown_handler() -> Arc<tokio::sync::Notify> {
    let shutdown = Arc::new(tokio::sync::Notify::new());
    let shutdown_clone = shutdown.clone();

    tokio::spawn(async move {
        let _ = signal::ctrl_c().await;
        info!("🛑 Received shutdown signal");
        shutdown_clone.notify_waiters();
    });

    shutdown
}
