//! Consumer-side AMQP connection management shared by the graph and relational consumers.
//!
//! Mirrors the extractor's own publisher connection: the same retry/backoff on connect, the
//! same idempotent exchange/DLX declaration, and a re-declare of the calling consumer family's
//! own queues (so either consumer can start before the extractor has ever run). Each consumer
//! then pulls a `lapin::Consumer` per data type with its configured prefetch.

use crate::data_type::DataType;
use crate::topology::{EXCHANGE, dead_letter_exchange, dead_letter_queue_name, queue_name};
use anyhow::{Context, Result};
use lapin::{Channel, Connection, ConnectionProperties, Consumer, ExchangeKind, options::*, types::FieldTable};
use std::time::Duration;
use tokio::time::sleep;
use tracing::{info, warn};

const AMQP_EXCHANGE_TYPE: ExchangeKind = ExchangeKind::Topic;

/// An open AMQP connection bound to one consumer family's queues (`discogsography-graphinator-*`
/// or `discogsography-tableinator-*`).
pub struct AmqpConsumerConnection {
    connection: Connection,
    channel: Channel,
    queue_prefix: &'static str,
    prefetch: u16,
}

impl AmqpConsumerConnection {
    pub async fn connect(url: &str, queue_prefix: &'static str, prefetch: u16, max_retries: u32) -> Result<Self> {
        let mut retry_count = 0;
        let mut backoff = Duration::from_secs(1);

        loop {
            match Self::try_connect(url, queue_prefix, prefetch).await {
                Ok((connection, channel)) => {
                    info!("✅ Successfully connected to AMQP broker ({})", queue_prefix);
                    return Ok(Self { connection, channel, queue_prefix, prefetch });
                }
                Err(e) => {
                    retry_count += 1;
                    if retry_count >= max_retries {
                        return Err(e).context("Failed to connect to AMQP broker after retries");
                    }
                    warn!("⚠️ Failed to connect to AMQP (attempt {}/{}): {}", retry_count, max_retries, e);
                    sleep(backoff).await;
                    backoff = (backoff * 2).min(Duration::from_secs(30));
                }
            }
        }
    }

    async fn try_connect(url: &str, queue_prefix: &'static str, prefetch: u16) -> Result<(Connection, Channel)> {
        let connection = Connection::connect(url, ConnectionProperties::default().with_connection_name(queue_prefix.into()))
            .await
            .context("Failed to establish AMQP connection")?;

        let channel = connection.create_channel().await.context("Failed to create AMQP channel")?;

        channel.basic_qos(prefetch, BasicQosOptions::default()).await.context("Failed to set QoS")?;

        channel
            .exchange_declare(
                EXCHANGE,
                AMQP_EXCHANGE_TYPE,
                ExchangeDeclareOptions { durable: true, auto_delete: false, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare exchange")?;

        let dlx_exchange = dead_letter_exchange();
        channel
            .exchange_declare(
                &dlx_exchange,
                AMQP_EXCHANGE_TYPE,
                ExchangeDeclareOptions { durable: true, auto_delete: false, ..Default::default() },
                FieldTable::default(),
            )
            .await
            .context("Failed to declare dead-letter exchange")?;

        let mut queue_args = FieldTable::default();
        queue_args.insert("x-queue-type".into(), lapin::types::AMQPValue::LongString("quorum".into()));
        queue_args.insert("x-dead-letter-exchange".into(), lapin::types::AMQPValue::LongString(dlx_exchange.clone().into()));
        queue_args.insert("x-delivery-limit".into(), lapin::types::AMQPValue::LongInt(crate::topology::DELIVERY_LIMIT));

        let mut dlq_args = FieldTable::default();
        dlq_args.insert("x-queue-type".into(), lapin::types::AMQPValue::LongString("classic".into()));

        for data_type in DataType::all() {
            let queue = queue_name(queue_prefix, data_type);
            let dlq = dead_letter_queue_name(&queue);

            channel
                .queue_declare(&dlq, QueueDeclareOptions { durable: true, auto_delete: false, ..Default::default() }, dlq_args.clone())
                .await
                .with_context(|| format!("Failed to declare {} DLQ", queue))?;
            channel
                .queue_bind(&dlq, &dlx_exchange, data_type.routing_key(), QueueBindOptions::default(), FieldTable::default())
                .await
                .with_context(|| format!("Failed to bind {} DLQ", queue))?;

            channel
                .queue_declare(&queue, QueueDeclareOptions { durable: true, auto_delete: false, ..Default::default() }, queue_args.clone())
                .await
                .with_context(|| format!("Failed to declare {} queue", queue))?;
            channel
                .queue_bind(&queue, EXCHANGE, data_type.routing_key(), QueueBindOptions::default(), FieldTable::default())
                .await
                .with_context(|| format!("Failed to bind {} queue", queue))?;
        }

        Ok((connection, channel))
    }

    /// Starts consuming the given data type's queue with a unique consumer tag.
    pub async fn consume(&self, data_type: DataType, consumer_tag: &str) -> Result<Consumer> {
        let queue = queue_name(self.queue_prefix, data_type);
        self.channel
            .basic_consume(&queue, consumer_tag, BasicConsumeOptions::default(), FieldTable::default())
            .await
            .with_context(|| format!("Failed to start consuming {}", queue))
    }

    pub fn channel(&self) -> &Channel {
        &self.channel
    }

    pub fn prefetch(&self) -> u16 {
        self.prefetch
    }

    pub async fn close(self) -> Result<()> {
        self.channel.close(200, "Normal shutdown").await?;
        self.connection.close(200, "Normal shutdown").await?;
        info!("🔌 AMQP connection closed ({})", self.queue_prefix);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn queue_prefix_is_carried_through() {
        // Compile-time sanity: both consumer families resolve to distinct queue prefixes.
        assert_ne!(crate::topology::QUEUE_PREFIX_GRAPHINATOR, crate::topology::QUEUE_PREFIX_TABLEINATOR);
    }
}
