use anyhow::{Context, Result};
use futures_util::FutureExt;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::message::BorrowedMessage;
use rdkafka::{Message, Offset, TopicPartitionList};
use std::time::Duration;
use tracing::{info, warn};

use super::broker::{BrokerConsumer, ConsumedRecord};
use super::config::create_client_config;
use chat_config::KafkaConfig;

const SEEK_TIMEOUT: Duration = Duration::from_secs(5);

/// rdkafka-backed consumer for the ingest worker
///
/// This consumer is configured for:
/// - Manual, per-record offset commits (after successful persistence)
/// - Consumer group coordination (multiple ingest workers)
/// - Auto-rebalancing on worker addition/removal
pub struct KafkaConsumer {
    consumer: StreamConsumer,
}

impl KafkaConsumer {
    /// Create a consumer and subscribe it to `config.topic` under `config.consumer_group`.
    ///
    /// # Configuration
    /// - `enable.auto.commit=false`: offsets move only through `acknowledge`
    /// - `auto.offset.reset=earliest`: a new group starts from the beginning
    /// - `max.poll.interval.ms=300000`: a stuck store call may hold a partition up to 5 min
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        if !config.enabled {
            anyhow::bail!("Cannot create Kafka consumer when Kafka is disabled");
        }

        info!("Initializing Kafka consumer...");
        let mut client_config = create_client_config(config)?;

        let consumer: StreamConsumer = client_config
            .set("group.id", &config.consumer_group)
            .set("enable.auto.commit", "false")
            .set("enable.auto.offset.store", "false")
            .set("auto.offset.reset", "earliest")
            .set("allow.auto.create.topics", "true")
            .set("fetch.min.bytes", "1")
            .set("fetch.wait.max.ms", "500")
            .set("max.partition.fetch.bytes", "1048576")
            .set("session.timeout.ms", "30000")
            .set("heartbeat.interval.ms", "3000")
            .set("max.poll.interval.ms", "300000")
            .create()
            .context("Failed to create Kafka consumer")?;

        consumer
            .subscribe(&[&config.topic])
            .context("Failed to subscribe to Kafka topic")?;

        info!(
            "Kafka consumer initialized for topic '{}' in group '{}'",
            config.topic, config.consumer_group
        );

        Ok(Self { consumer })
    }
}

fn to_record(message: &BorrowedMessage<'_>) -> ConsumedRecord {
    ConsumedRecord {
        topic: message.topic().to_string(),
        partition: message.partition(),
        offset: message.offset(),
        key: message.key().map(<[u8]>::to_vec),
        payload: message.payload().map(<[u8]>::to_vec),
    }
}

#[async_trait::async_trait]
impl BrokerConsumer for KafkaConsumer {
    async fn poll_batch(
        &self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<ConsumedRecord>> {
        let mut batch = Vec::with_capacity(max_records);

        match tokio::time::timeout(timeout, self.consumer.recv()).await {
            Err(_) => return Ok(batch),
            Ok(Err(e)) => return Err(anyhow::anyhow!("Consumer error: {}", e)),
            Ok(Ok(message)) => batch.push(to_record(&message)),
        }

        // Drain whatever is already buffered locally, without waiting
        while batch.len() < max_records {
            match self.consumer.recv().now_or_never() {
                Some(Ok(message)) => batch.push(to_record(&message)),
                Some(Err(e)) => {
                    warn!(error = %e, "Kafka consumer error while filling batch");
                    break;
                }
                None => break,
            }
        }

        Ok(batch)
    }

    async fn acknowledge(&self, record: &ConsumedRecord) -> Result<()> {
        let mut tpl = TopicPartitionList::new();
        tpl.add_partition_offset(
            &record.topic,
            record.partition,
            Offset::Offset(record.offset + 1),
        )
        .context("Failed to build commit offset list")?;

        self.consumer
            .commit(&tpl, CommitMode::Sync)
            .context("Failed to commit offset")?;
        Ok(())
    }

    async fn redeliver(&self, record: &ConsumedRecord) -> Result<()> {
        self.consumer
            .seek(
                &record.topic,
                record.partition,
                Offset::Offset(record.offset),
                SEEK_TIMEOUT,
            )
            .context("Failed to seek partition back to unacknowledged record")?;
        Ok(())
    }
}
