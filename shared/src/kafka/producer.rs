use anyhow::{Context, Result};
use rdkafka::producer::{FutureProducer, FutureRecord, Producer};
use rdkafka::util::Timeout;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

use super::broker::{BrokerProducer, DeliveryReceipt};
use super::config::create_client_config;
use chat_config::KafkaConfig;

/// How long `send` may wait for room in librdkafka's local queue
const QUEUE_TIMEOUT: Duration = Duration::from_secs(2);

/// rdkafka-backed producer
///
/// This producer is configured for:
/// - At-least-once delivery (`acks=all`)
/// - Idempotent writes (no duplicates within one producer session)
/// - Finite retries bounded by `delivery.timeout.ms`, so every send resolves
pub struct KafkaProducer {
    /// The actual Kafka producer (None when disabled)
    producer: Option<Arc<FutureProducer>>,
    enabled: bool,
}

impl KafkaProducer {
    /// Create a new Kafka producer from the application configuration.
    ///
    /// # Configuration
    /// - `acks`, `enable.idempotence`, `retries`: reliability
    /// - `request.timeout.ms`: per broker request
    /// - `delivery.timeout.ms`: end-to-end bound including retries
    pub fn new(config: &KafkaConfig) -> Result<Self> {
        if !config.enabled {
            info!("Kafka producer disabled (KAFKA_ENABLED=false)");
            return Ok(Self {
                producer: None,
                enabled: false,
            });
        }

        info!("Initializing Kafka producer...");
        let mut client_config = create_client_config(config)?;

        let producer: FutureProducer = client_config
            .set("acks", &config.producer_acks)
            .set(
                "enable.idempotence",
                if config.producer_enable_idempotence {
                    "true"
                } else {
                    "false"
                },
            )
            .set(
                "max.in.flight.requests.per.connection",
                config.producer_max_in_flight.to_string(),
            )
            .set("retries", config.producer_retries.to_string())
            .set("compression.type", &config.producer_compression)
            .set("linger.ms", config.producer_linger_ms.to_string())
            .set("batch.size", config.producer_batch_size.to_string())
            .set(
                "request.timeout.ms",
                config.producer_request_timeout_ms.to_string(),
            )
            .set(
                "delivery.timeout.ms",
                config.producer_delivery_timeout_ms.to_string(),
            )
            .create()
            .context("Failed to create Kafka producer")?;

        info!(
            brokers = %config.brokers,
            retries = config.producer_retries,
            delivery_timeout_ms = config.producer_delivery_timeout_ms,
            "Kafka producer initialized"
        );

        Ok(Self {
            producer: Some(Arc::new(producer)),
            enabled: true,
        })
    }

    /// Check if Kafka is enabled
    pub fn is_enabled(&self) -> bool {
        self.enabled
    }
}

#[async_trait::async_trait]
impl BrokerProducer for KafkaProducer {
    async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<DeliveryReceipt> {
        let producer = match &self.producer {
            Some(p) => p,
            None => {
                debug!(topic = %topic, "Kafka disabled - record NOT sent");
                anyhow::bail!("Kafka is disabled - record not sent to {}", topic);
            }
        };

        let record = FutureRecord::to(topic).key(key).payload(payload);

        match producer.send(record, Timeout::After(QUEUE_TIMEOUT)).await {
            Ok((partition, offset)) => Ok(DeliveryReceipt { partition, offset }),
            Err((kafka_err, _)) => Err(anyhow::anyhow!("Kafka send failed: {}", kafka_err)),
        }
    }

    async fn flush(&self, timeout: Duration) -> Result<()> {
        let producer = match &self.producer {
            Some(p) => p,
            None => return Ok(()),
        };

        info!("Flushing Kafka producer (timeout: {:?})", timeout);

        producer
            .flush(Timeout::After(timeout))
            .context("Failed to flush Kafka producer")?;

        info!("Kafka producer flushed successfully");
        Ok(())
    }
}
