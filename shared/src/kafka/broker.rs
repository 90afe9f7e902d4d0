// Broker seams: the publisher and the ingest worker only talk to these traits.
// `KafkaProducer` / `KafkaConsumer` back them with rdkafka, `MemoryBroker`
// with an in-process log.

use anyhow::Result;
use std::time::Duration;

/// Where the broker appended a record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub partition: i32,
    pub offset: i64,
}

/// A record pulled from a subscribed topic, owned so it can outlive the poll
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumedRecord {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub key: Option<Vec<u8>>,
    pub payload: Option<Vec<u8>>,
}

#[async_trait::async_trait]
pub trait BrokerProducer: Send + Sync {
    /// Append `payload` to `topic`, routed by `key`. Resolves once the broker accepted it.
    async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<DeliveryReceipt>;

    /// Wait for in-flight sends (graceful shutdown)
    async fn flush(&self, timeout: Duration) -> Result<()>;
}

#[async_trait::async_trait]
pub trait BrokerConsumer: Send + Sync {
    /// Up to `max_records` records. Waits at most `timeout` for the first one;
    /// an empty vec means nothing arrived.
    async fn poll_batch(&self, max_records: usize, timeout: Duration)
        -> Result<Vec<ConsumedRecord>>;

    /// Commit the group's position past `record` (offset + 1) for its partition
    async fn acknowledge(&self, record: &ConsumedRecord) -> Result<()>;

    /// Rewind the partition to `record` so the next poll delivers it again
    async fn redeliver(&self, record: &ConsumedRecord) -> Result<()>;
}
