//! In-process broker
//!
//! A partitioned, append-only log with consumer-group committed offsets.
//! Keys are routed with Kafka's murmur2 partitioner, so a sender lands on the
//! same partition here as on a real cluster with the same partition count.
//! Each subscription is the only member of its group: it reads every
//! partition of the topic.
//!
//! Sends can be made to fail or stall, which is how the ingest tests simulate
//! a broker outage.

use anyhow::{bail, Result};
use murmur2::{murmur2, KAFKA_SEED};
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;

use super::broker::{BrokerConsumer, BrokerProducer, ConsumedRecord, DeliveryReceipt};

pub const DEFAULT_PARTITIONS: i32 = 3;

#[derive(Debug, Clone)]
struct StoredRecord {
    key: Option<Vec<u8>>,
    payload: Option<Vec<u8>>,
}

#[derive(Debug, Default)]
struct BrokerState {
    topics: HashMap<String, Vec<Vec<StoredRecord>>>,
    /// (group, topic, partition) -> next offset to read after a restart
    committed: HashMap<(String, String, i32), i64>,
    failing_sends: u32,
    send_delay: Option<Duration>,
}

struct Inner {
    partitions: i32,
    state: Mutex<BrokerState>,
    appended: Notify,
}

/// Cheap to clone; clones share the same log
#[derive(Clone)]
pub struct MemoryBroker {
    inner: Arc<Inner>,
}

impl MemoryBroker {
    pub fn new(partitions: i32) -> Self {
        Self {
            inner: Arc::new(Inner {
                partitions: partitions.max(1),
                state: Mutex::new(BrokerState::default()),
                appended: Notify::new(),
            }),
        }
    }

    fn state(&self) -> MutexGuard<'_, BrokerState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn partition_count(&self) -> i32 {
        self.inner.partitions
    }

    /// Kafka default partitioner: `toPositive(murmur2(key)) % partitions`
    pub fn partition_for(&self, key: &[u8]) -> i32 {
        if key.is_empty() {
            return 0;
        }
        ((murmur2(key, KAFKA_SEED) & 0x7fffffff) as i32) % self.inner.partitions
    }

    /// The next `count` sends fail with a broker error
    pub fn fail_next_sends(&self, count: u32) {
        self.state().failing_sends = count;
    }

    /// Every send sleeps this long before appending (`None` to clear)
    pub fn set_send_delay(&self, delay: Option<Duration>) {
        self.state().send_delay = delay;
    }

    /// Append bypassing failure injection, e.g. to plant a payload no producer would write
    pub fn append_raw(
        &self,
        topic: &str,
        key: Option<&[u8]>,
        payload: Option<&[u8]>,
    ) -> DeliveryReceipt {
        let partition = key.map(|k| self.partition_for(k)).unwrap_or(0);
        let receipt = {
            let mut state = self.state();
            let partitions = self.inner.partitions as usize;
            let log = state
                .topics
                .entry(topic.to_string())
                .or_insert_with(|| vec![Vec::new(); partitions]);
            let slot = &mut log[partition as usize];
            slot.push(StoredRecord {
                key: key.map(<[u8]>::to_vec),
                payload: payload.map(<[u8]>::to_vec),
            });
            DeliveryReceipt {
                partition,
                offset: slot.len() as i64 - 1,
            }
        };
        self.inner.appended.notify_waiters();
        receipt
    }

    /// Every record of `topic`, partition by partition, each in offset order
    pub fn records(&self, topic: &str) -> Vec<ConsumedRecord> {
        let state = self.state();
        let Some(log) = state.topics.get(topic) else {
            return Vec::new();
        };
        log.iter()
            .enumerate()
            .flat_map(|(partition, slot)| {
                slot.iter().enumerate().map(move |(offset, record)| ConsumedRecord {
                    topic: topic.to_string(),
                    partition: partition as i32,
                    offset: offset as i64,
                    key: record.key.clone(),
                    payload: record.payload.clone(),
                })
            })
            .collect()
    }

    pub fn committed_offset(&self, group: &str, topic: &str, partition: i32) -> Option<i64> {
        self.state()
            .committed
            .get(&(group.to_string(), topic.to_string(), partition))
            .copied()
    }

    /// Join `group` on `topic`, resuming from the group's committed offsets
    pub fn subscribe(&self, topic: &str, group: &str) -> MemoryConsumer {
        let positions = {
            let state = self.state();
            (0..self.inner.partitions)
                .map(|p| {
                    let committed = state
                        .committed
                        .get(&(group.to_string(), topic.to_string(), p))
                        .copied()
                        .unwrap_or(0);
                    (p, committed)
                })
                .collect()
        };

        MemoryConsumer {
            broker: self.clone(),
            topic: topic.to_string(),
            group: group.to_string(),
            positions: Mutex::new(positions),
            next_partition: AtomicUsize::new(0),
        }
    }
}

impl Default for MemoryBroker {
    fn default() -> Self {
        Self::new(DEFAULT_PARTITIONS)
    }
}

#[async_trait::async_trait]
impl BrokerProducer for MemoryBroker {
    async fn send(&self, topic: &str, key: &[u8], payload: &[u8]) -> Result<DeliveryReceipt> {
        let delay = {
            let mut state = self.state();
            if state.failing_sends > 0 {
                state.failing_sends -= 1;
                bail!("Broker unavailable (injected failure)");
            }
            state.send_delay
        };

        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }

        Ok(self.append_raw(topic, Some(key), Some(payload)))
    }

    async fn flush(&self, _timeout: Duration) -> Result<()> {
        Ok(())
    }
}

/// A single-member consumer group subscription on a [`MemoryBroker`]
pub struct MemoryConsumer {
    broker: MemoryBroker,
    topic: String,
    group: String,
    positions: Mutex<HashMap<i32, i64>>,
    next_partition: AtomicUsize,
}

impl MemoryConsumer {
    fn positions(&self) -> MutexGuard<'_, HashMap<i32, i64>> {
        self.positions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Round-robin over partitions, one record per partition per pass, starting
    /// one partition further on each poll so a backlog cannot starve the rest.
    fn take_available(&self, max_records: usize) -> Vec<ConsumedRecord> {
        let state = self.broker.state();
        let Some(log) = state.topics.get(&self.topic) else {
            return Vec::new();
        };
        if log.is_empty() {
            return Vec::new();
        }
        let mut positions = self.positions();
        let mut batch = Vec::new();
        let start = self.next_partition.fetch_add(1, Ordering::Relaxed) % log.len();

        loop {
            let before = batch.len();
            for step in 0..log.len() {
                if batch.len() >= max_records {
                    return batch;
                }
                let index = (start + step) % log.len();
                let slot = &log[index];
                let partition = index as i32;
                let position = positions.entry(partition).or_insert(0);
                if let Some(record) = slot.get(*position as usize) {
                    batch.push(ConsumedRecord {
                        topic: self.topic.clone(),
                        partition,
                        offset: *position,
                        key: record.key.clone(),
                        payload: record.payload.clone(),
                    });
                    *position += 1;
                }
            }
            if batch.len() == before {
                return batch;
            }
        }
    }
}

#[async_trait::async_trait]
impl BrokerConsumer for MemoryConsumer {
    async fn poll_batch(
        &self,
        max_records: usize,
        timeout: Duration,
    ) -> Result<Vec<ConsumedRecord>> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let appended = self.broker.inner.appended.notified();
            tokio::pin!(appended);
            // register before checking so an append in between is not missed
            appended.as_mut().enable();

            let batch = self.take_available(max_records.max(1));
            if !batch.is_empty() {
                return Ok(batch);
            }
            if tokio::time::timeout_at(deadline, appended).await.is_err() {
                return Ok(Vec::new());
            }
        }
    }

    async fn acknowledge(&self, record: &ConsumedRecord) -> Result<()> {
        self.broker.state().committed.insert(
            (self.group.clone(), record.topic.clone(), record.partition),
            record.offset + 1,
        );
        Ok(())
    }

    async fn redeliver(&self, record: &ConsumedRecord) -> Result<()> {
        self.positions().insert(record.partition, record.offset);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const TOPIC: &str = "chat-messages";
    const GROUP: &str = "chat-service-group";

    #[tokio::test]
    async fn test_same_key_same_partition_in_order() {
        let broker = MemoryBroker::default();
        let first = broker.send(TOPIC, b"u1", b"m1").await.unwrap();
        let second = broker.send(TOPIC, b"u1", b"m2").await.unwrap();

        assert_eq!(first.partition, second.partition);
        assert_eq!(first.partition, broker.partition_for(b"u1"));
        assert_eq!(second.offset, first.offset + 1);
    }

    #[tokio::test]
    async fn test_poll_times_out_empty() {
        let broker = MemoryBroker::default();
        let consumer = broker.subscribe(TOPIC, GROUP);
        let batch = consumer
            .poll_batch(10, Duration::from_millis(20))
            .await
            .unwrap();
        assert!(batch.is_empty());
    }

    #[tokio::test]
    async fn test_poll_wakes_on_append() {
        let broker = MemoryBroker::default();
        let consumer = broker.subscribe(TOPIC, GROUP);

        let producer = broker.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            producer.send(TOPIC, b"u1", b"late").await.unwrap();
        });

        let batch = consumer.poll_batch(10, Duration::from_secs(5)).await.unwrap();
        assert_eq!(batch.len(), 1);
        assert_eq!(batch[0].payload.as_deref(), Some(&b"late"[..]));
    }

    #[tokio::test]
    async fn test_redeliver_rewinds_and_resubscribe_resumes_from_commit() {
        let broker = MemoryBroker::new(1);
        for payload in [b"a", b"b", b"c"] {
            broker.send(TOPIC, b"u1", payload).await.unwrap();
        }

        let consumer = broker.subscribe(TOPIC, GROUP);
        let batch = consumer.poll_batch(10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(batch.len(), 3);

        consumer.acknowledge(&batch[0]).await.unwrap();
        consumer.redeliver(&batch[1]).await.unwrap();
        assert_eq!(broker.committed_offset(GROUP, TOPIC, 0), Some(1));

        let again = consumer.poll_batch(10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(again.iter().map(|r| r.offset).collect::<Vec<_>>(), vec![1, 2]);

        // a fresh member starts at the committed offset, not at the old position
        drop(consumer);
        let restarted = broker.subscribe(TOPIC, GROUP);
        let resumed = restarted.poll_batch(10, Duration::from_millis(50)).await.unwrap();
        assert_eq!(resumed.first().map(|r| r.offset), Some(1));
    }

    #[tokio::test]
    async fn test_injected_send_failures() {
        let broker = MemoryBroker::default();
        broker.fail_next_sends(1);

        assert!(broker.send(TOPIC, b"u1", b"x").await.is_err());
        assert!(broker.send(TOPIC, b"u1", b"x").await.is_ok());
        assert_eq!(broker.records(TOPIC).len(), 1);
    }

    #[tokio::test]
    async fn test_batch_respects_max_records() {
        let broker = MemoryBroker::new(1);
        for i in 0..5u8 {
            broker.send(TOPIC, b"u1", &[i]).await.unwrap();
        }
        let consumer = broker.subscribe(TOPIC, GROUP);
        let batch = consumer.poll_batch(2, Duration::from_millis(50)).await.unwrap();
        assert_eq!(batch.len(), 2);
    }

    #[tokio::test]
    async fn test_backlogged_partition_does_not_starve_others() {
        let broker = MemoryBroker::new(3);
        let busy = broker.partition_for(b"u1");
        for i in 0..10u8 {
            broker.append_raw(TOPIC, Some(&b"u1"[..]), Some(&[i][..]));
        }
        let quiet_key = (0..100)
            .map(|i| format!("other-{}", i))
            .find(|k| broker.partition_for(k.as_bytes()) != busy)
            .unwrap();
        broker.append_raw(TOPIC, Some(quiet_key.as_bytes()), Some(&b"q"[..]));

        let consumer = broker.subscribe(TOPIC, GROUP);
        let batch = consumer.poll_batch(4, Duration::from_millis(50)).await.unwrap();

        assert_eq!(batch.len(), 4);
        assert!(batch.iter().any(|r| r.payload.as_deref() == Some(&b"q"[..])));
        let busy_offsets: Vec<i64> = batch
            .iter()
            .filter(|r| r.partition == busy)
            .map(|r| r.offset)
            .collect();
        assert_eq!(busy_offsets, vec![0, 1, 2]);
    }
}
