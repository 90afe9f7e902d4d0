// ============================================================================
// Consumer Loop
// ============================================================================
//
// Offsets are committed per record and ONLY after `process_record` returned
// Ok. A failed record is sought back so the next poll delivers it again, and
// the rest of its partition's batch is dropped: committing a later offset
// would implicitly acknowledge the failed one.
//
// If the seek itself keeps failing, the consumer's position is already past
// the failed record. The loop then stops with `RewindFailed` instead of
// polling again, so the consumer is rebuilt from the committed offset.
//
// Partitions of a batch are processed concurrently; records of one partition
// strictly in offset order.
//
// ============================================================================

use anyhow::Result;
use futures_util::future::join_all;
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, error, info, warn};

use crate::ingest_worker::processor::{process_record, ProcessResult};
use crate::ingest_worker::state::WorkerState;
use crate::kafka::metrics;
use crate::kafka::{BrokerConsumer, ConsumedRecord};

const DLQ_FLUSH_TIMEOUT: Duration = Duration::from_secs(10);
const REWIND_ATTEMPTS: u32 = 3;
const REWIND_RETRY_DELAY: Duration = Duration::from_millis(100);

/// A failed record could not be sought back. Nothing on this consumer may be
/// acknowledged any more; it has to be recreated from the committed offsets.
#[derive(Debug, thiserror::Error)]
#[error("failed to rewind {topic}[{partition}] to offset {offset}: {reason}")]
pub struct RewindFailed {
    pub topic: String,
    pub partition: i32,
    pub offset: i64,
    pub reason: String,
}

/// Per-batch (and per-interval) record counts
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct BatchSummary {
    pub persisted: u64,
    pub duplicates: u64,
    pub dead_lettered: u64,
    /// Records that failed and were sought back
    pub failed: u64,
    /// Records dropped from the batch behind a failed one (redelivered too)
    pub deferred: u64,
}

impl BatchSummary {
    pub fn merge(&mut self, other: BatchSummary) {
        self.persisted += other.persisted;
        self.duplicates += other.duplicates;
        self.dead_lettered += other.dead_lettered;
        self.failed += other.failed;
        self.deferred += other.deferred;
    }

    pub fn acknowledged(&self) -> u64 {
        self.persisted + self.duplicates + self.dead_lettered
    }
}

/// Process one polled batch: partitions concurrently, records of a partition in order.
///
/// Errs only with [`RewindFailed`]; ordinary record failures are counted in
/// the summary and redelivered.
pub async fn process_batch(
    state: &WorkerState,
    consumer: &dyn BrokerConsumer,
    batch: Vec<ConsumedRecord>,
) -> Result<BatchSummary, RewindFailed> {
    let mut partitions: BTreeMap<(String, i32), Vec<ConsumedRecord>> = BTreeMap::new();
    for record in batch {
        partitions
            .entry((record.topic.clone(), record.partition))
            .or_default()
            .push(record);
    }

    let results = join_all(
        partitions
            .into_values()
            .map(|records| process_partition(state, consumer, records)),
    )
    .await;

    let mut summary = BatchSummary::default();
    for partition_summary in results {
        summary.merge(partition_summary?);
    }
    Ok(summary)
}

async fn process_partition(
    state: &WorkerState,
    consumer: &dyn BrokerConsumer,
    records: Vec<ConsumedRecord>,
) -> Result<BatchSummary, RewindFailed> {
    let mut summary = BatchSummary::default();
    let total = records.len();

    for (index, record) in records.iter().enumerate() {
        match process_record(state, record).await {
            Ok(result) => {
                match result {
                    ProcessResult::Persisted { .. } => summary.persisted += 1,
                    ProcessResult::Duplicate { .. } => summary.duplicates += 1,
                    ProcessResult::DeadLettered => summary.dead_lettered += 1,
                }

                // A later commit covers this offset too, so a failed commit only
                // means a redelivery that dedup absorbs.
                if let Err(e) = consumer.acknowledge(record).await {
                    error!(
                        error = %e,
                        partition = record.partition,
                        offset = record.offset,
                        "Failed to commit offset after processing"
                    );
                } else {
                    debug!(
                        partition = record.partition,
                        offset = record.offset,
                        "Offset committed"
                    );
                }
            }
            Err(e) => {
                metrics::INGEST_FAILURE.inc();
                summary.failed += 1;
                summary.deferred += (total - index - 1) as u64;

                error!(
                    error = %format!("{:#}", e),
                    partition = record.partition,
                    offset = record.offset,
                    "Failed to process record - offset NOT committed, will be redelivered"
                );

                rewind(consumer, record).await?;
                break;
            }
        }
    }

    Ok(summary)
}

async fn rewind(
    consumer: &dyn BrokerConsumer,
    record: &ConsumedRecord,
) -> Result<(), RewindFailed> {
    let mut attempt = 1;
    loop {
        match consumer.redeliver(record).await {
            Ok(()) => return Ok(()),
            Err(e) if attempt < REWIND_ATTEMPTS => {
                warn!(
                    error = %e,
                    attempt,
                    partition = record.partition,
                    offset = record.offset,
                    "Failed to seek back to failed record, retrying"
                );
                attempt += 1;
                tokio::time::sleep(REWIND_RETRY_DELAY).await;
            }
            Err(e) => {
                error!(
                    error = %e,
                    partition = record.partition,
                    offset = record.offset,
                    "Failed to seek back to failed record - consumer must be recreated"
                );
                return Err(RewindFailed {
                    topic: record.topic.clone(),
                    partition: record.partition,
                    offset: record.offset,
                    reason: format!("{:#}", e),
                });
            }
        }
    }
}

/// Poll once and process whatever arrived.
pub async fn poll_and_process(
    state: &WorkerState,
    consumer: &dyn BrokerConsumer,
) -> Result<BatchSummary> {
    let batch = consumer
        .poll_batch(state.worker.max_batch_size, state.worker.poll_timeout())
        .await?;
    if batch.is_empty() {
        return Ok(BatchSummary::default());
    }
    Ok(process_batch(state, consumer, batch).await?)
}

/// Run until `shutdown` is set. The batch in progress always completes.
///
/// Returns early with [`RewindFailed`] when a failed record could not be
/// sought back; polling the same consumer again would skip it.
pub async fn run_consumer_loop(
    state: Arc<WorkerState>,
    consumer: Arc<dyn BrokerConsumer>,
    shutdown: Arc<AtomicBool>,
    worker_id: usize,
) -> Result<()> {
    info!(worker_id, "Ingest worker consumer loop started");

    let log_interval = Duration::from_secs(state.worker.metrics_log_interval_secs);
    let mut interval_summary = BatchSummary::default();
    let mut last_metrics_log = Instant::now();
    let mut consecutive_failures: u32 = 0;

    while !shutdown.load(Ordering::SeqCst) {
        match poll_and_process(&state, consumer.as_ref()).await {
            Ok(summary) => {
                interval_summary.merge(summary);
                if summary.failed > 0 {
                    consecutive_failures = consecutive_failures.saturating_add(1);
                    let backoff = state.worker.backoff_for(consecutive_failures);
                    warn!(
                        worker_id,
                        failed = summary.failed,
                        consecutive_failures,
                        backoff_ms = backoff.as_millis() as u64,
                        "Batch had failures, backing off before next poll"
                    );
                    tokio::time::sleep(backoff).await;
                } else if summary.acknowledged() > 0 {
                    consecutive_failures = 0;
                }
            }
            Err(e) if e.is::<RewindFailed>() => {
                error!(worker_id, error = %e, "Consumer position lost, stopping consumer loop");
                flush_dlq(&state, worker_id).await;
                return Err(e);
            }
            Err(e) => {
                consecutive_failures = consecutive_failures.saturating_add(1);
                let backoff = state.worker.backoff_for(consecutive_failures);
                error!(worker_id, error = %e, "Kafka consumer error");
                tokio::time::sleep(backoff).await;
            }
        }

        if last_metrics_log.elapsed() >= log_interval {
            info!(
                worker_id,
                persisted = interval_summary.persisted,
                duplicates = interval_summary.duplicates,
                dead_lettered = interval_summary.dead_lettered,
                failed = interval_summary.failed,
                "Ingest worker metrics (last {}s)",
                log_interval.as_secs()
            );
            interval_summary = BatchSummary::default();
            last_metrics_log = Instant::now();
        }
    }

    info!(worker_id, "Shutdown flag set - flushing DLQ producer...");
    flush_dlq(&state, worker_id).await;
    info!(worker_id, "Ingest worker stopped gracefully");
    Ok(())
}

async fn flush_dlq(state: &WorkerState, worker_id: usize) {
    if let Err(e) = state.dlq_producer.flush(DLQ_FLUSH_TIMEOUT).await {
        error!(worker_id, error = %e, "Failed to flush DLQ producer");
    }
}
