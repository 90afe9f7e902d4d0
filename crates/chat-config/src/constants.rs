// ============================================================================
// Configuration Constants
// ============================================================================

// Kafka topology
pub(crate) const DEFAULT_KAFKA_BROKERS: &str = "localhost:9092";
pub(crate) const DEFAULT_KAFKA_TOPIC: &str = "chat-messages";
pub(crate) const DEFAULT_CONSUMER_GROUP: &str = "chat-service-group";

// Producer timeouts (milliseconds). Both are finite so a publish always resolves.
pub(crate) const DEFAULT_PRODUCER_REQUEST_TIMEOUT_MS: u32 = 15_000;
pub(crate) const DEFAULT_PRODUCER_DELIVERY_TIMEOUT_MS: u32 = 30_000;
pub(crate) const DEFAULT_PRODUCER_RETRIES: u32 = 3;

// Consumer loop
pub(crate) const DEFAULT_MAX_BATCH_SIZE: usize = 100;
pub(crate) const DEFAULT_POLL_TIMEOUT_MS: u64 = 1_000;
pub(crate) const DEFAULT_RETRY_BACKOFF_MS: u64 = 100;
pub(crate) const DEFAULT_MAX_RETRY_BACKOFF_MS: u64 = 5_000;
pub(crate) const DEFAULT_WORKER_CONCURRENCY: usize = 1;
pub(crate) const DEFAULT_METRICS_LOG_INTERVAL_SECS: u64 = 30;

// Publisher circuit breaker
pub(crate) const DEFAULT_CIRCUIT_FAILURE_THRESHOLD: u32 = 5;
pub(crate) const DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS: u64 = 30;
// Blocking publish gives the broker a little longer than its own delivery timeout
pub(crate) const DEFAULT_PUBLISH_WAIT_TIMEOUT_MS: u64 = 35_000;

/// Maximum length of a chat message, in Unicode scalar values.
pub const MAX_MESSAGE_LENGTH: usize = 200;

/// Suffix appended to the main topic name to form the dead-letter topic.
pub const DLQ_TOPIC_SUFFIX: &str = "-dlq";
