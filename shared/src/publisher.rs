// ============================================================================
// Chat message publisher
// ============================================================================
//
// Turns (content, sender) into a keyed envelope on the chat topic.
//
// - Validation happens on the caller's task, before anything reaches the broker
// - Sends go through one dispatcher task, in call order, behind the circuit
//   breaker: two publishes for the same sender reach the broker in the order
//   `publish` was called
// - No retry loop here: retries and their bounds live in the Kafka client
//   configuration (`retries`, `request.timeout.ms`, `delivery.timeout.ms`)
//
// ============================================================================

use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use crate::kafka::metrics;
use crate::kafka::{
    encode, BrokerProducer, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerError,
    EnvelopeError, MessageEnvelope, SenderIdentity,
};
use crate::utils::log_safe_id;
use chat_config::{LoggingConfig, PublisherConfig};

/// Where the broker stored a published envelope
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PublishReceipt {
    pub partition: i32,
    pub offset: i64,
    pub message_id: String,
}

#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// Content or sender failed validation; the broker was never called
    #[error("invalid message: {0}")]
    InvalidContent(#[from] EnvelopeError),

    #[error("failed to encode envelope: {0}")]
    Encode(String),

    /// The broker (or its client) reported an error
    #[error("broker rejected message: {0}")]
    Rejected(String),

    #[error("broker did not confirm within {0:?}")]
    Timeout(Duration),

    /// Circuit breaker is open
    #[error("broker unavailable: {0}")]
    Unavailable(String),

    #[error("publish task failed: {0}")]
    TaskFailed(String),
}

/// Pending publish; resolves once the broker accepted or refused the envelope
pub struct PublishHandle {
    message_id: String,
    reply: oneshot::Receiver<Result<PublishReceipt, PublishError>>,
}

impl PublishHandle {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub async fn wait(self) -> Result<PublishReceipt, PublishError> {
        match self.reply.await {
            Ok(result) => result,
            Err(_) => Err(PublishError::TaskFailed(
                "publish dispatcher stopped before the send completed".to_string(),
            )),
        }
    }
}

/// What the HTTP layer needs to answer a message submission
#[derive(Debug)]
pub enum SubmitOutcome {
    /// Broker accepted the message; it will be persisted asynchronously
    Accepted(PublishReceipt),
    /// The client sent something unacceptable (maps to 4xx)
    Invalid(EnvelopeError),
    /// The message could not be handed to the broker (maps to 5xx)
    Failed(PublishError),
}

impl SubmitOutcome {
    pub fn is_accepted(&self) -> bool {
        matches!(self, SubmitOutcome::Accepted(_))
    }
}

/// One queued send, owned by the dispatcher until it resolves
struct PublishJob {
    envelope: MessageEnvelope,
    payload: Vec<u8>,
    sender_log_id: String,
    reply: oneshot::Sender<Result<PublishReceipt, PublishError>>,
}

pub struct Publisher {
    jobs: mpsc::UnboundedSender<PublishJob>,
    topic: Arc<str>,
    breaker: Arc<CircuitBreaker>,
    wait_timeout: Duration,
    log_salt: Arc<str>,
    log_content: bool,
}

impl Publisher {
    /// Must be called from within a tokio runtime: spawns the send dispatcher,
    /// which drains its queue and exits once the publisher is dropped.
    pub fn new(
        producer: Arc<dyn BrokerProducer>,
        topic: impl Into<String>,
        config: &PublisherConfig,
        logging: &LoggingConfig,
    ) -> Self {
        let topic: Arc<str> = Arc::from(topic.into());
        let breaker = Arc::new(CircuitBreaker::new(CircuitBreakerConfig::from(config)));
        let (jobs, queue) = mpsc::unbounded_channel();

        tokio::spawn(dispatch(
            queue,
            producer,
            Arc::clone(&topic),
            Arc::clone(&breaker),
        ));

        Self {
            jobs,
            topic,
            breaker,
            wait_timeout: config.wait_timeout(),
            log_salt: Arc::from(logging.hash_salt.as_str()),
            log_content: logging.enable_message_content,
        }
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn circuit_breaker(&self) -> &CircuitBreaker {
        &self.breaker
    }

    /// Validate, envelope and queue the message for the broker without waiting.
    ///
    /// Queued sends reach the broker in the order of `publish` calls.
    pub fn publish(
        &self,
        content: &str,
        sender: &SenderIdentity,
    ) -> Result<PublishHandle, PublishError> {
        let sender_log_id = log_safe_id(&sender.id, &self.log_salt);

        let envelope = MessageEnvelope::new(content, sender).map_err(|e| {
            metrics::PUBLISH_REJECTED.inc();
            warn!(sender = %sender_log_id, reason = %e, "Chat message rejected");
            PublishError::InvalidContent(e)
        })?;

        let payload = encode(&envelope).map_err(|e| PublishError::Encode(e.to_string()))?;

        if self.log_content {
            info!(
                message_id = %envelope.message_id,
                content = %envelope.content,
                "Publishing chat message"
            );
        }

        let message_id = envelope.message_id.clone();
        let (reply, receiver) = oneshot::channel();
        let job = PublishJob {
            envelope,
            payload,
            sender_log_id,
            reply,
        };

        if self.jobs.send(job).is_err() {
            metrics::PUBLISH_FAILURE.inc();
            return Err(PublishError::TaskFailed(
                "publish dispatcher is not running".to_string(),
            ));
        }

        Ok(PublishHandle {
            message_id,
            reply: receiver,
        })
    }

    /// Publish and wait until the broker confirms (not until storage does).
    pub async fn publish_and_wait(
        &self,
        content: &str,
        sender: &SenderIdentity,
    ) -> Result<PublishReceipt, PublishError> {
        let handle = self.publish(content, sender)?;
        let message_id = handle.message_id.clone();

        match tokio::time::timeout(self.wait_timeout, handle.wait()).await {
            Ok(result) => result,
            Err(_) => {
                // the queued send still runs; the message may still land
                warn!(
                    message_id = %message_id,
                    timeout_ms = self.wait_timeout.as_millis() as u64,
                    "Gave up waiting for broker confirmation"
                );
                Err(PublishError::Timeout(self.wait_timeout))
            }
        }
    }

    /// Entry point for the HTTP layer
    pub async fn submit_message(&self, content: &str, sender: &SenderIdentity) -> SubmitOutcome {
        match self.publish_and_wait(content, sender).await {
            Ok(receipt) => SubmitOutcome::Accepted(receipt),
            Err(PublishError::InvalidContent(e)) => SubmitOutcome::Invalid(e),
            Err(e) => SubmitOutcome::Failed(e),
        }
    }
}

/// Drain the queue one send at a time so the broker sees records in call order.
async fn dispatch(
    mut queue: mpsc::UnboundedReceiver<PublishJob>,
    producer: Arc<dyn BrokerProducer>,
    topic: Arc<str>,
    breaker: Arc<CircuitBreaker>,
) {
    while let Some(job) = queue.recv().await {
        let result = send_envelope(producer.as_ref(), &topic, &breaker, &job).await;
        // the caller may have stopped waiting
        let _ = job.reply.send(result);
    }
    debug!(topic = %topic, "Publish dispatcher stopped");
}

async fn send_envelope(
    producer: &dyn BrokerProducer,
    topic: &str,
    breaker: &CircuitBreaker,
    job: &PublishJob,
) -> Result<PublishReceipt, PublishError> {
    let envelope = &job.envelope;
    let start = Instant::now();
    let result = breaker
        .call(producer.send(topic, envelope.partition_key(), &job.payload))
        .await;
    let latency = start.elapsed();
    metrics::PUBLISH_LATENCY.observe(latency.as_secs_f64());

    match result {
        Ok(receipt) => {
            metrics::PUBLISH_SUCCESS.inc();
            info!(
                partition = receipt.partition,
                offset = receipt.offset,
                message_id = %envelope.message_id,
                sender = %job.sender_log_id,
                latency_ms = latency.as_millis() as u64,
                "Chat message accepted by broker"
            );
            Ok(PublishReceipt {
                partition: receipt.partition,
                offset: receipt.offset,
                message_id: envelope.message_id.clone(),
            })
        }
        Err(e) => {
            metrics::PUBLISH_FAILURE.inc();
            let err = match e {
                CircuitBreakerError::Open(since) => PublishError::Unavailable(format!(
                    "circuit open, last failure {:?} ago",
                    since
                )),
                CircuitBreakerError::Timeout { timeout } => PublishError::Timeout(timeout),
                CircuitBreakerError::Inner(inner) => PublishError::Rejected(format!("{:#}", inner)),
            };
            error!(
                error = %err,
                message_id = %envelope.message_id,
                sender = %job.sender_log_id,
                topic = %topic,
                latency_ms = latency.as_millis() as u64,
                "Failed to publish chat message"
            );
            Err(err)
        }
    }
}
