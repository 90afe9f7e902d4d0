// ============================================================================
// Record Processor
// ============================================================================
//
// One consumed record, start to finish:
// 1. Decode the envelope. Malformed -> dead-letter it (permanent failure)
// 2. Reconcile the sender (create or update the user row)
// 3. Insert the message, deduplicated by its dedup key
//
// Ok(_) means the record may be acknowledged. Err means it must not be:
// the caller seeks back and the record is redelivered.
//
// ============================================================================

use anyhow::{Context, Result};
use tracing::{debug, warn};

use crate::ingest_worker::dlq::send_to_dlq;
use crate::ingest_worker::reconciler::ReconcileOutcome;
use crate::ingest_worker::state::WorkerState;
use crate::kafka::metrics;
use crate::kafka::{decode, ConsumedRecord};
use crate::store::{InsertOutcome, NewChatMessage};
use crate::utils::log_safe_id;

/// Outcome of a record that can be acknowledged
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessResult {
    /// A new message row was written
    Persisted {
        message_id: i64,
        user: ReconcileOutcome,
    },
    /// Redelivery of a message that is already stored
    Duplicate { message_id: i64 },
    /// Payload was unusable and went to the DLQ
    DeadLettered,
}

pub async fn process_record(state: &WorkerState, record: &ConsumedRecord) -> Result<ProcessResult> {
    let payload = record.payload.as_deref().unwrap_or_default();

    let envelope = match decode(payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            // every decode error is permanent: redelivery would fail the same way
            send_to_dlq(state, record, &e.to_string()).await?;
            metrics::INGEST_DEAD_LETTERED.inc();
            return Ok(ProcessResult::DeadLettered);
        }
    };

    let sender = log_safe_id(&envelope.sender_id, &state.logging.hash_salt);
    if record.key.as_deref() != Some(envelope.partition_key()) {
        warn!(
            message_id = %envelope.message_id,
            sender = %sender,
            partition = record.partition,
            offset = record.offset,
            "Record key does not match sender id; per-sender ordering is not guaranteed for it"
        );
    }

    let reconciled = state
        .reconciler
        .reconcile(&envelope)
        .await
        .context("Failed to reconcile sender")?;

    let outcome = state
        .store
        .insert_message(&NewChatMessage::from(&envelope))
        .await?;

    match outcome {
        InsertOutcome::Inserted(message) => {
            metrics::INGEST_PERSISTED.inc();
            debug!(
                message_id = %envelope.message_id,
                row_id = message.id,
                sender = %sender,
                partition = record.partition,
                offset = record.offset,
                "Message persisted"
            );
            Ok(ProcessResult::Persisted {
                message_id: message.id,
                user: reconciled.outcome,
            })
        }
        InsertOutcome::Duplicate(message) => {
            metrics::INGEST_DUPLICATES.inc();
            debug!(
                message_id = %envelope.message_id,
                row_id = message.id,
                partition = record.partition,
                offset = record.offset,
                "Message already persisted (redelivery)"
            );
            Ok(ProcessResult::Duplicate {
                message_id: message.id,
            })
        }
    }
}
