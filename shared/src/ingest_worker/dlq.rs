// ============================================================================
// Dead Letter Queue for the ingest worker
// ============================================================================
//
// Only records that can never be processed end up here: payloads that do
// not decode into a valid envelope. Store outages are transient and are
// retried through redelivery instead.
//
// Kafka DLQ topic: {topic}-dlq (e.g., "chat-messages-dlq")
// The raw payload is kept verbatim (base64) next to the failure reason and
// the source coordinates, so a record can be inspected or replayed.
//
// ============================================================================

use anyhow::{Context, Result};
use base64::Engine;
use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::ingest_worker::state::WorkerState;
use crate::kafka::ConsumedRecord;

/// A record that failed permanently and was moved to the DLQ
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DeadLetterRecord {
    pub source_topic: String,
    pub source_partition: i32,
    pub source_offset: i64,
    /// Original key, lossily decoded as UTF-8
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    /// Original payload bytes, standard base64
    pub payload_base64: String,
    pub failure_reason: String,
    /// Unix timestamp when the record was dead-lettered
    pub dead_lettered_at: i64,
}

impl DeadLetterRecord {
    pub fn new(record: &ConsumedRecord, failure_reason: &str) -> Self {
        Self {
            source_topic: record.topic.clone(),
            source_partition: record.partition,
            source_offset: record.offset,
            key: record
                .key
                .as_deref()
                .map(|k| String::from_utf8_lossy(k).into_owned()),
            payload_base64: base64::engine::general_purpose::STANDARD
                .encode(record.payload.as_deref().unwrap_or_default()),
            failure_reason: failure_reason.to_string(),
            dead_lettered_at: chrono::Utc::now().timestamp(),
        }
    }

    /// The original payload bytes
    pub fn payload(&self) -> Result<Vec<u8>> {
        base64::engine::general_purpose::STANDARD
            .decode(&self.payload_base64)
            .context("DLQ payload is not valid base64")
    }
}

/// Publish `record` with `failure_reason` to the dead-letter topic.
///
/// An error here means the record was NOT dead-lettered and must not be acknowledged.
pub async fn send_to_dlq(
    state: &WorkerState,
    record: &ConsumedRecord,
    failure_reason: &str,
) -> Result<()> {
    let dead_letter = DeadLetterRecord::new(record, failure_reason);
    let payload =
        serde_json::to_vec(&dead_letter).context("Failed to serialize DLQ record")?;
    let key = record.key.as_deref().unwrap_or_default();

    let receipt = state
        .dlq_producer
        .send(&state.dlq_topic, key, &payload)
        .await
        .context("Failed to publish record to DLQ")?;

    warn!(
        source_partition = record.partition,
        source_offset = record.offset,
        dlq_topic = %state.dlq_topic,
        dlq_partition = receipt.partition,
        dlq_offset = receipt.offset,
        reason = failure_reason,
        "Record dead-lettered"
    );

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dead_letter_keeps_raw_payload() {
        let record = ConsumedRecord {
            topic: "chat-messages".to_string(),
            partition: 2,
            offset: 41,
            key: Some(b"u1".to_vec()),
            payload: Some(vec![0xff, 0x00, b'{']),
        };

        let dead_letter = DeadLetterRecord::new(&record, "malformed envelope: eof");
        assert_eq!(dead_letter.source_partition, 2);
        assert_eq!(dead_letter.source_offset, 41);
        assert_eq!(dead_letter.key.as_deref(), Some("u1"));
        assert_eq!(dead_letter.payload().unwrap(), vec![0xff, 0x00, b'{']);

        let json = serde_json::to_value(&dead_letter).unwrap();
        assert!(json.get("payloadBase64").is_some());
        assert!(json.get("failureReason").is_some());
    }

    #[test]
    fn test_missing_payload_and_key() {
        let record = ConsumedRecord {
            topic: "chat-messages".to_string(),
            partition: 0,
            offset: 0,
            key: None,
            payload: None,
        };
        let dead_letter = DeadLetterRecord::new(&record, "malformed envelope: empty payload");
        assert!(dead_letter.key.is_none());
        assert!(dead_letter.payload().unwrap().is_empty());
    }
}
