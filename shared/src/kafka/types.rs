use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use chat_config::MAX_MESSAGE_LENGTH;

/// Authenticated sender as supplied by the auth layer (already verified)
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SenderIdentity {
    pub id: String,
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
}

impl SenderIdentity {
    pub fn new(id: impl Into<String>, name: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: name.into(),
            email: email.into(),
            picture: None,
        }
    }

    pub fn with_picture(mut self, picture: impl Into<String>) -> Self {
        self.picture = Some(picture.into());
        self
    }
}

/// Why an envelope is not acceptable
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum EnvelopeError {
    #[error("message content is empty")]
    EmptyContent,

    #[error("message content is {len} characters, limit is {max}")]
    ContentTooLong { len: usize, max: usize },

    #[error("{0} is required")]
    MissingField(&'static str),

    #[error("dedup key does not match envelope contents")]
    DedupKeyMismatch,
}

/// Chat message envelope as carried through Kafka
///
/// Serialized to JSON. The partition key is `sender_id`, so all messages of
/// one sender land on one partition and are persisted in publish order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Unique message ID (UUID v4), for tracing a message across logs
    pub message_id: String,

    /// Trimmed message text
    pub content: String,

    pub sender_id: String,
    pub sender_name: String,
    pub sender_email: String,

    /// Avatar reference; absent when the identity provider has none
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sender_picture: Option<String>,

    /// Producer-assigned creation time, microsecond precision
    pub timestamp: DateTime<Utc>,

    /// SHA-256 over sender id, content and timestamp. Unique per message in storage.
    pub dedup_key: String,
}

impl MessageEnvelope {
    /// Build an envelope stamped with the current time
    pub fn new(content: &str, sender: &SenderIdentity) -> Result<Self, EnvelopeError> {
        Self::with_timestamp(content, sender, Utc::now())
    }

    /// Build an envelope with an explicit creation time
    pub fn with_timestamp(
        content: &str,
        sender: &SenderIdentity,
        timestamp: DateTime<Utc>,
    ) -> Result<Self, EnvelopeError> {
        let content = content.trim().to_string();
        // Postgres TIMESTAMPTZ keeps microseconds; anything finer would not survive a round-trip
        let timestamp = timestamp.trunc_subsecs(6);
        let dedup_key = compute_dedup_key(&sender.id, &content, &timestamp);

        let envelope = Self {
            message_id: uuid::Uuid::new_v4().to_string(),
            content,
            sender_id: sender.id.clone(),
            sender_name: sender.name.clone(),
            sender_email: sender.email.clone(),
            sender_picture: sender.picture.clone().filter(|p| !p.is_empty()),
            timestamp,
            dedup_key,
        };
        envelope.validate()?;
        Ok(envelope)
    }

    /// Partition key for Kafka
    pub fn partition_key(&self) -> &[u8] {
        self.sender_id.as_bytes()
    }

    /// Validate message envelope structure
    pub fn validate(&self) -> Result<(), EnvelopeError> {
        if self.message_id.is_empty() {
            return Err(EnvelopeError::MissingField("messageId"));
        }
        if self.sender_id.is_empty() {
            return Err(EnvelopeError::MissingField("senderId"));
        }
        if self.sender_name.is_empty() {
            return Err(EnvelopeError::MissingField("senderName"));
        }
        if self.sender_email.is_empty() {
            return Err(EnvelopeError::MissingField("senderEmail"));
        }

        validate_content(&self.content)?;

        if self.dedup_key != compute_dedup_key(&self.sender_id, &self.content, &self.timestamp) {
            return Err(EnvelopeError::DedupKeyMismatch);
        }

        Ok(())
    }
}

/// Content must be non-empty after trimming and at most `MAX_MESSAGE_LENGTH` characters
pub fn validate_content(content: &str) -> Result<(), EnvelopeError> {
    if content.trim().is_empty() {
        return Err(EnvelopeError::EmptyContent);
    }
    let len = content.chars().count();
    if len > MAX_MESSAGE_LENGTH {
        return Err(EnvelopeError::ContentTooLong {
            len,
            max: MAX_MESSAGE_LENGTH,
        });
    }
    Ok(())
}

fn compute_dedup_key(sender_id: &str, content: &str, timestamp: &DateTime<Utc>) -> String {
    let mut hasher = Sha256::new();
    hasher.update(sender_id.as_bytes());
    hasher.update([0u8]);
    hasher.update(content.as_bytes());
    hasher.update([0u8]);
    hasher.update(timestamp.timestamp_micros().to_be_bytes());
    hex::encode(hasher.finalize())
}
