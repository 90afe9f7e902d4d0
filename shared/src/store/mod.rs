//! Persistence for users and chat messages
//!
//! The ingest worker only talks to [`ChatStore`]. `PgChatStore` is the
//! production implementation; `MemoryChatStore` backs tests and embedding.

mod memory;
mod postgres;

pub use chat_db::{MessageRecord, UserProfileUpdate, UserRecord};
pub use memory::MemoryChatStore;
pub use postgres::PgChatStore;

use anyhow::Result;
use chrono::{DateTime, Utc};

use crate::kafka::MessageEnvelope;

/// A message ready to be persisted for an already reconciled sender
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewChatMessage {
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender_id: String,
    pub dedup_key: String,
}

impl From<&MessageEnvelope> for NewChatMessage {
    fn from(envelope: &MessageEnvelope) -> Self {
        Self {
            content: envelope.content.clone(),
            created_at: envelope.timestamp,
            sender_id: envelope.sender_id.clone(),
            dedup_key: envelope.dedup_key.clone(),
        }
    }
}

/// Result of [`ChatStore::insert_message`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InsertOutcome {
    /// A new row was written
    Inserted(MessageRecord),
    /// A row with the same dedup key already existed; nothing was written
    Duplicate(MessageRecord),
}

impl InsertOutcome {
    pub fn record(&self) -> &MessageRecord {
        match self {
            InsertOutcome::Inserted(record) | InsertOutcome::Duplicate(record) => record,
        }
    }
}

/// Storage interface for the ingest pipeline
///
/// Every write is a single atomic statement; implementations are shared by all workers.
#[async_trait::async_trait]
pub trait ChatStore: Send + Sync {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>>;

    /// Insert `user` unless its id exists. `None` means another writer got there
    /// first and nothing was written.
    async fn create_user(&self, user: &UserRecord) -> Result<Option<UserRecord>>;

    /// Overwrite only the columns set in `update`; returns the stored row.
    /// Fails if the user does not exist.
    async fn update_user_profile(
        &self,
        user_id: &str,
        update: &UserProfileUpdate,
    ) -> Result<UserRecord>;

    /// Insert unless `message.dedup_key` is already stored. The sender must exist.
    async fn insert_message(&self, message: &NewChatMessage) -> Result<InsertOutcome>;

    /// The latest `limit` messages, oldest first
    async fn list_messages(&self, limit: i64) -> Result<Vec<MessageRecord>>;
}
