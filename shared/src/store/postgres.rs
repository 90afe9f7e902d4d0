use anyhow::{Context, Result};

use super::{
    ChatStore, InsertOutcome, MessageRecord, NewChatMessage, UserProfileUpdate, UserRecord,
};
use chat_db::DbPool;

/// PostgreSQL implementation of [`ChatStore`]
pub struct PgChatStore {
    pool: DbPool,
}

impl PgChatStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }
}

#[async_trait::async_trait]
impl ChatStore for PgChatStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        chat_db::get_user_by_id(&self.pool, user_id)
            .await
            .context("Failed to load user")
    }

    async fn create_user(&self, user: &UserRecord) -> Result<Option<UserRecord>> {
        chat_db::create_user(&self.pool, user)
            .await
            .context("Failed to create user")
    }

    async fn update_user_profile(
        &self,
        user_id: &str,
        update: &UserProfileUpdate,
    ) -> Result<UserRecord> {
        chat_db::update_user_profile(&self.pool, user_id, update)
            .await
            .context("Failed to update user")?
            .with_context(|| format!("User {} does not exist", user_id))
    }

    async fn insert_message(&self, message: &NewChatMessage) -> Result<InsertOutcome> {
        let (record, created) = chat_db::insert_message(
            &self.pool,
            &message.content,
            message.created_at,
            &message.sender_id,
            &message.dedup_key,
        )
        .await
        .context("Failed to insert message")?;

        Ok(if created {
            InsertOutcome::Inserted(record)
        } else {
            InsertOutcome::Duplicate(record)
        })
    }

    async fn list_messages(&self, limit: i64) -> Result<Vec<MessageRecord>> {
        chat_db::list_recent_messages(&self.pool, limit)
            .await
            .context("Failed to list messages")
    }
}
