use anyhow::{bail, Result};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{
    ChatStore, InsertOutcome, MessageRecord, NewChatMessage, UserProfileUpdate, UserRecord,
};

#[derive(Debug, Default)]
struct StoreState {
    users: HashMap<String, UserRecord>,
    messages: Vec<MessageRecord>,
    user_writes: u64,
    failing_user_writes: u32,
    failing_message_inserts: u32,
}

/// In-memory [`ChatStore`] with the same constraints as the SQL schema
/// (unique dedup key, sender must exist) and injectable write failures.
#[derive(Debug, Default)]
pub struct MemoryChatStore {
    state: Mutex<StoreState>,
}

impl MemoryChatStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, StoreState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// The next `count` user writes (create or update) fail without writing
    pub fn fail_next_user_writes(&self, count: u32) {
        self.state().failing_user_writes = count;
    }

    /// The next `count` `insert_message` calls fail without writing
    pub fn fail_next_message_inserts(&self, count: u32) {
        self.state().failing_message_inserts = count;
    }

    /// User rows written so far (creates plus updates)
    pub fn user_writes(&self) -> u64 {
        self.state().user_writes
    }

    pub fn user(&self, user_id: &str) -> Option<UserRecord> {
        self.state().users.get(user_id).cloned()
    }

    /// All messages in insertion order
    pub fn messages(&self) -> Vec<MessageRecord> {
        self.state().messages.clone()
    }
}

#[async_trait::async_trait]
impl ChatStore for MemoryChatStore {
    async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
        Ok(self.user(user_id))
    }

    async fn create_user(&self, user: &UserRecord) -> Result<Option<UserRecord>> {
        let mut state = self.state();
        if state.failing_user_writes > 0 {
            state.failing_user_writes -= 1;
            bail!("Failed to create user: store unavailable (injected failure)");
        }
        if state.users.contains_key(&user.id) {
            return Ok(None);
        }
        state.users.insert(user.id.clone(), user.clone());
        state.user_writes += 1;
        Ok(Some(user.clone()))
    }

    async fn update_user_profile(
        &self,
        user_id: &str,
        update: &UserProfileUpdate,
    ) -> Result<UserRecord> {
        let mut state = self.state();
        if state.failing_user_writes > 0 {
            state.failing_user_writes -= 1;
            bail!("Failed to update user: store unavailable (injected failure)");
        }
        let Some(user) = state.users.get_mut(user_id) else {
            bail!("Failed to update user: {} does not exist", user_id);
        };
        if let Some(name) = &update.name {
            user.name = name.clone();
        }
        if let Some(email) = &update.email {
            user.email = email.clone();
        }
        if let Some(picture) = &update.picture {
            user.picture = Some(picture.clone());
        }
        let updated = user.clone();
        state.user_writes += 1;
        Ok(updated)
    }

    async fn insert_message(&self, message: &NewChatMessage) -> Result<InsertOutcome> {
        let mut state = self.state();
        if state.failing_message_inserts > 0 {
            state.failing_message_inserts -= 1;
            bail!("Failed to insert message: store unavailable (injected failure)");
        }
        if !state.users.contains_key(&message.sender_id) {
            bail!(
                "Failed to insert message: sender {} does not exist (foreign key)",
                message.sender_id
            );
        }
        if let Some(existing) = state
            .messages
            .iter()
            .find(|m| m.dedup_key == message.dedup_key)
        {
            return Ok(InsertOutcome::Duplicate(existing.clone()));
        }

        let record = MessageRecord {
            id: state.messages.len() as i64 + 1,
            content: message.content.clone(),
            created_at: message.created_at,
            sender_id: message.sender_id.clone(),
            dedup_key: message.dedup_key.clone(),
        };
        state.messages.push(record.clone());
        Ok(InsertOutcome::Inserted(record))
    }

    async fn list_messages(&self, limit: i64) -> Result<Vec<MessageRecord>> {
        let mut messages = self.messages();
        messages.sort_by(|a, b| a.created_at.cmp(&b.created_at).then(a.id.cmp(&b.id)));
        let skip = messages.len().saturating_sub(limit.max(0) as usize);
        Ok(messages.split_off(skip))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn ann() -> UserRecord {
        UserRecord {
            id: "u1".to_string(),
            name: "Ann".to_string(),
            email: "ann@example.com".to_string(),
            picture: None,
        }
    }

    fn message(dedup_key: &str, offset_secs: i64) -> NewChatMessage {
        NewChatMessage {
            content: format!("message {dedup_key}"),
            created_at: Utc::now() + Duration::seconds(offset_secs),
            sender_id: "u1".to_string(),
            dedup_key: dedup_key.to_string(),
        }
    }

    #[tokio::test]
    async fn test_insert_requires_existing_sender() {
        let store = MemoryChatStore::new();
        assert!(store.insert_message(&message("k1", 0)).await.is_err());
        assert!(store.messages().is_empty());
    }

    #[tokio::test]
    async fn test_duplicate_dedup_key_returns_existing_row() {
        let store = MemoryChatStore::new();
        store.create_user(&ann()).await.unwrap();

        let first = store.insert_message(&message("k1", 0)).await.unwrap();
        let second = store.insert_message(&message("k1", 5)).await.unwrap();

        assert!(matches!(first, InsertOutcome::Inserted(_)));
        assert!(matches!(second, InsertOutcome::Duplicate(_)));
        assert_eq!(first.record(), second.record());
        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_list_messages_latest_oldest_first() {
        let store = MemoryChatStore::new();
        store.create_user(&ann()).await.unwrap();
        for (key, secs) in [("a", 0), ("b", 1), ("c", 2)] {
            store.insert_message(&message(key, secs)).await.unwrap();
        }

        let listed = store.list_messages(2).await.unwrap();
        let keys: Vec<_> = listed.iter().map(|m| m.dedup_key.as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert!(store.list_messages(0).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_injected_failures_do_not_write() {
        let store = MemoryChatStore::new();
        store.fail_next_user_writes(1);
        assert!(store.create_user(&ann()).await.is_err());
        assert!(store.user("u1").is_none());
        assert_eq!(store.user_writes(), 0);

        store.create_user(&ann()).await.unwrap();
        store.fail_next_message_inserts(1);
        assert!(store.insert_message(&message("k1", 0)).await.is_err());
        assert!(store.insert_message(&message("k1", 0)).await.is_ok());
        assert_eq!(store.messages().len(), 1);
    }

    #[tokio::test]
    async fn test_create_user_never_overwrites() {
        let store = MemoryChatStore::new();
        assert_eq!(store.create_user(&ann()).await.unwrap(), Some(ann()));

        let other = UserRecord {
            name: "Someone else".to_string(),
            ..ann()
        };
        assert_eq!(store.create_user(&other).await.unwrap(), None);
        assert_eq!(store.user("u1"), Some(ann()));
        assert_eq!(store.user_writes(), 1);
    }

    #[tokio::test]
    async fn test_profile_update_touches_only_given_columns() {
        let store = MemoryChatStore::new();
        store.create_user(&ann()).await.unwrap();

        let updated = store
            .update_user_profile(
                "u1",
                &UserProfileUpdate {
                    picture: Some("a.png".to_string()),
                    ..UserProfileUpdate::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Ann");
        assert_eq!(updated.email, "ann@example.com");
        assert_eq!(updated.picture.as_deref(), Some("a.png"));
        assert!(store
            .update_user_profile("ghost", &UserProfileUpdate::default())
            .await
            .is_err());
    }
}
