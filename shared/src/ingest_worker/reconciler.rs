// ============================================================================
// User Reconciler
// ============================================================================
//
// Keeps `users` in step with the sender metadata carried by each envelope.
//
// - Unknown sender: the user row is created from the envelope. If another
//   writer created it in the meantime, that row is read back and treated
//   as a known sender
// - Known sender: a stored field is overwritten only when the envelope
//   carries a non-empty value that differs from it (an absent picture never
//   clears a stored one). Only those columns are written, so concurrent
//   writes to the other columns survive
// - Nothing changed: no write at all, so redelivery costs one read
//
// ============================================================================

use anyhow::{Context, Result};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, info};

use crate::kafka::metrics;
use crate::kafka::MessageEnvelope;
use crate::store::{ChatStore, UserProfileUpdate, UserRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProfileField {
    Name,
    Email,
    Picture,
}

impl fmt::Display for ProfileField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProfileField::Name => write!(f, "name"),
            ProfileField::Email => write!(f, "email"),
            ProfileField::Picture => write!(f, "picture"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    Created,
    Updated(Vec<ProfileField>),
    Unchanged,
}

/// The stored user after reconciliation and what it took to get there
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reconciled {
    pub user: UserRecord,
    pub outcome: ReconcileOutcome,
}

pub struct UserReconciler {
    store: Arc<dyn ChatStore>,
}

impl UserReconciler {
    pub fn new(store: Arc<dyn ChatStore>) -> Self {
        Self { store }
    }

    /// Make sure the envelope's sender exists and carries its latest profile.
    ///
    /// Store errors propagate; the caller must not persist the message then.
    pub async fn reconcile(&self, envelope: &MessageEnvelope) -> Result<Reconciled> {
        let existing = self
            .store
            .find_user_by_id(&envelope.sender_id)
            .await
            .context("Failed to look up sender")?;

        let stored = match existing {
            Some(stored) => stored,
            None => {
                let created = self
                    .store
                    .create_user(&user_from_envelope(envelope))
                    .await
                    .context("Failed to create sender")?;
                if let Some(user) = created {
                    metrics::USERS_CREATED.inc();
                    info!(message_id = %envelope.message_id, "Created user from message sender");
                    return Ok(Reconciled {
                        user,
                        outcome: ReconcileOutcome::Created,
                    });
                }

                debug!(message_id = %envelope.message_id, "Sender created concurrently, re-reading");
                self.store
                    .find_user_by_id(&envelope.sender_id)
                    .await
                    .context("Failed to look up sender")?
                    .context("Sender vanished after a conflicting create")?
            }
        };

        let (update, changed) = profile_changes(&stored, envelope);
        if changed.is_empty() {
            debug!(message_id = %envelope.message_id, "Sender profile unchanged");
            return Ok(Reconciled {
                user: stored,
                outcome: ReconcileOutcome::Unchanged,
            });
        }

        let user = self
            .store
            .update_user_profile(&stored.id, &update)
            .await
            .context("Failed to update sender")?;
        metrics::USERS_UPDATED.inc();
        let fields = changed
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(",");
        info!(message_id = %envelope.message_id, fields = %fields, "Updated sender profile");

        Ok(Reconciled {
            user,
            outcome: ReconcileOutcome::Updated(changed),
        })
    }
}

fn user_from_envelope(envelope: &MessageEnvelope) -> UserRecord {
    UserRecord {
        id: envelope.sender_id.clone(),
        name: envelope.sender_name.clone(),
        email: envelope.sender_email.clone(),
        picture: envelope
            .sender_picture
            .clone()
            .filter(|picture| !picture.is_empty()),
    }
}

/// Columns the envelope would change, compared against what was read
fn profile_changes(
    user: &UserRecord,
    envelope: &MessageEnvelope,
) -> (UserProfileUpdate, Vec<ProfileField>) {
    let mut update = UserProfileUpdate::default();
    let mut changed = Vec::new();

    if !envelope.sender_name.is_empty() && envelope.sender_name != user.name {
        update.name = Some(envelope.sender_name.clone());
        changed.push(ProfileField::Name);
    }
    if !envelope.sender_email.is_empty() && envelope.sender_email != user.email {
        update.email = Some(envelope.sender_email.clone());
        changed.push(ProfileField::Email);
    }
    if let Some(picture) = envelope.sender_picture.as_deref() {
        if !picture.is_empty() && user.picture.as_deref() != Some(picture) {
            update.picture = Some(picture.to_string());
            changed.push(ProfileField::Picture);
        }
    }

    (update, changed)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kafka::SenderIdentity;
    use crate::store::{InsertOutcome, MemoryChatStore, MessageRecord, NewChatMessage};

    fn envelope(sender: &SenderIdentity) -> MessageEnvelope {
        MessageEnvelope::new("hello", sender).unwrap()
    }

    fn setup() -> (Arc<MemoryChatStore>, UserReconciler) {
        let store = Arc::new(MemoryChatStore::new());
        let reconciler = UserReconciler::new(store.clone());
        (store, reconciler)
    }

    #[tokio::test]
    async fn test_unknown_sender_is_created() {
        let (store, reconciler) = setup();
        let sender = SenderIdentity::new("u2", "Bob", "bob@example.com");

        let reconciled = reconciler.reconcile(&envelope(&sender)).await.unwrap();

        assert_eq!(reconciled.outcome, ReconcileOutcome::Created);
        assert_eq!(reconciled.user.name, "Bob");
        assert_eq!(store.user("u2"), Some(reconciled.user));
    }

    #[tokio::test]
    async fn test_second_identical_reconcile_writes_nothing() {
        let (store, reconciler) = setup();
        let sender = SenderIdentity::new("u1", "Ann", "ann@example.com").with_picture("a.png");

        reconciler.reconcile(&envelope(&sender)).await.unwrap();
        let writes = store.user_writes();
        let again = reconciler.reconcile(&envelope(&sender)).await.unwrap();

        assert_eq!(again.outcome, ReconcileOutcome::Unchanged);
        assert_eq!(store.user_writes(), writes);
    }

    #[tokio::test]
    async fn test_only_changed_fields_are_updated() {
        let (store, reconciler) = setup();
        let sender = SenderIdentity::new("u1", "Ann", "ann@example.com").with_picture("a.png");
        reconciler.reconcile(&envelope(&sender)).await.unwrap();

        let renamed = SenderIdentity::new("u1", "Annie", "ann@example.com").with_picture("a.png");
        let reconciled = reconciler.reconcile(&envelope(&renamed)).await.unwrap();

        assert_eq!(
            reconciled.outcome,
            ReconcileOutcome::Updated(vec![ProfileField::Name])
        );
        let stored = store.user("u1").unwrap();
        assert_eq!(stored.name, "Annie");
        assert_eq!(stored.picture.as_deref(), Some("a.png"));
    }

    #[tokio::test]
    async fn test_absent_picture_keeps_stored_one() {
        let (store, reconciler) = setup();
        let with_picture =
            SenderIdentity::new("u1", "Ann", "ann@example.com").with_picture("a.png");
        reconciler.reconcile(&envelope(&with_picture)).await.unwrap();

        let without = SenderIdentity::new("u1", "Ann", "ann@example.com");
        let reconciled = reconciler.reconcile(&envelope(&without)).await.unwrap();

        assert_eq!(reconciled.outcome, ReconcileOutcome::Unchanged);
        assert_eq!(store.user("u1").unwrap().picture.as_deref(), Some("a.png"));
    }

    #[tokio::test]
    async fn test_store_error_propagates() {
        let (store, reconciler) = setup();
        store.fail_next_user_writes(1);
        let sender = SenderIdentity::new("u2", "Bob", "bob@example.com");

        assert!(reconciler.reconcile(&envelope(&sender)).await.is_err());
        assert!(store.user("u2").is_none());
    }

    /// Another writer (the sign-in flow) changes the stored row between the
    /// reconciler's read and its write.
    struct RacingStore {
        inner: MemoryChatStore,
        after_read: UserProfileUpdate,
        create_first: Option<UserRecord>,
    }

    #[async_trait::async_trait]
    impl ChatStore for RacingStore {
        async fn find_user_by_id(&self, user_id: &str) -> Result<Option<UserRecord>> {
            let found = self.inner.find_user_by_id(user_id).await?;
            if found.is_some() && !self.after_read.is_empty() {
                self.inner
                    .update_user_profile(user_id, &self.after_read)
                    .await?;
            }
            Ok(found)
        }

        async fn create_user(&self, user: &UserRecord) -> Result<Option<UserRecord>> {
            if let Some(first) = &self.create_first {
                self.inner.create_user(first).await?;
            }
            self.inner.create_user(user).await
        }

        async fn update_user_profile(
            &self,
            user_id: &str,
            update: &UserProfileUpdate,
        ) -> Result<UserRecord> {
            self.inner.update_user_profile(user_id, update).await
        }

        async fn insert_message(&self, message: &NewChatMessage) -> Result<InsertOutcome> {
            self.inner.insert_message(message).await
        }

        async fn list_messages(&self, limit: i64) -> Result<Vec<MessageRecord>> {
            self.inner.list_messages(limit).await
        }
    }

    #[tokio::test]
    async fn test_concurrent_email_change_is_not_regressed() {
        let inner = MemoryChatStore::new();
        inner
            .create_user(&UserRecord {
                id: "u1".to_string(),
                name: "Ann".to_string(),
                email: "old@example.com".to_string(),
                picture: None,
            })
            .await
            .unwrap();
        let store = Arc::new(RacingStore {
            inner,
            after_read: UserProfileUpdate {
                email: Some("new@example.com".to_string()),
                ..UserProfileUpdate::default()
            },
            create_first: None,
        });
        let reconciler = UserReconciler::new(store.clone());

        // the envelope was built before the email change and only renames
        let renamed = SenderIdentity::new("u1", "Annie", "old@example.com");
        let reconciled = reconciler.reconcile(&envelope(&renamed)).await.unwrap();

        assert_eq!(
            reconciled.outcome,
            ReconcileOutcome::Updated(vec![ProfileField::Name])
        );
        let stored = store.inner.user("u1").unwrap();
        assert_eq!(stored.name, "Annie");
        assert_eq!(stored.email, "new@example.com");
        assert_eq!(reconciled.user, stored);
    }

    #[tokio::test]
    async fn test_conflicting_create_keeps_existing_row() {
        let existing = UserRecord {
            id: "u2".to_string(),
            name: "Bob".to_string(),
            email: "bob@example.com".to_string(),
            picture: Some("b.png".to_string()),
        };
        let store = Arc::new(RacingStore {
            inner: MemoryChatStore::new(),
            after_read: UserProfileUpdate::default(),
            create_first: Some(existing.clone()),
        });
        let reconciler = UserReconciler::new(store.clone());

        let sender = SenderIdentity::new("u2", "Bobby", "bob@example.com");
        let reconciled = reconciler.reconcile(&envelope(&sender)).await.unwrap();

        assert_eq!(
            reconciled.outcome,
            ReconcileOutcome::Updated(vec![ProfileField::Name])
        );
        let stored = store.inner.user("u2").unwrap();
        assert_eq!(stored.name, "Bobby");
        assert_eq!(stored.picture.as_deref(), Some("b.png"));
    }
}
