//! # Chat Database
//!
//! Connection pooling and queries for the `users` and `messages` tables.

use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use sqlx::postgres::PgPoolOptions;
use sqlx::{Pool, Postgres};

/// Database connection pool type
pub type DbPool = Pool<Postgres>;

/// User record from database
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct UserRecord {
    pub id: String,
    pub name: String,
    pub email: String,
    pub picture: Option<String>,
}

/// Persisted chat message joined with nothing; `sender_id` references `users.id`
#[derive(Debug, Clone, PartialEq, Eq, sqlx::FromRow)]
pub struct MessageRecord {
    pub id: i64,
    pub content: String,
    pub created_at: DateTime<Utc>,
    pub sender_id: String,
    pub dedup_key: String,
}

/// Database configuration
#[derive(Debug, Clone)]
pub struct DbConfig {
    pub max_connections: u32,
    pub acquire_timeout_secs: u64,
    pub idle_timeout_secs: u64,
}

/// Create a PostgreSQL connection pool
pub async fn create_pool(database_url: &str, db_config: &DbConfig) -> Result<DbPool> {
    let pool = PgPoolOptions::new()
        .max_connections(db_config.max_connections)
        .acquire_timeout(std::time::Duration::from_secs(
            db_config.acquire_timeout_secs,
        ))
        .idle_timeout(Some(std::time::Duration::from_secs(
            db_config.idle_timeout_secs,
        )))
        .test_before_acquire(true)
        .connect(database_url)
        .await
        .context("Failed to connect to PostgreSQL")?;

    Ok(pool)
}

/// Apply the embedded migrations (users + messages tables)
pub async fn run_migrations(pool: &DbPool) -> Result<()> {
    tracing::info!("Applying database migrations...");
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .context("Failed to apply database migrations")?;
    tracing::info!("Database migrations applied successfully.");
    Ok(())
}

pub async fn get_user_by_id(pool: &DbPool, user_id: &str) -> Result<Option<UserRecord>> {
    let user = sqlx::query_as::<_, UserRecord>(
        r#"
        SELECT id, name, email, picture
        FROM users
        WHERE id = $1
        "#,
    )
    .bind(user_id)
    .fetch_optional(pool)
    .await?;

    Ok(user)
}

/// Profile columns to overwrite; `None` leaves the stored value untouched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct UserProfileUpdate {
    pub name: Option<String>,
    pub email: Option<String>,
    pub picture: Option<String>,
}

impl UserProfileUpdate {
    pub fn is_empty(&self) -> bool {
        self.name.is_none() && self.email.is_none() && self.picture.is_none()
    }
}

/// Insert a user unless the id is already taken.
///
/// Returns `None` when a row with that id already existed; it is left as is.
pub async fn create_user(pool: &DbPool, user: &UserRecord) -> Result<Option<UserRecord>> {
    let created = sqlx::query_as::<_, UserRecord>(
        r#"
        INSERT INTO users (id, name, email, picture)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (id) DO NOTHING
        RETURNING id, name, email, picture
        "#,
    )
    .bind(&user.id)
    .bind(&user.name)
    .bind(&user.email)
    .bind(&user.picture)
    .fetch_optional(pool)
    .await?;

    Ok(created)
}

/// Overwrite only the columns set in `update`, in a single statement.
///
/// Returns `None` if the user does not exist.
pub async fn update_user_profile(
    pool: &DbPool,
    user_id: &str,
    update: &UserProfileUpdate,
) -> Result<Option<UserRecord>> {
    let updated = sqlx::query_as::<_, UserRecord>(
        r#"
        UPDATE users SET
            name = COALESCE($2, name),
            email = COALESCE($3, email),
            picture = COALESCE($4, picture)
        WHERE id = $1
        RETURNING id, name, email, picture
        "#,
    )
    .bind(user_id)
    .bind(&update.name)
    .bind(&update.email)
    .bind(&update.picture)
    .fetch_optional(pool)
    .await?;

    Ok(updated)
}

/// Insert a message unless one with the same dedup key already exists.
///
/// Returns the stored row and whether this call created it.
pub async fn insert_message(
    pool: &DbPool,
    content: &str,
    created_at: DateTime<Utc>,
    sender_id: &str,
    dedup_key: &str,
) -> Result<(MessageRecord, bool)> {
    let inserted = sqlx::query_as::<_, MessageRecord>(
        r#"
        INSERT INTO messages (content, created_at, sender_id, dedup_key)
        VALUES ($1, $2, $3, $4)
        ON CONFLICT (dedup_key) DO NOTHING
        RETURNING id, content, created_at, sender_id, dedup_key
        "#,
    )
    .bind(content)
    .bind(created_at)
    .bind(sender_id)
    .bind(dedup_key)
    .fetch_optional(pool)
    .await?;

    if let Some(record) = inserted {
        return Ok((record, true));
    }

    let existing = sqlx::query_as::<_, MessageRecord>(
        r#"
        SELECT id, content, created_at, sender_id, dedup_key
        FROM messages
        WHERE dedup_key = $1
        "#,
    )
    .bind(dedup_key)
    .fetch_one(pool)
    .await
    .context("Dedup key conflicted but no existing message was found")?;

    Ok((existing, false))
}

/// The most recent `limit` messages, returned oldest first
pub async fn list_recent_messages(pool: &DbPool, limit: i64) -> Result<Vec<MessageRecord>> {
    let mut messages = sqlx::query_as::<_, MessageRecord>(
        r#"
        SELECT id, content, created_at, sender_id, dedup_key
        FROM messages
        ORDER BY created_at DESC, id DESC
        LIMIT $1
        "#,
    )
    .bind(limit)
    .fetch_all(pool)
    .await?;

    messages.reverse();
    Ok(messages)
}
