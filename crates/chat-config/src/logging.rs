// ============================================================================
// Logging Configuration
// ============================================================================

/// Controls what user-identifying data may appear in logs
#[derive(Clone, Debug)]
pub struct LoggingConfig {
    /// Log message content (off by default, content is user data)
    pub enable_message_content: bool,
    /// Salt for `log_safe_id` hashing of sender ids
    pub hash_salt: String,
}

impl LoggingConfig {
    pub(crate) fn from_env() -> Self {
        Self {
            enable_message_content: std::env::var("LOG_MESSAGE_CONTENT")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(false),
            hash_salt: std::env::var("LOG_HASH_SALT").unwrap_or_default(),
        }
    }

    /// True when no `LOG_HASH_SALT` was configured. Binaries warn about it once
    /// tracing is up.
    pub fn salt_missing(&self) -> bool {
        self.hash_salt.is_empty()
    }
}
