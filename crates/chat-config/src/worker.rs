// ============================================================================
// Ingest Worker Configuration
// ============================================================================

use crate::constants::*;
use std::time::Duration;

/// Tuning for the consumer loop
#[derive(Clone, Debug)]
pub struct WorkerConfig {
    /// Maximum records pulled per batch
    pub max_batch_size: usize,
    /// How long one poll waits for the first record (milliseconds)
    pub poll_timeout_ms: u64,
    /// Initial backoff after a failed record (milliseconds)
    pub retry_backoff_ms: u64,
    /// Upper bound for the exponential backoff (milliseconds)
    pub max_retry_backoff_ms: u64,
    /// Number of independent consumers in this process
    pub concurrency: usize,
    /// Interval between summary log lines (seconds)
    pub metrics_log_interval_secs: u64,
}

impl WorkerConfig {
    pub fn poll_timeout(&self) -> Duration {
        Duration::from_millis(self.poll_timeout_ms)
    }

    /// Backoff for the given consecutive failure count (1-based), doubling up to the cap.
    pub fn backoff_for(&self, consecutive_failures: u32) -> Duration {
        let exponent = consecutive_failures.saturating_sub(1).min(16);
        let ms = self
            .retry_backoff_ms
            .saturating_mul(2_u64.saturating_pow(exponent))
            .min(self.max_retry_backoff_ms);
        Duration::from_millis(ms)
    }

    pub(crate) fn from_env() -> Self {
        Self {
            max_batch_size: std::env::var("WORKER_MAX_BATCH_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(DEFAULT_MAX_BATCH_SIZE),
            poll_timeout_ms: std::env::var("WORKER_POLL_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_POLL_TIMEOUT_MS),
            retry_backoff_ms: std::env::var("WORKER_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_RETRY_BACKOFF_MS),
            max_retry_backoff_ms: std::env::var("WORKER_MAX_RETRY_BACKOFF_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_MAX_RETRY_BACKOFF_MS),
            concurrency: std::env::var("WORKER_CONCURRENCY")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v: &usize| *v > 0)
                .unwrap_or(DEFAULT_WORKER_CONCURRENCY),
            metrics_log_interval_secs: std::env::var("WORKER_METRICS_LOG_INTERVAL_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_METRICS_LOG_INTERVAL_SECS),
        }
    }
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            max_batch_size: DEFAULT_MAX_BATCH_SIZE,
            poll_timeout_ms: DEFAULT_POLL_TIMEOUT_MS,
            retry_backoff_ms: DEFAULT_RETRY_BACKOFF_MS,
            max_retry_backoff_ms: DEFAULT_MAX_RETRY_BACKOFF_MS,
            concurrency: DEFAULT_WORKER_CONCURRENCY,
            metrics_log_interval_secs: DEFAULT_METRICS_LOG_INTERVAL_SECS,
        }
    }
}
