// ============================================================================
// Publisher Configuration
// ============================================================================

use crate::constants::*;
use std::time::Duration;

/// Publisher-side limits: circuit breaker and blocking wait
#[derive(Clone, Debug)]
pub struct PublisherConfig {
    /// Consecutive broker failures before the circuit opens
    pub circuit_failure_threshold: u32,
    /// Per-send timeout enforced by the circuit breaker (milliseconds)
    pub send_timeout_ms: u64,
    /// How long an open circuit rejects sends before probing again (seconds)
    pub circuit_reset_timeout_secs: u64,
    /// How long `publish_and_wait` waits for the broker before giving up (milliseconds)
    pub wait_timeout_ms: u64,
}

impl PublisherConfig {
    pub fn send_timeout(&self) -> Duration {
        Duration::from_millis(self.send_timeout_ms)
    }

    pub fn circuit_reset_timeout(&self) -> Duration {
        Duration::from_secs(self.circuit_reset_timeout_secs)
    }

    pub fn wait_timeout(&self) -> Duration {
        Duration::from_millis(self.wait_timeout_ms)
    }

    pub(crate) fn from_env() -> Self {
        Self {
            circuit_failure_threshold: std::env::var("PUBLISHER_CIRCUIT_FAILURE_THRESHOLD")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CIRCUIT_FAILURE_THRESHOLD),
            send_timeout_ms: std::env::var("PUBLISHER_SEND_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PRODUCER_DELIVERY_TIMEOUT_MS as u64),
            circuit_reset_timeout_secs: std::env::var("PUBLISHER_CIRCUIT_RESET_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS),
            wait_timeout_ms: std::env::var("PUBLISHER_WAIT_TIMEOUT_MS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(DEFAULT_PUBLISH_WAIT_TIMEOUT_MS),
        }
    }
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            circuit_failure_threshold: DEFAULT_CIRCUIT_FAILURE_THRESHOLD,
            send_timeout_ms: DEFAULT_PRODUCER_DELIVERY_TIMEOUT_MS as u64,
            circuit_reset_timeout_secs: DEFAULT_CIRCUIT_RESET_TIMEOUT_SECS,
            wait_timeout_ms: DEFAULT_PUBLISH_WAIT_TIMEOUT_MS,
        }
    }
}
