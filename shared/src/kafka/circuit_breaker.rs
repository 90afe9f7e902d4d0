// ============================================================================
// Circuit Breaker for broker sends
// ============================================================================
//
// When the broker is unreachable every publish would otherwise wait for the
// full delivery timeout. After `failure_threshold` consecutive failures the
// breaker opens and sends are rejected immediately. Once `reset_timeout` has
// passed, the breaker is half-open: one trial send at a time is let through
// while the rest are still rejected. Two successful trials close it, one
// failure reopens it.
//
// ============================================================================

use chat_config::PublisherConfig;
use std::future::Future;
use std::sync::Mutex;
use std::time::{Duration, Instant};

const HALF_OPEN_SUCCESSES_TO_CLOSE: u32 = 2;

#[derive(Debug, Clone)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    /// Per-call timeout
    pub timeout: Duration,
    pub reset_timeout: Duration,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self::from(&PublisherConfig::default())
    }
}

impl From<&PublisherConfig> for CircuitBreakerConfig {
    fn from(config: &PublisherConfig) -> Self {
        Self {
            failure_threshold: config.circuit_failure_threshold.max(1),
            timeout: config.send_timeout(),
            reset_timeout: config.circuit_reset_timeout(),
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum CircuitBreakerError<E> {
    /// Rejected without calling the broker
    #[error("circuit breaker is open (last failure {0:?} ago)")]
    Open(Duration),

    #[error("circuit breaker timeout ({timeout:?}) exceeded")]
    Timeout { timeout: Duration },

    #[error("operation failed: {0}")]
    Inner(#[source] E),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum State {
    Closed,
    Open,
    HalfOpen,
}

#[derive(Debug, Default)]
struct Counters {
    consecutive_failures: u32,
    open: bool,
    last_failure: Option<Instant>,
    half_open_successes: u32,
    /// A half-open trial send is running
    trial_in_flight: bool,
}

/// Clears `trial_in_flight` however the trial ends, including cancellation
struct TrialGuard<'a> {
    breaker: &'a CircuitBreaker,
}

impl Drop for TrialGuard<'_> {
    fn drop(&mut self) {
        self.breaker.counters().trial_in_flight = false;
    }
}

/// Thread-safe breaker shared by all publish tasks
pub struct CircuitBreaker {
    counters: Mutex<Counters>,
    config: CircuitBreakerConfig,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            counters: Mutex::new(Counters::default()),
            config,
        }
    }

    fn counters(&self) -> std::sync::MutexGuard<'_, Counters> {
        // counters stay consistent even if a holder panicked
        self.counters
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Run `f` under the breaker.
    ///
    /// Returns `Open` without polling `f` while the circuit is open (or while
    /// another half-open trial is running), `Timeout` if `f` outlives
    /// `config.timeout`, and `Inner` for `f`'s own error.
    pub async fn call<F, T, E>(&self, f: F) -> Result<T, CircuitBreakerError<E>>
    where
        F: Future<Output = Result<T, E>>,
    {
        let _trial = {
            let mut counters = self.counters();
            if counters.open {
                let elapsed = counters
                    .last_failure
                    .map(|at| at.elapsed())
                    .unwrap_or_default();
                if elapsed < self.config.reset_timeout {
                    tracing::warn!(
                        elapsed_ms = elapsed.as_millis() as u64,
                        "Circuit breaker OPEN - rejecting send"
                    );
                    return Err(CircuitBreakerError::Open(elapsed));
                }
                if counters.trial_in_flight {
                    tracing::debug!("Circuit breaker half-open - trial send already running");
                    return Err(CircuitBreakerError::Open(elapsed));
                }
                counters.trial_in_flight = true;
                tracing::info!(
                    elapsed_seconds = elapsed.as_secs(),
                    "Circuit breaker half-open - trying broker"
                );
                Some(TrialGuard { breaker: self })
            } else {
                None
            }
        };

        match tokio::time::timeout(self.config.timeout, f).await {
            Err(_) => {
                self.record_failure();
                tracing::warn!(
                    timeout_ms = self.config.timeout.as_millis() as u64,
                    "Circuit breaker timeout"
                );
                Err(CircuitBreakerError::Timeout {
                    timeout: self.config.timeout,
                })
            }
            Ok(Ok(value)) => {
                self.record_success();
                Ok(value)
            }
            Ok(Err(error)) => {
                self.record_failure();
                Err(CircuitBreakerError::Inner(error))
            }
        }
    }

    fn record_success(&self) {
        let mut counters = self.counters();
        if counters.open {
            counters.half_open_successes += 1;
            if counters.half_open_successes >= HALF_OPEN_SUCCESSES_TO_CLOSE {
                *counters = Counters::default();
                tracing::info!("Circuit breaker CLOSED - broker recovered");
            }
        } else {
            counters.consecutive_failures = 0;
        }
    }

    fn record_failure(&self) {
        let mut counters = self.counters();
        counters.consecutive_failures += 1;
        counters.last_failure = Some(Instant::now());
        counters.half_open_successes = 0;

        if counters.consecutive_failures >= self.config.failure_threshold {
            if !counters.open {
                tracing::error!(
                    failures = counters.consecutive_failures,
                    threshold = self.config.failure_threshold,
                    reset_timeout_seconds = self.config.reset_timeout.as_secs(),
                    "Circuit breaker OPENED - broker failing"
                );
            }
            counters.open = true;
        } else {
            tracing::warn!(
                failures = counters.consecutive_failures,
                threshold = self.config.failure_threshold,
                "Circuit breaker failure recorded"
            );
        }
    }

    pub fn state(&self) -> State {
        let counters = self.counters();
        match (counters.open, counters.last_failure) {
            (false, _) => State::Closed,
            (true, Some(at)) if at.elapsed() >= self.config.reset_timeout => State::HalfOpen,
            (true, _) => State::Open,
        }
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.counters().consecutive_failures
    }
}

impl Default for CircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker(threshold: u32, timeout_ms: u64, reset_ms: u64) -> CircuitBreaker {
        CircuitBreaker::new(CircuitBreakerConfig {
            failure_threshold: threshold,
            timeout: Duration::from_millis(timeout_ms),
            reset_timeout: Duration::from_millis(reset_ms),
        })
    }

    #[test]
    fn test_config_from_publisher_config() {
        let config = CircuitBreakerConfig::from(&PublisherConfig {
            circuit_failure_threshold: 0,
            send_timeout_ms: 250,
            circuit_reset_timeout_secs: 7,
            wait_timeout_ms: 1_000,
        });
        assert_eq!(config.failure_threshold, 1);
        assert_eq!(config.timeout, Duration::from_millis(250));
        assert_eq!(config.reset_timeout, Duration::from_secs(7));
    }

    #[tokio::test]
    async fn test_opens_after_threshold_and_rejects_without_running() {
        let cb = breaker(3, 1_000, 30_000);
        for _ in 0..3 {
            let result = cb
                .call(async { Err::<(), _>(anyhow::anyhow!("broker down")) })
                .await;
            assert!(matches!(result, Err(CircuitBreakerError::Inner(_))));
        }
        assert_eq!(cb.state(), State::Open);

        let calls = AtomicU32::new(0);
        let result = cb
            .call(async {
                calls.fetch_add(1, Ordering::Relaxed);
                Ok::<_, anyhow::Error>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Open(_))));
        assert_eq!(calls.load(Ordering::Relaxed), 0);
    }

    #[tokio::test]
    async fn test_timeout_counts_as_failure() {
        let cb = breaker(5, 50, 30_000);
        let result = cb
            .call(async {
                tokio::time::sleep(Duration::from_millis(200)).await;
                Ok::<_, anyhow::Error>(())
            })
            .await;
        assert!(matches!(result, Err(CircuitBreakerError::Timeout { .. })));
        assert_eq!(cb.consecutive_failures(), 1);
        assert_eq!(cb.state(), State::Closed);
    }

    #[tokio::test]
    async fn test_half_open_recovery_and_relapse() {
        let cb = breaker(2, 1_000, 50);
        for _ in 0..2 {
            let _ = cb.call(async { Err::<(), _>(anyhow::anyhow!("fail")) }).await;
        }
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cb.state(), State::HalfOpen);

        // a failed trial reopens immediately
        let _ = cb.call(async { Err::<(), _>(anyhow::anyhow!("still down")) }).await;
        assert_eq!(cb.state(), State::Open);

        tokio::time::sleep(Duration::from_millis(80)).await;
        for _ in 0..2 {
            assert!(cb.call(async { Ok::<_, anyhow::Error>(()) }).await.is_ok());
        }
        assert_eq!(cb.state(), State::Closed);
        assert_eq!(cb.consecutive_failures(), 0);
    }

    #[tokio::test]
    async fn test_half_open_lets_one_trial_through() {
        let cb = breaker(1, 1_000, 50);
        let _ = cb.call(async { Err::<(), _>(anyhow::anyhow!("fail")) }).await;
        tokio::time::sleep(Duration::from_millis(80)).await;
        assert_eq!(cb.state(), State::HalfOpen);

        let calls = AtomicU32::new(0);
        let slow = cb.call(async {
            calls.fetch_add(1, Ordering::SeqCst);
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, anyhow::Error>(())
        });
        let concurrent = async {
            // let the slow trial start first
            tokio::time::sleep(Duration::from_millis(10)).await;
            let mut results = Vec::new();
            for _ in 0..3 {
                results.push(
                    cb.call(async {
                        calls.fetch_add(1, Ordering::SeqCst);
                        Ok::<_, anyhow::Error>(())
                    })
                    .await,
                );
            }
            results
        };

        let (slow_result, others) = tokio::join!(slow, concurrent);
        assert!(slow_result.is_ok());
        assert!(others
            .iter()
            .all(|r| matches!(r, Err(CircuitBreakerError::Open(_)))));
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        // the next trial may go through and closes the circuit
        assert!(cb.call(async { Ok::<_, anyhow::Error>(()) }).await.is_ok());
        assert_eq!(cb.state(), State::Closed);
    }
}
