//! Circuit breaker guarding the habit analytics path.
//!
//! ```text
//! ┌────────┐  max_failures   ┌────────┐
//! │ Closed ├────────────────►│  Open  │
//! └───▲────┘                 └───┬────┘
//!     │   recovery_timeout since │
//!     └──── the last failure ────┘
//! ```
//!
//! While open, calls go straight to the fallback. Once the recovery timeout has passed the
//! breaker closes before the next call and the failure count starts over.

use std::fmt::Display;
use std::future::Future;
use std::time::Duration;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::config::CircuitBreakerConfig;

#[derive(Debug, Default)]
struct BreakerState {
    is_open: bool,
    failure_count: u32,
    last_failure: Option<Instant>,
    last_failure_time: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CircuitBreakerStatus {
    pub is_open: bool,
    pub failure_count: u32,
    pub last_failure_time: Option<DateTime<Utc>>,
    pub max_failures: u32,
    pub recovery_timeout_secs: u64,
}

#[derive(Debug)]
pub struct HabitLearningCircuitBreaker {
    config: CircuitBreakerConfig,
    state: Mutex<BreakerState>,
}

impl Default for HabitLearningCircuitBreaker {
    fn default() -> Self {
        Self::new(CircuitBreakerConfig::default())
    }
}

impl HabitLearningCircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: Mutex::new(BreakerState::default()),
        }
    }

    /// Runs `primary` under the call timeout, or `fallback` when the breaker is open or the
    /// primary fails. Never returns an error.
    pub async fn safe_execute<T, E, Fut, P, F>(&self, operation: &str, primary: P, fallback: F) -> T
    where
        P: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, E>>,
        E: Display,
        F: FnOnce() -> T,
    {
        if !self.allow_primary(operation) {
            debug!(operation, "Circuit open, using fallback");
            return fallback();
        }

        match tokio::time::timeout(self.config.call_timeout, primary()).await {
            Ok(Ok(value)) => value,
            Ok(Err(e)) => {
                self.record_failure(operation, &e.to_string());
                fallback()
            }
            Err(_) => {
                let reason = format!("timed out after {}ms", self.config.call_timeout.as_millis());
                self.record_failure(operation, &reason);
                fallback()
            }
        }
    }

    fn allow_primary(&self, operation: &str) -> bool {
        let mut state = self.state.lock();
        if !state.is_open {
            return true;
        }
        let recovered = state
            .last_failure
            .map_or(true, |at| at.elapsed() >= self.config.recovery_timeout);
        if recovered {
            state.is_open = false;
            state.failure_count = 0;
            info!(operation, "Circuit breaker closed after recovery timeout");
        }
        recovered
    }

    fn record_failure(&self, operation: &str, reason: &str) {
        let mut state = self.state.lock();
        state.failure_count += 1;
        state.last_failure = Some(Instant::now());
        state.last_failure_time = Some(Utc::now());

        warn!(
            operation,
            failure_count = state.failure_count,
            max_failures = self.config.max_failures,
            error = reason,
            "Habit analytics call failed, using fallback"
        );

        if !state.is_open && state.failure_count >= self.config.max_failures {
            state.is_open = true;
            warn!(
                operation,
                recovery_secs = self.config.recovery_timeout.as_secs(),
                "Circuit breaker opened"
            );
        }
    }

    pub fn get_status(&self) -> CircuitBreakerStatus {
        let state = self.state.lock();
        CircuitBreakerStatus {
            is_open: state.is_open,
            failure_count: state.failure_count,
            last_failure_time: state.last_failure_time,
            max_failures: self.config.max_failures,
            recovery_timeout_secs: self.config.recovery_timeout.as_secs(),
        }
    }

    /// Time left before an open breaker lets the primary path run again.
    pub fn time_until_retry(&self) -> Option<Duration> {
        let state = self.state.lock();
        if !state.is_open {
            return None;
        }
        let last = state.last_failure?;
        Some(self.config.recovery_timeout.saturating_sub(last.elapsed()))
    }

    pub fn reset(&self) {
        *self.state.lock() = BreakerState::default();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn breaker() -> HabitLearningCircuitBreaker {
        HabitLearningCircuitBreaker::new(CircuitBreakerConfig::default())
    }

    async fn failing() -> Result<u32, String> {
        Err("boom".to_string())
    }

    #[tokio::test]
    async fn success_passes_through() {
        let breaker = breaker();
        let value = breaker.safe_execute("streak", || async { Ok::<_, String>(7) }, || 0).await;
        assert_eq!(value, 7);
        assert_eq!(breaker.get_status().failure_count, 0);
    }

    #[tokio::test]
    async fn opens_after_max_failures_then_skips_primary() {
        let breaker = breaker();
        for _ in 0..3 {
            assert_eq!(breaker.safe_execute("cadence", failing, || 1).await, 1);
        }
        let status = breaker.get_status();
        assert!(status.is_open);
        assert_eq!(status.failure_count, 3);
        assert!(status.last_failure_time.is_some());

        let calls = AtomicU32::new(0);
        let value = breaker
            .safe_execute(
                "cadence",
                || async {
                    calls.fetch_add(1, Ordering::SeqCst);
                    Ok::<_, String>(99)
                },
                || 2,
            )
            .await;
        assert_eq!(value, 2);
        assert_eq!(calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn slow_primary_counts_as_failure() {
        let breaker = breaker();
        let value = breaker
            .safe_execute(
                "weekly_goal",
                || async {
                    tokio::time::sleep(Duration::from_secs(10)).await;
                    Ok::<_, String>(5)
                },
                || 0,
            )
            .await;
        assert_eq!(value, 0);
        assert_eq!(breaker.get_status().failure_count, 1);
    }

    #[tokio::test(start_paused = true)]
    async fn closes_after_recovery_timeout() {
        let breaker = breaker();
        for _ in 0..3 {
            breaker.safe_execute("streak", failing, || 0).await;
        }
        assert!(breaker.time_until_retry().is_some());

        tokio::time::advance(Duration::from_secs(4 * 60)).await;
        assert_eq!(breaker.safe_execute("streak", || async { Ok::<_, String>(3) }, || 0).await, 0);

        tokio::time::advance(Duration::from_secs(61)).await;
        assert_eq!(breaker.safe_execute("streak", || async { Ok::<_, String>(3) }, || 0).await, 3);
        let status = breaker.get_status();
        assert!(!status.is_open);
        assert_eq!(status.failure_count, 0);
    }

    #[tokio::test]
    async fn reset_clears_state() {
        let breaker = breaker();
        breaker.safe_execute("streak", failing, || 0).await;
        breaker.reset();
        assert_eq!(breaker.get_status().failure_count, 0);
        assert!(breaker.get_status().last_failure_time.is_none());
    }
}
