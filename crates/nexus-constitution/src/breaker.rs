//! Circuit breaker
//!
//! ## States
//! - **Closed**: failure count below threshold, operations proceed
//! - **Open**: threshold reached, operations are refused until
//!   `open_until` passes
//!
//! There is no half-open probe: the first check after the timeout reports
//! closed and clears the failure count. `record_success` closes the breaker
//! immediately regardless of the remaining timeout.
//!
//! Breakers are shared by every task in the process, so the counter and
//! deadline sit behind a mutex.

use chrono::{DateTime, Duration, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info};

#[derive(Debug, Default)]
struct BreakerState {
    failure_count: u32,
    open_until: Option<DateTime<Utc>>,
}

/// Named circuit breaker
#[derive(Debug)]
pub struct CircuitBreaker {
    name: String,
    failure_threshold: u32,
    recovery_timeout: Duration,
    state: Mutex<BreakerState>,
}

/// Point-in-time view of a breaker
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BreakerStatus {
    pub name: String,
    pub failure_count: u32,
    pub failure_threshold: u32,
    pub open: bool,
    pub open_until: Option<DateTime<Utc>>,
    /// Seconds until the breaker closes on its own (0 when closed)
    pub seconds_until_close: i64,
}

impl CircuitBreaker {
    /// Create a closed breaker. A zero threshold is treated as 1.
    pub fn new(name: impl Into<String>, failure_threshold: u32, recovery_timeout_seconds: u64) -> Self {
        Self {
            name: name.into(),
            failure_threshold: failure_threshold.max(1),
            recovery_timeout: Duration::seconds(recovery_timeout_seconds as i64),
            state: Mutex::new(BreakerState::default()),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn failure_threshold(&self) -> u32 {
        self.failure_threshold
    }

    pub fn recovery_timeout_seconds(&self) -> i64 {
        self.recovery_timeout.num_seconds()
    }

    pub fn failure_count(&self) -> u32 {
        self.state.lock().failure_count
    }

    /// Whether the breaker currently refuses operations
    pub fn is_open(&self) -> bool {
        self.is_open_at(Utc::now())
    }

    /// `is_open` against an explicit clock reading
    pub fn is_open_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        match state.open_until {
            Some(until) if now < until => true,
            Some(_) => {
                state.failure_count = 0;
                state.open_until = None;
                info!(breaker = %self.name, "Circuit breaker recovered after timeout");
                false
            }
            None => false,
        }
    }

    /// Record a failure. Returns true when this failure opened the breaker.
    pub fn record_failure(&self) -> bool {
        self.record_failure_at(Utc::now())
    }

    /// `record_failure` against an explicit clock reading
    pub fn record_failure_at(&self, now: DateTime<Utc>) -> bool {
        let mut state = self.state.lock();
        let was_open = matches!(state.open_until, Some(until) if now < until);

        state.failure_count = state.failure_count.saturating_add(1);
        debug!(
            breaker = %self.name,
            failures = state.failure_count,
            threshold = self.failure_threshold,
            "Circuit breaker failure recorded"
        );

        if state.failure_count >= self.failure_threshold {
            state.open_until = Some(now + self.recovery_timeout);
            if !was_open {
                error!(
                    breaker = %self.name,
                    failures = state.failure_count,
                    recovery_secs = self.recovery_timeout.num_seconds(),
                    "Circuit breaker OPEN"
                );
                return true;
            }
        }
        false
    }

    /// Reset the failure count and close the breaker immediately
    pub fn record_success(&self) {
        let mut state = self.state.lock();
        if state.failure_count > 0 || state.open_until.is_some() {
            debug!(breaker = %self.name, "Circuit breaker reset by success");
        }
        state.failure_count = 0;
        state.open_until = None;
    }

    pub fn status(&self) -> BreakerStatus {
        self.status_at(Utc::now())
    }

    pub fn status_at(&self, now: DateTime<Utc>) -> BreakerStatus {
        let open = self.is_open_at(now);
        let state = self.state.lock();
        let seconds_until_close = match state.open_until {
            Some(until) if open => (until - now).num_seconds().max(0),
            _ => 0,
        };

        BreakerStatus {
            name: self.name.clone(),
            failure_count: state.failure_count,
            failure_threshold: self.failure_threshold,
            open,
            open_until: state.open_until,
            seconds_until_close,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    #[test]
    fn test_opens_on_threshold() {
        let breaker = CircuitBreaker::new("supabase", 3, 30);
        let now = Utc::now();

        assert!(!breaker.record_failure_at(now));
        assert!(!breaker.record_failure_at(now));
        assert!(!breaker.is_open_at(now));

        assert!(breaker.record_failure_at(now));
        assert!(breaker.is_open_at(now));
        assert!(breaker.is_open_at(now + Duration::seconds(29)));
    }

    #[test]
    fn test_success_closes_before_timeout() {
        let breaker = CircuitBreaker::new("supabase", 3, 30);
        let now = Utc::now();
        for _ in 0..3 {
            breaker.record_failure_at(now);
        }
        assert!(breaker.is_open_at(now));

        breaker.record_success();
        assert!(!breaker.is_open_at(now));
        assert_eq!(breaker.failure_count(), 0);
    }

    #[test]
    fn test_recovers_after_timeout_without_reset() {
        let breaker = CircuitBreaker::new("evolution_cycle", 3, 60);
        let now = Utc::now();
        for _ in 0..3 {
            breaker.record_failure_at(now);
        }

        assert!(!breaker.is_open_at(now + Duration::seconds(61)));
        assert_eq!(breaker.failure_count(), 0);

        // A single new failure does not reopen a recovered breaker
        breaker.record_failure_at(now + Duration::seconds(62));
        assert!(!breaker.is_open_at(now + Duration::seconds(62)));
    }

    #[test]
    fn test_reopen_only_reported_once() {
        let breaker = CircuitBreaker::new("vapi", 2, 60);
        let now = Utc::now();
        breaker.record_failure_at(now);
        assert!(breaker.record_failure_at(now));
        assert!(!breaker.record_failure_at(now));
        assert!(breaker.is_open_at(now));
    }

    #[test]
    fn test_status_snapshot() {
        let breaker = CircuitBreaker::new("ai_cascade", 1, 60);
        let now = Utc::now();
        breaker.record_failure_at(now);

        let status = breaker.status_at(now + Duration::seconds(10));
        assert!(status.open);
        assert_eq!(status.seconds_until_close, 50);
        assert_eq!(status.failure_count, 1);
    }

    #[test]
    fn test_concurrent_failures_are_counted() {
        let breaker = Arc::new(CircuitBreaker::new("shared", 1000, 60));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let b = breaker.clone();
                std::thread::spawn(move || {
                    for _ in 0..100 {
                        b.record_failure();
                    }
                })
            })
            .collect();
        for h in handles {
            h.join().unwrap();
        }
        assert_eq!(breaker.failure_count(), 800);
    }
}
