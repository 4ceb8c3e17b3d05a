// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Circuit breaker for remote sessions.
//!
//! Counts *consecutive* failures. Transitions:
//!
//! - `Closed → Open` once `failure_threshold` failures happen in a row
//! - `Open → HalfOpen` once `open_timeout` has elapsed
//! - `HalfOpen → Closed` on the first success
//! - `HalfOpen → Open` on any failure
//!
//! Time is passed in explicitly so the state machine can be driven
//! deterministically.

use crate::domain::hub_config::BreakerConfig;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::{Duration, Instant};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    Closed,
    Open,
    HalfOpen,
}

impl fmt::Display for CircuitState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CircuitState::Closed => "closed",
            CircuitState::Open => "open",
            CircuitState::HalfOpen => "half_open",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CircuitBreakerConfig {
    pub failure_threshold: u32,
    pub open_timeout: Duration,
}

impl CircuitBreakerConfig {
    pub fn new(failure_threshold: u32, open_timeout: Duration) -> Self {
        Self {
            failure_threshold: failure_threshold.max(1),
            open_timeout,
        }
    }

    /// 3 failures, 10 s open.
    pub fn twin() -> Self {
        Self::new(3, Duration::from_secs(10))
    }

    /// 5 failures, 30 s open.
    pub fn planner() -> Self {
        Self::new(5, Duration::from_secs(30))
    }
}

impl From<&BreakerConfig> for CircuitBreakerConfig {
    fn from(c: &BreakerConfig) -> Self {
        Self::new(c.failure_threshold, Duration::from_secs(c.open_secs))
    }
}

/// Returned instead of attempting a call while the circuit is open.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("circuit open, retry in {retry_after:?}")]
pub struct CircuitOpen {
    pub retry_after: Duration,
}

#[derive(Debug, Clone)]
pub struct CircuitBreaker {
    config: CircuitBreakerConfig,
    state: CircuitState,
    consecutive_failures: u32,
    opened_at: Option<Instant>,
}

impl CircuitBreaker {
    pub fn new(config: CircuitBreakerConfig) -> Self {
        Self {
            config,
            state: CircuitState::Closed,
            consecutive_failures: 0,
            opened_at: None,
        }
    }

    pub fn state(&self) -> CircuitState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Promote `Open` to `HalfOpen` when the open period is over.
    pub fn poll(&mut self, now: Instant) -> CircuitState {
        if self.state == CircuitState::Open && self.retry_after(now).is_none() {
            self.state = CircuitState::HalfOpen;
        }
        self.state
    }

    /// Time left before a probe is allowed, if the circuit is open.
    pub fn retry_after(&self, now: Instant) -> Option<Duration> {
        match (self.state, self.opened_at) {
            (CircuitState::Open, Some(opened)) => {
                let elapsed = now.saturating_duration_since(opened);
                self.config
                    .open_timeout
                    .checked_sub(elapsed)
                    .filter(|left| !left.is_zero())
            }
            _ => None,
        }
    }

    /// Fail fast when open; otherwise allow the call.
    pub fn try_acquire(&mut self, now: Instant) -> Result<(), CircuitOpen> {
        match self.poll(now) {
            CircuitState::Open => Err(CircuitOpen {
                retry_after: self.retry_after(now).unwrap_or_default(),
            }),
            _ => Ok(()),
        }
    }

    pub fn record_success(&mut self) {
        self.consecutive_failures = 0;
        self.state = CircuitState::Closed;
        self.opened_at = None;
    }

    pub fn record_failure(&mut self, now: Instant) {
        self.consecutive_failures = self.consecutive_failures.saturating_add(1);
        let trip = match self.state {
            CircuitState::HalfOpen => true,
            CircuitState::Closed => self.consecutive_failures >= self.config.failure_threshold,
            CircuitState::Open => false,
        };
        if trip {
            self.state = CircuitState::Open;
            self.opened_at = Some(now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_opens_after_threshold() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::twin());

        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitState::Closed);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitState::Open);

        let err = breaker.try_acquire(now + Duration::from_secs(4)).unwrap_err();
        assert_eq!(err.retry_after, Duration::from_secs(6));
    }

    #[test]
    fn test_success_resets_consecutive_count() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::twin());
        breaker.record_failure(now);
        breaker.record_failure(now);
        breaker.record_success();
        breaker.record_failure(now);
        breaker.record_failure(now);
        assert_eq!(breaker.state(), CircuitState::Closed);
    }

    #[test]
    fn test_half_open_probe() {
        let now = Instant::now();
        let mut breaker = CircuitBreaker::new(CircuitBreakerConfig::planner());
        for _ in 0..5 {
            breaker.record_failure(now);
        }
        assert_eq!(breaker.poll(now + Duration::from_secs(29)), CircuitState::Open);
        assert_eq!(breaker.poll(now + Duration::from_secs(30)), CircuitState::HalfOpen);

        // a failed probe re-opens immediately
        let later = now + Duration::from_secs(31);
        breaker.record_failure(later);
        assert_eq!(breaker.state(), CircuitState::Open);
        assert!(breaker.try_acquire(later + Duration::from_secs(1)).is_err());

        // a successful probe closes
        assert!(breaker.try_acquire(later + Duration::from_secs(30)).is_ok());
        breaker.record_success();
        assert_eq!(breaker.state(), CircuitState::Closed);
        assert_eq!(breaker.consecutive_failures(), 0);
    }
}
