// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Reconnection backoff: the delay doubles on every consecutive failure,
//! starting at `initial` and capped at `max`, and only a successful connection
//! resets it.

use crate::domain::hub_config::BackoffConfig;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct ReconnectBackoff {
    initial: Duration,
    max: Duration,
    attempt: u32,
}

impl ReconnectBackoff {
    pub fn new(initial: Duration, max: Duration) -> Self {
        Self {
            initial,
            max: max.max(initial),
            attempt: 0,
        }
    }

    /// Delay to wait before the next attempt; advances the sequence.
    pub fn next_delay(&mut self) -> Duration {
        let factor = 1u32.checked_shl(self.attempt).unwrap_or(u32::MAX);
        let delay = self.initial.saturating_mul(factor).min(self.max);
        self.attempt = self.attempt.saturating_add(1);
        delay
    }

    pub fn reset(&mut self) {
        self.attempt = 0;
    }

    pub fn attempts(&self) -> u32 {
        self.attempt
    }
}

impl Default for ReconnectBackoff {
    fn default() -> Self {
        Self::new(Duration::from_secs(1), Duration::from_secs(60))
    }
}

impl From<&BackoffConfig> for ReconnectBackoff {
    fn from(c: &BackoffConfig) -> Self {
        Self::new(Duration::from_secs(c.initial_secs), Duration::from_secs(c.max_secs))
    }
}
