// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Planner session: circuit breaker, request timeout and the
//! one-outstanding-request-per-defect rule around any [`PathPlanner`].

use crate::domain::defect::DefectId;
use crate::domain::hub_config::PlannerConfig;
use crate::domain::planner::{PathPlanner, PlannedPath, PlanningError, PlanningRequest};
use crate::infrastructure::circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};

pub struct PlannerSession {
    inner: Arc<dyn PathPlanner>,
    breaker: Mutex<CircuitBreaker>,
    timeout: Duration,
    in_flight: Mutex<HashSet<DefectId>>,
}

/// Releases the defect's in-flight slot however the request ends.
struct InFlightGuard<'a> {
    set: &'a Mutex<HashSet<DefectId>>,
    defect_id: DefectId,
}

impl Drop for InFlightGuard<'_> {
    fn drop(&mut self) {
        self.set.lock().remove(&self.defect_id);
    }
}

impl PlannerSession {
    pub fn new(inner: Arc<dyn PathPlanner>, breaker: CircuitBreakerConfig, timeout: Duration) -> Self {
        Self {
            inner,
            breaker: Mutex::new(CircuitBreaker::new(breaker)),
            timeout,
            in_flight: Mutex::new(HashSet::new()),
        }
    }

    pub fn from_config(inner: Arc<dyn PathPlanner>, config: &PlannerConfig) -> Self {
        Self::new(
            inner,
            CircuitBreakerConfig::from(&config.breaker),
            Duration::from_millis(config.timeout_ms),
        )
    }

    pub fn breaker_state(&self) -> CircuitState {
        self.breaker.lock().poll(Instant::now())
    }

    pub fn outstanding(&self) -> usize {
        self.in_flight.lock().len()
    }

    fn record(&self, result: &Result<PlannedPath, PlanningError>) {
        let mut breaker = self.breaker.lock();
        let before = breaker.state();
        match result {
            Ok(_) => breaker.record_success(),
            Err(e) if e.trips_breaker() => breaker.record_failure(Instant::now()),
            // the planner answered; the link is healthy
            Err(_) => breaker.record_success(),
        }
        let after = breaker.state();
        if after != before {
            match after {
                CircuitState::Open => warn!(failures = breaker.consecutive_failures(), "Planner circuit opened"),
                _ => info!(state = %after, "Planner circuit state changed"),
            }
        }
    }
}

#[async_trait]
impl PathPlanner for PlannerSession {
    async fn plan(&self, request: &PlanningRequest) -> Result<PlannedPath, PlanningError> {
        self.breaker
            .lock()
            .try_acquire(Instant::now())
            .map_err(|open| PlanningError::CircuitOpen {
                retry_after: open.retry_after,
            })?;

        if !self.in_flight.lock().insert(request.defect_id) {
            return Err(PlanningError::InFlight(request.defect_id));
        }
        let _guard = InFlightGuard {
            set: &self.in_flight,
            defect_id: request.defect_id,
        };

        let result = match tokio::time::timeout(self.timeout, self.inner.plan(request)).await {
            Ok(result) => result,
            Err(_) => Err(PlanningError::Timeout(self.timeout)),
        };
        self.record(&result);
        result
    }
}
