// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod backoff;
pub mod circuit_breaker;
pub mod event_bus;
pub mod planner;
pub mod twin;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use event_bus::{EventBus, HubEvent};
