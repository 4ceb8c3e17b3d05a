// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Swarm application services.
//!
//! # Architecture
//!
//! - **Layer:** Application Layer
//! - **Purpose:** Assignment, acknowledgment handling and failure detection

pub mod coordinator;

pub use coordinator::{AckOutcome, CoordinatorError, SwarmCoordinator, TickReport};
