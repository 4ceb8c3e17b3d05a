// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `qnms-swarm`: Swarm Coordination Crate
//!
//! Owns the agent registry and decides which agent executes which queued
//! command.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `AgentRegistry` with the round-robin ring |
//! | [`application`] | Application | `SwarmCoordinator` |
//!
//! ## Key Concepts
//!
//! - **Tick**: one assignment pass over idle agents. Each idle agent gets at
//!   most one command per tick; conflicting commands are deferred in place.
//! - **Heartbeat**: any status message from the twin about an agent. Two
//!   missed intervals put the agent in `error` and its command back in the
//!   queue as a new instance.
//! - **Recovery**: an `error` agent returns to service only by registering
//!   again.

pub mod domain;
pub mod application;

pub use application::*;
pub use domain::*;
