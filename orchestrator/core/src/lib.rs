// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! QNMS Core
//!
//! Domain model, safety validation, command queue and the remote sessions
//! (digital twin, path planner) of the QNMS orchestration hub.
//!
//! # Architecture
//!
//! - **Layer:** Core System
//! - **Purpose:** Everything below the swarm coordinator and the HTTP API

pub mod domain;
pub mod application;
pub mod infrastructure;

pub use domain::*;
