// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Swarm Domain Layer
//!
//! Pure agent bookkeeping. No I/O dependencies.
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`registry`] | `AgentRegistry`, `Registration`, `AgentReport` |

pub mod registry;

pub use registry::*;
