// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! QNMS hub library - exposes testable components
//!
//! # Architecture
//!
//! - **Layer:** Interface / Presentation Layer
//! - **Purpose:** Hub runtime, HTTP API, daemon client and CLI commands

pub mod commands;
pub mod daemon;
pub mod hub;
