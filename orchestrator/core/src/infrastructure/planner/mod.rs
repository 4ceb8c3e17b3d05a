// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! Path planner adapters.

pub mod guarded;
pub mod http;

pub use guarded::PlannerSession;
pub use http::HttpPathPlanner;
