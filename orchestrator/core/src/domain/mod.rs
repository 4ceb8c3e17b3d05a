// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Domain
//!
//! Pure types and rules of the hub: coordinates, commands, defects, agents,
//! the safety validator and the planner contract. Nothing here performs I/O.
//!
//! # Architecture
//!
//! - **Layer:** Domain Layer

pub mod agent;
pub mod command;
pub mod coordinate;
pub mod defect;
pub mod errors;
pub mod events;
pub mod hub_config;
pub mod planner;
pub mod safety;
