// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

// Hub domain events.
//
// Every state change of interest is published as a structured event carrying
// the operation, the correlation id (when one applies) and a timestamp.
// Persistence and export are optional subscribers of the event bus; nothing in
// the core waits on them.

use crate::domain::agent::AgentId;
use crate::domain::command::CommandId;
use crate::domain::coordinate::CorrelationId;
use crate::domain::defect::DefectId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Sensor ingestion and defect lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum DefectEvent {
    SensorAccepted {
        defect_id: DefectId,
        correlation_id: CorrelationId,
        merged: bool,
        timestamp: DateTime<Utc>,
    },
    SensorRejected {
        correlation_id: CorrelationId,
        reasons: Vec<String>,
        timestamp: DateTime<Utc>,
    },
    PathPlanned {
        defect_id: DefectId,
        correlation_id: CorrelationId,
        steps: usize,
        total_distance: f64,
        timestamp: DateTime<Utc>,
    },
    PlanningFailed {
        defect_id: DefectId,
        correlation_id: CorrelationId,
        attempt: u32,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    DefectCompleted {
        defect_id: DefectId,
        correlation_id: CorrelationId,
        timestamp: DateTime<Utc>,
    },
    DefectUnrepairable {
        defect_id: DefectId,
        correlation_id: CorrelationId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// Command queue and execution.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum CommandEvent {
    CommandEnqueued {
        command_id: CommandId,
        defect_id: DefectId,
        correlation_id: CorrelationId,
        step: usize,
        timestamp: DateTime<Utc>,
    },
    CommandDuplicate {
        command_id: CommandId,
        existing: CommandId,
        correlation_id: CorrelationId,
        timestamp: DateTime<Utc>,
    },
    CommandAssigned {
        command_id: CommandId,
        agent_id: AgentId,
        correlation_id: CorrelationId,
        timestamp: DateTime<Utc>,
    },
    CommandDeferred {
        command_id: CommandId,
        correlation_id: CorrelationId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    CommandCompleted {
        command_id: CommandId,
        agent_id: AgentId,
        correlation_id: CorrelationId,
        timestamp: DateTime<Utc>,
    },
    CommandFailed {
        command_id: CommandId,
        correlation_id: CorrelationId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
    CommandRequeued {
        previous: CommandId,
        command_id: CommandId,
        correlation_id: CorrelationId,
        attempt: u32,
        timestamp: DateTime<Utc>,
    },
}

/// Agent registry.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum AgentEvent {
    AgentRegistered {
        agent_id: AgentId,
        recovered: bool,
        timestamp: DateTime<Utc>,
    },
    AgentErrored {
        agent_id: AgentId,
        reason: String,
        timestamp: DateTime<Utc>,
    },
}

/// Transport sessions.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "operation", rename_all = "snake_case")]
pub enum LinkEvent {
    LinkStateChanged {
        session: String,
        from: String,
        to: String,
        timestamp: DateTime<Utc>,
    },
    CircuitStateChanged {
        session: String,
        state: String,
        timestamp: DateTime<Utc>,
    },
}

impl DefectEvent {
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            DefectEvent::SensorAccepted { correlation_id, .. }
            | DefectEvent::SensorRejected { correlation_id, .. }
            | DefectEvent::PathPlanned { correlation_id, .. }
            | DefectEvent::PlanningFailed { correlation_id, .. }
            | DefectEvent::DefectCompleted { correlation_id, .. }
            | DefectEvent::DefectUnrepairable { correlation_id, .. } => Some(correlation_id),
        }
    }
}

impl CommandEvent {
    pub fn correlation_id(&self) -> Option<&CorrelationId> {
        match self {
            CommandEvent::CommandEnqueued { correlation_id, .. }
            | CommandEvent::CommandDuplicate { correlation_id, .. }
            | CommandEvent::CommandAssigned { correlation_id, .. }
            | CommandEvent::CommandDeferred { correlation_id, .. }
            | CommandEvent::CommandCompleted { correlation_id, .. }
            | CommandEvent::CommandFailed { correlation_id, .. }
            | CommandEvent::CommandRequeued { correlation_id, .. } => Some(correlation_id),
        }
    }
}
